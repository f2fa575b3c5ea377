use chrono::{ DateTime, NaiveDateTime, TimeZone, Utc };
use serde::Deserialize;
use serde_json::Value;

use crate::error::TelemetryError;
use crate::types::{ AgentState, FlightStatus, Timestamp, TrackRecord, WireTelemetry, WireTrackPoint };

/// Fixed-point scale of wire longitude/latitude
pub const COORD_SCALE: f64 = 1e7;

/// Fixed-point scale of wire altitude/height
pub const ALTITUDE_SCALE: f64 = 10.0;

/// Turn one raw stream record into an `AgentState`
pub fn normalize(raw: &Value) -> Result<AgentState, TelemetryError> {
    if !raw.is_object() {
        return Err(TelemetryError::InvalidTelemetry("record is not an object".to_string()));
    }

    let wire = WireTelemetry::deserialize(raw).map_err(|e| {
        TelemetryError::InvalidTelemetry(e.to_string())
    })?;
    check_finite(&[wire.longitude, wire.latitude, wire.altitude])?;

    Ok(AgentState {
        id: wire.flight_code,
        longitude: wire.longitude / COORD_SCALE,
        latitude: wire.latitude / COORD_SCALE,
        altitude: wire.altitude / ALTITUDE_SCALE,
        ground_height: finite_or_zero(wire.height) / ALTITUDE_SCALE,
        heading: finite_or_zero(wire.course).rem_euclid(360.0),
        speed: finite_or_zero(wire.vs),
        agent_type: wire.uav_type.unwrap_or_default(),
        flight_id: wire.order_id,
        timestamp: parse_timestamp(wire.time_stamp.as_ref()),
        battery_percent: battery(wire.soc).unwrap_or(0),
        status: FlightStatus::parse(wire.flight_status.as_deref()),
    })
}

/// Decode one history point with the same scale factors as the stream
pub fn normalize_track_point(wire: WireTrackPoint) -> Result<TrackRecord, TelemetryError> {
    check_finite(&[wire.longitude, wire.latitude, wire.altitude])?;

    Ok(TrackRecord {
        flight_id: wire.order_id,
        agent_id: wire.flight_code,
        longitude: wire.longitude / COORD_SCALE,
        latitude: wire.latitude / COORD_SCALE,
        altitude: wire.altitude / ALTITUDE_SCALE,
        status: FlightStatus::parse(wire.flight_status.as_deref()),
        timestamp: parse_timestamp(wire.time_stamp.as_ref()),
        battery_percent: battery(wire.soc),
        ground_speed: wire.gs.filter(|gs| gs.is_finite()),
        extra: wire.extra,
    })
}

/// Parse the loosely typed `timeStamp` field
///
/// Numbers above 1e12 are milliseconds, smaller ones seconds. Strings are tried
/// as RFC 3339 and as `YYYY-MM-DD HH:MM:SS` (UTC, `/` separators allowed).
/// Anything else falls back to the receipt time.
pub fn parse_timestamp(raw: Option<&Value>) -> Timestamp {
    raw.and_then(|value| match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => from_str(s),
        _ => None,
    }).unwrap_or_else(Utc::now)
}

fn from_epoch(value: f64) -> Option<Timestamp> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value > 1e12 { value } else { value * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}

fn from_str(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let dashed = raw.replace('/', "-");
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&dashed, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn battery(soc: Option<f64>) -> Option<u8> {
    soc.filter(|v| v.is_finite()).map(|v| v.round().clamp(0.0, 100.0) as u8)
}

fn finite_or_zero(v: Option<f64>) -> f64 {
    v.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn check_finite(values: &[f64]) -> Result<(), TelemetryError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(TelemetryError::InvalidTelemetry("non-finite coordinate".to_string()))
    }
}

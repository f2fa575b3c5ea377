use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Deserializer, Serialize };
use serde_json::{ Map, Value };

/// Point in time attached to telemetry and track points
pub type Timestamp = DateTime<Utc>;

/// Raw telemetry record as pushed over the stream
///
/// Coordinates are fixed-point: longitude/latitude scaled by 1e7,
/// altitude/height scaled by 10.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTelemetry {
    /// Vehicle identifier
    #[serde(rename = "flightCode", deserialize_with = "de_id")]
    pub flight_code: String,

    /// Flight (mission) identifier; absent while the vehicle is idle
    #[serde(rename = "orderID", alias = "OrderID", default, deserialize_with = "de_opt_id")]
    pub order_id: Option<String>,

    /// Degrees * 1e7
    pub longitude: f64,

    /// Degrees * 1e7
    pub latitude: f64,

    /// Meters * 10
    pub altitude: f64,

    /// Height above ground, meters * 10
    #[serde(default)]
    pub height: Option<f64>,

    /// Heading in degrees
    #[serde(default)]
    pub course: Option<f64>,

    #[serde(rename = "VS", default)]
    pub vs: Option<f64>,

    #[serde(rename = "uavType", default)]
    pub uav_type: Option<String>,

    /// Seconds, milliseconds or a date string
    #[serde(rename = "timeStamp", default)]
    pub time_stamp: Option<Value>,

    /// State of charge in percent
    #[serde(rename = "SOC", default)]
    pub soc: Option<f64>,

    #[serde(rename = "flightStatus", default)]
    pub flight_status: Option<String>,
}

/// One point of a `GET /record/recentTracks` response
#[derive(Debug, Clone, Deserialize)]
pub struct WireTrackPoint {
    #[serde(rename = "orderID", alias = "OrderID", deserialize_with = "de_id")]
    pub order_id: String,

    #[serde(rename = "flightCode", default, deserialize_with = "de_opt_id")]
    pub flight_code: Option<String>,

    pub longitude: f64,

    pub latitude: f64,

    pub altitude: f64,

    #[serde(rename = "flightStatus", default)]
    pub flight_status: Option<String>,

    #[serde(rename = "timeStamp", default)]
    pub time_stamp: Option<Value>,

    #[serde(rename = "SOC", default)]
    pub soc: Option<f64>,

    /// Ground speed
    #[serde(rename = "GS", default)]
    pub gs: Option<f64>,

    /// Fields not modelled here (payload, wind, ...), kept for info panels
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// History response envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackResponse {
    /// Flat point list; `null` means no data
    #[serde(default)]
    pub track: Option<Vec<WireTrackPoint>>,
}

/// Latest known state of one agent (drone)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentState {
    pub id: String,

    /// Degrees
    pub longitude: f64,

    /// Degrees
    pub latitude: f64,

    /// Meters
    pub altitude: f64,

    /// Height above ground in meters
    pub ground_height: f64,

    /// Degrees, normalized to 0..360
    pub heading: f64,

    pub speed: f64,

    pub agent_type: String,

    /// `None` when the record carried no flight id
    pub flight_id: Option<String>,

    pub timestamp: Timestamp,

    /// 0..=100
    pub battery_percent: u8,

    pub status: FlightStatus,
}

impl AgentState {
    /// Position of this snapshot as a path point
    pub fn track_point(&self) -> TrackPoint {
        TrackPoint {
            longitude: self.longitude,
            latitude: self.latitude,
            altitude: self.altitude,
            status: self.status.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Flight phase reported alongside a point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FlightStatus {
    TakeOff,
    InFlight,
    Landed,
    Other(String),
}

impl FlightStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("InFlight") => FlightStatus::InFlight,
            Some("TakeOff") => FlightStatus::TakeOff,
            Some("Landed") => FlightStatus::Landed,
            Some(other) => FlightStatus::Other(other.to_string()),
        }
    }

    pub fn is_take_off(&self) -> bool {
        matches!(self, FlightStatus::TakeOff)
    }
}

/// Building block of a flight path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub status: FlightStatus,
    pub timestamp: Timestamp,
}

impl TrackPoint {
    /// Exact coordinate equality, used for deduplication
    pub fn same_position(&self, other: &TrackPoint) -> bool {
        self.longitude == other.longitude
            && self.latitude == other.latitude
            && self.altitude == other.altitude
    }
}

/// Full record of a historical point, shown by status panels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRecord {
    pub flight_id: String,
    pub agent_id: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub status: FlightStatus,
    pub timestamp: Timestamp,
    pub battery_percent: Option<u8>,
    pub ground_speed: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrackRecord {
    pub fn point(&self) -> TrackPoint {
        TrackPoint {
            longitude: self.longitude,
            latitude: self.latitude,
            altitude: self.altitude,
            status: self.status.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// All replayable points of one flight, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub struct FlightTrack {
    pub flight_id: String,
    pub records: Vec<TrackRecord>,
}

/// Stream connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Which playback loop currently owns the drawn paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackMode {
    Idle,
    AutoCycle,
    ManualReplay,
}

/// Agent and flight counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetStats {
    pub agent_count: usize,
    pub flight_count: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Int(i) => i.to_string(),
            RawId::Float(f) => f.to_string(),
        }
    }
}

/// Ids arrive as strings from some backends and as numbers from others
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error> where D: Deserializer<'de> {
    let id: String = RawId::deserialize(deserializer)?.into();
    if id.is_empty() {
        return Err(serde::de::Error::custom("empty identifier"));
    }
    Ok(id)
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where D: Deserializer<'de>
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from).filter(|id| !id.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flight_status_parsing() {
        assert_eq!(FlightStatus::parse(Some("TakeOff")), FlightStatus::TakeOff);
        assert_eq!(FlightStatus::parse(Some("Landed")), FlightStatus::Landed);
        assert_eq!(FlightStatus::parse(None), FlightStatus::InFlight);
        assert_eq!(FlightStatus::parse(Some("Hover")), FlightStatus::Other("Hover".to_string()));
        assert!(FlightStatus::TakeOff.is_take_off());
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let point: WireTrackPoint = serde_json
            ::from_str(r#"{"OrderID": 42, "longitude": 1, "latitude": 2, "altitude": 3}"#)
            .unwrap();
        assert_eq!(point.order_id, "42");
        assert_eq!(point.flight_code, None);
    }

    #[test]
    fn unmodelled_point_fields_are_kept() {
        let point: WireTrackPoint = serde_json
            ::from_str(
                r#"{"orderID": "O1", "longitude": 1, "latitude": 2, "altitude": 3,
                    "payload": 2.5, "windDirect": "NE", "windSpeed": 4}"#
            )
            .unwrap();
        assert_eq!(point.order_id, "O1");
        assert_eq!(point.extra.len(), 3);
        assert_eq!(point.extra["windDirect"], "NE");
        assert!(!point.extra.contains_key("orderID"));
    }

    #[test]
    fn records_serialize_with_timestamps() {
        let record = TrackRecord {
            flight_id: "O1".to_string(),
            agent_id: None,
            longitude: 1.0,
            latitude: 2.0,
            altitude: 3.0,
            status: FlightStatus::InFlight,
            timestamp: "2024-05-18T10:20:30Z".parse().unwrap(),
            battery_percent: Some(50),
            ground_speed: None,
            extra: Map::from_iter([("payload".to_string(), Value::from(2.5))]),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestamp"], "2024-05-18T10:20:30Z");
        assert_eq!(json["payload"], 2.5);
    }

    #[test]
    fn empty_id_is_rejected() {
        let res: Result<WireTrackPoint, _> = serde_json::from_str(
            r#"{"orderID": "", "longitude": 1, "latitude": 2, "altitude": 3}"#
        );
        assert!(res.is_err());
    }
}

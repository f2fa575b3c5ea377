use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::HistoryError;
use crate::normalize::normalize_track_point;
use crate::types::{ FlightTrack, TrackResponse };

/// Where replayable flights come from
#[async_trait]
pub trait HistorySource: Send + Sync + 'static {
    /// The `n` most recent flights, each with its full point sequence
    async fn fetch_recent(&self, n: usize) -> Result<Vec<FlightTrack>, HistoryError>;

    /// One flight's full point sequence; empty when the backend has none
    async fn fetch_by_flight_id(&self, flight_id: &str) -> Result<FlightTrack, HistoryError>;
}

/// REST client for the record service
pub struct HistoryFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl HistoryFetcher {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, HistoryError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    async fn get_tracks(&self, query: &[(&str, String)]) -> Result<Vec<FlightTrack>, HistoryError> {
        let url = format!("{}/record/recentTracks", self.base_url);

        let resp = self.client
            .get(&url)
            .query(query)
            .send().await?
            .error_for_status()?;

        let body: TrackResponse = resp.json().await?;
        Ok(group_tracks(body))
    }
}

#[async_trait]
impl HistorySource for HistoryFetcher {
    async fn fetch_recent(&self, n: usize) -> Result<Vec<FlightTrack>, HistoryError> {
        let tracks = self.get_tracks(&[("n", n.to_string())]).await?;
        tracing::debug!("Fetched {} recent flights", tracks.len());
        Ok(tracks)
    }

    async fn fetch_by_flight_id(&self, flight_id: &str) -> Result<FlightTrack, HistoryError> {
        let tracks = self.get_tracks(&[("orderID", flight_id.to_string())]).await?;

        // the backend filters by id already; keep only matching points in case it didn't
        let records = tracks
            .into_iter()
            .filter(|track| track.flight_id == flight_id)
            .flat_map(|track| track.records)
            .collect();

        Ok(FlightTrack { flight_id: flight_id.to_string(), records })
    }
}

/// Group a flat point list by flight id
///
/// Flights appear in order of their first point; points keep arrival order.
/// Points that fail decoding are skipped.
pub fn group_tracks(resp: TrackResponse) -> Vec<FlightTrack> {
    let mut tracks: Vec<FlightTrack> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for wire in resp.track.unwrap_or_default() {
        let record = match normalize_track_point(wire) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping history point: {}", e);
                continue;
            }
        };

        let slot = *index.entry(record.flight_id.clone()).or_insert_with(|| {
            tracks.push(FlightTrack { flight_id: record.flight_id.clone(), records: Vec::new() });
            tracks.len() - 1
        });
        tracks[slot].records.push(record);
    }

    tracks
}

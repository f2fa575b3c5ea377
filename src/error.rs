use thiserror::Error;

/// A raw record could not be turned into an `AgentState`
#[derive(Debug, Error, PartialEq)]
pub enum TelemetryError {
    #[error("invalid telemetry: {0}")]
    InvalidTelemetry(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for HistoryError {
    fn from(e: reqwest::Error) -> Self {
        HistoryError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StreamError {
    #[error("stream is not connected")]
    NotConnected,

    #[error("stream client has shut down")]
    Closed,
}

#[derive(Debug, Error, PartialEq)]
pub enum FleetError {
    #[error("agent not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum PlaybackError {
    #[error("no track data for flight {0}")]
    NoTrackData(String),
}

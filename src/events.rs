use tokio::sync::broadcast;

use crate::color::HslColor;
use crate::types::{ AgentState, ConnectionState, FleetStats, TrackPoint, TrackRecord };

/// Incremental change to a drawn flight polyline
///
/// Live ingestion and replay both produce this, so a renderer draws paths the
/// same way regardless of where the point came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PathDelta {
    pub flight_id: String,
    pub color: HslColor,
    pub point: TrackPoint,
    /// Start a new polyline instead of extending the previous one
    pub new_segment: bool,
}

/// Everything the rendering surface and dashboards consume
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    /// Live telemetry was ingested
    Update {
        agent: AgentState,
        path: Option<PathDelta>,
    },

    /// Replay extended a path
    Path(PathDelta),

    /// Full record of the point just visited by replay
    Info(TrackRecord),

    /// Remove every drawn polyline
    PathsCleared,

    StatsChanged(FleetStats),

    Connection(ConnectionState),

    /// User-visible notice
    Notice(String),
}

/// Broadcast bus shared by all producers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TrackEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: TrackEvent) {
        tracing::trace!("event: {:?}", event);
        // no subscribers is fine, the renderer may not be attached yet
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.tx.subscribe()
    }
}

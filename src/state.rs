use parking_lot::RwLock;
use std::collections::{ HashMap, HashSet };

use crate::color::color_for;
use crate::config::TrackerConfig;
use crate::error::FleetError;
use crate::events::{ EventBus, PathDelta, TrackEvent };
use crate::types::{ AgentState, FleetStats, TrackPoint };

/// Outcome of appending a point to a `FlightPath`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathChange {
    /// Extended the current segment
    Appended,
    /// First point of a new segment (first point overall, or TakeOff)
    SegmentStarted,
    /// Same coordinates as the last point, dropped
    Duplicate,
}

/// Ordered points of one flight
///
/// The full history is kept; `segment_start` marks where the currently drawn
/// polyline begins. A TakeOff point moves it without deleting anything.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightPath {
    flight_id: String,
    points: Vec<TrackPoint>,
    segment_start: usize,
}

impl FlightPath {
    pub fn new(flight_id: impl Into<String>) -> Self {
        Self {
            flight_id: flight_id.into(),
            points: Vec::new(),
            segment_start: 0,
        }
    }

    /// Append with TakeOff reset and consecutive-duplicate suppression
    pub fn push(&mut self, point: TrackPoint) -> PathChange {
        if point.status.is_take_off() || self.points.is_empty() {
            self.segment_start = self.points.len();
            self.points.push(point);
            return PathChange::SegmentStarted;
        }

        if let Some(last) = self.points.last() {
            if last.same_position(&point) {
                return PathChange::Duplicate;
            }
        }

        self.points.push(point);
        PathChange::Appended
    }

    pub fn flight_id(&self) -> &str {
        &self.flight_id
    }

    /// Every point ever accepted for this flight
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// The polyline currently drawn
    pub fn segment(&self) -> &[TrackPoint] {
        &self.points[self.segment_start..]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Default)]
struct Fleet {
    /// Latest snapshot per agent
    agents: HashMap<String, AgentState>,

    /// Live paths by flight id
    paths: HashMap<String, FlightPath>,

    /// Every flight id ever observed, survives path clearing
    seen_flights: HashSet<String>,
}

/// Latest agent snapshots and live flight paths
pub struct FleetState {
    fleet: RwLock<Fleet>,
    events: EventBus,
}

impl FleetState {
    pub fn new(events: EventBus) -> Self {
        Self {
            fleet: RwLock::new(Fleet::default()),
            events,
        }
    }

    /// Apply one normalized telemetry state
    ///
    /// A flight id never seen before purges all live paths first; only one
    /// flight is tracked live at a time. A state without a flight id only
    /// refreshes the agent snapshot.
    pub fn ingest(&self, agent: AgentState) {
        let (new_flight, stats, path) = {
            let mut fleet = self.fleet.write();

            let (new_flight, path) = match &agent.flight_id {
                Some(flight_id) => Self::extend_path(&mut fleet, flight_id, &agent),
                None => (false, None),
            };

            fleet.agents.insert(agent.id.clone(), agent.clone());

            (new_flight, Self::stats_of(&fleet), path)
        };

        if new_flight {
            tracing::info!(
                "New flight {} observed, clearing live paths",
                agent.flight_id.as_deref().unwrap_or_default()
            );
            self.events.emit(TrackEvent::PathsCleared);
            self.events.emit(TrackEvent::StatsChanged(stats));
        }

        self.events.emit(TrackEvent::Update { agent, path });
    }

    fn extend_path(fleet: &mut Fleet, flight_id: &str, agent: &AgentState) -> (bool, Option<PathDelta>) {
        let new_flight = fleet.seen_flights.insert(flight_id.to_string());
        if new_flight {
            fleet.paths.clear();
        }

        let change = fleet.paths
            .entry(flight_id.to_string())
            .or_insert_with(|| FlightPath::new(flight_id))
            .push(agent.track_point());

        let path = match change {
            PathChange::Duplicate => None,
            change =>
                Some(PathDelta {
                    flight_id: flight_id.to_string(),
                    color: color_for(flight_id),
                    point: agent.track_point(),
                    new_segment: change == PathChange::SegmentStarted,
                }),
        };

        (new_flight, path)
    }

    /// Last known state of an agent
    pub fn snapshot(&self, agent_id: &str) -> Result<AgentState, FleetError> {
        self.fleet
            .read()
            .agents.get(agent_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(agent_id.to_string()))
    }

    pub fn agents(&self) -> Vec<AgentState> {
        self.fleet.read().agents.values().cloned().collect()
    }

    pub fn stats(&self) -> FleetStats {
        Self::stats_of(&self.fleet.read())
    }

    pub fn path(&self, flight_id: &str) -> Option<FlightPath> {
        self.fleet.read().paths.get(flight_id).cloned()
    }

    pub fn live_flight_ids(&self) -> Vec<String> {
        self.fleet.read().paths.keys().cloned().collect()
    }

    /// Drop all path data; snapshots and the seen-flight set stay
    pub fn clear_all_paths(&self) {
        self.fleet.write().paths.clear();
        self.events.emit(TrackEvent::PathsCleared);
    }

    fn stats_of(fleet: &Fleet) -> FleetStats {
        FleetStats {
            agent_count: fleet.agents.len(),
            flight_count: fleet.seen_flights.len(),
        }
    }
}

/// Process-wide context, built once by the top-level assembly
pub struct TrackerContext {
    /// Configuration (hot-reloadable)
    config: RwLock<TrackerConfig>,

    fleet: FleetState,

    events: EventBus,
}

impl TrackerContext {
    pub fn new(config: TrackerConfig) -> Self {
        let events = EventBus::new(config.events.channel_capacity);
        Self {
            fleet: FleetState::new(events.clone()),
            events,
            config: RwLock::new(config),
        }
    }

    /// Update configuration (hot-reload)
    pub fn update_config(&self, config: TrackerConfig) {
        *self.config.write() = config;
    }

    /// Get current configuration
    pub fn config(&self) -> TrackerConfig {
        self.config.read().clone()
    }

    pub fn fleet(&self) -> &FleetState {
        &self.fleet
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

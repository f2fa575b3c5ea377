use std::sync::Arc;
use tokio::sync::{ broadcast, watch };

use crate::events::TrackEvent;
use crate::state::TrackerContext;
use crate::types::FleetStats;

/// Keeps dashboard counters in step with the fleet
///
/// Holds no state of its own: every relevant event triggers a fresh read of
/// `FleetState::stats`.
pub struct StatsAggregator {
    ctx: Arc<TrackerContext>,
    tx: watch::Sender<FleetStats>,
}

impl StatsAggregator {
    pub fn new(ctx: Arc<TrackerContext>) -> Self {
        let (tx, _) = watch::channel(ctx.fleet().stats());
        Self { ctx, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetStats> {
        self.tx.subscribe()
    }

    pub fn refresh(&self) -> FleetStats {
        let stats = self.ctx.fleet().stats();
        self.tx.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
        stats
    }

    pub async fn run(self, mut rx: broadcast::Receiver<TrackEvent>) {
        loop {
            match rx.recv().await {
                Ok(TrackEvent::Update { .. }) | Ok(TrackEvent::StatsChanged(_)) => {
                    let stats = self.refresh();
                    tracing::trace!("stats: {:?}", stats);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Stats aggregator lagged by {} events", skipped);
                    self.refresh();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

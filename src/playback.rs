use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::color::color_for;
use crate::error::PlaybackError;
use crate::events::{ PathDelta, TrackEvent };
use crate::history::HistorySource;
use crate::state::{ FlightPath, PathChange, TrackerContext };
use crate::types::{ FlightTrack, PlaybackMode };

/// Identifies the loop allowed to draw
///
/// Every scheduled step compares its ticket with the control block; a loop
/// whose ticket is stale abandons itself at its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    epoch: u64,
    mode: PlaybackMode,
}

struct Control {
    mode: PlaybackMode,
    epoch: u64,
    resume_timer: Option<JoinHandle<()>>,
}

impl Control {
    fn owns(&self, ticket: Ticket) -> bool {
        self.epoch == ticket.epoch && self.mode == ticket.mode
    }
}

struct Inner<H> {
    ctx: Arc<TrackerContext>,
    history: H,
    control: Mutex<Control>,
}

/// Drives animated track playback
///
/// Alternates between auto-cycling through the most recent flights and
/// replaying a single flight on request, returning to auto-cycling after
/// the configured idle timeout.
pub struct PlaybackScheduler<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for PlaybackScheduler<H> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<H: HistorySource> PlaybackScheduler<H> {
    pub fn new(ctx: Arc<TrackerContext>, history: H) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                history,
                control: Mutex::new(Control {
                    mode: PlaybackMode::Idle,
                    epoch: 0,
                    resume_timer: None,
                }),
            }),
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.inner.control.lock().mode
    }

    /// Enter auto-cycling (startup)
    pub fn start(&self) {
        self.inner.start_auto();
    }

    /// Leave manual replay early
    pub fn resume_auto(&self) {
        self.inner.start_auto();
    }

    /// Replay one flight on demand
    ///
    /// Nothing changes when the flight has no points: a notice is emitted and
    /// whatever loop was running keeps running.
    pub async fn show_flight(&self, flight_id: &str) -> Result<(), PlaybackError> {
        let track = match self.inner.history.fetch_by_flight_id(flight_id).await {
            Ok(track) if !track.records.is_empty() => track,
            Ok(_) => {
                return Err(self.inner.no_track_data(flight_id));
            }
            Err(e) => {
                tracing::warn!("Track for flight {} unavailable: {}", flight_id, e);
                return Err(self.inner.no_track_data(flight_id));
            }
        };

        let ticket = self.inner.enter_manual();
        tracing::info!("Manual replay of flight {} ({} points)", flight_id, track.records.len());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if inner.replay(ticket, &track).await {
                tracing::debug!("Manual replay of flight {} finished", track.flight_id);
            }
        });

        Ok(())
    }
}

impl<H: HistorySource> Inner<H> {
    fn start_auto(self: &Arc<Self>) {
        let mut control = self.control.lock();
        self.spawn_auto(&mut control);
    }

    fn spawn_auto(self: &Arc<Self>, control: &mut Control) {
        let ticket = Self::supersede(control, PlaybackMode::AutoCycle);
        tracing::info!("Auto-cycling recent flights");

        tokio::spawn(self.clone().auto_cycle(ticket));
    }

    /// Switch to manual replay: clear drawn paths and arm the auto-resume timer
    fn enter_manual(self: &Arc<Self>) -> Ticket {
        let mut control = self.control.lock();
        let ticket = Self::supersede(&mut control, PlaybackMode::ManualReplay);

        // under the control lock, so no stale step can draw after the clear
        self.ctx.fleet().clear_all_paths();

        let resume_after = self.ctx.config().playback.auto_resume();
        let inner = self.clone();
        control.resume_timer = Some(
            tokio::spawn(async move {
                time::sleep(resume_after).await;
                let mut control = inner.control.lock();
                if control.owns(ticket) {
                    tracing::info!("Manual replay idle, resuming auto-cycle");
                    inner.spawn_auto(&mut control);
                }
            })
        );

        ticket
    }

    fn supersede(control: &mut Control, mode: PlaybackMode) -> Ticket {
        if let Some(timer) = control.resume_timer.take() {
            timer.abort();
        }
        control.epoch += 1;
        control.mode = mode;
        Ticket { epoch: control.epoch, mode }
    }

    fn no_track_data(&self, flight_id: &str) -> PlaybackError {
        self.ctx.events().emit(TrackEvent::Notice(format!("No track data for flight {}", flight_id)));
        PlaybackError::NoTrackData(flight_id.to_string())
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        self.control.lock().owns(ticket)
    }

    /// Run `step` only if `ticket` still owns playback
    fn if_current(&self, ticket: Ticket, step: impl FnOnce()) -> bool {
        let control = self.control.lock();
        if control.owns(ticket) {
            step();
            true
        } else {
            false
        }
    }

    async fn pause(&self, ticket: Ticket, delay: Duration) -> bool {
        time::sleep(delay).await;
        self.is_current(ticket)
    }

    async fn auto_cycle(self: Arc<Self>, ticket: Ticket) {
        while self.is_current(ticket) {
            let playback = self.ctx.config().playback;

            let flights = match self.history.fetch_recent(playback.recent_flights).await {
                Ok(flights) => flights,
                Err(e) => {
                    tracing::warn!("Recent tracks unavailable: {}", e);
                    Vec::new()
                }
            };

            if flights.is_empty() {
                tracing::debug!("Nothing to replay, retrying next round");
            }

            for flight in &flights {
                if !self.replay(ticket, flight).await {
                    return;
                }
                let delay = self.ctx.config().playback.inter_flight_delay();
                if !self.pause(ticket, delay).await {
                    return;
                }
            }

            if !self.pause(ticket, playback.cycle_pause()).await {
                return;
            }
            if !flights.is_empty() {
                let cleared = self.if_current(ticket, || self.ctx.fleet().clear_all_paths());
                if !cleared {
                    return;
                }
            }
            if !self.pause(ticket, playback.settle_delay()).await {
                return;
            }
        }
    }

    /// Animate one flight point by point; false when superseded
    async fn replay(&self, ticket: Ticket, track: &FlightTrack) -> bool {
        let color = color_for(&track.flight_id);
        let mut path = FlightPath::new(track.flight_id.clone());
        let events = self.ctx.events();

        for record in &track.records {
            let point = record.point();
            let change = path.push(point.clone());

            let drawn = self.if_current(ticket, || {
                if change != PathChange::Duplicate {
                    events.emit(
                        TrackEvent::Path(PathDelta {
                            flight_id: track.flight_id.clone(),
                            color,
                            point,
                            new_segment: change == PathChange::SegmentStarted,
                        })
                    );
                }
                events.emit(TrackEvent::Info(record.clone()));
            });
            if !drawn {
                return false;
            }

            let delay = self.ctx.config().playback.point_delay();
            if !self.pause(ticket, delay).await {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::error::HistoryError;
    use crate::types::{ FlightStatus, TrackRecord };
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{ json, Map };
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use tokio::sync::broadcast::Receiver;

    #[derive(Default)]
    struct FakeHistory {
        flights: Vec<FlightTrack>,
        fail: bool,
        recent_calls: AtomicUsize,
    }

    #[async_trait]
    impl HistorySource for Arc<FakeHistory> {
        async fn fetch_recent(&self, n: usize) -> Result<Vec<FlightTrack>, HistoryError> {
            self.recent_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HistoryError::Unavailable("backend down".to_string()));
            }
            Ok(self.flights.iter().take(n).cloned().collect())
        }

        async fn fetch_by_flight_id(&self, flight_id: &str) -> Result<FlightTrack, HistoryError> {
            if self.fail {
                return Err(HistoryError::Unavailable("backend down".to_string()));
            }
            Ok(
                self.flights
                    .iter()
                    .find(|f| f.flight_id == flight_id)
                    .cloned()
                    .unwrap_or_else(|| FlightTrack {
                        flight_id: flight_id.to_string(),
                        records: Vec::new(),
                    })
            )
        }
    }

    fn record(flight: &str, i: usize, status: FlightStatus) -> TrackRecord {
        TrackRecord {
            flight_id: flight.to_string(),
            agent_id: None,
            longitude: 113.0 + (i as f64) * 1e-4,
            latitude: 22.0,
            altitude: 50.0,
            status,
            timestamp: Utc::now(),
            battery_percent: Some(80),
            ground_speed: None,
            extra: Map::new(),
        }
    }

    fn flight(id: &str, points: usize) -> FlightTrack {
        FlightTrack {
            flight_id: id.to_string(),
            records: (0..points).map(|i| record(id, i, FlightStatus::InFlight)).collect(),
        }
    }

    fn setup(
        flights: Vec<FlightTrack>,
        fail: bool
    ) -> (PlaybackScheduler<Arc<FakeHistory>>, Arc<FakeHistory>, Receiver<TrackEvent>) {
        let ctx = Arc::new(TrackerContext::new(TrackerConfig::default()));
        let rx = ctx.events().subscribe();
        let history = Arc::new(FakeHistory { flights, fail, ..Default::default() });
        (PlaybackScheduler::new(ctx, history.clone()), history, rx)
    }

    fn drain(rx: &mut Receiver<TrackEvent>) -> Vec<TrackEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn path_flights(events: &[TrackEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                TrackEvent::Path(delta) => Some(delta.flight_id.clone()),
                _ => None,
            })
            .collect()
    }

    async fn sleep_ms(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn ticket_ownership_needs_epoch_and_mode() {
        let control = Control { mode: PlaybackMode::ManualReplay, epoch: 4, resume_timer: None };
        assert!(control.owns(Ticket { epoch: 4, mode: PlaybackMode::ManualReplay }));
        assert!(!control.owns(Ticket { epoch: 3, mode: PlaybackMode::ManualReplay }));
        assert!(!control.owns(Ticket { epoch: 4, mode: PlaybackMode::AutoCycle }));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_cycle_replays_recent_flights_then_restarts() {
        let flights = vec![flight("A", 3), flight("B", 2), flight("C", 2), flight("D", 1)];
        let (scheduler, history, mut rx) = setup(flights, false);

        scheduler.start();
        assert_eq!(scheduler.mode(), PlaybackMode::AutoCycle);

        // A: 0..300, B: 2300..2500, C: 4500..4700, pause until 7700, settle until 7800
        sleep_ms(7750).await;
        let events = drain(&mut rx);
        assert_eq!(path_flights(&events), ["A", "A", "A", "B", "B", "C", "C"]);
        assert_eq!(events.iter().filter(|e| matches!(e, TrackEvent::Info(_))).count(), 7);
        assert_eq!(events.last(), Some(&TrackEvent::PathsCleared));
        assert_eq!(history.recent_calls.load(Ordering::SeqCst), 1);

        sleep_ms(100).await;
        assert_eq!(path_flights(&drain(&mut rx)), ["A"]);
        assert_eq!(history.recent_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn info_event_follows_each_path_event() {
        let (scheduler, _history, mut rx) = setup(vec![flight("A", 2)], false);
        scheduler.start();
        sleep_ms(150).await;

        let events = drain(&mut rx);
        assert!(matches!(&events[0], TrackEvent::Path(d) if d.new_segment));
        assert!(matches!(&events[1], TrackEvent::Info(r) if r.flight_id == "A"));
        assert!(matches!(&events[2], TrackEvent::Path(d) if !d.new_segment));
        assert!(matches!(&events[3], TrackEvent::Info(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn info_event_carries_unmodelled_fields() {
        let mut track = flight("W", 1);
        track.records[0].extra.insert("windDirect".to_string(), json!("NE"));
        track.records[0].extra.insert("payload".to_string(), json!(2.5));
        let (scheduler, _history, mut rx) = setup(vec![track], false);

        scheduler.show_flight("W").await.unwrap();
        sleep_ms(50).await;

        let info = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                TrackEvent::Info(record) => Some(record),
                _ => None,
            })
            .unwrap();
        assert_eq!(info.extra["windDirect"], json!("NE"));
        assert_eq!(info.extra["payload"], json!(2.5));
    }

    #[tokio::test(start_paused = true)]
    async fn take_off_resets_replay_segment() {
        let mut track = flight("T", 0);
        track.records = vec![
            record("T", 0, FlightStatus::TakeOff),
            record("T", 1, FlightStatus::InFlight),
            record("T", 2, FlightStatus::TakeOff),
            record("T", 3, FlightStatus::Landed)
        ];
        let (scheduler, _history, mut rx) = setup(vec![track], false);

        scheduler.show_flight("T").await.unwrap();
        sleep_ms(1000).await;

        let segments: Vec<bool> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                TrackEvent::Path(delta) => Some(delta.new_segment),
                _ => None,
            })
            .collect();
        assert_eq!(segments, [true, false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_flight_produces_notice_only() {
        let (scheduler, _history, mut rx) = setup(vec![flight("A", 2)], false);

        let res = scheduler.show_flight("nope").await;
        assert_eq!(res, Err(PlaybackError::NoTrackData("nope".to_string())));
        assert_eq!(scheduler.mode(), PlaybackMode::Idle);

        sleep_ms(500).await;
        assert_eq!(
            drain(&mut rx),
            vec![TrackEvent::Notice("No track data for flight nope".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_flight_keeps_auto_cycle_running() {
        let (scheduler, _history, mut rx) = setup(vec![flight("A", 30)], false);
        scheduler.start();
        sleep_ms(250).await;

        assert!(scheduler.show_flight("nope").await.is_err());
        assert_eq!(scheduler.mode(), PlaybackMode::AutoCycle);

        drain(&mut rx);
        sleep_ms(300).await;
        assert_eq!(path_flights(&drain(&mut rx)), ["A", "A", "A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn history_failure_surfaces_notice() {
        let (scheduler, _history, mut rx) = setup(Vec::new(), true);
        assert!(scheduler.show_flight("A").await.is_err());
        assert!(matches!(drain(&mut rx).as_slice(), [TrackEvent::Notice(_)]));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_request_interrupts_auto_cycle() {
        let (scheduler, _history, mut rx) = setup(vec![flight("A", 30), flight("B", 3)], false);
        scheduler.start();
        sleep_ms(150).await;

        scheduler.show_flight("B").await.unwrap();
        assert_eq!(scheduler.mode(), PlaybackMode::ManualReplay);
        sleep_ms(5000).await;

        let events = drain(&mut rx);
        let cleared = events.iter().position(|e| *e == TrackEvent::PathsCleared).unwrap();
        assert_eq!(path_flights(&events[..cleared]), ["A", "A"]);
        assert_eq!(path_flights(&events[cleared..]), ["B", "B", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_manual_request_replaces_first_and_restarts_resume_timer() {
        let (scheduler, _history, mut rx) = setup(vec![flight("F1", 50), flight("F2", 3)], false);

        scheduler.show_flight("F1").await.unwrap();
        sleep_ms(250).await;
        assert_eq!(path_flights(&drain(&mut rx)), ["F1", "F1", "F1"]);

        // F1's resume timer would fire at 120s
        sleep_ms(60_000).await;
        scheduler.show_flight("F2").await.unwrap();
        sleep_ms(1000).await;

        let events = drain(&mut rx);
        let cleared = events.iter().position(|e| *e == TrackEvent::PathsCleared).unwrap();
        assert_eq!(path_flights(&events[cleared..]), ["F2", "F2", "F2"]);

        sleep_ms(70_000).await;
        assert_eq!(scheduler.mode(), PlaybackMode::ManualReplay);
        assert!(path_flights(&drain(&mut rx)).is_empty());

        sleep_ms(50_000).await;
        assert_eq!(scheduler.mode(), PlaybackMode::AutoCycle);
        assert!(!path_flights(&drain(&mut rx)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_latest_manual_animation_draws() {
        let (scheduler, _history, mut rx) = setup(vec![flight("F1", 50), flight("F2", 20)], false);

        scheduler.show_flight("F1").await.unwrap();
        sleep_ms(250).await;
        scheduler.show_flight("F2").await.unwrap();
        sleep_ms(10_000).await;

        let events = drain(&mut rx);
        let last_clear = events.iter().rposition(|e| *e == TrackEvent::PathsCleared).unwrap();
        let before = path_flights(&events[..last_clear]);
        let after = path_flights(&events[last_clear..]);
        assert_eq!(before.len(), 3);
        assert_eq!(after.len(), 20);
        assert!(after.iter().all(|f| f == "F2"));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_auto_ends_manual_replay() {
        let (scheduler, _history, mut rx) = setup(vec![flight("A", 2), flight("B", 50)], false);
        scheduler.show_flight("B").await.unwrap();
        sleep_ms(150).await;

        scheduler.resume_auto();
        assert_eq!(scheduler.mode(), PlaybackMode::AutoCycle);
        drain(&mut rx);

        sleep_ms(150).await;
        assert_eq!(path_flights(&drain(&mut rx)), ["A", "A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_backend_is_retried() {
        let (scheduler, history, mut rx) = setup(Vec::new(), true);
        scheduler.start();

        sleep_ms(5000).await;
        assert_eq!(scheduler.mode(), PlaybackMode::AutoCycle);
        assert!(history.recent_calls.load(Ordering::SeqCst) >= 3);
        assert!(path_flights(&drain(&mut rx)).is_empty());
    }
}

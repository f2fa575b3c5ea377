use anyhow::Result;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::{ broadcast, mpsc };
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt };

use dronetrack::config::{ self, ConfigWatcher };
use dronetrack::events::TrackEvent;
use dronetrack::history::{ HistoryFetcher, HistorySource };
use dronetrack::network::{ forward_to_fleet, StreamClient };
use dronetrack::playback::PlaybackScheduler;
use dronetrack::state::TrackerContext;
use dronetrack::stats::StatsAggregator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber
        ::registry()
        .with(
            tracing_subscriber::EnvFilter
                ::try_from_default_env()
                .unwrap_or_else(|_| "dronetrack=debug,info".into())
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting drone tracker");

    // Load initial configuration
    let config = config::load_config()?;
    tracing::info!("Configuration loaded successfully");

    let ctx = Arc::new(TrackerContext::new(config.clone()));

    // Start config file watcher
    let config_watcher = ConfigWatcher::new(ctx.clone(), config::config_path());
    tokio::spawn(async move {
        if let Err(e) = config_watcher.watch().await {
            tracing::error!("Config watcher error: {}", e);
        }
    });

    // Renderer stand-in and dashboard counters
    tokio::spawn(log_events(ctx.events().subscribe()));
    let stats = StatsAggregator::new(ctx.clone());
    let stats_rx = stats.subscribe();
    tokio::spawn(stats.run(ctx.events().subscribe()));

    // Live telemetry stream
    let (stream_tx, stream_rx) = mpsc::unbounded_channel();
    let stream = StreamClient::new(ctx.clone(), stream_tx);
    tokio::spawn(stream.clone().run());
    tokio::spawn(forward_to_fleet(ctx.clone(), stream_rx));

    // Track playback
    let history = HistoryFetcher::new(
        config.network.api_base_url.clone(),
        config.network.request_timeout()
    )?;
    let scheduler = PlaybackScheduler::new(ctx.clone(), history);
    scheduler.start();

    tokio::select! {
        res = command_loop(&scheduler, &stats_rx) => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    stream.shutdown();
    tracing::info!("Drone tracker stopped");
    Ok(())
}

/// Operator commands on stdin
async fn command_loop<H: HistorySource>(
    scheduler: &PlaybackScheduler<H>,
    stats: &tokio::sync::watch::Receiver<dronetrack::types::FleetStats>
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("show"), Some(flight_id)) => {
                if let Err(e) = scheduler.show_flight(flight_id).await {
                    tracing::warn!("{}", e);
                }
            }
            (Some("auto"), None) => scheduler.resume_auto(),
            (Some("stats"), None) => {
                let current = *stats.borrow();
                tracing::info!(
                    "{} agents, {} flights, playback {:?}",
                    current.agent_count,
                    current.flight_count,
                    scheduler.mode()
                );
            }
            (Some("quit"), None) | (Some("exit"), None) => break,
            (None, _) => {}
            _ => tracing::warn!("Unknown command: {} (try: show <flight>, auto, stats, quit)", line),
        }
    }

    Ok(())
}

/// Trace every render event; a real rendering surface subscribes the same way
async fn log_events(mut rx: broadcast::Receiver<TrackEvent>) {
    loop {
        match rx.recv().await {
            Ok(TrackEvent::Update { agent, path }) => {
                tracing::debug!(
                    "{} [{}] at {:.6},{:.6} alt {:.1}m heading {:.0} battery {}%{}",
                    agent.id,
                    agent.flight_id.as_deref().unwrap_or("-"),
                    agent.longitude,
                    agent.latitude,
                    agent.altitude,
                    agent.heading,
                    agent.battery_percent,
                    if path.is_some() { "" } else { " (no path change)" }
                );
            }
            Ok(TrackEvent::Path(delta)) => {
                tracing::trace!(
                    "replay {} {} {:.6},{:.6}{}",
                    delta.flight_id,
                    delta.color,
                    delta.point.longitude,
                    delta.point.latitude,
                    if delta.new_segment { " (new segment)" } else { "" }
                );
            }
            Ok(TrackEvent::Info(record)) => tracing::trace!("info {:?}", record),
            Ok(TrackEvent::PathsCleared) => tracing::debug!("paths cleared"),
            Ok(TrackEvent::StatsChanged(stats)) => {
                tracing::info!("{} agents, {} flights", stats.agent_count, stats.flight_count);
            }
            Ok(TrackEvent::Connection(state)) => tracing::info!("Connection: {:?}", state),
            Ok(TrackEvent::Notice(text)) => tracing::warn!("{}", text),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Renderer lagged, {} events skipped", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

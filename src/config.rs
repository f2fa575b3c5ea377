use anyhow::{ Context, Result };
use notify::{ Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher };
use serde::{ Deserialize, Serialize };
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::state::TrackerContext;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub events: EventConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Telemetry WebSocket URL
    #[serde(default = "default_ws_url")]
    pub websocket_url: String,

    /// Base URL of the history (record) service
    #[serde(default = "default_api_url")]
    pub api_base_url: String,

    /// Fixed delay before every reconnect attempt
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Heartbeat period while connected
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Timeout for history requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// How many recent flights one auto-cycle round replays
    #[serde(default = "default_recent_flights")]
    pub recent_flights: usize,

    /// Delay between two replayed points
    #[serde(default = "default_point_delay")]
    pub point_delay_ms: u64,

    /// Delay after a flight before the next one starts
    #[serde(default = "default_inter_flight_delay")]
    pub inter_flight_delay_ms: u64,

    /// Pause after the last flight of a round, before paths are cleared
    #[serde(default = "default_cycle_pause")]
    pub cycle_pause_ms: u64,

    /// Delay between clearing and starting the next round
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Manual replay falls back to auto-cycling after this long
    #[serde(default = "default_auto_resume")]
    pub auto_resume_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventConfig {
    /// Capacity of the render event broadcast channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// Default value functions
fn default_ws_url() -> String {
    "ws://127.0.0.1:19999/api/ws".to_string()
}
fn default_api_url() -> String {
    "http://127.0.0.1:8888".to_string()
}
fn default_reconnect_delay() -> u64 {
    2000
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    10
}

fn default_recent_flights() -> usize {
    3
}
fn default_point_delay() -> u64 {
    100
}
fn default_inter_flight_delay() -> u64 {
    2000
}
fn default_cycle_pause() -> u64 {
    1000
}
fn default_settle_delay() -> u64 {
    100
}
fn default_auto_resume() -> u64 {
    120
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            websocket_url: default_ws_url(),
            api_base_url: default_api_url(),
            reconnect_delay_ms: default_reconnect_delay(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            recent_flights: default_recent_flights(),
            point_delay_ms: default_point_delay(),
            inter_flight_delay_ms: default_inter_flight_delay(),
            cycle_pause_ms: default_cycle_pause(),
            settle_delay_ms: default_settle_delay(),
            auto_resume_secs: default_auto_resume(),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl NetworkConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PlaybackConfig {
    pub fn point_delay(&self) -> Duration {
        Duration::from_millis(self.point_delay_ms)
    }

    pub fn inter_flight_delay(&self) -> Duration {
        Duration::from_millis(self.inter_flight_delay_ms)
    }

    pub fn cycle_pause(&self) -> Duration {
        Duration::from_millis(self.cycle_pause_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn auto_resume(&self) -> Duration {
        Duration::from_secs(self.auto_resume_secs)
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    PathBuf::from("config.toml")
}

/// Load configuration from file or create default
pub fn load_config() -> Result<TrackerConfig> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<TrackerConfig> {
    if path.exists() {
        let contents = std::fs
            ::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    } else {
        tracing::warn!("{} not found, creating default configuration", path.display());
        let config = TrackerConfig::default();
        save_config_to(&config, path)?;
        Ok(config)
    }
}

/// Save configuration to file
pub fn save_config_to(config: &TrackerConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;

    std::fs
        ::write(path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

/// Configuration file watcher with hot-reload
pub struct ConfigWatcher {
    ctx: Arc<TrackerContext>,
    path: PathBuf,
}

impl ConfigWatcher {
    pub fn new(ctx: Arc<TrackerContext>, path: PathBuf) -> Self {
        Self { ctx, path }
    }

    /// Start watching the config file for changes
    pub async fn watch(self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(1);

        let mut watcher = RecommendedWatcher::new(move |res| {
            let _ = tx.blocking_send(res);
        }, NotifyConfig::default())?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!("Config file watcher started on {}", self.path.display());

        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) => {
                    tracing::debug!("Config file event: {:?}", event);

                    // editors write in several steps
                    tokio::time::sleep(Duration::from_millis(100)).await;

                    match load_config_from(&self.path) {
                        Ok(config) => {
                            self.ctx.update_config(config);
                            tracing::info!("Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload config: {:#}", e);
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            }
        }

        Ok(())
    }
}

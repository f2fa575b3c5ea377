//! Live drone telemetry tracking with animated track playback.
//!
//! A [`network::StreamClient`] keeps the telemetry WebSocket alive, records are
//! normalized into [`types::AgentState`] and applied to the
//! [`state::FleetState`], and a [`playback::PlaybackScheduler`] replays
//! historical flights. Everything a renderer needs arrives as
//! [`events::TrackEvent`]s on one broadcast bus.

pub mod color;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod network;
pub mod normalize;
pub mod playback;
pub mod state;
pub mod stats;
pub mod types;

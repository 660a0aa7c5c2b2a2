//! Keeps the host's now-playing surface in sync with episode playback.
//!
//! [`playback::SyncEngine`] owns the session; [`playback::PlaybackService`]
//! drives it on a tokio task and hands out a [`playback::PlaybackHandle`].

pub mod config;
pub mod episode;
pub mod media_controls;
pub mod playback;

pub use config::{Config, ConfigError, SyncConfig};
pub use episode::EpisodeMetadata;

// Test support (unit tests, or integration tests with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

use crate::playback::router::DEFAULT_SEEK_STEP_SECS;
use crate::playback::scheduler::SchedulerConfig;
use crate::playback::shadow_clock::{DEFAULT_SEEK_TOLERANCE, DEFAULT_SPURIOUS_EPSILON};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_DBUS_NAME: &str = "castsync";
const DEFAULT_DISPLAY_NAME: &str = "castsync";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("Failed to read config file: {0}")]
    File(#[from] dotenvy::Error),
}

/// Tuning for the sync engine
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncConfig {
    pub scheduler: SchedulerConfig,
    /// A raw zero is spurious once the authoritative position is past this
    pub spurious_epsilon: f64,
    /// How close a sample must land to the seek target to confirm it
    pub seek_tolerance: f64,
    /// Step for the seekforward/seekbackward host buttons
    pub seek_step_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            spurious_epsilon: DEFAULT_SPURIOUS_EPSILON,
            seek_tolerance: DEFAULT_SEEK_TOLERANCE,
            seek_step_secs: DEFAULT_SEEK_STEP_SECS,
        }
    }
}

/// Identity of the OS media session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformConfig {
    pub dbus_name: String,
    pub display_name: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            dbus_name: DEFAULT_DBUS_NAME.to_string(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

/// Application configuration
/// In debug builds: also loads a .env file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub sync: SyncConfig,
    pub platform: PlatformConfig,
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Config: Dev mode activated - loaded .env file");
            }
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an explicit env-style file, ignoring the
    /// process environment
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for item in dotenvy::from_path_iter(path.as_ref())? {
            let (key, value) = item?;
            values.insert(key, value);
        }
        info!("Config: loaded {}", path.as_ref().display());
        Self::from_lookup(|key| values.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = SyncConfig::default();

        let min_interval = parse::<u64>(&lookup, "CASTSYNC_MIN_INTERVAL_MS")?
            .filter(|ms| in_range("CASTSYNC_MIN_INTERVAL_MS", *ms > 0))
            .map(Duration::from_millis)
            .unwrap_or(defaults.scheduler.min_interval);

        let settle_window = parse::<u64>(&lookup, "CASTSYNC_SETTLE_WINDOW_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.scheduler.settle_window);

        let confirm_timeout = parse::<u64>(&lookup, "CASTSYNC_SEEK_CONFIRM_TIMEOUT_MS")?
            .filter(|ms| in_range("CASTSYNC_SEEK_CONFIRM_TIMEOUT_MS", *ms > 0))
            .map(Duration::from_millis)
            .unwrap_or(defaults.scheduler.confirm_timeout);

        let force_on_transition = match lookup("CASTSYNC_FORCE_ON_TRANSITION") {
            Some(value) => parse_bool("CASTSYNC_FORCE_ON_TRANSITION", &value)?,
            None => defaults.scheduler.force_on_transition,
        };

        let spurious_epsilon = parse::<f64>(&lookup, "CASTSYNC_SPURIOUS_EPSILON")?
            .filter(|v| in_range("CASTSYNC_SPURIOUS_EPSILON", v.is_finite() && *v >= 0.0))
            .unwrap_or(defaults.spurious_epsilon);

        let seek_tolerance = parse::<f64>(&lookup, "CASTSYNC_SEEK_TOLERANCE")?
            .filter(|v| in_range("CASTSYNC_SEEK_TOLERANCE", v.is_finite() && *v >= 0.0))
            .unwrap_or(defaults.seek_tolerance);

        let seek_step_secs = parse::<f64>(&lookup, "CASTSYNC_SEEK_STEP_SECS")?
            .filter(|v| in_range("CASTSYNC_SEEK_STEP_SECS", v.is_finite() && *v > 0.0))
            .unwrap_or(defaults.seek_step_secs);

        let platform = PlatformConfig {
            dbus_name: lookup("CASTSYNC_DBUS_NAME")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_DBUS_NAME.to_string()),
            display_name: lookup("CASTSYNC_DISPLAY_NAME")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
        };

        Ok(Self {
            sync: SyncConfig {
                scheduler: SchedulerConfig {
                    min_interval,
                    settle_window,
                    force_on_transition,
                    confirm_timeout,
                },
                spurious_epsilon,
                seek_tolerance,
                seek_step_secs,
            },
            platform,
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

fn in_range(key: &str, ok: bool) -> bool {
    if !ok {
        warn!("Config: {} out of range, using default", key);
    }
    ok
}

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::MAX_WINDOW_SNAPSHOTS;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub response: ResponseConfig,
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
}

/// Detector thresholds. Identical values must be used by every operator
/// that is expected to reach the same verdict.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DetectionConfig {
    pub drain_threshold_bp: u32,
    pub supply_threshold_bp: u32,
    pub gas_threshold_bp: u32,
    pub cluster_threshold: u32,
    pub accumulation_threshold_bp: u32,
}

/// Confidence gates and rate limiting for the response engine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ResponseConfig {
    pub alert_confidence_threshold: u8,
    pub blacklist_confidence_threshold: u8,
    pub pause_confidence_threshold: u8,
    pub pause_severity_threshold: u8,
    /// Minimum sequence steps between accepted reports.
    pub cooldown_period: u64,
    pub max_blacklist_batch: usize,
    /// Incidents kept in memory; older ones remain in the database only.
    pub incident_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    /// Rebuild ledgers from the database on start-up.
    pub restore: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    /// Newline-delimited JSON snapshots, oldest first.
    pub snapshots_path: String,
    pub window_size: usize,
    pub channel_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            drain_threshold_bp: 1000,
            supply_threshold_bp: 500,
            gas_threshold_bp: 5000,
            cluster_threshold: 3,
            accumulation_threshold_bp: 100,
        }
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            alert_confidence_threshold: 50,
            blacklist_confidence_threshold: 70,
            pause_confidence_threshold: 80,
            pause_severity_threshold: 75,
            cooldown_period: 10,
            max_blacklist_batch: 50,
            incident_capacity: 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/launchguard.db".into(),
            restore: true,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            snapshots_path: "data/snapshots.jsonl".into(),
            window_size: MAX_WINDOW_SNAPSHOTS,
            channel_capacity: 256,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/launchguard.toml");
        assert_eq!(config.detection, DetectionConfig::default());
        assert_eq!(config.response.cooldown_period, 10);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config: Config = toml::from_str(
            "
            [detection]
            drain_threshold_bp = 1500

            [response]
            cooldown_period = 3
            ",
        )
        .unwrap();
        assert_eq!(config.detection.drain_threshold_bp, 1500);
        assert_eq!(config.detection.supply_threshold_bp, 500);
        assert_eq!(config.response.cooldown_period, 3);
        assert_eq!(config.response.blacklist_confidence_threshold, 70);
        assert_eq!(config.feed.window_size, MAX_WINDOW_SNAPSHOTS);
    }

    #[test]
    fn invalid_file_falls_back() {
        let path = std::env::temp_dir().join(format!("launchguard_cfg_{}.toml", std::process::id()));
        std::fs::write(&path, "[detection\nbroken").unwrap();
        let config = Config::load(&path);
        assert_eq!(config.detection, DetectionConfig::default());
        let _ = std::fs::remove_file(&path);
    }
}

//! Runtime Configuration
//!
//! Pool sizes, pacing and propagation tuning, loaded from JSON.

use std::path::Path;

use atl_physics::MAX_RAY_HITS;
use serde::{Deserialize, Serialize};

use crate::error::{AtlError, AtlResult};

/// Audio runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of live audio objects
    pub object_pool_size: usize,
    /// Maximum number of live events
    pub event_pool_size: usize,
    /// Maximum number of live standalone files
    pub standalone_file_pool_size: usize,
    /// Capacity of the game request queue
    pub request_queue_capacity: usize,
    /// Audio thread update period
    pub tick_interval_ms: u64,
    /// Minimum movement, in meters, that counts as the object moving
    pub position_update_threshold: f32,
    /// Speeds below this, in m/s, are published as zero and end tracking
    pub velocity_tracking_threshold: f32,
    /// Obstruction and occlusion tuning
    pub occlusion: OcclusionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            object_pool_size: 256,
            event_pool_size: 1024,
            standalone_file_pool_size: 128,
            request_queue_capacity: 1024,
            tick_interval_ms: 10,
            position_update_threshold: 0.01,
            velocity_tracking_threshold: 0.1,
            occlusion: OcclusionConfig::default(),
        }
    }
}

/// Propagation processor tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionConfig {
    /// Global switch for obstruction raycasts
    pub ray_casting_enabled: bool,
    /// Objects farther than this from the listener cast no rays
    pub max_distance: f32,
    /// Objects nearer than this cast synchronously
    pub max_sync_distance: f32,
    /// Adaptive objects nearer than this use the high tier
    pub adaptive_high_distance: f32,
    /// Adaptive objects nearer than this use the medium tier
    pub adaptive_medium_distance: f32,
    /// Fraction of the remaining gap closed per update, in (0, 1]
    pub smoothing_factor: f32,
    /// Default distance rays start away from their sample position
    pub default_ray_offset: f32,
    /// Radius of the disc sample positions are spread on
    pub sample_radius: f32,
    /// Hits reported per ray
    pub max_hits_per_ray: usize,
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            ray_casting_enabled: true,
            max_distance: 500.0,
            max_sync_distance: 5.0,
            adaptive_high_distance: 10.0,
            adaptive_medium_distance: 40.0,
            smoothing_factor: 0.25,
            default_ray_offset: 0.1,
            sample_radius: 0.5,
            max_hits_per_ray: MAX_RAY_HITS,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> AtlResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> AtlResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> AtlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> AtlResult<()> {
        let invalid = |message: &str| Err(AtlError::InvalidConfig(message.to_string()));

        if self.object_pool_size == 0 {
            return invalid("object_pool_size must be greater than zero");
        }
        if self.event_pool_size == 0 {
            return invalid("event_pool_size must be greater than zero");
        }
        if self.standalone_file_pool_size == 0 {
            return invalid("standalone_file_pool_size must be greater than zero");
        }
        if self.request_queue_capacity == 0 {
            return invalid("request_queue_capacity must be greater than zero");
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be greater than zero");
        }
        if self.position_update_threshold < 0.0 || self.velocity_tracking_threshold < 0.0 {
            return invalid("tracking thresholds must not be negative");
        }
        self.occlusion.validate()
    }
}

impl OcclusionConfig {
    pub fn validate(&self) -> AtlResult<()> {
        let invalid = |message: &str| Err(AtlError::InvalidConfig(message.to_string()));

        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return invalid("occlusion.smoothing_factor must be in (0, 1]");
        }
        if self.max_distance < 0.0 || self.max_sync_distance < 0.0 {
            return invalid("occlusion distances must not be negative");
        }
        if self.max_sync_distance > self.max_distance {
            return invalid("occlusion.max_sync_distance must not exceed max_distance");
        }
        if self.adaptive_high_distance > self.adaptive_medium_distance {
            return invalid("occlusion.adaptive_high_distance must not exceed adaptive_medium_distance");
        }
        if self.default_ray_offset < 0.0 || self.sample_radius < 0.0 {
            return invalid("occlusion offsets must not be negative");
        }
        if self.max_hits_per_ray == 0 || self.max_hits_per_ray > MAX_RAY_HITS {
            return Err(AtlError::InvalidConfig(format!(
                "occlusion.max_hits_per_ray must be in 1..={}",
                MAX_RAY_HITS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RuntimeConfig::from_json_str(
            r#"{ "object_pool_size": 8, "occlusion": { "smoothing_factor": 1.0 } }"#,
        )
        .unwrap();

        assert_eq!(config.object_pool_size, 8);
        assert_eq!(config.event_pool_size, 1024);
        assert_eq!(config.occlusion.smoothing_factor, 1.0);
        assert_eq!(config.occlusion.max_hits_per_ray, MAX_RAY_HITS);
    }

    #[test]
    fn test_json_round_trip() {
        let config = RuntimeConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(RuntimeConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = RuntimeConfig::default();
        config.occlusion.smoothing_factor = 0.0;
        assert!(matches!(config.validate(), Err(AtlError::InvalidConfig(_))));

        let mut config = RuntimeConfig::default();
        config.occlusion.max_hits_per_ray = MAX_RAY_HITS + 1;
        assert!(config.validate().is_err());

        let mut config = RuntimeConfig::default();
        config.event_pool_size = 0;
        assert!(config.validate().is_err());

        assert!(matches!(
            RuntimeConfig::from_json_str("{ not json"),
            Err(AtlError::Json(_))
        ));
    }
}

//! Controls Library
//!
//! Designer-authored triggers and their middleware connections, loaded
//! from JSON. Connection properties are opaque to the runtime and are
//! interpreted by the backend.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AtlError, AtlResult};
use crate::ids::TriggerId;

/// One middleware action of a trigger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDesc {
    pub name: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl ConnectionDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// Designer-authored trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDesc {
    pub id: TriggerId,
    pub name: String,
    /// Audible radius; 0 disables virtualisation for its events
    #[serde(default)]
    pub radius: f32,
    #[serde(default)]
    pub connections: Vec<ConnectionDesc>,
}

/// Collection of trigger definitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlsLibrary {
    #[serde(default)]
    pub triggers: Vec<TriggerDesc>,
}

impl ControlsLibrary {
    pub fn from_json_str(json: &str) -> AtlResult<Self> {
        let library: Self = serde_json::from_str(json)?;
        library.validate()?;
        Ok(library)
    }

    pub fn from_file(path: impl AsRef<Path>) -> AtlResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> AtlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Trigger ids must be unique and radii non-negative
    pub fn validate(&self) -> AtlResult<()> {
        let mut seen = ahash::AHashSet::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            if !seen.insert(trigger.id) {
                return Err(AtlError::InvalidConfig(format!(
                    "duplicate trigger id {} ({})",
                    trigger.id, trigger.name
                )));
            }
            if trigger.radius < 0.0 {
                return Err(AtlError::InvalidConfig(format!(
                    "trigger {} has a negative radius",
                    trigger.name
                )));
            }
        }
        Ok(())
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&TriggerDesc> {
        self.triggers.iter().find(|trigger| trigger.id == id)
    }

    pub fn trigger_by_name(&self, name: &str) -> Option<&TriggerDesc> {
        self.triggers.iter().find(|trigger| trigger.name == name)
    }
}

//! Identifiers
//!
//! Designer-authored controls are addressed by plain numeric ids, runtime
//! records by generational pool handles.

use std::fmt;

use atl_core::memory::SlotHandle;
use serde::{Deserialize, Serialize};

macro_rules! control_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! handle_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub SlotHandle);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", self.0.index(), self.0.generation())
            }
        }
    };
}

control_id!(
    /// Logical trigger
    TriggerId
);
control_id!(
    /// Backend parameter (RTPC)
    ParameterId
);
control_id!(SwitchId);
control_id!(SwitchStateId);
control_id!(EnvironmentId);

handle_id!(
    /// Audio object slot
    ObjectId
);
handle_id!(
    /// Event slot
    EventId
);
handle_id!(
    /// Standalone file slot
    StandaloneFileId
);

/// Reserved parameter receiving the object's speed while absolute velocity tracking is on
pub const ABSOLUTE_VELOCITY_PARAMETER_ID: ParameterId = ParameterId(0xFFFF_FF01);

/// Reserved parameter receiving the listener-relative closing speed
pub const RELATIVE_VELOCITY_PARAMETER_ID: ParameterId = ParameterId(0xFFFF_FF02);

/// One firing of a trigger on one object; never 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerInstanceId(u32);

impl TriggerInstanceId {
    /// Raw value
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TriggerInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic instance id source that wraps around and skips 0
#[derive(Debug)]
pub struct TriggerInstanceIdGenerator {
    next: u32,
}

impl TriggerInstanceIdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Start counting from `first` (0 is bumped to 1)
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: first.max(1),
        }
    }

    pub fn next_id(&mut self) -> TriggerInstanceId {
        let id = TriggerInstanceId(self.next);
        self.next = self.next.wrapping_add(1);
        if self.next == 0 {
            self.next = 1;
        }
        id
    }
}

impl Default for TriggerInstanceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

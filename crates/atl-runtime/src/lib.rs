//! # ATL Runtime
//!
//! Audio Translation Layer: the game-facing audio object runtime that sits
//! between gameplay code and an audio middleware backend.
//!
//! ## Features
//! - Audio objects with transforms, parameters, switches and environments
//! - Trigger execution tracked per instance, with exactly one completion
//!   notification per execution
//! - Standalone file playback with start/finish notifications
//! - Obstruction/occlusion estimated from raycasts against the physics world
//! - Sync callback counter keeping objects alive while completions are pending
//! - Request/callback queues so game and middleware threads never touch
//!   runtime state directly

pub mod backend;
pub mod config;
pub mod controls;
pub mod error;
pub mod event;
pub mod ids;
pub mod listener;
pub mod notification;
pub mod object;
pub mod propagation;
pub mod request;
pub mod runtime;
pub mod standalone_file;
pub mod system;
pub mod trigger;

#[cfg(test)]
mod testing;

pub use backend::{Backend, RequestStatus, SimulatedBackend};
pub use config::{OcclusionConfig, RuntimeConfig};
pub use controls::{ConnectionDesc, ControlsLibrary, TriggerDesc};
pub use error::{AtlError, AtlResult};
pub use event::{Event, EventState};
pub use ids::{
    EnvironmentId, EventId, ObjectId, ParameterId, StandaloneFileId, SwitchId, SwitchStateId,
    TriggerId, TriggerInstanceId,
};
pub use notification::{Notification, SyncCallbackCounter, SyncCallbackToken, TriggerFinished};
pub use object::AudioObject;
pub use propagation::{OcclusionType, PropagationData};
pub use request::{
    BackendCallback, CallbackFlags, CallbackSink, ObjectDesc, Request, StopTarget,
    TriggerRequest, UserData,
};
pub use runtime::AudioRuntime;
pub use standalone_file::{FileState, StandaloneFile};
pub use system::AudioSystem;
pub use trigger::{Trigger, TriggerExecution};

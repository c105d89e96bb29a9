//! Middleware Backend
//!
//! Abstraction over the audio middleware the runtime drives. The runtime
//! owns every backend record it constructs and hands it back for
//! destruction; records report progress through a [`CallbackSink`].

pub mod simulated;

use std::any::Any;
use std::sync::Arc;

use atl_core::math::Transform;
use atl_core::time::DeltaTime;

use crate::controls::ConnectionDesc;
use crate::error::AtlResult;
use crate::ids::{
    EnvironmentId, EventId, ObjectId, ParameterId, StandaloneFileId, SwitchId, SwitchStateId,
};
use crate::request::CallbackSink;

pub use simulated::SimulatedBackend;

/// Outcome of a backend call that may start playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Started; completion will be reported
    Success,
    /// Started, but nothing will be reported back
    SuccessDoNotTrack,
    /// Accepted; the start will be reported once data is loaded
    Pending,
    Failure,
}

impl RequestStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessDoNotTrack)
    }
}

/// Audio middleware
pub trait Backend: Send {
    fn name(&self) -> &str;

    /// Called once before any record is constructed
    fn set_callback_sink(&mut self, _sink: CallbackSink) {}

    /// Per-tick update on the audio thread
    fn update(&mut self, _delta: DeltaTime) {}

    fn construct_object(
        &mut self,
        id: ObjectId,
        name: Option<&str>,
        transform: &Transform,
    ) -> AtlResult<Box<dyn BackendObject>>;

    fn destruct_object(&mut self, object: Box<dyn BackendObject>);

    fn construct_listener(&mut self, transform: &Transform) -> AtlResult<Box<dyn BackendListener>>;

    fn destruct_listener(&mut self, listener: Box<dyn BackendListener>);

    fn construct_event(&mut self, id: EventId) -> Box<dyn BackendEvent>;

    fn destruct_event(&mut self, event: Box<dyn BackendEvent>);

    fn construct_standalone_file(
        &mut self,
        id: StandaloneFileId,
        name: &str,
        localized: bool,
    ) -> Box<dyn BackendStandaloneFile>;

    fn destruct_standalone_file(&mut self, file: Box<dyn BackendStandaloneFile>);

    /// Build the middleware side of one trigger connection
    fn construct_trigger_connection(
        &mut self,
        desc: &ConnectionDesc,
    ) -> AtlResult<Arc<dyn BackendTriggerConnection>>;

    /// Called once after every record has been destructed
    fn release(&mut self) {}
}

/// Middleware side of an audio object
pub trait BackendObject: Send {
    fn update(&mut self, _delta: DeltaTime) {}

    fn set_transformation(&mut self, transform: &Transform);

    fn set_parameter(&mut self, parameter: ParameterId, value: f32);

    fn set_switch_state(&mut self, switch: SwitchId, state: SwitchStateId);

    fn set_environment(&mut self, environment: EnvironmentId, amount: f32);

    fn set_obstruction_occlusion(&mut self, obstruction: f32, occlusion: f32);

    fn play_file(&mut self, file: &mut dyn BackendStandaloneFile) -> RequestStatus;

    fn stop_file(&mut self, file: &mut dyn BackendStandaloneFile) -> RequestStatus;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Middleware side of the listener
pub trait BackendListener: Send {
    fn set_transformation(&mut self, transform: &Transform);
}

/// Middleware side of one event
pub trait BackendEvent: Send {
    /// Request a stop; the finish is still reported through the sink
    fn stop(&mut self) -> RequestStatus;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Middleware side of one standalone file
pub trait BackendStandaloneFile: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// One middleware action a trigger fires
pub trait BackendTriggerConnection: Send + Sync {
    fn execute(
        &self,
        object: &mut dyn BackendObject,
        event: &mut dyn BackendEvent,
    ) -> RequestStatus;
}

//! Events
//!
//! One playing (or loading) instance of a trigger connection.

use crate::backend::{BackendEvent, RequestStatus};
use crate::ids::{ObjectId, TriggerId, TriggerInstanceId};

/// Lifecycle state of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventState {
    #[default]
    None,
    /// Waiting for the middleware to load data
    Loading,
    Playing,
    /// Started while its object was virtual
    PlayingDelayed,
}

/// Runtime event record
pub struct Event {
    state: EventState,
    object: ObjectId,
    trigger: TriggerId,
    instance: TriggerInstanceId,
    radius: f32,
    backend: Option<Box<dyn BackendEvent>>,
}

impl Event {
    pub fn new(
        object: ObjectId,
        trigger: TriggerId,
        instance: TriggerInstanceId,
        radius: f32,
    ) -> Self {
        Self {
            state: EventState::None,
            object,
            trigger,
            instance,
            radius,
            backend: None,
        }
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn set_state(&mut self, state: EventState) {
        self.state = state;
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, EventState::Playing | EventState::PlayingDelayed)
    }

    pub fn is_loading(&self) -> bool {
        self.state == EventState::Loading
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn trigger(&self) -> TriggerId {
        self.trigger
    }

    pub fn instance(&self) -> TriggerInstanceId {
        self.instance
    }

    /// Audible radius inherited from the trigger
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn attach_backend(&mut self, backend: Box<dyn BackendEvent>) {
        self.backend = Some(backend);
    }

    pub fn take_backend(&mut self) -> Option<Box<dyn BackendEvent>> {
        self.backend.take()
    }

    /// Ask the middleware to stop; the finish arrives later as a report
    pub fn stop(&mut self) -> RequestStatus {
        match self.backend.as_mut() {
            Some(backend) => backend.stop(),
            None => RequestStatus::Failure,
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("state", &self.state)
            .field("object", &self.object)
            .field("trigger", &self.trigger)
            .field("instance", &self.instance)
            .field("radius", &self.radius)
            .finish()
    }
}

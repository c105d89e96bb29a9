//! Triggers
//!
//! A trigger is a designer-authored bundle of middleware connections.
//! Executing it on an object creates one event per connection that starts
//! (or starts loading); the resulting trigger instance stays alive until
//! every one of those events has finished.

use std::sync::Arc;

use atl_core::memory::SlotPool;
use atl_core::time::Countdown;
use bitflags::bitflags;
use smallvec::SmallVec;

use crate::backend::{Backend, BackendTriggerConnection, RequestStatus};
use crate::event::{Event, EventState};
use crate::ids::{EventId, ObjectId, TriggerId, TriggerInstanceId};
use crate::notification::{Dispatcher, TriggerFinished};
use crate::object::AudioObject;
use crate::request::{CallbackFlags, TriggerRequest, UserData};

bitflags! {
    /// Status of a trigger instance
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TriggerStatus: u8 {
        const PLAYING = 1 << 0;
        const LOADED = 1 << 1;
        const LOADING = 1 << 2;
        /// Held while the instance's data is being unloaded
        const UNLOADING = 1 << 3;
        const CALLBACK_ON_EXTERNAL_THREAD = 1 << 4;
        const CALLBACK_ON_AUDIO_THREAD = 1 << 5;
    }
}

impl TriggerStatus {
    /// Callback routing encoded in the status
    pub fn callbacks(&self) -> CallbackFlags {
        let mut callbacks = CallbackFlags::empty();
        callbacks.set(
            CallbackFlags::EXTERNAL_THREAD,
            self.contains(Self::CALLBACK_ON_EXTERNAL_THREAD),
        );
        callbacks.set(
            CallbackFlags::AUDIO_THREAD,
            self.contains(Self::CALLBACK_ON_AUDIO_THREAD),
        );
        callbacks
    }
}

impl From<CallbackFlags> for TriggerStatus {
    fn from(callbacks: CallbackFlags) -> Self {
        let mut status = Self::empty();
        status.set(
            Self::CALLBACK_ON_EXTERNAL_THREAD,
            callbacks.contains(CallbackFlags::EXTERNAL_THREAD),
        );
        status.set(
            Self::CALLBACK_ON_AUDIO_THREAD,
            callbacks.contains(CallbackFlags::AUDIO_THREAD),
        );
        status
    }
}

/// Bookkeeping for one trigger instance on one object
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerInstanceState {
    pub trigger: TriggerId,
    pub flags: TriggerStatus,
    pub num_playing_events: u32,
    pub num_loading_events: u32,
    /// Fixed lifetime, if the game asked for one
    pub expiration: Option<Countdown>,
    pub user_data: UserData,
    /// Events that finished unsuccessfully
    pub num_failed_events: u32,
}

impl TriggerInstanceState {
    pub fn new(trigger: TriggerId, request: &TriggerRequest) -> Self {
        Self {
            trigger,
            flags: TriggerStatus::from(request.callbacks),
            num_playing_events: 0,
            num_loading_events: 0,
            expiration: request.lifetime_ms.map(Countdown::from_millis),
            user_data: request.user_data,
            num_failed_events: 0,
        }
    }

    pub fn num_active_events(&self) -> u32 {
        self.num_playing_events + self.num_loading_events
    }

    /// No events left and nothing being unloaded
    pub fn is_finished(&self) -> bool {
        self.num_active_events() == 0 && !self.flags.contains(TriggerStatus::UNLOADING)
    }

    /// Keep the PLAYING and LOADING bits in line with the counters
    pub fn refresh_flags(&mut self) {
        self.flags.set(TriggerStatus::PLAYING, self.num_playing_events > 0);
        self.flags.set(TriggerStatus::LOADING, self.num_loading_events > 0);
    }

    pub fn finished(&self, object: ObjectId, instance: TriggerInstanceId) -> TriggerFinished {
        TriggerFinished {
            object,
            instance,
            trigger: self.trigger,
            user_data: self.user_data,
            success: self.num_failed_events == 0,
        }
    }
}

/// What an execution left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerExecution {
    pub instance: TriggerInstanceId,
    pub num_playing_events: u32,
    pub num_loading_events: u32,
}

impl TriggerExecution {
    /// Whether the instance was registered and will finish later
    pub fn is_tracked(&self) -> bool {
        self.num_playing_events + self.num_loading_events > 0
    }
}

/// State a trigger execution touches besides the object
pub struct ExecutionContext<'a> {
    pub backend: &'a mut dyn Backend,
    pub events: &'a mut SlotPool<Event>,
    pub dispatcher: &'a mut Dispatcher,
}

/// Runtime trigger built from a controls library entry
pub struct Trigger {
    id: TriggerId,
    name: String,
    radius: f32,
    connections: SmallVec<[Arc<dyn BackendTriggerConnection>; 2]>,
}

impl Trigger {
    pub fn new(id: TriggerId, name: impl Into<String>, radius: f32) -> Self {
        Self {
            id,
            name: name.into(),
            radius: radius.max(0.0),
            connections: SmallVec::new(),
        }
    }

    pub fn with_connection(mut self, connection: Arc<dyn BackendTriggerConnection>) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn add_connection(&mut self, connection: Arc<dyn BackendTriggerConnection>) {
        self.connections.push(connection);
    }

    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    /// Fire every connection on `object` as instance `instance`
    ///
    /// An execution that leaves nothing to wait for completes immediately.
    pub fn execute(
        &self,
        object: &mut AudioObject,
        instance: TriggerInstanceId,
        request: &TriggerRequest,
        context: &mut ExecutionContext<'_>,
    ) -> TriggerExecution {
        let mut state = TriggerInstanceState::new(self.id, request);

        for connection in &self.connections {
            let Some(handle) = context
                .events
                .insert(Event::new(object.id(), self.id, instance, self.radius))
            else {
                log::warn!(
                    "Event pool exhausted ({}), skipping a connection of trigger {}",
                    context.events.capacity(),
                    self.name
                );
                continue;
            };
            let event_id = EventId(handle);

            let mut backend_event = context.backend.construct_event(event_id);
            let status = match object.backend_mut() {
                Some(backend_object) => connection.execute(backend_object, backend_event.as_mut()),
                None => RequestStatus::Failure,
            };

            let event_state = match status {
                RequestStatus::Success if object.is_virtual() => EventState::PlayingDelayed,
                RequestStatus::Success => EventState::Playing,
                RequestStatus::Pending => EventState::Loading,
                RequestStatus::SuccessDoNotTrack | RequestStatus::Failure => {
                    if status == RequestStatus::Failure {
                        log::warn!(
                            "Trigger {} failed to start a connection on {}",
                            self.name,
                            object.id()
                        );
                    }
                    context.events.remove(handle);
                    context.backend.destruct_event(backend_event);
                    continue;
                }
            };

            if let Some(event) = context.events.get_mut(handle) {
                event.set_state(event_state);
                event.attach_backend(backend_event);
            }
            if event_state == EventState::Loading {
                state.num_loading_events += 1;
            } else {
                state.num_playing_events += 1;
            }
            object.add_event(event_id);
        }

        let execution = TriggerExecution {
            instance,
            num_playing_events: state.num_playing_events,
            num_loading_events: state.num_loading_events,
        };

        if execution.is_tracked() {
            state.refresh_flags();
            object.add_trigger_state(instance, state);
        } else {
            // Nothing to wait for; a start failure alone does not mark it unsuccessful.
            context.dispatcher.trigger_finished(
                state.finished(object.id(), instance),
                state.flags.callbacks(),
                object.sync_callback_counter(),
            );
        }

        execution
    }

    /// Ask every active event of this trigger on `object` to stop
    pub fn stop(&self, object: &mut AudioObject, events: &mut SlotPool<Event>) -> usize {
        object.stop_trigger_events(Some(self.id), events)
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("radius", &self.radius)
            .field("connections", &self.connections.len())
            .finish()
    }
}

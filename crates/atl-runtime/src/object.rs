//! Audio Objects
//!
//! A positioned sound emitter in the game world. Objects own the
//! bookkeeping for the events, trigger instances and standalone files
//! playing on them, and may only be released once all of them have
//! drained and the game holds no outstanding synchronous callbacks.

use ahash::{AHashMap, AHashSet};
use atl_core::math::{Transform, Vec3};
use atl_core::memory::SlotPool;
use atl_core::time::DeltaTime;
use atl_physics::RayCaster;
use bitflags::bitflags;
use smallvec::SmallVec;

use crate::backend::BackendObject;
use crate::config::RuntimeConfig;
use crate::event::{Event, EventState};
use crate::ids::{
    ABSOLUTE_VELOCITY_PARAMETER_ID, EnvironmentId, EventId, ObjectId, ParameterId,
    RELATIVE_VELOCITY_PARAMETER_ID, StandaloneFileId, SwitchId, SwitchStateId, TriggerId,
    TriggerInstanceId,
};
use crate::listener::ListenerState;
use crate::notification::{Dispatcher, SyncCallbackCounter};
use crate::propagation::{
    OcclusionType, PropagationData, PropagationInput, PropagationProcessor,
};
use crate::request::ObjectDesc;
use crate::standalone_file::{FileState, StandaloneFile};
use crate::trigger::{TriggerInstanceState, TriggerStatus};

const PUBLISH_EPSILON: f32 = 1e-4;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u8 {
        /// Cleared once the game releases the object
        const IN_USE = 1 << 0;
        /// Listener is outside the audible radius of every active event
        const VIRTUAL = 1 << 1;
        const CAN_RUN_OCCLUSION = 1 << 2;
        /// Moved recently while velocity tracking is on
        const MOVING_OR_DECAYING = 1 << 3;
        const TRACK_ABSOLUTE_VELOCITY = 1 << 4;
        const TRACK_RELATIVE_VELOCITY = 1 << 5;
    }
}

/// Per-tick inputs shared by every object
pub struct ObjectUpdate<'a> {
    pub delta: DeltaTime,
    pub listener: ListenerState,
    pub caster: Option<&'a dyn RayCaster>,
    pub config: &'a RuntimeConfig,
}

/// Runtime audio object
pub struct AudioObject {
    id: ObjectId,
    name: Option<String>,
    entity_id: Option<u64>,
    flags: ObjectFlags,
    transformation: Transform,
    previous_position: Vec3,
    absolute_velocity: f32,
    relative_velocity: f32,
    active_events: AHashSet<EventId>,
    active_files: AHashSet<StandaloneFileId>,
    trigger_states: AHashMap<TriggerInstanceId, TriggerInstanceState>,
    sync_callbacks: SyncCallbackCounter,
    propagation: PropagationProcessor,
    published_propagation: PropagationData,
    backend: Option<Box<dyn BackendObject>>,
}

impl AudioObject {
    pub fn new(id: ObjectId, desc: &ObjectDesc, ray_offset: f32) -> Self {
        Self {
            id,
            name: desc.name.clone(),
            entity_id: desc.entity_id,
            flags: ObjectFlags::IN_USE,
            transformation: desc.transform,
            previous_position: desc.transform.position,
            absolute_velocity: 0.0,
            relative_velocity: 0.0,
            active_events: AHashSet::new(),
            active_files: AHashSet::new(),
            trigger_states: AHashMap::new(),
            sync_callbacks: SyncCallbackCounter::new(),
            propagation: PropagationProcessor::new(desc.occlusion, ray_offset),
            published_propagation: PropagationData::default(),
            backend: None,
        }
    }

    pub fn attach_backend(&mut self, backend: Box<dyn BackendObject>) {
        self.backend = Some(backend);
    }

    pub fn backend_mut(&mut self) -> Option<&mut (dyn BackendObject + 'static)> {
        self.backend.as_deref_mut()
    }

    pub fn take_backend(&mut self) -> Option<Box<dyn BackendObject>> {
        self.backend.take()
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn entity_id(&self) -> Option<u64> {
        self.entity_id
    }

    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    pub fn is_in_use(&self) -> bool {
        self.flags.contains(ObjectFlags::IN_USE)
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.contains(ObjectFlags::VIRTUAL)
    }

    pub fn transformation(&self) -> &Transform {
        &self.transformation
    }

    pub fn absolute_velocity(&self) -> f32 {
        self.absolute_velocity
    }

    pub fn relative_velocity(&self) -> f32 {
        self.relative_velocity
    }

    pub fn active_events(&self) -> impl Iterator<Item = EventId> + '_ {
        self.active_events.iter().copied()
    }

    pub fn num_active_events(&self) -> usize {
        self.active_events.len()
    }

    pub fn num_active_files(&self) -> usize {
        self.active_files.len()
    }

    pub fn trigger_state(&self, instance: TriggerInstanceId) -> Option<&TriggerInstanceState> {
        self.trigger_states.get(&instance)
    }

    pub fn trigger_states(
        &self,
    ) -> impl Iterator<Item = (TriggerInstanceId, &TriggerInstanceState)> + '_ {
        self.trigger_states.iter().map(|(id, state)| (*id, state))
    }

    pub fn sync_callback_counter(&self) -> &SyncCallbackCounter {
        &self.sync_callbacks
    }

    pub fn increment_sync_callback_counter(&self) {
        self.sync_callbacks.increment();
    }

    pub fn decrement_sync_callback_counter(&self) {
        self.sync_callbacks.decrement();
    }

    pub fn propagation(&self) -> &PropagationProcessor {
        &self.propagation
    }

    pub fn propagation_mut(&mut self) -> &mut PropagationProcessor {
        &mut self.propagation
    }

    /// Values last sent to the backend
    pub fn propagation_data(&self) -> PropagationData {
        self.published_propagation
    }

    /// Nothing playing, nothing loading and no outstanding game callbacks
    pub fn can_be_released(&self) -> bool {
        self.active_events.is_empty()
            && self.active_files.is_empty()
            && self.sync_callbacks.count() == 0
    }

    /// Hand the object back; it lingers until it can be released
    pub fn release(&mut self) {
        self.flags.remove(ObjectFlags::IN_USE);
    }

    pub fn add_event(&mut self, event: EventId) {
        self.active_events.insert(event);
    }

    /// Register a new trigger instance; an id already present is left untouched
    pub fn add_trigger_state(&mut self, instance: TriggerInstanceId, state: TriggerInstanceState) {
        if self.trigger_states.contains_key(&instance) {
            log::error!(
                "Trigger instance {} registered twice on {}",
                instance,
                self.id
            );
            return;
        }
        self.trigger_states.insert(instance, state);
    }

    /// A loading event started playing
    pub fn report_started_event(&mut self, event_id: EventId, event: &mut Event) {
        if !self.active_events.contains(&event_id) {
            log::warn!("{} reported start of unknown event {}", self.id, event_id);
            return;
        }
        if !event.is_loading() {
            return;
        }

        let is_virtual = self.flags.contains(ObjectFlags::VIRTUAL);
        let Some(state) = self.trigger_states.get_mut(&event.instance()) else {
            log::warn!(
                "Event {} started for unknown trigger instance {}",
                event_id,
                event.instance()
            );
            return;
        };

        event.set_state(if is_virtual {
            EventState::PlayingDelayed
        } else {
            EventState::Playing
        });
        state.num_loading_events = state.num_loading_events.saturating_sub(1);
        state.num_playing_events += 1;
        state.flags.insert(TriggerStatus::LOADED);
        state.refresh_flags();
    }

    /// Remove a finished event; returns true when its trigger instance completed
    pub fn report_finished_event(
        &mut self,
        event_id: EventId,
        event: &Event,
        success: bool,
        dispatcher: &mut Dispatcher,
    ) -> bool {
        if !self.active_events.remove(&event_id) {
            log::warn!("{} reported finish of unknown event {}", self.id, event_id);
            return false;
        }

        let instance = event.instance();
        let Some(state) = self.trigger_states.get_mut(&instance) else {
            log::warn!(
                "Event {} finished for unknown trigger instance {}",
                event_id,
                instance
            );
            return false;
        };

        let counter = if event.is_playing() {
            &mut state.num_playing_events
        } else {
            &mut state.num_loading_events
        };
        if *counter == 0 {
            log::error!(
                "Trigger instance {} on {} has no {:?} events left",
                instance,
                self.id,
                event.state()
            );
        }
        *counter = counter.saturating_sub(1);

        if !success {
            state.num_failed_events += 1;
        }
        state.refresh_flags();

        if !state.is_finished() {
            return false;
        }

        let Some(state) = self.trigger_states.remove(&instance) else {
            return false;
        };
        dispatcher.trigger_finished(
            state.finished(self.id, instance),
            state.flags.callbacks(),
            &self.sync_callbacks,
        );
        true
    }

    /// Stop active events, optionally only those of one trigger
    pub fn stop_trigger_events(
        &mut self,
        trigger: Option<TriggerId>,
        events: &mut SlotPool<Event>,
    ) -> usize {
        self.stop_events_where(events, |event| {
            trigger.is_none_or(|trigger| event.trigger() == trigger)
        })
    }

    pub fn stop_all_triggers(&mut self, events: &mut SlotPool<Event>) -> usize {
        self.stop_trigger_events(None, events)
    }

    fn stop_instance_events(
        &mut self,
        instance: TriggerInstanceId,
        events: &mut SlotPool<Event>,
    ) -> usize {
        self.stop_events_where(events, |event| event.instance() == instance)
    }

    fn stop_events_where(
        &mut self,
        events: &mut SlotPool<Event>,
        filter: impl Fn(&Event) -> bool,
    ) -> usize {
        let mut stopped = 0;
        for event_id in &self.active_events {
            let Some(event) = events.get_mut(event_id.0) else {
                continue;
            };
            if filter(event) {
                if !event.stop().is_success() {
                    log::debug!("Backend refused to stop event {}", event_id);
                }
                stopped += 1;
            }
        }
        stopped
    }

    pub fn add_standalone_file(&mut self, file: StandaloneFileId) {
        self.active_files.insert(file);
    }

    /// A loading file started; returns whether it is still active
    pub fn report_started_file(
        &mut self,
        file_id: StandaloneFileId,
        file: &mut StandaloneFile,
        success: bool,
        dispatcher: &mut Dispatcher,
    ) -> bool {
        if !self.active_files.contains(&file_id) {
            log::warn!("{} reported start of unknown file {}", self.id, file_id);
            return false;
        }
        if file.state() != FileState::Loading {
            return true;
        }

        dispatcher.file_started(self.id, file_id, file.name(), file.user_data(), success);
        if !success {
            self.active_files.remove(&file_id);
            return false;
        }
        file.set_state(FileState::Playing);
        true
    }

    pub fn report_finished_file(
        &mut self,
        file_id: StandaloneFileId,
        file: &StandaloneFile,
        dispatcher: &mut Dispatcher,
    ) {
        if !self.active_files.remove(&file_id) {
            log::warn!("{} reported finish of unknown file {}", self.id, file_id);
            return;
        }
        dispatcher.file_finished(self.id, file_id, file.name(), file.user_data());
    }

    /// Stop every active file called `name`
    pub fn stop_file(&mut self, name: &str, files: &mut SlotPool<StandaloneFile>) -> usize {
        self.stop_files_where(files, |file| file.name() == name)
    }

    pub fn stop_all_files(&mut self, files: &mut SlotPool<StandaloneFile>) -> usize {
        self.stop_files_where(files, |_| true)
    }

    fn stop_files_where(
        &mut self,
        files: &mut SlotPool<StandaloneFile>,
        filter: impl Fn(&StandaloneFile) -> bool,
    ) -> usize {
        let mut stopped = 0;
        for file_id in &self.active_files {
            let Some(file) = files.get_mut(file_id.0) else {
                continue;
            };
            if file.state() == FileState::Stopping || !filter(file) {
                continue;
            }
            if let (Some(backend), Some(backend_file)) =
                (self.backend.as_deref_mut(), file.backend_mut())
            {
                if !backend.stop_file(backend_file).is_success() {
                    log::debug!("Backend refused to stop file {}", file_id);
                }
            }
            file.set_state(FileState::Stopping);
            stopped += 1;
        }
        stopped
    }

    pub fn set_transformation(&mut self, transform: Transform, config: &RuntimeConfig) {
        let previous = self.transformation.position;
        self.transformation = transform;

        let threshold = config.position_update_threshold;
        let moved = transform.position.distance_squared(previous) > threshold * threshold;
        if moved && self.tracks_velocity() && !self.flags.contains(ObjectFlags::MOVING_OR_DECAYING)
        {
            self.previous_position = previous;
            self.flags.insert(ObjectFlags::MOVING_OR_DECAYING);
        }

        if let Some(backend) = self.backend.as_mut() {
            backend.set_transformation(&self.transformation);
        }
    }

    pub fn set_parameter(&mut self, parameter: ParameterId, value: f32) {
        if let Some(backend) = self.backend.as_mut() {
            backend.set_parameter(parameter, value);
        }
    }

    pub fn set_switch_state(&mut self, switch: SwitchId, state: SwitchStateId) {
        if let Some(backend) = self.backend.as_mut() {
            backend.set_switch_state(switch, state);
        }
    }

    pub fn set_environment(&mut self, environment: EnvironmentId, amount: f32) {
        if let Some(backend) = self.backend.as_mut() {
            backend.set_environment(environment, amount.clamp(0.0, 1.0));
        }
    }

    pub fn set_occlusion_type(&mut self, occlusion_type: OcclusionType) {
        self.propagation.set_occlusion_type(occlusion_type);
    }

    pub fn set_occlusion_ray_offset(&mut self, offset: f32) {
        self.propagation.set_ray_offset(offset);
    }

    pub fn toggle_absolute_velocity_tracking(&mut self, enable: bool) {
        self.flags.set(ObjectFlags::TRACK_ABSOLUTE_VELOCITY, enable);
        if !enable && self.absolute_velocity != 0.0 {
            self.absolute_velocity = 0.0;
            self.set_parameter(ABSOLUTE_VELOCITY_PARAMETER_ID, 0.0);
        }
        if !self.tracks_velocity() {
            self.flags.remove(ObjectFlags::MOVING_OR_DECAYING);
        }
    }

    pub fn toggle_relative_velocity_tracking(&mut self, enable: bool) {
        self.flags.set(ObjectFlags::TRACK_RELATIVE_VELOCITY, enable);
        if !enable && self.relative_velocity != 0.0 {
            self.relative_velocity = 0.0;
            self.set_parameter(RELATIVE_VELOCITY_PARAMETER_ID, 0.0);
        }
        if !self.tracks_velocity() {
            self.flags.remove(ObjectFlags::MOVING_OR_DECAYING);
        }
    }

    fn tracks_velocity(&self) -> bool {
        self.flags.intersects(
            ObjectFlags::TRACK_ABSOLUTE_VELOCITY | ObjectFlags::TRACK_RELATIVE_VELOCITY,
        )
    }

    /// Per-tick update on the audio thread
    pub fn update(&mut self, update: &ObjectUpdate<'_>, events: &mut SlotPool<Event>) {
        self.update_expirations(update.delta, events);
        self.update_virtual_state(update.listener.position, events);

        if self.flags.contains(ObjectFlags::MOVING_OR_DECAYING) {
            self.update_velocities(
                update.delta,
                &update.listener,
                update.config.velocity_tracking_threshold,
            );
        }

        self.update_propagation(update);

        if let Some(backend) = self.backend.as_mut() {
            backend.update(update.delta);
        }
    }

    fn update_expirations(&mut self, delta: DeltaTime, events: &mut SlotPool<Event>) {
        let expired: SmallVec<[TriggerInstanceId; 4]> = self
            .trigger_states
            .iter_mut()
            .filter_map(|(instance, state)| {
                let countdown = state.expiration.as_mut()?;
                countdown.tick(delta).then_some(*instance)
            })
            .collect();

        for instance in expired {
            let stopped = self.stop_instance_events(instance, events);
            log::debug!(
                "Trigger instance {} on {} expired, stopping {} events",
                instance,
                self.id,
                stopped
            );
        }
    }

    fn update_virtual_state(&mut self, listener_position: Vec3, events: &mut SlotPool<Event>) {
        let max_radius = self
            .active_events
            .iter()
            .filter_map(|event_id| events.get(event_id.0))
            .map(Event::radius)
            .fold(0.0_f32, f32::max);

        let distance = listener_position.distance(self.transformation.position);
        let is_virtual = max_radius > 0.0 && distance > max_radius;
        if is_virtual == self.is_virtual() {
            return;
        }

        self.flags.set(ObjectFlags::VIRTUAL, is_virtual);
        log::trace!("{} virtual: {}", self.id, is_virtual);

        for event_id in &self.active_events {
            let Some(event) = events.get_mut(event_id.0) else {
                continue;
            };
            match (event.state(), is_virtual) {
                (EventState::Playing, true) => event.set_state(EventState::PlayingDelayed),
                (EventState::PlayingDelayed, false) => event.set_state(EventState::Playing),
                _ => {}
            }
        }
    }

    fn update_velocities(&mut self, delta: DeltaTime, listener: &ListenerState, threshold: f32) {
        let dt = delta.as_secs_f32();
        if dt <= 0.0 {
            return;
        }

        let position = self.transformation.position;
        let velocity = (position - self.previous_position) / dt;
        self.previous_position = position;

        let speed = velocity.length();
        let moving = speed >= threshold;

        if self.flags.contains(ObjectFlags::TRACK_ABSOLUTE_VELOCITY) {
            let value = if moving { speed } else { 0.0 };
            if (value - self.absolute_velocity).abs() > f32::EPSILON {
                self.absolute_velocity = value;
                self.set_parameter(ABSOLUTE_VELOCITY_PARAMETER_ID, value);
            }
        }

        if self.flags.contains(ObjectFlags::TRACK_RELATIVE_VELOCITY) {
            let towards_listener = (listener.position - position).normalize_or_zero();
            let closing = (velocity - listener.velocity).dot(towards_listener);
            let value = if moving { closing } else { 0.0 };
            if (value - self.relative_velocity).abs() > f32::EPSILON {
                self.relative_velocity = value;
                self.set_parameter(RELATIVE_VELOCITY_PARAMETER_ID, value);
            }
        }

        if !moving {
            self.flags.remove(ObjectFlags::MOVING_OR_DECAYING);
        }
    }

    fn update_propagation(&mut self, update: &ObjectUpdate<'_>) {
        let config = &update.config.occlusion;
        let occlusion_type = self.propagation.occlusion_type();
        let distance = update
            .listener
            .position
            .distance(self.transformation.position);

        let can_run = occlusion_type.is_active()
            && !self.is_virtual()
            && config.ray_casting_enabled
            && distance <= config.max_distance
            && update.caster.is_some();
        self.flags.set(ObjectFlags::CAN_RUN_OCCLUSION, can_run);

        // Inactive types still publish once so the backend drops its last values.
        self.propagation.update(
            &PropagationInput {
                object_position: self.transformation.position,
                listener_position: update.listener.position,
                can_run,
                caster: update.caster,
            },
            config,
        );

        let data = self.propagation.data();
        if !data.approx_eq(&self.published_propagation, PUBLISH_EPSILON) {
            self.published_propagation = data;
            if let Some(backend) = self.backend.as_mut() {
                backend.set_obstruction_occlusion(data.obstruction, data.occlusion);
            }
        }
    }
}

impl std::fmt::Debug for AudioObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("active_events", &self.active_events.len())
            .field("active_files", &self.active_files.len())
            .field("trigger_instances", &self.trigger_states.len())
            .field("sync_callbacks", &self.sync_callbacks.count())
            .finish()
    }
}

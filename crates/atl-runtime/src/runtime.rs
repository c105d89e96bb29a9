//! Audio Runtime
//!
//! Owns every audio object, event and standalone file. All state changes
//! happen on the thread driving the runtime (the audio thread): game
//! requests and middleware callbacks are queued and applied in
//! [`AudioRuntime::process_requests`], while [`AudioRuntime::update`]
//! advances time.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use atl_core::math::Transform;
use atl_core::memory::SlotPool;
use atl_core::time::DeltaTime;
use atl_physics::RayCaster;
use crossbeam::channel::{Receiver, Select, Sender, bounded, unbounded};

use crate::backend::{Backend, RequestStatus};
use crate::config::RuntimeConfig;
use crate::controls::ControlsLibrary;
use crate::error::{AtlError, AtlResult};
use crate::event::Event;
use crate::ids::{
    EnvironmentId, EventId, ObjectId, ParameterId, StandaloneFileId, SwitchId, SwitchStateId,
    TriggerId, TriggerInstanceIdGenerator,
};
use crate::listener::Listener;
use crate::notification::{Dispatcher, Notification, TriggerFinished};
use crate::object::{AudioObject, ObjectUpdate};
use crate::propagation::OcclusionType;
use crate::request::{
    BackendCallback, CallbackSink, ObjectDesc, Request, StopTarget, TriggerRequest, UserData,
};
use crate::standalone_file::{FileState, StandaloneFile};
use crate::trigger::{ExecutionContext, Trigger, TriggerExecution};

/// Callback run on the audio thread for completions that asked for it
pub type AudioThreadCallback = Box<dyn FnMut(&TriggerFinished) + Send>;

/// Audio object runtime
pub struct AudioRuntime {
    config: RuntimeConfig,
    backend: Box<dyn Backend>,
    objects: SlotPool<AudioObject>,
    events: SlotPool<Event>,
    files: SlotPool<StandaloneFile>,
    triggers: AHashMap<TriggerId, Trigger>,
    listener: Listener,
    ray_caster: Option<Arc<dyn RayCaster>>,
    instance_ids: TriggerInstanceIdGenerator,
    pending_release: Vec<ObjectId>,
    dispatcher: Dispatcher,
    audio_thread_callbacks: Vec<AudioThreadCallback>,
    request_sender: Sender<Request>,
    request_receiver: Receiver<Request>,
    callback_sender: Sender<BackendCallback>,
    callback_receiver: Receiver<BackendCallback>,
    notifications: Receiver<Notification>,
    shutdown_requested: bool,
    shut_down: bool,
}

impl AudioRuntime {
    /// Create a runtime driving `backend`; rays go to `ray_caster` when given
    pub fn new(
        config: RuntimeConfig,
        mut backend: Box<dyn Backend>,
        ray_caster: Option<Arc<dyn RayCaster>>,
    ) -> AtlResult<Self> {
        config.validate()?;

        let (request_sender, request_receiver) = bounded(config.request_queue_capacity);
        let (callback_sender, callback_receiver) = unbounded();
        let (notification_sender, notifications) = unbounded();

        backend.set_callback_sink(CallbackSink::new(callback_sender.clone()));
        let listener_backend = backend.construct_listener(&Transform::IDENTITY)?;

        log::info!(
            "Audio runtime initialized with {} backend ({} objects, {} events, {} files)",
            backend.name(),
            config.object_pool_size,
            config.event_pool_size,
            config.standalone_file_pool_size
        );

        Ok(Self {
            objects: SlotPool::new(config.object_pool_size),
            events: SlotPool::new(config.event_pool_size),
            files: SlotPool::new(config.standalone_file_pool_size),
            triggers: AHashMap::new(),
            listener: Listener::new(Transform::IDENTITY, Some(listener_backend)),
            ray_caster,
            instance_ids: TriggerInstanceIdGenerator::new(),
            pending_release: Vec::new(),
            dispatcher: Dispatcher::new(notification_sender),
            audio_thread_callbacks: Vec::new(),
            request_sender,
            request_receiver,
            callback_sender,
            callback_receiver,
            notifications,
            shutdown_requested: false,
            shut_down: false,
            config,
            backend,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Sender for game requests
    pub fn request_sender(&self) -> Sender<Request> {
        self.request_sender.clone()
    }

    /// Sink for middleware progress reports
    pub fn callback_sink(&self) -> CallbackSink {
        CallbackSink::new(self.callback_sender.clone())
    }

    /// Receiver of game notifications
    pub fn notifications(&self) -> Receiver<Notification> {
        self.notifications.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn register_trigger(&mut self, trigger: Trigger) -> Option<Trigger> {
        self.triggers.insert(trigger.id(), trigger)
    }

    /// Build triggers and their middleware connections from a library
    pub fn load_controls(&mut self, library: &ControlsLibrary) -> AtlResult<usize> {
        library.validate()?;

        for desc in &library.triggers {
            let mut trigger = Trigger::new(desc.id, desc.name.as_str(), desc.radius);
            for connection in &desc.connections {
                trigger.add_connection(self.backend.construct_trigger_connection(connection)?);
            }
            if self.register_trigger(trigger).is_some() {
                log::warn!("Trigger {} ({}) replaced", desc.name, desc.id);
            }
        }

        log::info!("Loaded {} triggers", library.triggers.len());
        Ok(library.triggers.len())
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.get(&id)
    }

    pub fn num_triggers(&self) -> usize {
        self.triggers.len()
    }

    pub fn object(&self, id: ObjectId) -> Option<&AudioObject> {
        self.objects.get(id.0)
    }

    pub fn objects(&self) -> impl Iterator<Item = &AudioObject> + '_ {
        self.objects.iter().map(|(_, object)| object)
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.0)
    }

    pub fn file(&self, id: StandaloneFileId) -> Option<&StandaloneFile> {
        self.files.get(id.0)
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Objects released by the game but still draining
    pub fn num_pending_release(&self) -> usize {
        self.pending_release.len()
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn create_object(&mut self, desc: ObjectDesc) -> AtlResult<ObjectId> {
        let ray_offset = self.config.occlusion.default_ray_offset;
        let handle = self
            .objects
            .insert_with(|handle| AudioObject::new(ObjectId(handle), &desc, ray_offset))
            .ok_or_else(|| AtlError::ObjectPoolExhausted(self.objects.capacity()))?;
        let id = ObjectId(handle);

        match self
            .backend
            .construct_object(id, desc.name.as_deref(), &desc.transform)
        {
            Ok(backend_object) => {
                if let Some(object) = self.objects.get_mut(handle) {
                    object.attach_backend(backend_object);
                }
            }
            Err(e) => {
                self.objects.remove(handle);
                return Err(e);
            }
        }

        log::debug!(
            "Created audio object {} ({})",
            id,
            desc.name.as_deref().unwrap_or("unnamed")
        );
        Ok(id)
    }

    /// Stop everything on the object and free it once it has drained
    pub fn release_object(&mut self, id: ObjectId) -> AtlResult<()> {
        let object = self
            .objects
            .get_mut(id.0)
            .ok_or(AtlError::UnknownObject(id))?;
        if !object.is_in_use() {
            log::warn!("Audio object {} released twice", id);
            return Ok(());
        }

        object.stop_all_triggers(&mut self.events);
        object.stop_all_files(&mut self.files);
        object.release();

        if object.can_be_released() {
            self.destroy_object(id);
        } else {
            log::debug!("Audio object {} waiting to drain before release", id);
            self.pending_release.push(id);
        }
        Ok(())
    }

    fn live_object(&mut self, id: ObjectId) -> AtlResult<&mut AudioObject> {
        self.objects
            .get_mut(id.0)
            .filter(|object| object.is_in_use())
            .ok_or(AtlError::UnknownObject(id))
    }

    pub fn execute_trigger(
        &mut self,
        object_id: ObjectId,
        trigger_id: TriggerId,
        request: TriggerRequest,
    ) -> AtlResult<TriggerExecution> {
        let trigger = self
            .triggers
            .get(&trigger_id)
            .ok_or(AtlError::UnknownTrigger(trigger_id))?;
        let object = self
            .objects
            .get_mut(object_id.0)
            .filter(|object| object.is_in_use())
            .ok_or(AtlError::UnknownObject(object_id))?;

        let instance = self.instance_ids.next_id();
        let mut context = ExecutionContext {
            backend: &mut *self.backend,
            events: &mut self.events,
            dispatcher: &mut self.dispatcher,
        };
        let execution = trigger.execute(object, instance, &request, &mut context);

        log::trace!(
            "Executed trigger {} on {} as instance {} ({} playing, {} loading)",
            trigger.name(),
            object_id,
            instance,
            execution.num_playing_events,
            execution.num_loading_events
        );
        Ok(execution)
    }

    /// Request a stop; instances complete once their events report finished
    pub fn stop_trigger(&mut self, object_id: ObjectId, target: StopTarget) -> AtlResult<usize> {
        let object = self
            .objects
            .get_mut(object_id.0)
            .ok_or(AtlError::UnknownObject(object_id))?;

        let stopped = match target {
            StopTarget::Trigger(trigger_id) => self
                .triggers
                .get(&trigger_id)
                .ok_or(AtlError::UnknownTrigger(trigger_id))?
                .stop(object, &mut self.events),
            StopTarget::All => object.stop_all_triggers(&mut self.events),
        };
        Ok(stopped)
    }

    pub fn set_transformation(&mut self, id: ObjectId, transform: Transform) -> AtlResult<()> {
        let object = self
            .objects
            .get_mut(id.0)
            .filter(|object| object.is_in_use())
            .ok_or(AtlError::UnknownObject(id))?;
        object.set_transformation(transform, &self.config);
        Ok(())
    }

    pub fn set_parameter(&mut self, id: ObjectId, parameter: ParameterId, value: f32) -> AtlResult<()> {
        self.live_object(id)?.set_parameter(parameter, value);
        Ok(())
    }

    pub fn set_switch_state(
        &mut self,
        id: ObjectId,
        switch: SwitchId,
        state: SwitchStateId,
    ) -> AtlResult<()> {
        self.live_object(id)?.set_switch_state(switch, state);
        Ok(())
    }

    pub fn set_environment(
        &mut self,
        id: ObjectId,
        environment: EnvironmentId,
        amount: f32,
    ) -> AtlResult<()> {
        self.live_object(id)?.set_environment(environment, amount);
        Ok(())
    }

    pub fn set_occlusion_type(&mut self, id: ObjectId, occlusion: OcclusionType) -> AtlResult<()> {
        self.live_object(id)?.set_occlusion_type(occlusion);
        Ok(())
    }

    pub fn set_occlusion_ray_offset(&mut self, id: ObjectId, offset: f32) -> AtlResult<()> {
        self.live_object(id)?.set_occlusion_ray_offset(offset);
        Ok(())
    }

    pub fn toggle_absolute_velocity_tracking(&mut self, id: ObjectId, enable: bool) -> AtlResult<()> {
        self.live_object(id)?.toggle_absolute_velocity_tracking(enable);
        Ok(())
    }

    pub fn toggle_relative_velocity_tracking(&mut self, id: ObjectId, enable: bool) -> AtlResult<()> {
        self.live_object(id)?.toggle_relative_velocity_tracking(enable);
        Ok(())
    }

    /// Start a standalone file; `None` when the backend refused it
    pub fn play_file(
        &mut self,
        object_id: ObjectId,
        name: &str,
        localized: bool,
        user_data: UserData,
    ) -> AtlResult<Option<StandaloneFileId>> {
        let object = self
            .objects
            .get_mut(object_id.0)
            .filter(|object| object.is_in_use())
            .ok_or(AtlError::UnknownObject(object_id))?;
        let handle = self
            .files
            .insert(StandaloneFile::new(object_id, name, localized, user_data))
            .ok_or_else(|| AtlError::FilePoolExhausted(self.files.capacity()))?;
        let file_id = StandaloneFileId(handle);

        let mut backend_file = self
            .backend
            .construct_standalone_file(file_id, name, localized);
        let status = match object.backend_mut() {
            Some(backend_object) => backend_object.play_file(backend_file.as_mut()),
            None => RequestStatus::Failure,
        };

        let state = match status {
            RequestStatus::Success | RequestStatus::SuccessDoNotTrack => FileState::Playing,
            RequestStatus::Pending => FileState::Loading,
            RequestStatus::Failure => {
                log::warn!("Failed to play file {} on {}", name, object_id);
                self.files.remove(handle);
                self.backend.destruct_standalone_file(backend_file);
                self.dispatcher
                    .file_started(object_id, file_id, name, user_data, false);
                return Ok(None);
            }
        };

        if let Some(file) = self.files.get_mut(handle) {
            file.set_state(state);
            file.attach_backend(backend_file);
        }
        object.add_standalone_file(file_id);

        if state == FileState::Playing {
            self.dispatcher
                .file_started(object_id, file_id, name, user_data, true);
        }
        Ok(Some(file_id))
    }

    /// Stop every file called `name` on the object
    pub fn stop_file(&mut self, object_id: ObjectId, name: &str) -> AtlResult<usize> {
        let object = self
            .objects
            .get_mut(object_id.0)
            .ok_or(AtlError::UnknownObject(object_id))?;
        Ok(object.stop_file(name, &mut self.files))
    }

    pub fn set_listener_transformation(&mut self, transform: Transform) {
        self.listener.set_transformation(transform);
    }

    /// A loading event started, or failed to
    pub fn report_started_event(&mut self, event_id: EventId, success: bool) {
        if !success {
            self.report_finished_event(event_id, false);
            return;
        }

        let Some(event) = self.events.get_mut(event_id.0) else {
            log::warn!("Start reported for unknown event {}", event_id);
            return;
        };
        match self.objects.get_mut(event.object().0) {
            Some(object) => object.report_started_event(event_id, event),
            None => log::warn!("Event {} belongs to a freed object", event_id),
        }
    }

    pub fn report_finished_event(&mut self, event_id: EventId, success: bool) {
        let Some(mut event) = self.events.remove(event_id.0) else {
            log::warn!("Finish reported for unknown event {}", event_id);
            return;
        };

        match self.objects.get_mut(event.object().0) {
            Some(object) => {
                object.report_finished_event(event_id, &event, success, &mut self.dispatcher);
            }
            None => log::warn!("Event {} belongs to a freed object", event_id),
        }

        if let Some(backend_event) = event.take_backend() {
            self.backend.destruct_event(backend_event);
        }
    }

    pub fn report_started_file(&mut self, file_id: StandaloneFileId, success: bool) {
        let Some(file) = self.files.get_mut(file_id.0) else {
            log::warn!("Start reported for unknown file {}", file_id);
            return;
        };
        let still_active = match self.objects.get_mut(file.object().0) {
            Some(object) => object.report_started_file(file_id, file, success, &mut self.dispatcher),
            None => false,
        };

        if !still_active {
            self.free_file(file_id);
        }
    }

    pub fn report_finished_file(&mut self, file_id: StandaloneFileId, success: bool) {
        let Some(file) = self.files.get(file_id.0) else {
            log::warn!("Finish reported for unknown file {}", file_id);
            return;
        };
        if !success {
            log::debug!("File {} finished unsuccessfully", file.name());
        }

        match self.objects.get_mut(file.object().0) {
            Some(object) => object.report_finished_file(file_id, file, &mut self.dispatcher),
            None => log::warn!("File {} belongs to a freed object", file_id),
        }
        self.free_file(file_id);
    }

    fn free_file(&mut self, file_id: StandaloneFileId) {
        if let Some(mut file) = self.files.remove(file_id.0) {
            if let Some(backend_file) = file.take_backend() {
                self.backend.destruct_standalone_file(backend_file);
            }
        }
    }

    /// Register a callback for completions flagged for the audio thread
    pub fn add_audio_thread_callback(
        &mut self,
        callback: impl FnMut(&TriggerFinished) + Send + 'static,
    ) {
        self.audio_thread_callbacks.push(Box::new(callback));
    }

    /// Run audio-thread callbacks for queued completions, then release their hold
    pub fn dispatch_audio_thread_callbacks(&mut self) {
        for (info, token) in self.dispatcher.take_audio_thread_queue() {
            for callback in self.audio_thread_callbacks.iter_mut() {
                callback(&info);
            }
            token.complete();
        }
    }

    /// Block until a request or callback is queued, or `timeout` passes
    pub fn wait_for_requests(&self, timeout: Duration) -> bool {
        let mut select = Select::new();
        select.recv(&self.request_receiver);
        select.recv(&self.callback_receiver);
        select.ready_timeout(timeout).is_ok()
    }

    /// Apply everything currently queued; returns how many items were handled
    pub fn process_requests(&mut self) -> usize {
        let mut processed = self.process_backend_callbacks();

        for _ in 0..self.request_receiver.len() {
            let Ok(request) = self.request_receiver.try_recv() else {
                break;
            };
            self.apply(request);
            processed += 1;
        }

        processed += self.process_backend_callbacks();
        self.dispatch_audio_thread_callbacks();
        processed
    }

    fn process_backend_callbacks(&mut self) -> usize {
        let mut processed = 0;
        for _ in 0..self.callback_receiver.len() {
            let Ok(callback) = self.callback_receiver.try_recv() else {
                break;
            };
            match callback {
                BackendCallback::EventStarted { event, success } => {
                    self.report_started_event(event, success)
                }
                BackendCallback::EventFinished { event, success } => {
                    self.report_finished_event(event, success)
                }
                BackendCallback::FileStarted { file, success } => {
                    self.report_started_file(file, success)
                }
                BackendCallback::FileFinished { file, success } => {
                    self.report_finished_file(file, success)
                }
            }
            processed += 1;
        }
        processed
    }

    /// Apply one game request
    pub fn apply(&mut self, request: Request) {
        let result = match request {
            Request::CreateObject { desc, reply } => {
                if reply.send(self.create_object(desc)).is_err() {
                    log::debug!("CreateObject caller went away");
                }
                Ok(())
            }
            Request::ReleaseObject(id) => self.release_object(id),
            Request::ExecuteTrigger {
                object,
                trigger,
                request,
            } => self.execute_trigger(object, trigger, request).map(|_| ()),
            Request::StopTrigger { object, target } => {
                self.stop_trigger(object, target).map(|_| ())
            }
            Request::SetTransformation { object, transform } => {
                self.set_transformation(object, transform)
            }
            Request::SetParameter {
                object,
                parameter,
                value,
            } => self.set_parameter(object, parameter, value),
            Request::SetSwitchState {
                object,
                switch,
                state,
            } => self.set_switch_state(object, switch, state),
            Request::SetEnvironment {
                object,
                environment,
                amount,
            } => self.set_environment(object, environment, amount),
            Request::SetOcclusionType { object, occlusion } => {
                self.set_occlusion_type(object, occlusion)
            }
            Request::SetOcclusionRayOffset { object, offset } => {
                self.set_occlusion_ray_offset(object, offset)
            }
            Request::ToggleAbsoluteVelocityTracking { object, enable } => {
                self.toggle_absolute_velocity_tracking(object, enable)
            }
            Request::ToggleRelativeVelocityTracking { object, enable } => {
                self.toggle_relative_velocity_tracking(object, enable)
            }
            Request::PlayFile {
                object,
                name,
                localized,
                user_data,
            } => self
                .play_file(object, &name, localized, user_data)
                .map(|_| ()),
            Request::StopFile { object, name } => self.stop_file(object, &name).map(|_| ()),
            Request::SetListenerTransformation(transform) => {
                self.set_listener_transformation(transform);
                Ok(())
            }
            Request::Flush(reply) => {
                self.process_backend_callbacks();
                if reply.send(()).is_err() {
                    log::debug!("Flush caller went away");
                }
                Ok(())
            }
            Request::Shutdown => {
                self.shutdown_requested = true;
                Ok(())
            }
        };

        if let Err(e) = result {
            log::warn!("Audio request failed: {}", e);
        }
    }

    /// Advance the backend, the listener and every object by `delta`
    pub fn update(&mut self, delta: DeltaTime) {
        self.backend.update(delta);
        self.process_backend_callbacks();
        self.dispatch_audio_thread_callbacks();

        self.listener.update(delta);
        let update = ObjectUpdate {
            delta,
            listener: self.listener.state(),
            caster: self.ray_caster.as_deref(),
            config: &self.config,
        };
        for (_, object) in self.objects.iter_mut() {
            object.update(&update, &mut self.events);
        }

        self.release_pending_objects();
    }

    fn release_pending_objects(&mut self) {
        let mut index = 0;
        while index < self.pending_release.len() {
            let id = self.pending_release[index];
            let ready = self
                .objects
                .get(id.0)
                .is_none_or(AudioObject::can_be_released);
            if ready {
                self.pending_release.swap_remove(index);
                self.destroy_object(id);
            } else {
                index += 1;
            }
        }
    }

    fn destroy_object(&mut self, id: ObjectId) {
        let Some(mut object) = self.objects.remove(id.0) else {
            return;
        };
        object.propagation_mut().release_pending_rays();
        if let Some(backend_object) = object.take_backend() {
            self.backend.destruct_object(backend_object);
        }
        log::debug!("Released audio object {}", id);
    }

    /// Tear everything down regardless of outstanding work
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        for handle in self.events.handles() {
            if let Some(backend_event) = self
                .events
                .remove(handle)
                .and_then(|mut event| event.take_backend())
            {
                self.backend.destruct_event(backend_event);
            }
        }
        for handle in self.files.handles() {
            self.free_file(StandaloneFileId(handle));
        }
        for handle in self.objects.handles() {
            self.destroy_object(ObjectId(handle));
        }
        self.pending_release.clear();

        if let Some(listener) = self.listener.take_backend() {
            self.backend.destruct_listener(listener);
        }
        self.backend.release();
        log::info!("Audio runtime shut down");
    }
}

impl Drop for AudioRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::event::EventState;
    use crate::request::CallbackFlags;
    use crate::testing::{RecordingBackend, SharedRecord, connection};
    use atl_core::job::JobSystem;
    use atl_core::math::Vec3;
    use atl_physics::{Collider, PhysicsWorld};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime_with(config: RuntimeConfig) -> (AudioRuntime, SharedRecord) {
        let (backend, record) = RecordingBackend::new();
        (
            AudioRuntime::new(config, Box::new(backend), None).unwrap(),
            record,
        )
    }

    fn runtime() -> (AudioRuntime, SharedRecord) {
        runtime_with(RuntimeConfig::default())
    }

    fn trigger(id: u32, statuses: &[RequestStatus]) -> Trigger {
        statuses.iter().fold(
            Trigger::new(TriggerId(id), format!("trigger_{}", id), 0.0),
            |trigger, status| trigger.with_connection(connection(*status)),
        )
    }

    fn finished(notifications: &Receiver<Notification>) -> Vec<TriggerFinished> {
        notifications
            .try_iter()
            .filter_map(|notification| match notification {
                Notification::TriggerFinished { info, .. } => Some(info),
                _ => None,
            })
            .collect()
    }

    fn active_events(runtime: &AudioRuntime, object: ObjectId) -> Vec<EventId> {
        runtime.object(object).unwrap().active_events().collect()
    }

    #[test]
    fn test_all_connections_failing_notifies_once() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Failure; 3]));
        let object = runtime.create_object(ObjectDesc::named("door")).unwrap();
        let notifications = runtime.notifications();

        let execution = runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();

        assert!(!execution.is_tracked());
        assert_eq!(runtime.num_events(), 0);
        assert_eq!(record.lock().destructed_events, 3);
        assert!(runtime.object(object).unwrap().trigger_state(execution.instance).is_none());

        let done = finished(&notifications);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].instance, execution.instance);
        assert!(done[0].success);
    }

    #[test]
    fn test_untracked_connections_finish_immediately() {
        let (mut runtime, _) = runtime();
        runtime.register_trigger(trigger(1, &[]));
        runtime.register_trigger(trigger(2, &[RequestStatus::SuccessDoNotTrack]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();

        let user_data = UserData::new(7, 8, 9);
        for id in [1, 2] {
            runtime
                .execute_trigger(
                    object,
                    TriggerId(id),
                    TriggerRequest::default().with_user_data(user_data),
                )
                .unwrap();
        }

        let done = finished(&notifications);
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|info| info.user_data == user_data));
        assert_eq!(runtime.num_events(), 0);
    }

    #[test]
    fn test_events_finish_in_any_order() {
        for seed in 0..10 {
            let (mut runtime, _) = runtime();
            runtime.register_trigger(trigger(1, &[RequestStatus::Success; 5]));
            let object = runtime.create_object(ObjectDesc::default()).unwrap();
            let notifications = runtime.notifications();

            let execution = runtime
                .execute_trigger(object, TriggerId(1), TriggerRequest::default())
                .unwrap();
            assert_eq!(execution.num_playing_events, 5);

            let mut events = active_events(&runtime, object);
            events.shuffle(&mut StdRng::seed_from_u64(seed));

            let (last, rest) = events.split_last().unwrap();
            for event in rest {
                runtime.report_finished_event(*event, true);
                assert!(finished(&notifications).is_empty());
            }
            runtime.report_finished_event(*last, true);

            let done = finished(&notifications);
            assert_eq!(done.len(), 1, "seed {}", seed);
            assert_eq!(done[0].instance, execution.instance);
            assert_eq!(runtime.num_events(), 0);
            assert!(runtime.object(object).unwrap().can_be_released());
        }
    }

    #[test]
    fn test_stop_all_waits_for_events_to_finish() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success; 2]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();
        runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();

        assert_eq!(runtime.stop_trigger(object, StopTarget::All).unwrap(), 2);
        assert_eq!(record.lock().stopped_events.len(), 2);
        assert_eq!(runtime.num_events(), 2);
        assert!(finished(&notifications).is_empty());

        runtime.stop_trigger(object, StopTarget::All).unwrap();
        assert!(finished(&notifications).is_empty());

        for event in active_events(&runtime, object) {
            runtime.report_finished_event(event, true);
        }
        assert_eq!(finished(&notifications).len(), 1);
    }

    #[test]
    fn test_stop_all_across_instances() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        runtime.register_trigger(trigger(2, &[RequestStatus::Pending, RequestStatus::Success]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();

        let instances: Vec<_> = [1, 1, 2]
            .into_iter()
            .map(|id| {
                runtime
                    .execute_trigger(object, TriggerId(id), TriggerRequest::default())
                    .unwrap()
                    .instance
            })
            .collect();

        assert_eq!(runtime.stop_trigger(object, StopTarget::All).unwrap(), 4);
        assert_eq!(record.lock().stopped_events.len(), 4);
        assert!(finished(&notifications).is_empty());

        let mut done = Vec::new();
        for event in active_events(&runtime, object) {
            runtime.report_finished_event(event, true);
            done.extend(finished(&notifications).into_iter().map(|info| info.instance));
        }

        done.sort_by_key(|instance| instance.get());
        let mut expected = instances;
        expected.sort_by_key(|instance| instance.get());
        assert_eq!(done, expected);
    }

    #[test]
    fn test_stop_single_trigger() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        runtime.register_trigger(trigger(2, &[RequestStatus::Success]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        for id in [1, 2] {
            runtime
                .execute_trigger(object, TriggerId(id), TriggerRequest::default())
                .unwrap();
        }

        assert_eq!(
            runtime
                .stop_trigger(object, StopTarget::Trigger(TriggerId(1)))
                .unwrap(),
            1
        );
        let stopped = record.lock().stopped_events.clone();
        assert_eq!(runtime.event(stopped[0]).unwrap().trigger(), TriggerId(1));
    }

    #[test]
    fn test_finished_loading_event_decrements_loading_count() {
        let (mut runtime, _) = runtime();
        runtime.register_trigger(trigger(
            1,
            &[RequestStatus::Pending, RequestStatus::Success],
        ));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();
        let execution = runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();
        assert_eq!(execution.num_loading_events, 1);
        assert_eq!(execution.num_playing_events, 1);

        let (loading, playing): (Vec<_>, Vec<_>) = active_events(&runtime, object)
            .into_iter()
            .partition(|event| runtime.event(*event).unwrap().is_loading());

        runtime.report_finished_event(loading[0], true);
        let state = runtime
            .object(object)
            .unwrap()
            .trigger_state(execution.instance)
            .unwrap();
        assert_eq!(state.num_loading_events, 0);
        assert_eq!(state.num_playing_events, 1);

        runtime.report_finished_event(playing[0], true);
        assert_eq!(finished(&notifications).len(), 1);
    }

    #[test]
    fn test_started_event_moves_to_playing() {
        let (mut runtime, _) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Pending]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let execution = runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();

        let event = active_events(&runtime, object)[0];
        runtime.report_started_event(event, true);

        assert_eq!(runtime.event(event).unwrap().state(), EventState::Playing);
        let state = runtime
            .object(object)
            .unwrap()
            .trigger_state(execution.instance)
            .unwrap();
        assert_eq!((state.num_loading_events, state.num_playing_events), (0, 1));
    }

    #[test]
    fn test_failed_start_finishes_unsuccessfully() {
        let (mut runtime, _) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Pending]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();
        runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();

        let event = active_events(&runtime, object)[0];
        runtime.report_started_event(event, false);

        let done = finished(&notifications);
        assert_eq!(done.len(), 1);
        assert!(!done[0].success);
        assert_eq!(runtime.num_events(), 0);
    }

    #[test]
    fn test_release_waits_for_external_callback() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();
        runtime
            .execute_trigger(
                object,
                TriggerId(1),
                TriggerRequest::default().with_callbacks(CallbackFlags::EXTERNAL_THREAD),
            )
            .unwrap();

        let event = active_events(&runtime, object)[0];
        runtime.report_finished_event(event, true);

        let token = match notifications.try_recv().unwrap() {
            Notification::TriggerFinished { token, .. } => token,
            other => panic!("unexpected notification {:?}", other),
        };
        assert!(token.is_held());

        runtime.release_object(object).unwrap();
        runtime.update(DeltaTime::from_millis(10.0));
        assert!(runtime.object(object).is_some());
        assert_eq!(runtime.num_pending_release(), 1);

        token.complete();
        runtime.update(DeltaTime::from_millis(10.0));
        assert!(runtime.object(object).is_none());
        assert_eq!(runtime.num_pending_release(), 0);
        assert_eq!(record.lock().destructed_objects, 1);
    }

    #[test]
    fn test_release_stops_and_drains_active_events() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();

        runtime.release_object(object).unwrap();
        assert_eq!(record.lock().stopped_events.len(), 1);
        assert!(runtime.object(object).is_some());
        assert!(matches!(
            runtime.execute_trigger(object, TriggerId(1), TriggerRequest::default()),
            Err(AtlError::UnknownObject(_))
        ));

        let event = active_events(&runtime, object)[0];
        runtime.report_finished_event(event, true);
        runtime.update(DeltaTime::from_millis(10.0));
        assert!(runtime.object(object).is_none());
    }

    #[test]
    fn test_idle_object_is_released_immediately() {
        let (mut runtime, record) = runtime();
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        runtime.release_object(object).unwrap();

        assert!(runtime.object(object).is_none());
        assert_eq!(record.lock().destructed_objects, 1);
        assert!(runtime.release_object(object).is_err());
    }

    #[test]
    fn test_audio_thread_callbacks_hold_the_object() {
        let (mut runtime, _) = runtime();
        runtime.register_trigger(trigger(1, &[]));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        runtime.add_audio_thread_callback(move |info| {
            assert_eq!(info.trigger, TriggerId(1));
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        runtime
            .execute_trigger(
                object,
                TriggerId(1),
                TriggerRequest::default().with_callbacks(CallbackFlags::AUDIO_THREAD),
            )
            .unwrap();

        assert_eq!(runtime.object(object).unwrap().sync_callback_counter().count(), 1);
        assert!(!runtime.object(object).unwrap().can_be_released());

        runtime.process_requests();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.object(object).unwrap().sync_callback_counter().count(), 0);
    }

    #[test]
    fn test_expired_instance_is_stopped() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();
        runtime
            .execute_trigger(
                object,
                TriggerId(1),
                TriggerRequest::default().with_lifetime_ms(100.0),
            )
            .unwrap();

        runtime.update(DeltaTime::from_millis(50.0));
        assert!(record.lock().stopped_events.is_empty());

        runtime.update(DeltaTime::from_millis(60.0));
        let stopped = record.lock().stopped_events.clone();
        assert_eq!(stopped.len(), 1);
        assert!(finished(&notifications).is_empty());

        runtime.report_finished_event(stopped[0], true);
        assert_eq!(finished(&notifications).len(), 1);
    }

    #[test]
    fn test_event_pool_exhaustion_skips_connections() {
        let config = RuntimeConfig {
            event_pool_size: 1,
            ..Default::default()
        };
        let (mut runtime, _) = runtime_with(config);
        runtime.register_trigger(trigger(1, &[RequestStatus::Success; 2]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();

        let execution = runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();
        assert_eq!(execution.num_playing_events, 1);
        assert_eq!(runtime.num_events(), 1);
    }

    #[test]
    fn test_object_pool_exhaustion() {
        let config = RuntimeConfig {
            object_pool_size: 1,
            ..Default::default()
        };
        let (mut runtime, _) = runtime_with(config);
        runtime.create_object(ObjectDesc::default()).unwrap();
        assert!(matches!(
            runtime.create_object(ObjectDesc::default()),
            Err(AtlError::ObjectPoolExhausted(1))
        ));
    }

    #[test]
    fn test_unknown_trigger_is_an_error() {
        let (mut runtime, _) = runtime();
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        assert!(matches!(
            runtime.execute_trigger(object, TriggerId(99), TriggerRequest::default()),
            Err(AtlError::UnknownTrigger(TriggerId(99)))
        ));
        assert!(runtime
            .stop_trigger(object, StopTarget::Trigger(TriggerId(99)))
            .is_err());
    }

    #[test]
    fn test_standalone_file_lifecycle() {
        let (mut runtime, record) = runtime();
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();
        let user_data = UserData::new(1, 2, 3);

        let file = runtime
            .play_file(object, "vo_line", false, user_data)
            .unwrap()
            .unwrap();
        assert!(matches!(
            notifications.try_recv().unwrap(),
            Notification::FileStarted { success: true, ref name, user_data: data, .. }
                if name == "vo_line" && data == user_data
        ));
        assert!(!runtime.object(object).unwrap().can_be_released());

        assert_eq!(runtime.stop_file(object, "vo_line").unwrap(), 1);
        assert_eq!(runtime.stop_file(object, "vo_line").unwrap(), 0);
        assert_eq!(record.lock().stopped_files, vec![file]);
        assert_eq!(runtime.file(file).unwrap().state(), FileState::Stopping);

        runtime.report_finished_file(file, true);
        assert!(matches!(
            notifications.try_recv().unwrap(),
            Notification::FileFinished { file: finished, .. } if finished == file
        ));
        assert_eq!(runtime.num_files(), 0);
        assert_eq!(record.lock().destructed_files, 1);
        assert!(runtime.object(object).unwrap().can_be_released());
    }

    #[test]
    fn test_refused_file_reports_failed_start() {
        let (backend, _) = RecordingBackend::new();
        let backend = backend.with_file_status(RequestStatus::Failure);
        let mut runtime =
            AudioRuntime::new(RuntimeConfig::default(), Box::new(backend), None).unwrap();
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();

        assert!(runtime
            .play_file(object, "missing", false, UserData::default())
            .unwrap()
            .is_none());
        assert!(matches!(
            notifications.try_recv().unwrap(),
            Notification::FileStarted { success: false, .. }
        ));
        assert_eq!(runtime.num_files(), 0);
    }

    #[test]
    fn test_pending_file_starts_when_reported() {
        let (backend, _) = RecordingBackend::new();
        let backend = backend.with_file_status(RequestStatus::Pending);
        let mut runtime =
            AudioRuntime::new(RuntimeConfig::default(), Box::new(backend), None).unwrap();
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();

        let file = runtime
            .play_file(object, "stream", true, UserData::default())
            .unwrap()
            .unwrap();
        assert!(notifications.try_recv().is_err());
        assert_eq!(runtime.file(file).unwrap().state(), FileState::Loading);

        runtime.report_started_file(file, true);
        assert_eq!(runtime.file(file).unwrap().state(), FileState::Playing);
        assert!(matches!(
            notifications.try_recv().unwrap(),
            Notification::FileStarted { success: true, .. }
        ));
    }

    #[test]
    fn test_requests_are_applied_in_order() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        let sender = runtime.request_sender();

        let (reply, replies) = bounded(1);
        sender
            .send(Request::CreateObject {
                desc: ObjectDesc::named("queued"),
                reply,
            })
            .unwrap();
        runtime.process_requests();
        let object = replies.try_recv().unwrap().unwrap();

        sender
            .send(Request::ExecuteTrigger {
                object,
                trigger: TriggerId(1),
                request: TriggerRequest::default(),
            })
            .unwrap();
        sender
            .send(Request::StopTrigger {
                object,
                target: StopTarget::All,
            })
            .unwrap();
        sender
            .send(Request::SetParameter {
                object,
                parameter: ParameterId(5),
                value: 0.5,
            })
            .unwrap();

        assert_eq!(runtime.process_requests(), 3);
        let record = record.lock();
        assert_eq!(record.stopped_events.len(), 1);
        assert_eq!(record.parameters, vec![(ParameterId(5), 0.5)]);
    }

    #[test]
    fn test_backend_callbacks_from_other_threads() {
        let (mut runtime, _) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        let notifications = runtime.notifications();
        runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();

        let event = active_events(&runtime, object)[0];
        let sink = runtime.callback_sink();
        std::thread::spawn(move || sink.report_finished_event(event, true))
            .join()
            .unwrap();

        assert!(finished(&notifications).is_empty());
        assert!(runtime.wait_for_requests(Duration::from_millis(100)));
        runtime.process_requests();
        assert_eq!(finished(&notifications).len(), 1);
    }

    #[test]
    fn test_occlusion_from_physics_world() {
        let jobs = Arc::new(JobSystem::new(0));
        let world = Arc::new(PhysicsWorld::new(jobs.clone()));
        world.add_collider(Collider::cuboid(
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::new(5.0, 5.0, 0.5),
            0.5,
        ));

        let (backend, record) = RecordingBackend::new();
        let caster: Arc<dyn RayCaster> = world;
        let mut runtime =
            AudioRuntime::new(RuntimeConfig::default(), Box::new(backend), Some(caster)).unwrap();
        runtime.set_listener_transformation(Transform::from_position(Vec3::new(0.0, 0.0, 20.0)));
        let object = runtime
            .create_object(ObjectDesc::named("radio").with_occlusion(OcclusionType::Low))
            .unwrap();

        runtime.update(DeltaTime::from_millis(10.0));
        assert!(runtime.object(object).unwrap().propagation().has_pending_rays());

        jobs.wait_idle();
        runtime.update(DeltaTime::from_millis(10.0));

        let propagation = runtime.object(object).unwrap().propagation();
        approx::assert_abs_diff_eq!(propagation.target().occlusion, 0.5, epsilon = 1e-4);
        approx::assert_abs_diff_eq!(propagation.target().obstruction, 0.5, epsilon = 1e-4);

        let published = runtime.object(object).unwrap().propagation_data();
        assert!(published.occlusion > 0.0 && published.occlusion < 0.5);
        assert!(!record.lock().obstruction_occlusion.is_empty());
    }

    #[test]
    fn test_ignore_publishes_cleared_occlusion() {
        let jobs = Arc::new(JobSystem::new(0));
        let world = Arc::new(PhysicsWorld::new(jobs));
        world.add_collider(Collider::cuboid(
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(5.0, 5.0, 0.1),
            0.5,
        ));

        let (backend, record) = RecordingBackend::new();
        let caster: Arc<dyn RayCaster> = world;
        let mut runtime =
            AudioRuntime::new(RuntimeConfig::default(), Box::new(backend), Some(caster)).unwrap();
        runtime.set_listener_transformation(Transform::from_position(Vec3::new(0.0, 0.0, 4.0)));
        let object = runtime
            .create_object(ObjectDesc::named("radio").with_occlusion(OcclusionType::Low))
            .unwrap();

        for _ in 0..20 {
            runtime.update(DeltaTime::from_millis(10.0));
        }
        let (_, occlusion) = *record.lock().obstruction_occlusion.last().unwrap();
        assert!(occlusion > 0.4);

        runtime.set_occlusion_type(object, OcclusionType::Ignore).unwrap();
        for _ in 0..5 {
            runtime.update(DeltaTime::from_millis(10.0));
        }

        assert_eq!(record.lock().obstruction_occlusion.last(), Some(&(0.0, 0.0)));
        assert_eq!(
            runtime.object(object).unwrap().propagation_data(),
            crate::propagation::PropagationData::default()
        );
    }

    #[test]
    fn test_zero_lifetime_expires_on_first_update() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        runtime
            .execute_trigger(
                object,
                TriggerId(1),
                TriggerRequest::default().with_lifetime_ms(0.0),
            )
            .unwrap();

        for _ in 0..10 {
            runtime.update(DeltaTime::from_millis(10.0));
        }
        assert_eq!(record.lock().stopped_events.len(), 1);
    }

    #[test]
    fn test_simulated_backend_end_to_end() {
        let library = ControlsLibrary::from_json_str(
            r#"{
                "triggers": [{
                    "id": 10,
                    "name": "engine_start",
                    "connections": [
                        { "name": "crank", "properties": { "outcome": "pending", "load_ms": 20, "duration_ms": 50 } },
                        { "name": "click", "properties": { "outcome": "success", "duration_ms": 10 } }
                    ]
                }]
            }"#,
        )
        .unwrap();

        let backend = SimulatedBackend::new();
        let monitor = backend.monitor();
        let mut runtime =
            AudioRuntime::new(RuntimeConfig::default(), Box::new(backend), None).unwrap();
        assert_eq!(runtime.load_controls(&library).unwrap(), 1);

        let object = runtime.create_object(ObjectDesc::named("car")).unwrap();
        let notifications = runtime.notifications();
        let execution = runtime
            .execute_trigger(object, TriggerId(10), TriggerRequest::default())
            .unwrap();
        assert_eq!(
            (execution.num_loading_events, execution.num_playing_events),
            (1, 1)
        );

        let mut done = Vec::new();
        for _ in 0..20 {
            runtime.update(DeltaTime::from_millis(10.0));
            done.extend(finished(&notifications));
        }

        assert_eq!(done.len(), 1);
        assert!(done[0].success);
        assert_eq!(runtime.num_events(), 0);
        assert_eq!(monitor.active_voices(), 0);
        assert_eq!(monitor.stats().events_finished, 2);
    }

    #[test]
    fn test_bad_connection_fails_controls_load() {
        let (mut runtime, _) = runtime();
        let library = ControlsLibrary::from_json_str(
            r#"{ "triggers": [ { "id": 1, "name": "t", "connections": [
                { "name": "c", "properties": { "status": "bogus" } } ] } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            runtime.load_controls(&library),
            Err(AtlError::Backend(_))
        ));
    }

    #[test]
    fn test_shutdown_destructs_everything() {
        let (mut runtime, record) = runtime();
        runtime.register_trigger(trigger(1, &[RequestStatus::Success]));
        let object = runtime.create_object(ObjectDesc::default()).unwrap();
        runtime
            .execute_trigger(object, TriggerId(1), TriggerRequest::default())
            .unwrap();
        runtime
            .play_file(object, "music", false, UserData::default())
            .unwrap();

        runtime.shutdown();
        runtime.shutdown();

        let record = record.lock();
        assert_eq!(record.destructed_objects, 1);
        assert_eq!(record.destructed_events, 1);
        assert_eq!(record.destructed_files, 1);
        assert!(record.released);
        assert_eq!(runtime.num_objects(), 0);
    }
}

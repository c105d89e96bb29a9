//! Audio Thread
//!
//! [`AudioSystem`] moves an [`AudioRuntime`] onto a dedicated thread and
//! exposes the game-side API as queued requests. The thread wakes for every
//! request or middleware callback and advances the runtime once per tick.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use atl_core::math::Transform;
use atl_core::time::Stopwatch;
use crossbeam::channel::{Receiver, Sender, bounded};

use crate::error::{AtlError, AtlResult};
use crate::ids::{
    EnvironmentId, ObjectId, ParameterId, SwitchId, SwitchStateId, TriggerId,
};
use crate::notification::Notification;
use crate::propagation::OcclusionType;
use crate::request::{CallbackSink, ObjectDesc, Request, StopTarget, TriggerRequest, UserData};
use crate::runtime::AudioRuntime;

/// Game-side handle to a runtime running on its own thread
pub struct AudioSystem {
    requests: Sender<Request>,
    callback_sink: CallbackSink,
    notifications: Receiver<Notification>,
    thread: Option<JoinHandle<()>>,
}

impl AudioSystem {
    /// Spawn the audio thread and hand `runtime` to it
    pub fn start(runtime: AudioRuntime) -> AtlResult<Self> {
        let requests = runtime.request_sender();
        let callback_sink = runtime.callback_sink();
        let notifications = runtime.notifications();
        let tick = Duration::from_millis(runtime.config().tick_interval_ms);

        let thread = thread::Builder::new()
            .name("atl-audio".into())
            .spawn(move || run(runtime, tick))?;

        Ok(Self {
            requests,
            callback_sink,
            notifications,
            thread: Some(thread),
        })
    }

    fn send(&self, request: Request) -> AtlResult<()> {
        self.requests
            .send(request)
            .map_err(|_| AtlError::QueueDisconnected)
    }

    /// Create an object, blocking until the audio thread has built it
    pub fn create_object(&self, desc: ObjectDesc) -> AtlResult<ObjectId> {
        let (reply, result) = bounded(1);
        self.send(Request::CreateObject { desc, reply })?;
        result.recv().map_err(|_| AtlError::QueueDisconnected)?
    }

    pub fn release_object(&self, object: ObjectId) -> AtlResult<()> {
        self.send(Request::ReleaseObject(object))
    }

    pub fn execute_trigger(
        &self,
        object: ObjectId,
        trigger: TriggerId,
        request: TriggerRequest,
    ) -> AtlResult<()> {
        self.send(Request::ExecuteTrigger {
            object,
            trigger,
            request,
        })
    }

    pub fn stop_trigger(&self, object: ObjectId, target: StopTarget) -> AtlResult<()> {
        self.send(Request::StopTrigger { object, target })
    }

    pub fn set_transformation(&self, object: ObjectId, transform: Transform) -> AtlResult<()> {
        self.send(Request::SetTransformation { object, transform })
    }

    pub fn set_parameter(&self, object: ObjectId, parameter: ParameterId, value: f32) -> AtlResult<()> {
        self.send(Request::SetParameter {
            object,
            parameter,
            value,
        })
    }

    pub fn set_switch_state(
        &self,
        object: ObjectId,
        switch: SwitchId,
        state: SwitchStateId,
    ) -> AtlResult<()> {
        self.send(Request::SetSwitchState {
            object,
            switch,
            state,
        })
    }

    pub fn set_environment(
        &self,
        object: ObjectId,
        environment: EnvironmentId,
        amount: f32,
    ) -> AtlResult<()> {
        self.send(Request::SetEnvironment {
            object,
            environment,
            amount,
        })
    }

    pub fn set_occlusion_type(&self, object: ObjectId, occlusion: OcclusionType) -> AtlResult<()> {
        self.send(Request::SetOcclusionType { object, occlusion })
    }

    pub fn set_occlusion_ray_offset(&self, object: ObjectId, offset: f32) -> AtlResult<()> {
        self.send(Request::SetOcclusionRayOffset { object, offset })
    }

    pub fn toggle_absolute_velocity_tracking(&self, object: ObjectId, enable: bool) -> AtlResult<()> {
        self.send(Request::ToggleAbsoluteVelocityTracking { object, enable })
    }

    pub fn toggle_relative_velocity_tracking(&self, object: ObjectId, enable: bool) -> AtlResult<()> {
        self.send(Request::ToggleRelativeVelocityTracking { object, enable })
    }

    pub fn play_file(
        &self,
        object: ObjectId,
        name: impl Into<String>,
        localized: bool,
        user_data: UserData,
    ) -> AtlResult<()> {
        self.send(Request::PlayFile {
            object,
            name: name.into(),
            localized,
            user_data,
        })
    }

    pub fn stop_file(&self, object: ObjectId, name: impl Into<String>) -> AtlResult<()> {
        self.send(Request::StopFile {
            object,
            name: name.into(),
        })
    }

    pub fn set_listener_transformation(&self, transform: Transform) -> AtlResult<()> {
        self.send(Request::SetListenerTransformation(transform))
    }

    /// Block until every request sent so far has been applied
    pub fn flush(&self) -> AtlResult<()> {
        let (reply, done) = bounded(1);
        self.send(Request::Flush(reply))?;
        done.recv().map_err(|_| AtlError::QueueDisconnected)
    }

    /// Receiver of trigger and file notifications
    pub fn notifications(&self) -> &Receiver<Notification> {
        &self.notifications
    }

    /// Sink a middleware integration reports progress through
    pub fn callback_sink(&self) -> CallbackSink {
        self.callback_sink.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the audio thread and tear the runtime down
    pub fn shutdown(&mut self) -> AtlResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        if self.requests.send(Request::Shutdown).is_err() {
            log::debug!("Audio thread already gone");
        }
        thread
            .join()
            .map_err(|_| AtlError::Thread("audio thread panicked".into()))
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Audio system shutdown failed: {}", e);
        }
    }
}

fn run(mut runtime: AudioRuntime, tick: Duration) {
    log::info!("Audio thread started ({:?} tick)", tick);
    let mut stopwatch = Stopwatch::new();

    while !runtime.is_shutdown_requested() {
        runtime.wait_for_requests(tick.saturating_sub(stopwatch.elapsed()));
        runtime.process_requests();

        if stopwatch.elapsed() >= tick {
            let delta = stopwatch.lap();
            runtime.update(delta);
        }
    }

    runtime.shutdown();
    log::info!("Audio thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RequestStatus, SimulatedBackend};
    use crate::config::RuntimeConfig;
    use crate::controls::ControlsLibrary;
    use crate::request::CallbackFlags;
    use crate::testing::{RecordingBackend, connection};
    use crate::trigger::Trigger;

    fn library() -> ControlsLibrary {
        ControlsLibrary::from_json_str(
            r#"{ "triggers": [ { "id": 3, "name": "beep", "connections": [
                { "name": "beep", "properties": { "outcome": "success", "duration_ms": 20 } } ] } ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_trigger_completes_on_audio_thread() {
        let mut runtime =
            AudioRuntime::new(RuntimeConfig::default(), Box::new(SimulatedBackend::new()), None)
                .unwrap();
        runtime.load_controls(&library()).unwrap();

        let mut system = AudioSystem::start(runtime).unwrap();
        assert!(system.is_running());

        let object = system.create_object(ObjectDesc::named("beeper")).unwrap();
        system
            .execute_trigger(
                object,
                TriggerId(3),
                TriggerRequest::default().with_callbacks(CallbackFlags::EXTERNAL_THREAD),
            )
            .unwrap();

        let notification = system
            .notifications()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        match notification {
            Notification::TriggerFinished { info, token } => {
                assert_eq!(info.object, object);
                assert!(info.success);
                assert!(token.is_held());
            }
            other => panic!("unexpected notification {:?}", other),
        }

        system.release_object(object).unwrap();
        system.flush().unwrap();
        system.shutdown().unwrap();
        assert!(!system.is_running());
        assert!(matches!(
            system.release_object(object),
            Err(AtlError::QueueDisconnected)
        ));
    }

    #[test]
    fn test_create_object_reports_pool_exhaustion() {
        let config = RuntimeConfig {
            object_pool_size: 1,
            ..Default::default()
        };
        let (backend, _) = RecordingBackend::new();
        let runtime = AudioRuntime::new(config, Box::new(backend), None).unwrap();
        let system = AudioSystem::start(runtime).unwrap();

        system.create_object(ObjectDesc::default()).unwrap();
        assert!(matches!(
            system.create_object(ObjectDesc::default()),
            Err(AtlError::ObjectPoolExhausted(1))
        ));
    }

    #[test]
    fn test_drop_shuts_down_runtime() {
        let (backend, record) = RecordingBackend::new();
        let mut runtime = AudioRuntime::new(RuntimeConfig::default(), Box::new(backend), None).unwrap();
        runtime.register_trigger(
            Trigger::new(TriggerId(1), "loop", 0.0).with_connection(connection(RequestStatus::Success)),
        );

        {
            let system = AudioSystem::start(runtime).unwrap();
            let object = system.create_object(ObjectDesc::default()).unwrap();
            system
                .execute_trigger(object, TriggerId(1), TriggerRequest::default())
                .unwrap();
            system.set_parameter(object, ParameterId(2), 0.75).unwrap();
            system.flush().unwrap();
        }

        let record = record.lock();
        assert!(record.released);
        assert_eq!(record.destructed_events, 1);
        assert_eq!(record.parameters, vec![(ParameterId(2), 0.75)]);
    }
}

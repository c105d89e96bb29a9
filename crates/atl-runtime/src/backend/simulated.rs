//! Simulated Backend
//!
//! Deterministic middleware stand-in. Events and files are timed voices
//! that advance on every backend update and report their progress through
//! the callback sink, just like a real middleware thread would.
//!
//! Connection properties understood in a controls library:
//! - `outcome`: `success`, `pending`, `fail` or `do_not_track`
//! - `duration_ms`: playback length; omitted means play until stopped
//! - `load_ms`: loading time of `pending` connections

use std::any::Any;
use std::sync::Arc;

use ahash::AHashMap;
use atl_core::math::Transform;
use atl_core::time::DeltaTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{
    Backend, BackendEvent, BackendListener, BackendObject, BackendStandaloneFile,
    BackendTriggerConnection, RequestStatus,
};
use crate::controls::ConnectionDesc;
use crate::error::{AtlError, AtlResult};
use crate::ids::{
    EnvironmentId, EventId, ObjectId, ParameterId, StandaloneFileId, SwitchId, SwitchStateId,
};
use crate::request::CallbackSink;

/// How a simulated connection answers an execute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedOutcome {
    #[default]
    Success,
    Pending,
    Fail,
    DoNotTrack,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
struct ConnectionProperties {
    outcome: SimulatedOutcome,
    duration_ms: Option<f32>,
    load_ms: f32,
}

/// Counters accumulated by the simulated middleware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedStats {
    pub objects: usize,
    pub events_started: usize,
    pub events_finished: usize,
    pub files_started: usize,
    pub files_finished: usize,
    pub parameters_set: usize,
    pub occlusion_updates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VoiceKey {
    Event(EventId),
    File(StandaloneFileId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Voice {
    Loading {
        remaining_ms: f32,
        duration_ms: Option<f32>,
    },
    Playing {
        remaining_ms: Option<f32>,
    },
    Stopping,
}

#[derive(Default)]
struct SimulatedState {
    voices: AHashMap<VoiceKey, Voice>,
    sink: Option<CallbackSink>,
    stats: SimulatedStats,
}

type SharedState = Arc<Mutex<SimulatedState>>;

/// Read access to a simulated backend after it was handed to the runtime
#[derive(Clone)]
pub struct SimulatedMonitor {
    state: SharedState,
}

impl SimulatedMonitor {
    pub fn stats(&self) -> SimulatedStats {
        self.state.lock().stats
    }

    pub fn active_voices(&self) -> usize {
        self.state.lock().voices.len()
    }
}

/// Timed-voice middleware
pub struct SimulatedBackend {
    state: SharedState,
    file_duration_ms: f32,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: SharedState::default(),
            file_duration_ms: 1000.0,
        }
    }

    /// Length of every standalone file
    pub fn with_file_duration_ms(mut self, duration_ms: f32) -> Self {
        self.file_duration_ms = duration_ms.max(0.0);
        self
    }

    pub fn monitor(&self) -> SimulatedMonitor {
        SimulatedMonitor {
            state: self.state.clone(),
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn set_callback_sink(&mut self, sink: CallbackSink) {
        self.state.lock().sink = Some(sink);
    }

    fn update(&mut self, delta: DeltaTime) {
        let elapsed_ms = delta.as_millis() as f32;
        let mut started: SmallVec<[VoiceKey; 8]> = SmallVec::new();
        let mut finished: SmallVec<[VoiceKey; 8]> = SmallVec::new();

        let sink = {
            let mut state = self.state.lock();
            for (key, voice) in state.voices.iter_mut() {
                match voice {
                    Voice::Loading {
                        remaining_ms,
                        duration_ms,
                    } => {
                        *remaining_ms -= elapsed_ms;
                        if *remaining_ms <= 0.0 {
                            let duration_ms = *duration_ms;
                            started.push(*key);
                            *voice = Voice::Playing {
                                remaining_ms: duration_ms,
                            };
                        }
                    }
                    Voice::Playing {
                        remaining_ms: Some(remaining_ms),
                    } => {
                        *remaining_ms -= elapsed_ms;
                        if *remaining_ms <= 0.0 {
                            finished.push(*key);
                        }
                    }
                    Voice::Playing { remaining_ms: None } => {}
                    Voice::Stopping => finished.push(*key),
                }
            }

            for key in &finished {
                state.voices.remove(key);
                match key {
                    VoiceKey::Event(_) => state.stats.events_finished += 1,
                    VoiceKey::File(_) => state.stats.files_finished += 1,
                }
            }
            state.sink.clone()
        };

        let Some(sink) = sink else {
            return;
        };
        for key in started {
            match key {
                VoiceKey::Event(event) => sink.report_started_event(event, true),
                VoiceKey::File(file) => sink.report_started_file(file, true),
            };
        }
        for key in finished {
            match key {
                VoiceKey::Event(event) => sink.report_finished_event(event, true),
                VoiceKey::File(file) => sink.report_finished_file(file, true),
            };
        }
    }

    fn construct_object(
        &mut self,
        _id: ObjectId,
        _name: Option<&str>,
        _transform: &Transform,
    ) -> AtlResult<Box<dyn BackendObject>> {
        self.state.lock().stats.objects += 1;
        Ok(Box::new(SimulatedObject {
            state: self.state.clone(),
            file_duration_ms: self.file_duration_ms,
        }))
    }

    fn destruct_object(&mut self, _object: Box<dyn BackendObject>) {
        let mut state = self.state.lock();
        state.stats.objects = state.stats.objects.saturating_sub(1);
    }

    fn construct_listener(&mut self, _transform: &Transform) -> AtlResult<Box<dyn BackendListener>> {
        Ok(Box::new(SimulatedListener))
    }

    fn destruct_listener(&mut self, _listener: Box<dyn BackendListener>) {}

    fn construct_event(&mut self, id: EventId) -> Box<dyn BackendEvent> {
        Box::new(SimulatedEvent {
            id,
            state: self.state.clone(),
        })
    }

    fn destruct_event(&mut self, mut event: Box<dyn BackendEvent>) {
        if let Some(event) = event.as_any_mut().downcast_mut::<SimulatedEvent>() {
            self.state.lock().voices.remove(&VoiceKey::Event(event.id));
        }
    }

    fn construct_standalone_file(
        &mut self,
        id: StandaloneFileId,
        name: &str,
        _localized: bool,
    ) -> Box<dyn BackendStandaloneFile> {
        Box::new(SimulatedFile {
            id,
            name: name.to_string(),
        })
    }

    fn destruct_standalone_file(&mut self, mut file: Box<dyn BackendStandaloneFile>) {
        if let Some(file) = file.as_any_mut().downcast_mut::<SimulatedFile>() {
            self.state.lock().voices.remove(&VoiceKey::File(file.id));
        }
    }

    fn construct_trigger_connection(
        &mut self,
        desc: &ConnectionDesc,
    ) -> AtlResult<Arc<dyn BackendTriggerConnection>> {
        let properties: ConnectionProperties =
            serde_json::from_value(serde_json::Value::Object(desc.properties.clone())).map_err(
                |e| AtlError::Backend(format!("connection '{}': {}", desc.name, e)),
            )?;

        Ok(Arc::new(SimulatedConnection {
            properties,
            state: self.state.clone(),
        }))
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.voices.clear();
        state.sink = None;
    }
}

struct SimulatedConnection {
    properties: ConnectionProperties,
    state: SharedState,
}

impl BackendTriggerConnection for SimulatedConnection {
    fn execute(
        &self,
        _object: &mut dyn BackendObject,
        event: &mut dyn BackendEvent,
    ) -> RequestStatus {
        let Some(event) = event.as_any_mut().downcast_mut::<SimulatedEvent>() else {
            return RequestStatus::Failure;
        };

        let voice = match self.properties.outcome {
            SimulatedOutcome::Success => Voice::Playing {
                remaining_ms: self.properties.duration_ms,
            },
            SimulatedOutcome::Pending => Voice::Loading {
                remaining_ms: self.properties.load_ms,
                duration_ms: self.properties.duration_ms,
            },
            SimulatedOutcome::Fail => return RequestStatus::Failure,
            SimulatedOutcome::DoNotTrack => return RequestStatus::SuccessDoNotTrack,
        };

        let mut state = self.state.lock();
        state.voices.insert(VoiceKey::Event(event.id), voice);
        state.stats.events_started += 1;
        match voice {
            Voice::Loading { .. } => RequestStatus::Pending,
            _ => RequestStatus::Success,
        }
    }
}

struct SimulatedObject {
    state: SharedState,
    file_duration_ms: f32,
}

impl BackendObject for SimulatedObject {
    fn set_transformation(&mut self, _transform: &Transform) {}

    fn set_parameter(&mut self, _parameter: ParameterId, _value: f32) {
        self.state.lock().stats.parameters_set += 1;
    }

    fn set_switch_state(&mut self, _switch: SwitchId, _state: SwitchStateId) {}

    fn set_environment(&mut self, _environment: EnvironmentId, _amount: f32) {}

    fn set_obstruction_occlusion(&mut self, _obstruction: f32, _occlusion: f32) {
        self.state.lock().stats.occlusion_updates += 1;
    }

    fn play_file(&mut self, file: &mut dyn BackendStandaloneFile) -> RequestStatus {
        let Some(file) = file.as_any_mut().downcast_mut::<SimulatedFile>() else {
            return RequestStatus::Failure;
        };
        if file.name.is_empty() {
            return RequestStatus::Failure;
        }

        let mut state = self.state.lock();
        state.voices.insert(
            VoiceKey::File(file.id),
            Voice::Playing {
                remaining_ms: Some(self.file_duration_ms),
            },
        );
        state.stats.files_started += 1;
        RequestStatus::Success
    }

    fn stop_file(&mut self, file: &mut dyn BackendStandaloneFile) -> RequestStatus {
        let Some(file) = file.as_any_mut().downcast_mut::<SimulatedFile>() else {
            return RequestStatus::Failure;
        };
        stop_voice(&self.state, VoiceKey::File(file.id))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct SimulatedListener;

impl BackendListener for SimulatedListener {
    fn set_transformation(&mut self, _transform: &Transform) {}
}

struct SimulatedEvent {
    id: EventId,
    state: SharedState,
}

impl BackendEvent for SimulatedEvent {
    fn stop(&mut self) -> RequestStatus {
        stop_voice(&self.state, VoiceKey::Event(self.id))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct SimulatedFile {
    id: StandaloneFileId,
    name: String,
}

impl BackendStandaloneFile for SimulatedFile {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn stop_voice(state: &SharedState, key: VoiceKey) -> RequestStatus {
    match state.lock().voices.get_mut(&key) {
        Some(voice) => {
            *voice = Voice::Stopping;
            RequestStatus::Success
        }
        None => RequestStatus::Failure,
    }
}

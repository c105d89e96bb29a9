//! Recording backend shared by the unit tests

use std::any::Any;
use std::sync::Arc;

use atl_core::math::Transform;
use parking_lot::Mutex;

use crate::backend::{
    Backend, BackendEvent, BackendListener, BackendObject, BackendStandaloneFile,
    BackendTriggerConnection, RequestStatus,
};
use crate::controls::ConnectionDesc;
use crate::error::{AtlError, AtlResult};
use crate::ids::{
    EnvironmentId, EventId, ObjectId, ParameterId, StandaloneFileId, SwitchId, SwitchStateId,
};
use crate::request::CallbackSink;

#[derive(Debug, Default)]
pub struct Record {
    pub constructed_objects: Vec<ObjectId>,
    pub destructed_objects: usize,
    pub constructed_events: Vec<EventId>,
    pub destructed_events: usize,
    pub stopped_events: Vec<EventId>,
    pub played_files: Vec<StandaloneFileId>,
    pub stopped_files: Vec<StandaloneFileId>,
    pub destructed_files: usize,
    pub parameters: Vec<(ParameterId, f32)>,
    pub switch_states: Vec<(SwitchId, SwitchStateId)>,
    pub environments: Vec<(EnvironmentId, f32)>,
    pub obstruction_occlusion: Vec<(f32, f32)>,
    pub transforms: Vec<Transform>,
    pub listener_transforms: usize,
    pub released: bool,
}

pub type SharedRecord = Arc<Mutex<Record>>;

pub struct RecordingBackend {
    record: SharedRecord,
    file_status: RequestStatus,
    pub sink: Option<CallbackSink>,
}

impl RecordingBackend {
    pub fn new() -> (Self, SharedRecord) {
        let record = SharedRecord::default();
        (
            Self {
                record: record.clone(),
                file_status: RequestStatus::Success,
                sink: None,
            },
            record,
        )
    }

    pub fn with_file_status(mut self, status: RequestStatus) -> Self {
        self.file_status = status;
        self
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn set_callback_sink(&mut self, sink: CallbackSink) {
        self.sink = Some(sink);
    }

    fn construct_object(
        &mut self,
        id: ObjectId,
        _name: Option<&str>,
        _transform: &Transform,
    ) -> AtlResult<Box<dyn BackendObject>> {
        self.record.lock().constructed_objects.push(id);
        Ok(Box::new(RecordingObject {
            record: self.record.clone(),
            file_status: self.file_status,
        }))
    }

    fn destruct_object(&mut self, _object: Box<dyn BackendObject>) {
        self.record.lock().destructed_objects += 1;
    }

    fn construct_listener(&mut self, _transform: &Transform) -> AtlResult<Box<dyn BackendListener>> {
        Ok(Box::new(RecordingListener {
            record: self.record.clone(),
        }))
    }

    fn destruct_listener(&mut self, _listener: Box<dyn BackendListener>) {}

    fn construct_event(&mut self, id: EventId) -> Box<dyn BackendEvent> {
        self.record.lock().constructed_events.push(id);
        Box::new(RecordingEvent {
            id,
            record: self.record.clone(),
        })
    }

    fn destruct_event(&mut self, _event: Box<dyn BackendEvent>) {
        self.record.lock().destructed_events += 1;
    }

    fn construct_standalone_file(
        &mut self,
        id: StandaloneFileId,
        _name: &str,
        _localized: bool,
    ) -> Box<dyn BackendStandaloneFile> {
        Box::new(RecordingFile { id })
    }

    fn destruct_standalone_file(&mut self, _file: Box<dyn BackendStandaloneFile>) {
        self.record.lock().destructed_files += 1;
    }

    fn construct_trigger_connection(
        &mut self,
        desc: &ConnectionDesc,
    ) -> AtlResult<Arc<dyn BackendTriggerConnection>> {
        let status = match desc.properties.get("status").and_then(|v| v.as_str()) {
            Some("success") | None => RequestStatus::Success,
            Some("pending") => RequestStatus::Pending,
            Some("failure") => RequestStatus::Failure,
            Some("do_not_track") => RequestStatus::SuccessDoNotTrack,
            Some(other) => return Err(AtlError::Backend(format!("bad status {}", other))),
        };
        Ok(Arc::new(ScriptedConnection(status)))
    }

    fn release(&mut self) {
        self.record.lock().released = true;
    }
}

struct RecordingObject {
    record: SharedRecord,
    file_status: RequestStatus,
}

impl BackendObject for RecordingObject {
    fn set_transformation(&mut self, transform: &Transform) {
        self.record.lock().transforms.push(*transform);
    }

    fn set_parameter(&mut self, parameter: ParameterId, value: f32) {
        self.record.lock().parameters.push((parameter, value));
    }

    fn set_switch_state(&mut self, switch: SwitchId, state: SwitchStateId) {
        self.record.lock().switch_states.push((switch, state));
    }

    fn set_environment(&mut self, environment: EnvironmentId, amount: f32) {
        self.record.lock().environments.push((environment, amount));
    }

    fn set_obstruction_occlusion(&mut self, obstruction: f32, occlusion: f32) {
        self.record
            .lock()
            .obstruction_occlusion
            .push((obstruction, occlusion));
    }

    fn play_file(&mut self, file: &mut dyn BackendStandaloneFile) -> RequestStatus {
        if let Some(file) = file.as_any_mut().downcast_mut::<RecordingFile>() {
            self.record.lock().played_files.push(file.id);
        }
        self.file_status
    }

    fn stop_file(&mut self, file: &mut dyn BackendStandaloneFile) -> RequestStatus {
        if let Some(file) = file.as_any_mut().downcast_mut::<RecordingFile>() {
            self.record.lock().stopped_files.push(file.id);
        }
        RequestStatus::Success
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct RecordingListener {
    record: SharedRecord,
}

impl BackendListener for RecordingListener {
    fn set_transformation(&mut self, _transform: &Transform) {
        self.record.lock().listener_transforms += 1;
    }
}

struct RecordingEvent {
    id: EventId,
    record: SharedRecord,
}

impl BackendEvent for RecordingEvent {
    fn stop(&mut self) -> RequestStatus {
        self.record.lock().stopped_events.push(self.id);
        RequestStatus::Success
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct RecordingFile {
    id: StandaloneFileId,
}

impl BackendStandaloneFile for RecordingFile {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Connection that always answers with the same status
pub struct ScriptedConnection(pub RequestStatus);

impl BackendTriggerConnection for ScriptedConnection {
    fn execute(
        &self,
        _object: &mut dyn BackendObject,
        _event: &mut dyn BackendEvent,
    ) -> RequestStatus {
        self.0
    }
}

/// Trigger connection returning `status`
pub fn connection(status: RequestStatus) -> Arc<dyn BackendTriggerConnection> {
    Arc::new(ScriptedConnection(status))
}

//! Requests
//!
//! Everything that mutates runtime state travels through one of two queues
//! and is applied on the audio thread:
//! - game requests (bounded, applied in submission order)
//! - backend callbacks (unbounded, so middleware threads never block)

use atl_core::math::Transform;
use bitflags::bitflags;
use crossbeam::channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::AtlResult;
use crate::ids::{
    EnvironmentId, EventId, ObjectId, ParameterId, StandaloneFileId, SwitchId, SwitchStateId,
    TriggerId,
};
use crate::propagation::OcclusionType;

/// Opaque values echoed back to the game in completion notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserData {
    pub owner: u64,
    pub user_data: u64,
    pub user_data_owner: u64,
}

impl UserData {
    pub fn new(owner: u64, user_data: u64, user_data_owner: u64) -> Self {
        Self {
            owner,
            user_data,
            user_data_owner,
        }
    }
}

bitflags! {
    /// Where the game wants a trigger's completion delivered
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallbackFlags: u8 {
        /// Notification carries a sync token the game thread must complete
        const EXTERNAL_THREAD = 1 << 0;
        /// Registered audio-thread callbacks run before the object may be released
        const AUDIO_THREAD = 1 << 1;
    }
}

/// Per-execution options of a trigger
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TriggerRequest {
    pub user_data: UserData,
    pub callbacks: CallbackFlags,
    /// Stop the instance automatically after this many milliseconds
    pub lifetime_ms: Option<f32>,
}

impl TriggerRequest {
    pub fn with_user_data(mut self, user_data: UserData) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn with_callbacks(mut self, callbacks: CallbackFlags) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_lifetime_ms(mut self, lifetime_ms: f32) -> Self {
        self.lifetime_ms = Some(lifetime_ms);
        self
    }
}

/// Which trigger instances a stop applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    Trigger(TriggerId),
    All,
}

/// Construction parameters of an audio object
#[derive(Debug, Clone, Default)]
pub struct ObjectDesc {
    pub name: Option<String>,
    pub entity_id: Option<u64>,
    pub transform: Transform,
    pub occlusion: OcclusionType,
}

impl ObjectDesc {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn at(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_occlusion(mut self, occlusion: OcclusionType) -> Self {
        self.occlusion = occlusion;
        self
    }

    pub fn with_entity(mut self, entity_id: u64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }
}

/// Game-issued request applied on the audio thread
#[derive(Debug)]
pub enum Request {
    CreateObject {
        desc: ObjectDesc,
        reply: Sender<AtlResult<ObjectId>>,
    },
    ReleaseObject(ObjectId),
    ExecuteTrigger {
        object: ObjectId,
        trigger: TriggerId,
        request: TriggerRequest,
    },
    StopTrigger {
        object: ObjectId,
        target: StopTarget,
    },
    SetTransformation {
        object: ObjectId,
        transform: Transform,
    },
    SetParameter {
        object: ObjectId,
        parameter: ParameterId,
        value: f32,
    },
    SetSwitchState {
        object: ObjectId,
        switch: SwitchId,
        state: SwitchStateId,
    },
    SetEnvironment {
        object: ObjectId,
        environment: EnvironmentId,
        amount: f32,
    },
    SetOcclusionType {
        object: ObjectId,
        occlusion: OcclusionType,
    },
    SetOcclusionRayOffset {
        object: ObjectId,
        offset: f32,
    },
    ToggleAbsoluteVelocityTracking {
        object: ObjectId,
        enable: bool,
    },
    ToggleRelativeVelocityTracking {
        object: ObjectId,
        enable: bool,
    },
    PlayFile {
        object: ObjectId,
        name: String,
        localized: bool,
        user_data: UserData,
    },
    StopFile {
        object: ObjectId,
        name: String,
    },
    SetListenerTransformation(Transform),
    /// Replies once every earlier request has been applied
    Flush(Sender<()>),
    Shutdown,
}

/// Completion reports coming from middleware threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCallback {
    EventStarted { event: EventId, success: bool },
    EventFinished { event: EventId, success: bool },
    FileStarted { file: StandaloneFileId, success: bool },
    FileFinished { file: StandaloneFileId, success: bool },
}

/// Handle the backend uses to report event and file progress from any thread
#[derive(Debug, Clone)]
pub struct CallbackSink {
    sender: Sender<BackendCallback>,
}

impl CallbackSink {
    pub fn new(sender: Sender<BackendCallback>) -> Self {
        Self { sender }
    }

    pub fn report_started_event(&self, event: EventId, success: bool) -> bool {
        self.send(BackendCallback::EventStarted { event, success })
    }

    pub fn report_finished_event(&self, event: EventId, success: bool) -> bool {
        self.send(BackendCallback::EventFinished { event, success })
    }

    pub fn report_started_file(&self, file: StandaloneFileId, success: bool) -> bool {
        self.send(BackendCallback::FileStarted { file, success })
    }

    pub fn report_finished_file(&self, file: StandaloneFileId, success: bool) -> bool {
        self.send(BackendCallback::FileFinished { file, success })
    }

    fn send(&self, callback: BackendCallback) -> bool {
        match self.sender.try_send(callback) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(callback)) => {
                log::debug!("Dropping {:?}: runtime is gone", callback);
                false
            }
            Err(TrySendError::Full(callback)) => {
                log::error!("Callback queue full, dropping {:?}", callback);
                false
            }
        }
    }
}

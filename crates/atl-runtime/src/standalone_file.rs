//! Standalone Files
//!
//! Audio files played on an object by name, outside the trigger system.

use crate::backend::BackendStandaloneFile;
use crate::ids::ObjectId;
use crate::request::UserData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FileState {
    #[default]
    None,
    Loading,
    Playing,
    Stopping,
}

/// Runtime standalone file record
pub struct StandaloneFile {
    state: FileState,
    object: ObjectId,
    name: String,
    localized: bool,
    user_data: UserData,
    backend: Option<Box<dyn BackendStandaloneFile>>,
}

impl StandaloneFile {
    pub fn new(object: ObjectId, name: impl Into<String>, localized: bool, user_data: UserData) -> Self {
        Self {
            state: FileState::None,
            object,
            name: name.into(),
            localized,
            user_data,
            backend: None,
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn set_state(&mut self, state: FileState) {
        self.state = state;
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_localized(&self) -> bool {
        self.localized
    }

    pub fn user_data(&self) -> UserData {
        self.user_data
    }

    pub fn attach_backend(&mut self, backend: Box<dyn BackendStandaloneFile>) {
        self.backend = Some(backend);
    }

    pub fn backend_mut(&mut self) -> Option<&mut (dyn BackendStandaloneFile + 'static)> {
        self.backend.as_deref_mut()
    }

    pub fn take_backend(&mut self) -> Option<Box<dyn BackendStandaloneFile>> {
        self.backend.take()
    }
}

impl std::fmt::Debug for StandaloneFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandaloneFile")
            .field("state", &self.state)
            .field("object", &self.object)
            .field("name", &self.name)
            .field("localized", &self.localized)
            .finish()
    }
}

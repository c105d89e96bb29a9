//! Listener

use atl_core::math::{Transform, Vec3};
use atl_core::time::DeltaTime;

use crate::backend::BackendListener;

/// Listener snapshot handed to objects during an update
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ListenerState {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// The single game listener
pub struct Listener {
    transform: Transform,
    previous_position: Vec3,
    velocity: Vec3,
    backend: Option<Box<dyn BackendListener>>,
}

impl Listener {
    pub fn new(transform: Transform, backend: Option<Box<dyn BackendListener>>) -> Self {
        Self {
            transform,
            previous_position: transform.position,
            velocity: Vec3::ZERO,
            backend,
        }
    }

    pub fn transformation(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transformation(&mut self, transform: Transform) {
        self.transform = transform;
        if let Some(backend) = self.backend.as_mut() {
            backend.set_transformation(&self.transform);
        }
    }

    /// Derive the velocity from movement since the previous update
    pub fn update(&mut self, delta: DeltaTime) {
        let dt = delta.as_secs_f32();
        if dt <= 0.0 {
            return;
        }
        self.velocity = (self.transform.position - self.previous_position) / dt;
        self.previous_position = self.transform.position;
    }

    pub fn state(&self) -> ListenerState {
        ListenerState {
            position: self.transform.position,
            velocity: self.velocity,
        }
    }

    pub fn take_backend(&mut self) -> Option<Box<dyn BackendListener>> {
        self.backend.take()
    }
}

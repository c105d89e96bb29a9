//! Propagation Processor
//!
//! Estimates how much geometry sits between an audio object and the
//! listener by casting rays from sample positions around the object.
//!
//! Features:
//! - Quality tiers with a fixed number of sample positions and concurrent rays
//! - Adaptive tier selection by listener distance
//! - Synchronous casts for nearby objects, job-system casts otherwise
//! - Order-independent aggregation of asynchronous results
//! - Exponential smoothing of the published values

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use atl_core::math::{Vec3, lerp};
use atl_physics::{RayCastRequest, RayCaster, RaycastHit};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::OcclusionConfig;
use crate::error::AtlError;

/// Sample positions of the highest tier
pub const MAX_SAMPLE_POSITIONS: usize = 16;

/// Rays in flight per object for the highest tier
pub const MAX_CONCURRENT_RAYS: usize = 8;

const GOLDEN_ANGLE: f32 = 2.399_963;
const SNAP_EPSILON: f32 = 1e-4;

/// Obstruction quality requested for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcclusionType {
    /// No rays, values forced to zero
    #[default]
    None,
    /// No rays; published values drop to zero
    Ignore,
    /// Tier picked from the listener distance
    Adaptive,
    Low,
    Medium,
    High,
}

impl OcclusionType {
    pub const ALL: [Self; 6] = [
        Self::None,
        Self::Ignore,
        Self::Adaptive,
        Self::Low,
        Self::Medium,
        Self::High,
    ];

    /// Whether this type casts rays at all
    pub fn is_active(self) -> bool {
        !matches!(self, Self::None | Self::Ignore)
    }

    /// Sample positions aggregated per estimate
    pub fn num_sample_positions(self) -> usize {
        match self {
            Self::Low => 2,
            Self::Medium => 8,
            Self::High => MAX_SAMPLE_POSITIONS,
            _ => 0,
        }
    }

    /// Rays issued per batch
    pub fn num_concurrent_rays(self) -> usize {
        match self {
            Self::Low => 2,
            Self::Medium => 4,
            Self::High => MAX_CONCURRENT_RAYS,
            _ => 0,
        }
    }

    /// Concrete tier for an object `distance` away from the listener
    pub fn resolve(self, distance: f32, config: &OcclusionConfig) -> Self {
        match self {
            Self::Adaptive if distance < config.adaptive_high_distance => Self::High,
            Self::Adaptive if distance < config.adaptive_medium_distance => Self::Medium,
            Self::Adaptive => Self::Low,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ignore => "ignore",
            Self::Adaptive => "adaptive",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for OcclusionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcclusionType {
    type Err = AtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AtlError::InvalidConfig(format!("unknown occlusion type '{}'", s)))
    }
}

/// Obstruction and occlusion pair, each in 0..=1
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropagationData {
    pub obstruction: f32,
    pub occlusion: f32,
}

impl PropagationData {
    pub fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.obstruction - other.obstruction).abs() <= epsilon
            && (self.occlusion - other.occlusion).abs() <= epsilon
    }
}

/// Result of one ray
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RayInfo {
    pub sample_index: usize,
    pub num_hits: usize,
    pub occlusion: f32,
    pub obstruction: f32,
}

impl RayInfo {
    /// Ray that hit nothing
    pub fn empty(sample_index: usize) -> Self {
        Self {
            sample_index,
            ..Default::default()
        }
    }

    /// Occlusion sums every hit; obstruction only hits in the half nearest the object
    pub fn from_hits(sample_index: usize, hits: &[RaycastHit], ray_length: f32) -> Self {
        let near = ray_length * 0.5;
        let occlusion: f32 = hits.iter().map(|hit| hit.occlusion).sum();
        let obstruction: f32 = hits
            .iter()
            .filter(|hit| hit.distance <= near)
            .map(|hit| hit.occlusion)
            .sum();

        Self {
            sample_index,
            num_hits: hits.len(),
            occlusion: occlusion.min(1.0),
            obstruction: obstruction.min(1.0),
        }
    }
}

/// Result slots shared with raycast callbacks
struct RaySlots {
    slots: [Mutex<RayInfo>; MAX_CONCURRENT_RAYS],
    remaining: AtomicUsize,
    /// Cleared when the owning object goes away
    alive: AtomicBool,
}

impl RaySlots {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(RayInfo::default())),
            remaining: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
        }
    }

    fn complete(&self, slot: usize, info: RayInfo) {
        if self.alive.load(Ordering::Acquire) {
            *self.slots[slot].lock() = info;
        }
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-tick inputs of the processor
pub struct PropagationInput<'a> {
    pub object_position: Vec3,
    pub listener_position: Vec3,
    /// Object is audible, in range and allowed to cast
    pub can_run: bool,
    pub caster: Option<&'a dyn RayCaster>,
}

/// Per-object obstruction and occlusion estimator
pub struct PropagationProcessor {
    occlusion_type: OcclusionType,
    active_type: OcclusionType,
    ray_offset: f32,
    slots: Arc<RaySlots>,
    rays_in_flight: usize,
    awaiting_results: bool,
    next_sample: usize,
    sample_occlusion: [f32; MAX_SAMPLE_POSITIONS],
    sample_obstruction: [f32; MAX_SAMPLE_POSITIONS],
    target: PropagationData,
    current: PropagationData,
}

impl PropagationProcessor {
    pub fn new(occlusion_type: OcclusionType, ray_offset: f32) -> Self {
        Self {
            occlusion_type,
            active_type: occlusion_type,
            ray_offset: ray_offset.max(0.0),
            slots: Arc::new(RaySlots::new()),
            rays_in_flight: 0,
            awaiting_results: false,
            next_sample: 0,
            sample_occlusion: [0.0; MAX_SAMPLE_POSITIONS],
            sample_obstruction: [0.0; MAX_SAMPLE_POSITIONS],
            target: PropagationData::default(),
            current: PropagationData::default(),
        }
    }

    pub fn occlusion_type(&self) -> OcclusionType {
        self.occlusion_type
    }

    /// Tier used by the most recent batch
    pub fn active_type(&self) -> OcclusionType {
        self.active_type
    }

    pub fn set_occlusion_type(&mut self, occlusion_type: OcclusionType) {
        if occlusion_type == self.occlusion_type {
            return;
        }

        self.occlusion_type = occlusion_type;
        self.active_type = occlusion_type;
        self.next_sample = 0;
        self.sample_occlusion = [0.0; MAX_SAMPLE_POSITIONS];
        self.sample_obstruction = [0.0; MAX_SAMPLE_POSITIONS];

        if !occlusion_type.is_active() {
            self.target = PropagationData::default();
            self.current = PropagationData::default();
        }
    }

    pub fn ray_offset(&self) -> f32 {
        self.ray_offset
    }

    pub fn set_ray_offset(&mut self, offset: f32) {
        self.ray_offset = offset.max(0.0);
    }

    pub fn has_pending_rays(&self) -> bool {
        self.slots.remaining.load(Ordering::Acquire) > 0
    }

    /// A batch has completed and not been aggregated yet
    pub fn has_new_occlusion_values(&self) -> bool {
        self.awaiting_results && !self.has_pending_rays()
    }

    /// Smoothed values
    pub fn data(&self) -> PropagationData {
        self.current
    }

    /// Raw aggregate of the latest results
    pub fn target(&self) -> PropagationData {
        self.target
    }

    /// Collect finished rays, issue the next batch and advance smoothing
    pub fn update(&mut self, input: &PropagationInput<'_>, config: &OcclusionConfig) {
        if !self.occlusion_type.is_active() {
            return;
        }

        if self.has_new_occlusion_values() {
            self.collect_ray_results();
        }

        if input.can_run && !self.has_pending_rays() {
            if let Some(caster) = input.caster {
                self.cast_rays(input, caster, config);
                if self.has_new_occlusion_values() {
                    self.collect_ray_results();
                }
            }
        }

        self.smooth(config.smoothing_factor);
    }

    /// Detach in-flight rays so late callbacks write nowhere
    pub fn release_pending_rays(&mut self) {
        self.slots.alive.store(false, Ordering::Release);
        self.slots = Arc::new(RaySlots::new());
        self.rays_in_flight = 0;
        self.awaiting_results = false;
    }

    fn cast_rays(
        &mut self,
        input: &PropagationInput<'_>,
        caster: &dyn RayCaster,
        config: &OcclusionConfig,
    ) {
        let to_listener = input.listener_position - input.object_position;
        let distance = to_listener.length();

        let resolved = self.occlusion_type.resolve(distance, config);
        if resolved != self.active_type {
            // Sample layouts differ between tiers.
            self.sample_occlusion.fill(0.0);
            self.sample_obstruction.fill(0.0);
            self.next_sample = 0;
            self.active_type = resolved;
        }
        let samples = self.active_type.num_sample_positions();
        let rays = self
            .active_type
            .num_concurrent_rays()
            .min(samples)
            .min(MAX_CONCURRENT_RAYS);
        if rays == 0 {
            return;
        }

        let synchronous = distance < config.max_sync_distance;
        let direction = to_listener.normalize_or_zero();
        let (right, up) = if direction == Vec3::ZERO {
            (Vec3::X, Vec3::Z)
        } else {
            direction.any_orthonormal_pair()
        };

        self.slots.remaining.store(rays, Ordering::Release);
        self.rays_in_flight = rays;
        self.awaiting_results = true;

        for slot in 0..rays {
            let sample_index = self.next_sample % samples;
            self.next_sample = (sample_index + 1) % samples;

            let sample = input.object_position
                + sample_offset(sample_index, samples, config.sample_radius, right, up);
            let towards_listener = (input.listener_position - sample).normalize_or_zero();
            let origin = sample + towards_listener * self.ray_offset;
            let request =
                RayCastRequest::between(origin, input.listener_position, config.max_hits_per_ray);

            if request.max_distance <= f32::EPSILON {
                self.slots.complete(slot, RayInfo::empty(sample_index));
                continue;
            }

            if synchronous {
                let hits = caster.cast_ray(&request);
                self.slots.complete(
                    slot,
                    RayInfo::from_hits(sample_index, &hits, request.max_distance),
                );
            } else {
                let slots = Arc::clone(&self.slots);
                let length = request.max_distance;
                let issued = caster.cast_ray_async(
                    request,
                    Box::new(move |hits| {
                        slots.complete(slot, RayInfo::from_hits(sample_index, hits, length));
                    }),
                );
                if issued.is_none() {
                    log::trace!("Raycast for sample {} not issued", sample_index);
                    self.slots.complete(slot, RayInfo::empty(sample_index));
                }
            }
        }
    }

    fn collect_ray_results(&mut self) {
        for slot in &self.slots.slots[..self.rays_in_flight] {
            let info = *slot.lock();
            self.sample_occlusion[info.sample_index] = info.occlusion;
            self.sample_obstruction[info.sample_index] = info.obstruction;
        }
        self.awaiting_results = false;

        let samples = self.active_type.num_sample_positions().max(1);
        let average = |values: &[f32]| values[..samples].iter().sum::<f32>() / samples as f32;
        self.target = PropagationData {
            obstruction: average(&self.sample_obstruction),
            occlusion: average(&self.sample_occlusion),
        };
    }

    fn smooth(&mut self, factor: f32) {
        let step = |current: f32, target: f32| {
            let next = lerp(current, target, factor);
            if (next - target).abs() < SNAP_EPSILON { target } else { next }
        };
        self.current = PropagationData {
            obstruction: step(self.current.obstruction, self.target.obstruction),
            occlusion: step(self.current.occlusion, self.target.occlusion),
        };
    }
}

/// Golden-angle spiral on a disc facing the listener; sample 0 is the object itself
fn sample_offset(index: usize, count: usize, radius: f32, right: Vec3, up: Vec3) -> Vec3 {
    if index == 0 || count <= 1 {
        return Vec3::ZERO;
    }

    let distance = radius * (index as f32 / (count - 1) as f32).sqrt();
    let angle = index as f32 * GOLDEN_ANGLE;
    (right * angle.cos() + up * angle.sin()) * distance
}

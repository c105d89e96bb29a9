//! # ATL Physics
//!
//! Physics collaborator for the audio runtime's obstruction/occlusion queries.
//!
//! ## Features
//! - Static sphere and box colliders tagged with a surface occlusion value
//! - Multi-hit raycasts sorted by distance
//! - Asynchronous raycasts executed on the job system, with the completion
//!   callback running on a worker thread

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use atl_core::job::JobSystem;
use atl_core::math::{Aabb, BoundingSphere, Ray, Vec3};
use parking_lot::RwLock;
use smallvec::SmallVec;

/// Upper bound on hits reported for a single ray
pub const MAX_RAY_HITS: usize = 10;

/// Hits reported for one ray, nearest first
pub type RayHits = SmallVec<[RaycastHit; MAX_RAY_HITS]>;

/// Completion callback of an asynchronous raycast
pub type RayCastCallback = Box<dyn FnOnce(&[RaycastHit]) + Send + 'static>;

/// Collider identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColliderId(pub u32);

/// Collider shapes
#[derive(Debug, Clone)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
}

/// Static collider
#[derive(Debug, Clone)]
pub struct Collider {
    pub shape: ColliderShape,
    pub position: Vec3,
    /// How much sound a single pass through this surface blocks, 0..=1
    pub occlusion: f32,
}

impl Collider {
    /// Sphere collider
    pub fn sphere(position: Vec3, radius: f32, occlusion: f32) -> Self {
        Self {
            shape: ColliderShape::Sphere { radius },
            position,
            occlusion: occlusion.clamp(0.0, 1.0),
        }
    }

    /// Box collider
    pub fn cuboid(position: Vec3, half_extents: Vec3, occlusion: f32) -> Self {
        Self {
            shape: ColliderShape::Box { half_extents },
            position,
            occlusion: occlusion.clamp(0.0, 1.0),
        }
    }

    fn intersect(&self, ray: &Ray) -> Option<f32> {
        let hit = match self.shape {
            ColliderShape::Sphere { radius } => {
                ray.intersect_sphere(&BoundingSphere::new(self.position, radius))
            }
            ColliderShape::Box { half_extents } => {
                ray.intersect_aabb(&Aabb::from_center_half_extents(self.position, half_extents))
            }
        };
        hit.map(|(t_enter, _)| t_enter)
    }
}

impl Default for Collider {
    fn default() -> Self {
        Self::sphere(Vec3::ZERO, 0.5, 1.0)
    }
}

/// Raycast hit result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    pub point: Vec3,
    pub distance: f32,
    pub collider: ColliderId,
    /// Surface occlusion of the collider that was hit
    pub occlusion: f32,
}

/// Parameters of a single raycast
#[derive(Debug, Clone, Copy)]
pub struct RayCastRequest {
    pub origin: Vec3,
    /// Normalized direction
    pub direction: Vec3,
    pub max_distance: f32,
    pub max_hits: usize,
}

impl RayCastRequest {
    /// Ray from `from` to `to`, reporting at most `max_hits` hits
    pub fn between(from: Vec3, to: Vec3, max_hits: usize) -> Self {
        let (ray, length) = Ray::between(from, to);
        Self {
            origin: ray.origin,
            direction: ray.direction,
            max_distance: length,
            max_hits: max_hits.min(MAX_RAY_HITS),
        }
    }
}

/// Handle to an in-flight asynchronous raycast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayCastHandle(pub u64);

/// Raycast scheduler consumed by the audio runtime
pub trait RayCaster: Send + Sync {
    /// Cast a ray on the calling thread
    fn cast_ray(&self, request: &RayCastRequest) -> RayHits;

    /// Queue a ray; `callback` runs on whatever thread completes the query
    ///
    /// Returns `None` when the query could not be issued, in which case the
    /// callback is dropped without being called.
    fn cast_ray_async(
        &self,
        request: RayCastRequest,
        callback: RayCastCallback,
    ) -> Option<RayCastHandle>;
}

struct ColliderSet {
    colliders: Vec<(ColliderId, Collider)>,
}

impl ColliderSet {
    fn cast(&self, request: &RayCastRequest) -> RayHits {
        let ray = Ray::new(request.origin, request.direction);
        let mut hits: RayHits = self
            .colliders
            .iter()
            .filter_map(|(id, collider)| {
                let distance = collider.intersect(&ray)?;
                (distance <= request.max_distance).then(|| RaycastHit {
                    point: ray.at(distance),
                    distance,
                    collider: *id,
                    occlusion: collider.occlusion,
                })
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(request.max_hits.min(MAX_RAY_HITS));
        hits
    }
}

/// Physics world holding static geometry
pub struct PhysicsWorld {
    colliders: Arc<RwLock<ColliderSet>>,
    next_id: AtomicU32,
    jobs: Arc<JobSystem>,
}

impl PhysicsWorld {
    /// Create a world whose async queries run on `jobs`
    pub fn new(jobs: Arc<JobSystem>) -> Self {
        Self {
            colliders: Arc::new(RwLock::new(ColliderSet {
                colliders: Vec::new(),
            })),
            next_id: AtomicU32::new(0),
            jobs,
        }
    }

    /// Add a collider and return its id
    pub fn add_collider(&self, collider: Collider) -> ColliderId {
        let id = ColliderId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.colliders.write().colliders.push((id, collider));
        id
    }

    /// Remove a collider; returns false for unknown ids
    pub fn remove_collider(&self, id: ColliderId) -> bool {
        let mut set = self.colliders.write();
        let before = set.colliders.len();
        set.colliders.retain(|(existing, _)| *existing != id);
        set.colliders.len() != before
    }

    /// Remove every collider
    pub fn clear(&self) {
        self.colliders.write().colliders.clear();
    }

    /// Number of colliders
    pub fn collider_count(&self) -> usize {
        self.colliders.read().colliders.len()
    }

    /// Job system used for asynchronous queries
    pub fn jobs(&self) -> &Arc<JobSystem> {
        &self.jobs
    }
}

impl RayCaster for PhysicsWorld {
    fn cast_ray(&self, request: &RayCastRequest) -> RayHits {
        self.colliders.read().cast(request)
    }

    fn cast_ray_async(
        &self,
        request: RayCastRequest,
        callback: RayCastCallback,
    ) -> Option<RayCastHandle> {
        let colliders = self.colliders.clone();
        let handle = self.jobs.submit_fn("audio_raycast", move || {
            let hits = colliders.read().cast(&request);
            callback(&hits);
        })?;
        Some(RayCastHandle(handle.id()))
    }
}

//! # ATL Core
//!
//! Foundational building blocks for the Audio Translation Layer runtime.
//!
//! This crate provides the engine-agnostic systems the runtime is built on:
//! - **Memory**: Fixed-capacity slot pools with generational handles
//! - **Job System**: Worker threads for work that must not stall the audio thread
//! - **Math**: Transforms, rays and bounding volumes on top of glam
//! - **Time**: Delta time, stopwatches and countdowns

pub mod job;
pub mod math;
pub mod memory;
pub mod time;

pub use job::{Job, JobHandle, JobSystem};
pub use math::{Aabb, BoundingSphere, Ray, Transform};
pub use memory::{MemoryStats, SlotHandle, SlotPool};
pub use time::{Countdown, DeltaTime, Stopwatch};

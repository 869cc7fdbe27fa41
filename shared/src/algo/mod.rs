//! Algorithms shared by the simulation core
//!
//! This module provides the worker pool and parallel chunk helpers used by
//! image generation, and quaternion maths for randomized orientations.

pub mod parallel;
pub mod quaternion;

pub use parallel::{init_worker_pool, process_volume_in_parallel_chunks, WORKER_THREADS_ENV};
pub use quaternion::Quaternion;

//! Parallel processing utilities for image and volume operations
//!
//! This module owns the process-wide rayon worker pool setup and provides
//! helpers for processing volumes in parallel with deterministic seeding for
//! reproducible results.

use ndarray::{Array3, ArrayViewMut3, Axis};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// Environment variable holding the worker count for the global pool.
pub const WORKER_THREADS_ENV: &str = "MICROSIM_NUM_THREADS";

static WORKER_POOL_SIZE: OnceCell<usize> = OnceCell::new();

/// Configure the global rayon worker pool once for the process lifetime.
///
/// The thread count is read from [`WORKER_THREADS_ENV`]; when it is unset or
/// not a positive integer rayon's default (one worker per logical core) is
/// used. Subsequent calls are no-ops and return the size chosen first, so the
/// pool cannot be resized mid-run.
///
/// # Returns
/// The number of worker threads in the global pool
pub fn init_worker_pool() -> usize {
    *WORKER_POOL_SIZE.get_or_init(|| {
        let requested = std::env::var(WORKER_THREADS_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|&threads| threads > 0);

        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("microsim-worker-{i}"));
        if let Some(threads) = requested {
            builder = builder.num_threads(threads);
        }

        if let Err(e) = builder.build_global() {
            // Someone else already built the global pool; keep theirs.
            log::debug!("Global worker pool already initialized: {e}");
        }

        let threads = rayon::current_num_threads();
        log::info!("Worker pool ready with {threads} threads");
        threads
    })
}

/// Process an Array3 in parallel chunks along its outermost axis with deterministic seeding
///
/// The volume is split into chunks of `chunk_size` planes (axis 0). Each chunk
/// gets its own RNG seeded from the base seed plus the chunk index, so results
/// do not depend on how rayon schedules the chunks.
///
/// # Arguments
/// * `volume` - The 3D array to process
/// * `seed` - Base seed for random number generation
/// * `chunk_size` - Optional chunk size in planes. Defaults to 1 if None.
/// * `processor` - Closure that processes each chunk with its own RNG
///
/// # Returns
/// The processed array
pub fn process_volume_in_parallel_chunks<F>(
    mut volume: Array3<f64>,
    seed: u64,
    chunk_size: Option<usize>,
    processor: F,
) -> Array3<f64>
where
    F: Fn(&mut ArrayViewMut3<f64>, &mut StdRng) + Send + Sync,
{
    let chunk_size = chunk_size.unwrap_or(1).max(1);

    volume
        .axis_chunks_iter_mut(Axis(0), chunk_size)
        .into_par_iter()
        .enumerate()
        .for_each(|(chunk_idx, mut chunk)| {
            let chunk_seed = seed.wrapping_add(chunk_idx as u64);
            let mut rng = StdRng::seed_from_u64(chunk_seed);
            processor(&mut chunk, &mut rng);
        });

    volume
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_worker_pool_is_sized_once() {
        let first = init_worker_pool();
        let second = init_worker_pool();
        assert!(first >= 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_parallel_chunks_are_deterministic() {
        let fill = |chunk: &mut ArrayViewMut3<f64>, rng: &mut StdRng| {
            chunk.iter_mut().for_each(|v| *v = rng.gen::<f64>());
        };

        let a = process_volume_in_parallel_chunks(Array3::zeros((4, 3, 3)), 7, None, fill);
        let b = process_volume_in_parallel_chunks(Array3::zeros((4, 3, 3)), 7, None, fill);
        assert_eq!(a, b);

        let c = process_volume_in_parallel_chunks(Array3::zeros((4, 3, 3)), 8, None, fill);
        assert_ne!(a, c);
    }

    #[test]
    fn test_chunk_size_zero_is_clamped() {
        let out = process_volume_in_parallel_chunks(
            Array3::zeros((2, 2, 2)),
            0,
            Some(0),
            |chunk, _| chunk.fill(1.0),
        );
        assert_eq!(out.sum(), 8.0);
    }
}

//! Execution policies, the shared worker pool, and the work partitioner.
//!
//! Threaded policies split the *eligible-voxel count* (not the raw array)
//! into contiguous ranges of nearly equal size, so sparse cutoff masks still
//! give every worker the same amount of real work. Each worker owns a
//! disjoint sub-slice of the output; the scope join at the end of
//! [`run_partitioned`] is the only synchronization.

use std::any::Any;
use std::thread;

use derive_more::Display;
use once_cell::sync::Lazy;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

/// How a gamma kernel is executed. All policies produce the same gamma field
/// up to floating-point non-associativity; see the crate docs for the exact
/// guarantees.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    /// One thread, scalar inner loop.
    Sequential,
    /// One thread, lane-parallel inner loop for the classic kernels.
    Simd,
    /// Worker threads, scalar inner loop.
    #[default]
    Threaded,
    /// Worker threads, lane-parallel inner loop for the classic kernels.
    ThreadedSimd,
}

impl ExecutionPolicy {
    pub(crate) const fn is_threaded(self) -> bool {
        matches!(self, Self::Threaded | Self::ThreadedSimd)
    }

    pub(crate) const fn is_simd(self) -> bool {
        matches!(self, Self::Simd | Self::ThreadedSimd)
    }
}

fn handle_panic(_e: Box<dyn Any + Send>) {
    error!(
        "Unexpected panic in thread {}",
        thread::current().name().unwrap_or("unnamed")
    );
}

static GAMMA_POOL: Lazy<ThreadPool> = Lazy::new(|| {
    ThreadPoolBuilder::new()
        .thread_name(|u| format!("gamma-{u}"))
        .panic_handler(handle_panic)
        .build()
        .expect("Error creating gamma threadpool")
});

/// Runs `kernel` over the pre-masked output, either inline or fanned out over
/// the pool. `kernel(start, end, chunk)` must fill `chunk`, which covers
/// exactly the flat range `[start, end)`.
pub(crate) fn run_partitioned<F>(
    policy: ExecutionPolicy,
    eligible: usize,
    gamma_vals: &mut [f32],
    kernel: F,
) where
    F: Fn(usize, usize, &mut [f32]) + Sync,
{
    let len = gamma_vals.len();
    if !policy.is_threaded() || eligible == 0 {
        kernel(0, len, gamma_vals);
        return;
    }

    let workers = GAMMA_POOL.current_num_threads();
    if workers <= 1 {
        kernel(0, len, gamma_vals);
        return;
    }

    let ranges = calculation_ranges(workers, eligible, gamma_vals);
    debug!("Partitioned {eligible} eligible voxels across {} workers", ranges.len());

    let kernel = &kernel;
    GAMMA_POOL.scope(|s| {
        let mut rest = &mut *gamma_vals;
        let mut consumed = 0;
        for &(start, end) in &ranges {
            if start == end {
                continue;
            }
            // skipped gaps hold only pre-masked NaN voxels
            let (_gap, tail) = std::mem::take(&mut rest).split_at_mut(start - consumed);
            let (chunk, tail) = tail.split_at_mut(end - start);
            rest = tail;
            consumed = end;
            s.spawn(move |_| kernel(start, end, chunk));
        }
    });
}

/// Splits `eligible` to-do voxels into at most `workers` contiguous flat
/// ranges whose to-do counts differ by at most one. When the mask contains
/// NaNs, range boundaries are found by walking the +∞ sentinels.
fn calculation_ranges(
    workers: usize,
    eligible: usize,
    gamma_vals: &[f32],
) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(workers);
    let per_worker = eligible / workers;
    let remainder = eligible % workers;

    if eligible == gamma_vals.len() {
        let mut start = 0;
        for w in 0..workers {
            let amount = per_worker + usize::from(w < remainder);
            ranges.push((start, start + amount));
            start += amount;
        }
    } else {
        let mut start = 0;
        let mut end = 0;
        for w in 0..workers {
            let amount = per_worker + usize::from(w < remainder);
            let mut counted = 0;
            while counted < amount {
                if gamma_vals[end] == f32::INFINITY {
                    counted += 1;
                    if counted == 1 {
                        start = end;
                    }
                }
                end += 1;
            }
            ranges.push(if amount == 0 { (end, end) } else { (start, end) });
            start = end;
        }
    }
    ranges
}

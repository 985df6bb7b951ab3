//! Parallel execution of independent, id-tagged jobs.

use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use tracing::{trace, warn};

/// A batch of jobs, each tagged with the slot id it writes.
///
/// Every job gets its own `ChaCha20Rng`: all of them share one seed drawn
/// from the caller's RNG and differ by stream (the job id), so results are
/// reproducible from a seeded caller RNG no matter how rayon schedules them.
#[derive(Debug)]
pub struct WorkerPool<I> {
    expected: usize,
    jobs: Vec<(u64, I)>,
}

impl<I: Send> WorkerPool<I> {
    pub fn new(expected_jobs: usize) -> Self {
        Self {
            expected: expected_jobs,
            jobs: Vec::with_capacity(expected_jobs),
        }
    }

    pub fn submit(&mut self, id: u64, input: I) {
        self.jobs.push((id, input));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs every job and returns `(id, output)` in submission order.
    ///
    /// # Panics
    /// If the number of submitted jobs differs from the count given to
    /// [`WorkerPool::new`]. Debug builds also panic on duplicate ids.
    pub fn run<C, O, F, R>(self, worker: F, ctx: &C, rng: &mut R) -> Vec<(u64, O)>
    where
        C: Sync,
        O: Send,
        F: Fn(&C, I, &mut ChaCha20Rng) -> O + Sync,
        R: RngCore + CryptoRng,
    {
        assert_eq!(
            self.jobs.len(),
            self.expected,
            "worker pool expected {} jobs, got {}",
            self.expected,
            self.jobs.len()
        );
        debug_assert!(
            {
                let mut ids: Vec<u64> = self.jobs.iter().map(|(id, _)| *id).collect();
                ids.sort_unstable();
                ids.windows(2).all(|w| w[0] != w[1])
            },
            "duplicate job ids submitted to worker pool"
        );

        let mut seed = <ChaCha20Rng as SeedableRng>::Seed::default();
        rng.fill_bytes(&mut seed);

        let threads = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        trace!(jobs = self.jobs.len(), threads, "running worker pool");

        let worker = &worker;
        let jobs = self.jobs;
        let work = move || {
            jobs.into_par_iter()
                .map(|(id, input)| {
                    let mut job_rng = ChaCha20Rng::from_seed(seed);
                    job_rng.set_stream(id);
                    (id, worker(ctx, input, &mut job_rng))
                })
                .collect::<Vec<_>>()
        };

        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(work),
            Err(e) => {
                warn!(error = %e, "falling back to the global rayon pool");
                work()
            }
        }
    }
}

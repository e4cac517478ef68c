//! Batch-refilled random number buffering for the annealing engine.
//!
//! Each annealing site update consumes one flip-site draw and one
//! acceptance draw. Generating those one at a time dominates sweep cost
//! on wide problems, so draws are produced in large batches sized to
//! cover several full sweeps ("runs") per refill, bounded by a capacity
//! cap. Both knobs are tuning parameters, not correctness parameters.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::real::Real;

fn default_capacity() -> usize {
    1 << 20
}

fn default_max_runs_per_fill() -> usize {
    10
}

/// Tuning knobs for the draw buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomBufferConfig {
    /// Upper bound on the number of draws generated per refill.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Refills cover at most this many runs (sweeps) worth of draws.
    #[serde(default = "default_max_runs_per_fill")]
    pub max_runs_per_fill: usize,
}

impl Default for RandomBufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_runs_per_fill: default_max_runs_per_fill(),
        }
    }
}

/// Buffered source of flip-site indices and uniform acceptance draws.
pub struct RandomBuffer<T: Real> {
    rng: StdRng,
    config: RandomBufferConfig,
    site_bound: u32,
    run_len: usize,
    reals: Vec<T>,
    real_cursor: usize,
    sites: Vec<u32>,
    site_cursor: usize,
}

impl<T: Real> RandomBuffer<T> {
    /// `site_bound` is the exclusive upper bound for flip-site draws;
    /// `run_len` the number of site updates in one sweep. A `None` seed
    /// draws one from entropy.
    pub fn new(
        config: RandomBufferConfig,
        site_bound: u32,
        run_len: usize,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            config,
            site_bound,
            run_len: run_len.max(1),
            reals: Vec::new(),
            real_cursor: 0,
            sites: Vec::new(),
            site_cursor: 0,
        }
    }

    /// Restart the stream from a fixed seed, discarding buffered draws.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.reals.clear();
        self.real_cursor = 0;
        self.sites.clear();
        self.site_cursor = 0;
    }

    fn fill_len(&self) -> usize {
        (self.run_len * self.config.max_runs_per_fill)
            .min(self.config.capacity)
            .max(self.run_len)
    }

    /// Uniform draw in `[0, 1)`.
    pub fn next_real(&mut self) -> T {
        if self.real_cursor == self.reals.len() {
            let len = self.fill_len();
            let rng = &mut self.rng;
            self.reals.clear();
            self.reals
                .extend((0..len).map(|_| rng.gen_range(T::zero()..T::one())));
            self.real_cursor = 0;
        }
        let v = self.reals[self.real_cursor];
        self.real_cursor += 1;
        v
    }

    /// Uniform flip-site draw in `[0, site_bound)`.
    pub fn next_site(&mut self) -> u32 {
        if self.site_cursor == self.sites.len() {
            let len = self.fill_len();
            let bound = self.site_bound.max(1);
            let rng = &mut self.rng;
            self.sites.clear();
            self.sites
                .extend((0..len).map(|_| rng.gen_range(0..bound)));
            self.site_cursor = 0;
        }
        let v = self.sites[self.site_cursor];
        self.site_cursor += 1;
        v
    }

    /// Draw one sweep's worth of sites and acceptance values in one go.
    pub fn draw_run(&mut self) -> (Vec<u32>, Vec<T>) {
        let sites = (0..self.run_len).map(|_| self.next_site()).collect();
        let reals = (0..self.run_len).map(|_| self.next_real()).collect();
        (sites, reals)
    }
}

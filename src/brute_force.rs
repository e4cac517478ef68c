//! Tiled exhaustive search over the full binary state space.
//!
//! The caller partitions `[0, 2^N0) × [0, 2^N1)` into sub-ranges and
//! feeds them to `search_range` in any order; the engine chunks each
//! sub-range into bounded tiles, evaluates a tile's energies in one
//! data-parallel kernel, and folds the tile minimum into the running
//! minimal-solution set. Per-assignment energies use a fixed reduction
//! order, so the final set and minimum are identical for every
//! partitioning of the space.
//!
//! Merging follows the strict-lower / exactly-equal / higher contract:
//! a lower tile minimum clears the set before inserting, an equal one
//! appends (tie collection), a higher one is discarded. The tie set is
//! bounded by a configurable cap; overflow is counted and reported at
//! finalize rather than growing without bound.

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::bits::unpack_bits;
use crate::device::{lock_buffer, Device, DeviceBuffer, DeviceStream};
use crate::errors::{Result, SolverError};
use crate::problem::{BipartiteProblem, DenseProblem, Objective};
use crate::real::Real;
use crate::state::SolverState;

/// Packed bit-pair assignment; equality and ordering are bitwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedPair {
    pub bits0: u64,
    pub bits1: u64,
}

fn default_tile_size() -> usize {
    1024
}

fn default_max_ties() -> usize {
    1024
}

/// Tuning knobs for the exhaustive searchers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_tile_size")]
    pub tile_size0: usize,

    #[serde(default = "default_tile_size")]
    pub tile_size1: usize,

    /// Cap on collected tied-minimal assignments. Highly degenerate
    /// problems can tie on astronomically many assignments; the cap
    /// trades completeness of the tie list for bounded memory.
    #[serde(default = "default_max_ties")]
    pub max_ties: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tile_size0: default_tile_size(),
            tile_size1: default_tile_size(),
            max_ties: default_max_ties(),
        }
    }
}

/// Introspection snapshot of a searcher.
#[derive(Debug, Clone, Serialize)]
pub struct SearcherPreferences {
    pub algorithm: &'static str,
    pub precision: &'static str,
    pub n0: usize,
    pub n1: usize,
    pub tile_size0: usize,
    pub tile_size1: usize,
    pub max_ties: usize,
    pub device_assigned: bool,
}

struct TileOutcome<T> {
    min: T,
    count: usize,
}

fn bits_vec<T: Real>(packed: u64, width: usize) -> Array1<T> {
    Array1::from_iter((0..width).map(|i| {
        if (packed >> i) & 1 == 1 {
            T::one()
        } else {
            T::zero()
        }
    }))
}

/// Energy kernel for one bipartite tile. Writes the tile's energy
/// matrix (x1-major) into `energies` and the packed argmin pairs into
/// `pairs`, returning the tile minimum and the number of pairs.
fn bipartite_tile_kernel<T: Real>(
    b0: Array1<T>,
    b1: Array1<T>,
    w: Array2<T>,
    x0_begin: u64,
    x0_end: u64,
    x1_begin: u64,
    x1_end: u64,
    energies: Arc<Mutex<Vec<T>>>,
    pairs: Arc<Mutex<Vec<PackedPair>>>,
) -> Result<TileOutcome<T>> {
    let n0 = b0.len();
    let n1 = b1.len();
    let t0 = (x0_end - x0_begin) as usize;
    let t1 = (x1_end - x1_begin) as usize;

    let xs0: Vec<Array1<T>> = (x0_begin..x0_end).map(|p| bits_vec(p, n0)).collect();
    let e0: Vec<T> = xs0.iter().map(|x| b0.dot(x)).collect();

    let mut energy_guard = lock_buffer(&energies)?;
    energy_guard[..t0 * t1]
        .par_chunks_mut(t0)
        .enumerate()
        .for_each(|(jj, column)| {
            let y = bits_vec::<T>(x1_begin + jj as u64, n1);
            let e1 = b1.dot(&y);
            let wy = w.dot(&y);
            for (ii, slot) in column.iter_mut().enumerate() {
                *slot = e0[ii] + e1 + xs0[ii].dot(&wy);
            }
        });

    let min = energy_guard[..t0 * t1]
        .par_iter()
        .cloned()
        .reduce(T::infinity, |a, b| if b < a { b } else { a });

    let mut pair_guard = lock_buffer(&pairs)?;
    let mut count = 0;
    for jj in 0..t1 {
        for ii in 0..t0 {
            if energy_guard[jj * t0 + ii] == min {
                pair_guard[count] = PackedPair {
                    bits0: x0_begin + ii as u64,
                    bits1: x1_begin + jj as u64,
                };
                count += 1;
            }
        }
    }
    Ok(TileOutcome { min, count })
}

/// Exhaustive searcher for bipartite problems.
pub struct BipartiteBruteForceSearcher<T: Real> {
    config: SearchConfig,
    tile0: usize,
    tile1: usize,
    problem: Option<BipartiteProblem<T>>,
    x0_max: u64,
    x1_max: u64,
    e_min: T,
    min_pairs: Vec<PackedPair>,
    truncated: usize,
    d_energies: Option<DeviceBuffer<T>>,
    d_tile_pairs: Option<DeviceBuffer<PackedPair>>,
    staging: Vec<PackedPair>,
    solutions: Vec<(Vec<u8>, Vec<u8>)>,
    energies: Array1<T>,
    stream: Option<DeviceStream>,
    state: SolverState,
}

impl<T: Real> BipartiteBruteForceSearcher<T> {
    pub fn new() -> Self {
        Self::with_config(SearchConfig::default())
    }

    pub fn with_config(config: SearchConfig) -> Self {
        let tile0 = config.tile_size0.max(1);
        let tile1 = config.tile_size1.max(1);
        Self {
            config,
            tile0,
            tile1,
            problem: None,
            x0_max: 0,
            x1_max: 0,
            e_min: T::infinity(),
            min_pairs: Vec::new(),
            truncated: 0,
            d_energies: None,
            d_tile_pairs: None,
            staging: Vec::new(),
            solutions: Vec::new(),
            energies: Array1::zeros(0),
            stream: None,
            state: SolverState::new(),
        }
    }

    /// One-shot device assignment; reassignment is a configuration
    /// error.
    pub fn assign_device(&mut self, device: &Device) -> Result<()> {
        if self.stream.is_some() {
            return Err(SolverError::Config("device already assigned".to_string()));
        }
        self.stream = Some(device.stream()?);
        Ok(())
    }

    /// Install a problem. Maximize objectives are negated once here;
    /// results are negated back at finalize.
    pub fn set_problem(
        &mut self,
        b0: Array1<T>,
        b1: Array1<T>,
        w: Array2<T>,
        objective: Objective,
    ) -> Result<()> {
        if self.stream.is_none() {
            return Err(SolverError::Sequencing(
                "set_problem requires an assigned device".to_string(),
            ));
        }
        let problem = BipartiteProblem::new(b0, b1, w, objective)?;
        self.release_buffers();
        self.problem = Some(problem);
        self.state.set_problem();
        Ok(())
    }

    /// Allocate tile buffers and reset the running minimum. Calling
    /// again restarts the search, releasing prior buffers first.
    pub fn initialize(&mut self) -> Result<()> {
        self.state.require_problem("initialize")?;
        let (n0, n1) = {
            let problem = self.problem.as_ref().ok_or_else(|| {
                SolverError::Sequencing("initialize requires a problem to be set".to_string())
            })?;
            (problem.n0(), problem.n1())
        };
        self.release_buffers();

        self.x0_max = 1u64 << n0;
        self.x1_max = 1u64 << n1;
        self.tile0 = self.config.tile_size0.max(1);
        self.tile1 = self.config.tile_size1.max(1);
        if (self.tile0 as u64) > self.x0_max {
            self.tile0 = self.x0_max as usize;
            println!("[SEARCH][INIT] tile size 0 adjusted to {} for N0={}", self.tile0, n0);
        }
        if (self.tile1 as u64) > self.x1_max {
            self.tile1 = self.x1_max as usize;
            println!("[SEARCH][INIT] tile size 1 adjusted to {} for N1={}", self.tile1, n1);
        }

        let stream = self.stream.as_ref().ok_or_else(|| {
            SolverError::Sequencing("initialize requires an assigned device".to_string())
        })?;
        let device = stream.device().clone();
        let tile_len = self.tile0 * self.tile1;
        self.d_energies = Some(device.alloc::<T>(tile_len)?);
        self.d_tile_pairs = Some(device.alloc::<PackedPair>(tile_len)?);

        self.e_min = T::infinity();
        self.min_pairs.clear();
        self.truncated = 0;
        self.solutions.clear();
        self.energies = Array1::zeros(0);
        self.state.initialize()
    }

    /// Search one sub-range of the state space. Bounds are clamped into
    /// the valid domain; an empty range is a no-op; begin past end is a
    /// range error.
    pub fn search_range(
        &mut self,
        x0_begin: u64,
        x0_end: u64,
        x1_begin: u64,
        x1_end: u64,
    ) -> Result<()> {
        self.state.require_initialized("search_range")?;
        if x0_begin > x0_end {
            return Err(SolverError::Range(format!(
                "x0 begin {} exceeds end {}",
                x0_begin, x0_end
            )));
        }
        if x1_begin > x1_end {
            return Err(SolverError::Range(format!(
                "x1 begin {} exceeds end {}",
                x1_begin, x1_end
            )));
        }
        let x0_begin = x0_begin.min(self.x0_max);
        let x0_end = x0_end.min(self.x0_max);
        let x1_begin = x1_begin.min(self.x1_max);
        let x1_end = x1_end.min(self.x1_max);
        if x0_begin == x0_end || x1_begin == x1_end {
            return Ok(());
        }

        let (b0, b1, w) = {
            let problem = self.problem.as_ref().ok_or_else(|| {
                SolverError::Sequencing("search_range requires a problem to be set".to_string())
            })?;
            (problem.b0.clone(), problem.b1.clone(), problem.w.clone())
        };

        let mut t1_start = x1_begin;
        while t1_start < x1_end {
            let t1_end = (t1_start + self.tile1 as u64).min(x1_end);
            let mut t0_start = x0_begin;
            while t0_start < x0_end {
                let t0_end = (t0_start + self.tile0 as u64).min(x0_end);
                let outcome = self.run_tile(
                    b0.clone(),
                    b1.clone(),
                    w.clone(),
                    t0_start,
                    t0_end,
                    t1_start,
                    t1_end,
                )?;
                self.absorb_tile(outcome)?;
                t0_start = t0_end;
            }
            t1_start = t1_end;
        }
        Ok(())
    }

    /// Convenience driver: sweep the entire state space tile by tile.
    pub fn search(&mut self) -> Result<()> {
        self.state.require_initialized("search")?;
        self.search_range(0, self.x0_max, 0, self.x1_max)
    }

    fn run_tile(
        &mut self,
        b0: Array1<T>,
        b1: Array1<T>,
        w: Array2<T>,
        x0_begin: u64,
        x0_end: u64,
        x1_begin: u64,
        x1_end: u64,
    ) -> Result<TileOutcome<T>> {
        let stream = self.stream.as_ref().ok_or_else(|| {
            SolverError::Sequencing("search requires an assigned device".to_string())
        })?;
        let energies = self
            .d_energies
            .as_ref()
            .ok_or_else(|| SolverError::Device("tile energy buffer released".to_string()))?
            .shared();
        let pairs = self
            .d_tile_pairs
            .as_ref()
            .ok_or_else(|| SolverError::Device("tile pair buffer released".to_string()))?
            .shared();
        let pending = stream.launch(move || {
            bipartite_tile_kernel(
                b0, b1, w, x0_begin, x0_end, x1_begin, x1_end, energies, pairs,
            )
        });
        pending.wait()?
    }

    fn absorb_tile(&mut self, outcome: TileOutcome<T>) -> Result<()> {
        if outcome.min < self.e_min {
            self.e_min = outcome.min;
            self.min_pairs.clear();
            self.truncated = 0;
            self.append_tile_pairs(outcome.count)
        } else if outcome.min == self.e_min {
            self.append_tile_pairs(outcome.count)
        } else {
            Ok(())
        }
    }

    fn append_tile_pairs(&mut self, count: usize) -> Result<()> {
        let buffer = self
            .d_tile_pairs
            .as_ref()
            .ok_or_else(|| SolverError::Device("tile pair buffer released".to_string()))?;
        buffer.download_prefix(count, &mut self.staging)?;
        let room = self.config.max_ties.saturating_sub(self.min_pairs.len());
        let take = count.min(room);
        self.min_pairs.extend_from_slice(&self.staging[..take]);
        self.truncated += count - take;
        Ok(())
    }

    /// Wait for outstanding device work, pull packed minima back to the
    /// host, unpack them, and restore the caller's sign convention.
    pub fn finalize(&mut self) -> Result<()> {
        self.state.require_initialized("finalize")?;
        if let Some(stream) = &self.stream {
            stream.synchronize()?;
        }
        if self.truncated > 0 {
            println!(
                "[SEARCH][FINALIZE] dropped {} tied assignments beyond the {}-entry cap",
                self.truncated, self.config.max_ties
            );
        }
        let (n0, n1, sign) = {
            let problem = self.problem.as_ref().ok_or_else(|| {
                SolverError::Sequencing("finalize requires a problem to be set".to_string())
            })?;
            (problem.n0(), problem.n1(), problem.objective.report_sign::<T>())
        };
        self.solutions = self
            .min_pairs
            .iter()
            .map(|p| (unpack_bits(p.bits0, n0), unpack_bits(p.bits1, n1)))
            .collect();
        self.energies = Array1::from_elem(self.solutions.len(), self.e_min * sign);
        self.state.solution_ready()
    }

    /// Minimal assignments as (bits0, bits1) pairs; valid post-finalize.
    pub fn get_x(&self) -> Result<&[(Vec<u8>, Vec<u8>)]> {
        self.state.require_solution("get_x")?;
        Ok(&self.solutions)
    }

    /// Energy of every reported assignment; valid post-finalize.
    pub fn get_e(&self) -> Result<&Array1<T>> {
        self.state.require_solution("get_e")?;
        Ok(&self.energies)
    }

    /// Release device buffers and collected results; the problem and
    /// device assignment are retained.
    pub fn deallocate(&mut self) {
        self.release_buffers();
        self.min_pairs.clear();
        self.solutions.clear();
        self.energies = Array1::zeros(0);
        self.state.deallocate();
    }

    fn release_buffers(&mut self) {
        self.d_energies = None;
        self.d_tile_pairs = None;
    }

    pub fn preferences(&self) -> SearcherPreferences {
        SearcherPreferences {
            algorithm: "brute_force_bipartite",
            precision: T::precision_name(),
            n0: self.problem.as_ref().map(|p| p.n0()).unwrap_or(0),
            n1: self.problem.as_ref().map(|p| p.n1()).unwrap_or(0),
            tile_size0: self.tile0,
            tile_size1: self.tile1,
            max_ties: self.config.max_ties,
            device_assigned: self.stream.is_some(),
        }
    }
}

impl<T: Real> Default for BipartiteBruteForceSearcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Energy kernel for one dense tile (single packed range).
fn dense_tile_kernel<T: Real>(
    w: Array2<T>,
    b: Array1<T>,
    x_begin: u64,
    x_end: u64,
    energies: Arc<Mutex<Vec<T>>>,
    mins: Arc<Mutex<Vec<u64>>>,
) -> Result<TileOutcome<T>> {
    let n = b.len();
    let t = (x_end - x_begin) as usize;

    let mut energy_guard = lock_buffer(&energies)?;
    energy_guard[..t]
        .par_iter_mut()
        .enumerate()
        .for_each(|(k, slot)| {
            let x = bits_vec::<T>(x_begin + k as u64, n);
            let wx = w.dot(&x);
            *slot = b.dot(&x) + x.dot(&wx);
        });

    let min = energy_guard[..t]
        .par_iter()
        .cloned()
        .reduce(T::infinity, |a, b| if b < a { b } else { a });

    let mut min_guard = lock_buffer(&mins)?;
    let mut count = 0;
    for k in 0..t {
        if energy_guard[k] == min {
            min_guard[count] = x_begin + k as u64;
            count += 1;
        }
    }
    Ok(TileOutcome { min, count })
}

/// Exhaustive searcher for dense problems; takes a single packed range.
pub struct DenseBruteForceSearcher<T: Real> {
    config: SearchConfig,
    tile: usize,
    problem: Option<DenseProblem<T>>,
    x_max: u64,
    e_min: T,
    min_packed: Vec<u64>,
    truncated: usize,
    d_energies: Option<DeviceBuffer<T>>,
    d_tile_mins: Option<DeviceBuffer<u64>>,
    staging: Vec<u64>,
    solutions: Vec<Vec<u8>>,
    energies: Array1<T>,
    stream: Option<DeviceStream>,
    state: SolverState,
}

impl<T: Real> DenseBruteForceSearcher<T> {
    pub fn new() -> Self {
        Self::with_config(SearchConfig::default())
    }

    pub fn with_config(config: SearchConfig) -> Self {
        let tile = config.tile_size0.max(1);
        Self {
            config,
            tile,
            problem: None,
            x_max: 0,
            e_min: T::infinity(),
            min_packed: Vec::new(),
            truncated: 0,
            d_energies: None,
            d_tile_mins: None,
            staging: Vec::new(),
            solutions: Vec::new(),
            energies: Array1::zeros(0),
            stream: None,
            state: SolverState::new(),
        }
    }

    pub fn assign_device(&mut self, device: &Device) -> Result<()> {
        if self.stream.is_some() {
            return Err(SolverError::Config("device already assigned".to_string()));
        }
        self.stream = Some(device.stream()?);
        Ok(())
    }

    pub fn set_problem(&mut self, b: Array1<T>, w: Array2<T>, objective: Objective) -> Result<()> {
        if self.stream.is_none() {
            return Err(SolverError::Sequencing(
                "set_problem requires an assigned device".to_string(),
            ));
        }
        let problem = DenseProblem::new(b, w, objective)?;
        self.release_buffers();
        self.problem = Some(problem);
        self.state.set_problem();
        Ok(())
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.state.require_problem("initialize")?;
        let n = {
            let problem = self.problem.as_ref().ok_or_else(|| {
                SolverError::Sequencing("initialize requires a problem to be set".to_string())
            })?;
            problem.n()
        };
        self.release_buffers();

        self.x_max = 1u64 << n;
        self.tile = self.config.tile_size0.max(1);
        if (self.tile as u64) > self.x_max {
            self.tile = self.x_max as usize;
            println!("[SEARCH][INIT] tile size adjusted to {} for N={}", self.tile, n);
        }

        let stream = self.stream.as_ref().ok_or_else(|| {
            SolverError::Sequencing("initialize requires an assigned device".to_string())
        })?;
        let device = stream.device().clone();
        self.d_energies = Some(device.alloc::<T>(self.tile)?);
        self.d_tile_mins = Some(device.alloc::<u64>(self.tile)?);

        self.e_min = T::infinity();
        self.min_packed.clear();
        self.truncated = 0;
        self.solutions.clear();
        self.energies = Array1::zeros(0);
        self.state.initialize()
    }

    pub fn search_range(&mut self, x_begin: u64, x_end: u64) -> Result<()> {
        self.state.require_initialized("search_range")?;
        if x_begin > x_end {
            return Err(SolverError::Range(format!(
                "x begin {} exceeds end {}",
                x_begin, x_end
            )));
        }
        let x_begin = x_begin.min(self.x_max);
        let x_end = x_end.min(self.x_max);
        if x_begin == x_end {
            return Ok(());
        }

        let (w, b) = {
            let problem = self.problem.as_ref().ok_or_else(|| {
                SolverError::Sequencing("search_range requires a problem to be set".to_string())
            })?;
            (problem.w.clone(), problem.b.clone())
        };

        let mut t_start = x_begin;
        while t_start < x_end {
            let t_end = (t_start + self.tile as u64).min(x_end);
            let stream = self.stream.as_ref().ok_or_else(|| {
                SolverError::Sequencing("search requires an assigned device".to_string())
            })?;
            let energies = self
                .d_energies
                .as_ref()
                .ok_or_else(|| SolverError::Device("tile energy buffer released".to_string()))?
                .shared();
            let mins = self
                .d_tile_mins
                .as_ref()
                .ok_or_else(|| SolverError::Device("tile minimum buffer released".to_string()))?
                .shared();
            let (w_k, b_k) = (w.clone(), b.clone());
            let pending = stream
                .launch(move || dense_tile_kernel(w_k, b_k, t_start, t_end, energies, mins));
            let outcome = pending.wait()??;
            self.absorb_tile(outcome)?;
            t_start = t_end;
        }
        Ok(())
    }

    pub fn search(&mut self) -> Result<()> {
        self.state.require_initialized("search")?;
        self.search_range(0, self.x_max)
    }

    fn absorb_tile(&mut self, outcome: TileOutcome<T>) -> Result<()> {
        if outcome.min < self.e_min {
            self.e_min = outcome.min;
            self.min_packed.clear();
            self.truncated = 0;
            self.append_tile_mins(outcome.count)
        } else if outcome.min == self.e_min {
            self.append_tile_mins(outcome.count)
        } else {
            Ok(())
        }
    }

    fn append_tile_mins(&mut self, count: usize) -> Result<()> {
        let buffer = self
            .d_tile_mins
            .as_ref()
            .ok_or_else(|| SolverError::Device("tile minimum buffer released".to_string()))?;
        buffer.download_prefix(count, &mut self.staging)?;
        let room = self.config.max_ties.saturating_sub(self.min_packed.len());
        let take = count.min(room);
        self.min_packed.extend_from_slice(&self.staging[..take]);
        self.truncated += count - take;
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<()> {
        self.state.require_initialized("finalize")?;
        if let Some(stream) = &self.stream {
            stream.synchronize()?;
        }
        if self.truncated > 0 {
            println!(
                "[SEARCH][FINALIZE] dropped {} tied assignments beyond the {}-entry cap",
                self.truncated, self.config.max_ties
            );
        }
        let (n, sign) = {
            let problem = self.problem.as_ref().ok_or_else(|| {
                SolverError::Sequencing("finalize requires a problem to be set".to_string())
            })?;
            (problem.n(), problem.objective.report_sign::<T>())
        };
        self.solutions = self
            .min_packed
            .iter()
            .map(|&p| unpack_bits(p, n))
            .collect();
        self.energies = Array1::from_elem(self.solutions.len(), self.e_min * sign);
        self.state.solution_ready()
    }

    pub fn get_x(&self) -> Result<&[Vec<u8>]> {
        self.state.require_solution("get_x")?;
        Ok(&self.solutions)
    }

    pub fn get_e(&self) -> Result<&Array1<T>> {
        self.state.require_solution("get_e")?;
        Ok(&self.energies)
    }

    pub fn deallocate(&mut self) {
        self.release_buffers();
        self.min_packed.clear();
        self.solutions.clear();
        self.energies = Array1::zeros(0);
        self.state.deallocate();
    }

    fn release_buffers(&mut self) {
        self.d_energies = None;
        self.d_tile_mins = None;
    }

    pub fn preferences(&self) -> SearcherPreferences {
        SearcherPreferences {
            algorithm: "brute_force_dense",
            precision: T::precision_name(),
            n0: self.problem.as_ref().map(|p| p.n()).unwrap_or(0),
            n1: 0,
            tile_size0: self.tile,
            tile_size1: 0,
            max_ties: self.config.max_ties,
            device_assigned: self.stream.is_some(),
        }
    }
}

impl<T: Real> Default for DenseBruteForceSearcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;
    use ndarray::array;

    fn test_device() -> Device {
        Device::with_config(DeviceConfig {
            threads: 2,
            memory_bytes: 64 * 1024 * 1024,
        })
        .expect("device opens")
    }

    #[test]
    fn test_single_negative_weight_scenario() {
        // N0=3, N1=2, one strongly negative entry at (0, 0): exactly one
        // minimal pair with bit 0 set in each group.
        let device = test_device();
        let mut searcher = BipartiteBruteForceSearcher::<f64>::new();
        searcher.assign_device(&device).expect("device assigned");
        let mut w = Array2::zeros((3, 2));
        w[[0, 0]] = -5.0;
        searcher
            .set_problem(Array1::zeros(3), Array1::zeros(2), w, Objective::Minimize)
            .expect("problem set");
        searcher.initialize().expect("initialized");
        searcher.search().expect("searched");
        searcher.finalize().expect("finalized");

        let xs = searcher.get_x().expect("solution available");
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].0, vec![1, 0, 0]);
        assert_eq!(xs[0].1, vec![1, 0]);
        let es = searcher.get_e().expect("energies available");
        assert_eq!(es[0], -5.0);
    }

    #[test]
    fn test_lifecycle_errors() {
        let device = test_device();
        let mut searcher = BipartiteBruteForceSearcher::<f32>::new();
        assert!(matches!(
            searcher
                .set_problem(
                    Array1::zeros(2),
                    Array1::zeros(2),
                    Array2::zeros((2, 2)),
                    Objective::Minimize
                )
                .unwrap_err(),
            SolverError::Sequencing(_)
        ));
        searcher.assign_device(&device).expect("device assigned");
        assert!(matches!(
            searcher.assign_device(&device).unwrap_err(),
            SolverError::Config(_)
        ));
        assert!(searcher.initialize().is_err());
        searcher
            .set_problem(
                Array1::zeros(2),
                Array1::zeros(2),
                Array2::zeros((2, 2)),
                Objective::Minimize,
            )
            .expect("problem set");
        assert!(searcher.search_range(0, 4, 0, 4).is_err());
        searcher.initialize().expect("initialized");
        assert!(searcher.get_x().is_err());
        assert!(matches!(
            searcher.search_range(3, 1, 0, 4).unwrap_err(),
            SolverError::Range(_)
        ));
    }

    #[test]
    fn test_out_of_domain_ranges_are_clamped() {
        let device = test_device();
        let mut searcher = BipartiteBruteForceSearcher::<f64>::new();
        searcher.assign_device(&device).expect("device assigned");
        let mut w = Array2::zeros((2, 2));
        w[[1, 1]] = -1.0;
        searcher
            .set_problem(Array1::zeros(2), Array1::zeros(2), w, Objective::Minimize)
            .expect("problem set");
        searcher.initialize().expect("initialized");
        // Way past 2^2; clamped to the full space.
        searcher.search_range(0, 1000, 0, 1000).expect("searched");
        searcher.finalize().expect("finalized");
        assert_eq!(searcher.get_e().expect("energies")[0], -1.0);
    }

    #[test]
    fn test_tie_collection_and_cap() {
        let device = test_device();
        // Zero weights: every assignment ties at energy 0 (16 total).
        let config = SearchConfig {
            tile_size0: 2,
            tile_size1: 2,
            max_ties: 10,
        };
        let mut searcher = BipartiteBruteForceSearcher::<f64>::with_config(config);
        searcher.assign_device(&device).expect("device assigned");
        searcher
            .set_problem(
                Array1::zeros(2),
                Array1::zeros(2),
                Array2::zeros((2, 2)),
                Objective::Minimize,
            )
            .expect("problem set");
        searcher.initialize().expect("initialized");
        searcher.search().expect("searched");
        searcher.finalize().expect("finalized");
        assert_eq!(searcher.get_x().expect("solutions").len(), 10);
    }

    #[test]
    fn test_dense_searcher_matches_formulas() {
        let device = test_device();
        let mut searcher = DenseBruteForceSearcher::<f64>::with_config(SearchConfig {
            tile_size0: 4,
            tile_size1: 4,
            max_ties: 64,
        });
        searcher.assign_device(&device).expect("device assigned");
        let b = array![0.1, -0.4, 0.2];
        let w = array![
            [0.0, -1.0, 0.5],
            [-1.0, 0.0, 0.3],
            [0.5, 0.3, 0.0]
        ];
        searcher
            .set_problem(b.clone(), w.clone(), Objective::Minimize)
            .expect("problem set");
        searcher.initialize().expect("initialized");
        searcher.search().expect("searched");
        searcher.finalize().expect("finalized");

        // Reference scan through the formulas module.
        let mut best = f64::INFINITY;
        for packed in 0..8u64 {
            let x = unpack_bits(packed, 3);
            let e = crate::formulas::dense::energy(&w, &b, &x);
            if e < best {
                best = e;
            }
        }
        assert_eq!(searcher.get_e().expect("energies")[0], best);
    }

    #[test]
    fn test_reinitialize_clears_previous_results() {
        let device = test_device();
        let mut searcher = DenseBruteForceSearcher::<f64>::new();
        searcher.assign_device(&device).expect("device assigned");
        let mut w = Array2::zeros((2, 2));
        w[[0, 0]] = -2.0;
        searcher
            .set_problem(Array1::zeros(2), w, Objective::Minimize)
            .expect("problem set");
        searcher.initialize().expect("initialized");
        searcher.search().expect("searched");
        searcher.finalize().expect("finalized");
        assert!(!searcher.get_x().expect("solutions").is_empty());

        searcher.initialize().expect("re-initialized");
        assert!(searcher.get_x().is_err(), "results cleared by re-initialize");
    }
}

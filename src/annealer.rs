//! Stochastic annealing over replica spin slices.
//!
//! The engine operates on the Ising form of a dense problem (bipartite
//! problems anneal through their exact dense embedding). One `step` is
//! a full sweep: every replica performs N site updates, each consuming
//! one flip-site draw and one acceptance draw from the batch-refilled
//! random buffer.
//!
//! Two update rules are supported and selected once per run:
//!
//! - **Simulated quantum annealing**: replicas form a periodic Trotter
//!   ring; a flip's classical energy delta (scaled by 1/m) combines
//!   with an inter-replica coupling term `ln(tanh(Γβ/m))/β`, and the
//!   flip is accepted with probability `exp(-β·ΔH)`.
//! - **Simulated annealing**: replicas evolve independently under
//!   Metropolis acceptance `exp(-ΔE/T)` on the classical delta alone.
//!
//! Sweeps are enqueued asynchronously on the engine's device stream;
//! energy and solution reads are the synchronization points.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::device::{lock_buffer, Device, DeviceBuffer, DeviceStream, Pending};
use crate::errors::{Result, SolverError};
use crate::formulas::{dense, DenseHamiltonian};
use crate::problem::{DenseProblem, Objective};
use crate::random_stream::{RandomBuffer, RandomBufferConfig};
use crate::real::{from_count, Real};
use crate::state::SolverState;

/// Annealing update rule, fixed for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRule {
    SimulatedQuantumAnnealing,
    SimulatedAnnealing,
}

impl UpdateRule {
    fn name(self) -> &'static str {
        match self {
            UpdateRule::SimulatedQuantumAnnealing => "sqa",
            UpdateRule::SimulatedAnnealing => "sa",
        }
    }
}

/// Per-step schedule parameters; the variant must match the selected
/// rule.
#[derive(Debug, Clone, Copy)]
pub enum StepParams<T> {
    /// Transverse field strength and inverse temperature for SQA.
    Quantum { gamma: T, beta: T },
    /// Effective temperature for SA.
    Thermal { temperature: T },
}

/// Tuning knobs for the annealing engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnealerConfig {
    #[serde(default)]
    pub random: RandomBufferConfig,
}

/// Introspection snapshot of the annealer.
#[derive(Debug, Clone, Serialize)]
pub struct AnnealerPreferences {
    pub algorithm: &'static str,
    pub precision: &'static str,
    pub n: usize,
    pub replicas: usize,
    pub seeded: bool,
    pub device_assigned: bool,
}

enum SweepRule<T> {
    Thermal { temperature: T },
    Quantum { coef: T, beta: T, inv_m: T },
}

fn spin_val<T: Real>(q: i8) -> T {
    if q > 0 {
        T::one()
    } else {
        -T::one()
    }
}

/// One sweep over every replica and site. `sites` and `accepts` hold
/// the pre-drawn randoms, one pair per site update, in consumption
/// order.
fn sweep_kernel<T: Real>(
    h: Array1<T>,
    j: Array2<T>,
    spins: Arc<Mutex<Vec<i8>>>,
    field: Arc<Mutex<Vec<T>>>,
    m: usize,
    n: usize,
    sites: Vec<u32>,
    accepts: Vec<T>,
    rule: SweepRule<T>,
) -> Result<()> {
    let mut q = lock_buffer(&spins)?;
    let mut lambda = lock_buffer(&field)?;
    let two = T::one() + T::one();

    for k in 0..m {
        // Pairwise-contribution vector λ = J · q_k, kept incrementally
        // consistent across accepted flips within the replica.
        for i in 0..n {
            let mut acc = T::zero();
            for l in 0..n {
                acc = acc + j[[i, l]] * spin_val::<T>(q[k * n + l]);
            }
            lambda[i] = acc;
        }

        for u in 0..n {
            let draw = k * n + u;
            let site = sites[draw] as usize;
            let qv = spin_val::<T>(q[k * n + site]);
            let de_classical = -two * qv * (h[site] + two * lambda[site]);

            let accepted = match &rule {
                SweepRule::Thermal { temperature } => {
                    de_classical <= T::zero()
                        || accepts[draw] < (-de_classical / *temperature).exp()
                }
                SweepRule::Quantum { coef, beta, inv_m } => {
                    let up = spin_val::<T>(q[((k + m - 1) % m) * n + site]);
                    let down = spin_val::<T>(q[((k + 1) % m) * n + site]);
                    let de = de_classical * *inv_m - *coef * qv * (up + down);
                    de <= T::zero() || accepts[draw] < (-*beta * de).exp()
                }
            };

            if accepted {
                q[k * n + site] = -q[k * n + site];
                for l in 0..n {
                    lambda[l] = lambda[l] - two * qv * j[[site, l]];
                }
            }
        }
    }
    Ok(())
}

/// Annealing engine for dense Ising/QUBO problems.
pub struct DenseAnnealer<T: Real> {
    config: AnnealerConfig,
    n: usize,
    m: usize,
    ham: Option<DenseHamiltonian<T>>,
    objective: Objective,
    rule: Option<UpdateRule>,
    seed: Option<u64>,
    spin_rng: StdRng,
    random: Option<RandomBuffer<T>>,
    d_spins: Option<DeviceBuffer<i8>>,
    d_field: Option<DeviceBuffer<T>>,
    inflight: Vec<Pending<Result<()>>>,
    energies: Array1<T>,
    solutions: Vec<Vec<u8>>,
    spin_rows: Vec<Vec<i8>>,
    stream: Option<DeviceStream>,
    state: SolverState,
}

impl<T: Real> DenseAnnealer<T> {
    pub fn new() -> Self {
        Self::with_config(AnnealerConfig::default())
    }

    pub fn with_config(config: AnnealerConfig) -> Self {
        Self {
            config,
            n: 0,
            m: 0,
            ham: None,
            objective: Objective::Minimize,
            rule: None,
            seed: None,
            spin_rng: StdRng::from_entropy(),
            random: None,
            d_spins: None,
            d_field: None,
            inflight: Vec::new(),
            energies: Array1::zeros(0),
            solutions: Vec::new(),
            spin_rows: Vec::new(),
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

    /// Install a QUBO problem; derives and stores its Ising form.
    pub fn set_qubo(&mut self, w: Array2<T>, b: Array1<T>, objective: Objective) -> Result<()> {
        if self.stream.is_none() {
            return Err(SolverError::Sequencing(
                "set_qubo requires an assigned device".to_string(),
            ));
        }
        let problem = DenseProblem::new(b, w, objective)?;
        let ham = dense::hamiltonian(&problem.w, &problem.b);
        self.release_buffers();
        self.n = problem.n();
        self.objective = objective;
        self.ham = Some(ham);
        self.state.set_problem();
        Ok(())
    }

    /// Install a precomputed Ising form directly (minimize convention).
    pub fn set_hamiltonian(&mut self, h: Array1<T>, j: Array2<T>, c: T) -> Result<()> {
        if self.stream.is_none() {
            return Err(SolverError::Sequencing(
                "set_hamiltonian requires an assigned device".to_string(),
            ));
        }
        let n = h.len();
        if n == 0 || n > crate::bits::MAX_PACKED_BITS {
            return Err(SolverError::Config(format!(
                "N must be between 1 and {}, got {}",
                crate::bits::MAX_PACKED_BITS,
                n
            )));
        }
        if j.nrows() != n || j.ncols() != n {
            return Err(SolverError::Config(format!(
                "J shape ({}, {}) does not match h size {}",
                j.nrows(),
                j.ncols(),
                n
            )));
        }
        for i in 0..n {
            if j[[i, i]] != T::zero() {
                return Err(SolverError::Config(format!(
                    "J must have a zero diagonal, entry ({0}, {0}) is {1}",
                    i,
                    j[[i, i]]
                )));
            }
            for l in (i + 1)..n {
                if j[[i, l]] != j[[l, i]] {
                    return Err(SolverError::Config(format!(
                        "J must be symmetric, differs at ({}, {})",
                        i, l
                    )));
                }
            }
        }
        self.release_buffers();
        self.n = n;
        self.objective = Objective::Minimize;
        self.ham = Some(DenseHamiltonian { h, j, c });
        self.state.set_problem();
        Ok(())
    }

    /// The stored Ising form; available whichever setter was used.
    pub fn hamiltonian(&self) -> Result<&DenseHamiltonian<T>> {
        self.state.require_problem("hamiltonian")?;
        self.ham.as_ref().ok_or_else(|| {
            SolverError::Sequencing("hamiltonian requires a problem to be set".to_string())
        })
    }

    /// Select the update rule for this run.
    pub fn select_update_rule(&mut self, rule: UpdateRule) -> Result<()> {
        if self.ham.is_none() {
            return Err(SolverError::Config(
                "update rule selected with no problem set".to_string(),
            ));
        }
        self.rule = Some(rule);
        Ok(())
    }

    /// Seed the random streams for reproducible runs.
    pub fn seed(&mut self, seed: u64) -> Result<()> {
        self.state.mark_seeded()?;
        self.seed = Some(seed);
        self.spin_rng = StdRng::seed_from_u64(seed);
        if let Some(random) = &mut self.random {
            random.reseed(seed);
        }
        Ok(())
    }

    /// Allocate the replica spin matrix, the pairwise-contribution work
    /// vector, and the random buffers, then randomize the spins.
    /// Calling again releases prior buffers and restarts.
    pub fn initialize(&mut self, replicas: usize) -> Result<()> {
        self.state.require_problem("initialize")?;
        let stream_device = {
            let stream = self.stream.as_ref().ok_or_else(|| {
                SolverError::Sequencing("initialize requires an assigned device".to_string())
            })?;
            stream.device().clone()
        };
        if replicas == 0 {
            return Err(SolverError::Config(
                "replica count must be at least 1".to_string(),
            ));
        }
        self.drain_inflight()?;
        self.release_buffers();

        self.m = replicas;
        self.d_spins = Some(stream_device.alloc::<i8>(self.m * self.n)?);
        self.d_field = Some(stream_device.alloc::<T>(self.n)?);
        self.random = Some(RandomBuffer::new(
            self.config.random.clone(),
            self.n as u32,
            self.m * self.n,
            self.seed,
        ));
        self.energies = Array1::zeros(0);
        self.solutions.clear();
        self.spin_rows.clear();
        self.state.initialize()?;
        self.randomize_spins()
    }

    /// Re-draw every replica spin uniformly at random.
    pub fn randomize_spins(&mut self) -> Result<()> {
        self.state.require_initialized("randomize_spins")?;
        self.drain_inflight()?;
        let rng = &mut self.spin_rng;
        let fresh: Vec<i8> = (0..self.m * self.n)
            .map(|_| if rng.gen::<bool>() { 1 } else { -1 })
            .collect();
        self.upload_spins(&fresh)?;
        self.state.invalidate_solution();
        Ok(())
    }

    /// Broadcast one explicit bit assignment to every replica.
    pub fn set_spins(&mut self, bits: &[u8]) -> Result<()> {
        self.state.require_initialized("set_spins")?;
        if bits.len() != self.n {
            return Err(SolverError::Config(format!(
                "spin assignment length {} does not match N={}",
                bits.len(),
                self.n
            )));
        }
        self.drain_inflight()?;
        let row: Vec<i8> = bits.iter().map(|&b| if b != 0 { 1 } else { -1 }).collect();
        let full: Vec<i8> = (0..self.m).flat_map(|_| row.iter().copied()).collect();
        self.upload_spins(&full)?;
        self.state.mark_spins_set()
    }

    /// Set each replica row explicitly.
    pub fn set_spins_per_replica(&mut self, rows: &[Vec<u8>]) -> Result<()> {
        self.state.require_initialized("set_spins_per_replica")?;
        if rows.len() != self.m {
            return Err(SolverError::Config(format!(
                "{} spin rows supplied for {} replicas",
                rows.len(),
                self.m
            )));
        }
        for row in rows {
            if row.len() != self.n {
                return Err(SolverError::Config(format!(
                    "spin row length {} does not match N={}",
                    row.len(),
                    self.n
                )));
            }
        }
        self.drain_inflight()?;
        let full: Vec<i8> = rows
            .iter()
            .flat_map(|row| row.iter().map(|&b| if b != 0 { 1i8 } else { -1 }))
            .collect();
        self.upload_spins(&full)?;
        self.state.mark_spins_set()
    }

    /// Enqueue one sweep of stochastic updates across all replicas.
    pub fn step(&mut self, params: StepParams<T>) -> Result<()> {
        self.state.require_initialized("step")?;
        let rule = self.rule.ok_or_else(|| {
            SolverError::Sequencing("step requires a selected update rule".to_string())
        })?;
        let sweep_rule = match (rule, params) {
            (UpdateRule::SimulatedAnnealing, StepParams::Thermal { temperature }) => {
                SweepRule::Thermal { temperature }
            }
            (UpdateRule::SimulatedQuantumAnnealing, StepParams::Quantum { gamma, beta }) => {
                if self.m < 2 {
                    return Err(SolverError::Config(
                        "simulated quantum annealing requires at least 2 replicas".to_string(),
                    ));
                }
                let m_t = from_count::<T>(self.m);
                let coef = (gamma * beta / m_t).tanh().ln() / beta;
                SweepRule::Quantum {
                    coef,
                    beta,
                    inv_m: T::one() / m_t,
                }
            }
            _ => {
                return Err(SolverError::Sequencing(
                    "step parameters do not match the selected update rule".to_string(),
                ))
            }
        };

        let ham = self.ham.as_ref().ok_or_else(|| {
            SolverError::Sequencing("step requires a problem to be set".to_string())
        })?;
        let random = self.random.as_mut().ok_or_else(|| {
            SolverError::Sequencing("step requires the engine to be initialized".to_string())
        })?;
        let (sites, accepts) = random.draw_run();

        let spins = self
            .d_spins
            .as_ref()
            .ok_or_else(|| SolverError::Device("spin buffer released".to_string()))?
            .shared();
        let field = self
            .d_field
            .as_ref()
            .ok_or_else(|| SolverError::Device("field buffer released".to_string()))?
            .shared();
        let stream = self.stream.as_ref().ok_or_else(|| {
            SolverError::Sequencing("step requires an assigned device".to_string())
        })?;

        let (h, j) = (ham.h.clone(), ham.j.clone());
        let (m, n) = (self.m, self.n);
        let pending = stream
            .launch(move || sweep_kernel(h, j, spins, field, m, n, sites, accepts, sweep_rule));
        self.inflight.push(pending);
        self.state.invalidate_solution();
        Ok(())
    }

    /// Synchronize and compute the current per-replica energies,
    /// reported in the caller's sign convention.
    pub fn calculate_energy(&mut self) -> Result<Array1<T>> {
        self.state.require_initialized("calculate_energy")?;
        self.synchronize()?;
        let qs = self.download_spin_matrix()?;
        let ham = self.ham.as_ref().ok_or_else(|| {
            SolverError::Sequencing("calculate_energy requires a problem to be set".to_string())
        })?;
        let sign = self.objective.report_sign::<T>();
        let energies = dense::batch_spin_energy(ham, &qs).mapv(|e| e * sign);
        self.energies = energies.clone();
        Ok(energies)
    }

    /// Synchronize, compute energies, and publish per-replica bit
    /// assignments.
    pub fn make_solution(&mut self) -> Result<()> {
        self.state.require_initialized("make_solution")?;
        let energies = self.calculate_energy()?;
        let qs = self.download_spin_matrix()?;
        self.spin_rows = (0..self.m).map(|k| qs.row(k).to_vec()).collect();
        self.solutions = self
            .spin_rows
            .iter()
            .map(|row| row.iter().map(|&q| if q > 0 { 1u8 } else { 0 }).collect())
            .collect();
        self.energies = energies;
        self.state.solution_ready()
    }

    /// Total replica-coupled system energy under the SQA Hamiltonian,
    /// including the transverse coupling term.
    pub fn system_energy(&mut self, gamma: T, beta: T) -> Result<T> {
        self.state.require_initialized("system_energy")?;
        self.synchronize()?;
        let qs = self.download_spin_matrix()?;
        let ham = self.ham.as_ref().ok_or_else(|| {
            SolverError::Sequencing("system_energy requires a problem to be set".to_string())
        })?;
        let m_t = from_count::<T>(self.m);
        let coef = (gamma * beta / m_t).tanh().ln() / beta;

        let classical = dense::batch_spin_energy(ham, &qs).sum() / m_t;
        let mut coupling = T::zero();
        for k in 0..self.m {
            let next = (k + 1) % self.m;
            for i in 0..self.n {
                coupling = coupling + spin_val::<T>(qs[[k, i]]) * spin_val::<T>(qs[[next, i]]);
            }
        }
        Ok(self.objective.report_sign::<T>() * (classical - coef * coupling))
    }

    /// Per-replica energies; valid after `make_solution`.
    pub fn get_e(&self) -> Result<&Array1<T>> {
        self.state.require_solution("get_e")?;
        Ok(&self.energies)
    }

    /// Per-replica bit assignments; valid after `make_solution`.
    pub fn get_x(&self) -> Result<&[Vec<u8>]> {
        self.state.require_solution("get_x")?;
        Ok(&self.solutions)
    }

    /// Per-replica spin rows; valid after `make_solution`.
    pub fn get_q(&self) -> Result<&[Vec<i8>]> {
        self.state.require_solution("get_q")?;
        Ok(&self.spin_rows)
    }

    /// Release device buffers and published results; problem, rule, and
    /// device assignment are retained.
    pub fn deallocate(&mut self) {
        let _ = self.drain_inflight();
        self.release_buffers();
        self.random = None;
        self.energies = Array1::zeros(0);
        self.solutions.clear();
        self.spin_rows.clear();
        self.state.deallocate();
    }

    pub fn preferences(&self) -> AnnealerPreferences {
        AnnealerPreferences {
            algorithm: self.rule.map(UpdateRule::name).unwrap_or("unselected"),
            precision: T::precision_name(),
            n: self.n,
            replicas: self.m,
            seeded: self.seed.is_some(),
            device_assigned: self.stream.is_some(),
        }
    }

    fn synchronize(&mut self) -> Result<()> {
        self.drain_inflight()?;
        if let Some(stream) = &self.stream {
            stream.synchronize()?;
        }
        Ok(())
    }

    fn drain_inflight(&mut self) -> Result<()> {
        for pending in self.inflight.drain(..) {
            pending.wait()??;
        }
        Ok(())
    }

    fn upload_spins(&self, spins: &[i8]) -> Result<()> {
        let buffer = self
            .d_spins
            .as_ref()
            .ok_or_else(|| SolverError::Device("spin buffer released".to_string()))?;
        buffer.upload(spins)
    }

    fn download_spin_matrix(&self) -> Result<Array2<i8>> {
        let buffer = self
            .d_spins
            .as_ref()
            .ok_or_else(|| SolverError::Device("spin buffer released".to_string()))?;
        let mut flat = Vec::new();
        buffer.download(&mut flat)?;
        Array2::from_shape_vec((self.m, self.n), flat)
            .map_err(|e| SolverError::Device(format!("spin matrix reshape failed: {}", e)))
    }

    fn release_buffers(&mut self) {
        self.d_spins = None;
        self.d_field = None;
    }
}

impl<T: Real> Default for DenseAnnealer<T> {
    fn default() -> Self {
        Self::new()
    }
}

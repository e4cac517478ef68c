//! SpinForge: accelerator-backed solver engines for quadratic binary
//! optimization (QUBO / Ising energy minimization).
//!
//! Two engines share a common problem representation, lifecycle state
//! machine, and numeric primitives:
//!
//! - [`BipartiteBruteForceSearcher`] / [`DenseBruteForceSearcher`]:
//!   tiled exhaustive search that enumerates the full state space and
//!   collects every globally minimal assignment, supporting external
//!   partitioning of the space across calls.
//! - [`DenseAnnealer`]: stochastic annealing (simulated annealing and
//!   simulated quantum annealing over replica slices) driven by a
//!   batch-refilled random stream, operating on the Ising form derived
//!   from the quadratic problem.
//!
//! Typical flow: open a [`Device`], assign it to an engine (once),
//! set a problem, initialize, drive the search or annealing schedule,
//! then finalize and read results.

pub mod annealer;
pub mod bits;
pub mod brute_force;
pub mod config_io;
pub mod device;
pub mod errors;
pub mod formulas;
pub mod problem;
pub mod random_stream;
pub mod real;
pub mod state;

#[cfg(feature = "cuda")]
pub mod gpu_formulas;

pub use annealer::{AnnealerConfig, AnnealerPreferences, DenseAnnealer, StepParams, UpdateRule};
pub use bits::{pack_bits, unpack_bits, unpack_spins, MAX_PACKED_BITS};
pub use brute_force::{
    BipartiteBruteForceSearcher, DenseBruteForceSearcher, PackedPair, SearchConfig,
    SearcherPreferences,
};
pub use config_io::{load_config, save_config, EngineConfig};
pub use device::{Device, DeviceBuffer, DeviceConfig, DeviceInfo, DeviceStream};
pub use errors::{Result, SolverError};
pub use formulas::{BipartiteHamiltonian, DenseHamiltonian};
pub use problem::{BipartiteProblem, DenseProblem, Objective};
pub use random_stream::{RandomBuffer, RandomBufferConfig};
pub use real::Real;
pub use state::SolverState;

#[cfg(feature = "cuda")]
pub use gpu_formulas::GpuFormulas;

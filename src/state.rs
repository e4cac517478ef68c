//! Lifecycle state machine shared by both solver engines.
//!
//! One explicit state value with a closed set of legal transitions,
//! checked centrally. Engines call the `require_*` guards at the top of
//! every public operation and fail fast with a sequencing error before
//! touching any state.
//!
//! ```text
//! Uninitialized → ProblemSet → Initialized → SolutionAvailable
//!                                  ↑   (seeded / spins-set markers)
//!                                  └── re-initialize from any later state
//! ```

use crate::errors::{Result, SolverError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Uninitialized,
    ProblemSet {
        seeded: bool,
    },
    Initialized {
        seeded: bool,
        spins_set: bool,
    },
    SolutionAvailable {
        seeded: bool,
        spins_set: bool,
    },
}

impl SolverState {
    pub fn new() -> Self {
        SolverState::Uninitialized
    }

    fn seeded(self) -> bool {
        match self {
            SolverState::Uninitialized => false,
            SolverState::ProblemSet { seeded } => seeded,
            SolverState::Initialized { seeded, .. } => seeded,
            SolverState::SolutionAvailable { seeded, .. } => seeded,
        }
    }

    /// A new problem can be set from any state; prior device buffers
    /// must be released by the engine before calling this.
    pub fn set_problem(&mut self) {
        *self = SolverState::ProblemSet {
            seeded: self.seeded(),
        };
    }

    /// Enter Initialized. From Initialized or SolutionAvailable this is
    /// a restart: the engine releases buffers first and spin markers
    /// reset.
    pub fn initialize(&mut self) -> Result<()> {
        match *self {
            SolverState::Uninitialized => Err(SolverError::Sequencing(
                "initialize called before a problem was set".to_string(),
            )),
            _ => {
                *self = SolverState::Initialized {
                    seeded: self.seeded(),
                    spins_set: false,
                };
                Ok(())
            }
        }
    }

    /// Record that a random seed was supplied.
    pub fn mark_seeded(&mut self) -> Result<()> {
        match *self {
            SolverState::Uninitialized => Err(SolverError::Sequencing(
                "seed supplied before a problem was set".to_string(),
            )),
            SolverState::ProblemSet { .. } => {
                *self = SolverState::ProblemSet { seeded: true };
                Ok(())
            }
            SolverState::Initialized { spins_set, .. } => {
                *self = SolverState::Initialized {
                    seeded: true,
                    spins_set,
                };
                Ok(())
            }
            SolverState::SolutionAvailable { spins_set, .. } => {
                *self = SolverState::SolutionAvailable {
                    seeded: true,
                    spins_set,
                };
                Ok(())
            }
        }
    }

    /// Record an explicit spin assignment. Demotes a stale solution
    /// back to Initialized.
    pub fn mark_spins_set(&mut self) -> Result<()> {
        match *self {
            SolverState::Initialized { seeded, .. }
            | SolverState::SolutionAvailable { seeded, .. } => {
                *self = SolverState::Initialized {
                    seeded,
                    spins_set: true,
                };
                Ok(())
            }
            _ => Err(SolverError::Sequencing(
                "spins set before the engine was initialized".to_string(),
            )),
        }
    }

    /// Invalidate a published solution after further stepping.
    pub fn invalidate_solution(&mut self) {
        if let SolverState::SolutionAvailable { seeded, spins_set } = *self {
            *self = SolverState::Initialized { seeded, spins_set };
        }
    }

    /// Publish results.
    pub fn solution_ready(&mut self) -> Result<()> {
        match *self {
            SolverState::Initialized { seeded, spins_set }
            | SolverState::SolutionAvailable { seeded, spins_set } => {
                *self = SolverState::SolutionAvailable { seeded, spins_set };
                Ok(())
            }
            _ => Err(SolverError::Sequencing(
                "solution finalized before the engine was initialized".to_string(),
            )),
        }
    }

    /// Release device resources; the problem itself is retained.
    pub fn deallocate(&mut self) {
        match *self {
            SolverState::Uninitialized => {}
            _ => {
                *self = SolverState::ProblemSet {
                    seeded: self.seeded(),
                }
            }
        }
    }

    pub fn is_initialized(self) -> bool {
        matches!(
            self,
            SolverState::Initialized { .. } | SolverState::SolutionAvailable { .. }
        )
    }

    pub fn spins_set(self) -> bool {
        match self {
            SolverState::Initialized { spins_set, .. } => spins_set,
            SolverState::SolutionAvailable { spins_set, .. } => spins_set,
            _ => false,
        }
    }

    pub fn require_problem(&self, op: &str) -> Result<()> {
        if matches!(self, SolverState::Uninitialized) {
            return Err(SolverError::Sequencing(format!(
                "{} requires a problem to be set",
                op
            )));
        }
        Ok(())
    }

    pub fn require_initialized(&self, op: &str) -> Result<()> {
        if !self.is_initialized() {
            return Err(SolverError::Sequencing(format!(
                "{} requires the engine to be initialized",
                op
            )));
        }
        Ok(())
    }

    pub fn require_solution(&self, op: &str) -> Result<()> {
        if !matches!(self, SolverState::SolutionAvailable { .. }) {
            return Err(SolverError::Sequencing(format!(
                "{} requires a finalized solution",
                op
            )));
        }
        Ok(())
    }
}

impl Default for SolverState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = SolverState::new();
        assert!(state.initialize().is_err());

        state.set_problem();
        state.initialize().expect("initialize after problem");
        state.mark_seeded().expect("seed after initialize");
        state.mark_spins_set().expect("spins after initialize");
        state.solution_ready().expect("solution after initialize");
        state.require_solution("get_x").expect("solution available");
    }

    #[test]
    fn test_out_of_order_operations_fail() {
        let mut state = SolverState::new();
        assert!(state.mark_seeded().is_err());
        assert!(state.mark_spins_set().is_err());
        assert!(state.solution_ready().is_err());
        assert!(state.require_initialized("step").is_err());
    }

    #[test]
    fn test_reinitialize_resets_markers() {
        let mut state = SolverState::new();
        state.set_problem();
        state.initialize().expect("first init");
        state.mark_seeded().expect("seed");
        state.mark_spins_set().expect("spins");
        state.initialize().expect("re-init");
        assert!(state.seeded(), "seed survives re-initialization");
        assert!(!state.spins_set(), "spin marker resets");
    }

    #[test]
    fn test_stepping_invalidates_solution() {
        let mut state = SolverState::new();
        state.set_problem();
        state.initialize().expect("init");
        state.solution_ready().expect("solution");
        state.invalidate_solution();
        assert!(state.require_solution("get_x").is_err());
        assert!(state.is_initialized());
    }

    #[test]
    fn test_deallocate_returns_to_problem_set() {
        let mut state = SolverState::new();
        state.set_problem();
        state.initialize().expect("init");
        state.deallocate();
        assert!(!state.is_initialized());
        state.initialize().expect("init again without re-setting problem");
    }
}

//! Canonical problem representations for quadratic binary optimization.
//!
//! Two graph shapes are supported: bipartite (two variable groups with
//! cross-group weights only) and dense (one group, symmetric weights).
//! Both are normalized to a minimization problem at construction time:
//! a maximize objective negates every bias and weight once, and engines
//! negate reported energies back when publishing results.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::bits::MAX_PACKED_BITS;
use crate::errors::{Result, SolverError};
use crate::real::Real;

/// Optimization direction requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    Minimize,
    Maximize,
}

impl Objective {
    /// Sign applied to energies when reporting results back to the
    /// caller (`-1` for maximize problems, which are solved negated).
    pub fn report_sign<T: Real>(self) -> T {
        match self {
            Objective::Minimize => T::one(),
            Objective::Maximize => -T::one(),
        }
    }
}

fn check_group_size(label: &str, n: usize) -> Result<()> {
    if n == 0 {
        return Err(SolverError::Config(format!("{} must not be empty", label)));
    }
    if n > MAX_PACKED_BITS {
        return Err(SolverError::Config(format!(
            "{} must be {} or smaller, got {}",
            label, MAX_PACKED_BITS, n
        )));
    }
    Ok(())
}

/// Bipartite quadratic binary problem: `E(x, y) = b0·x + b1·y + xᵀ W y`
/// with `x ∈ {0,1}^N0`, `y ∈ {0,1}^N1` and `W` of shape (N0, N1).
///
/// Stored pre-negated for maximize objectives; `objective` remembers the
/// caller's request so results can be reported in original terms.
#[derive(Debug, Clone)]
pub struct BipartiteProblem<T: Real> {
    pub b0: Array1<T>,
    pub b1: Array1<T>,
    pub w: Array2<T>,
    pub objective: Objective,
}

impl<T: Real> BipartiteProblem<T> {
    pub fn new(
        b0: Array1<T>,
        b1: Array1<T>,
        w: Array2<T>,
        objective: Objective,
    ) -> Result<Self> {
        check_group_size("N0", b0.len())?;
        check_group_size("N1", b1.len())?;
        if w.nrows() != b0.len() || w.ncols() != b1.len() {
            return Err(SolverError::Config(format!(
                "weight matrix shape ({}, {}) does not match bias sizes ({}, {})",
                w.nrows(),
                w.ncols(),
                b0.len(),
                b1.len()
            )));
        }
        let mut problem = Self { b0, b1, w, objective };
        if objective == Objective::Maximize {
            problem.b0.mapv_inplace(|v| -v);
            problem.b1.mapv_inplace(|v| -v);
            problem.w.mapv_inplace(|v| -v);
        }
        Ok(problem)
    }

    pub fn n0(&self) -> usize {
        self.b0.len()
    }

    pub fn n1(&self) -> usize {
        self.b1.len()
    }

    /// Exact dense embedding of this problem: variables 0..N0 keep
    /// their index, variables N0..N0+N1 follow. Cross-group weights are
    /// halved so the dense form's double-counted quadratic sum
    /// reproduces the bipartite energy exactly.
    pub fn to_dense(&self) -> DenseProblem<T> {
        let n0 = self.n0();
        let n1 = self.n1();
        let n = n0 + n1;
        let half = T::one() / (T::one() + T::one());

        let mut b = Array1::zeros(n);
        for i in 0..n0 {
            b[i] = self.b0[i];
        }
        for j in 0..n1 {
            b[n0 + j] = self.b1[j];
        }

        let mut w = Array2::zeros((n, n));
        for i in 0..n0 {
            for j in 0..n1 {
                let v = self.w[[i, j]] * half;
                w[[i, n0 + j]] = v;
                w[[n0 + j, i]] = v;
            }
        }

        DenseProblem {
            b,
            w,
            objective: self.objective,
        }
    }
}

/// Dense quadratic binary problem: `E(x) = b·x + xᵀ W x` with a
/// symmetric weight matrix (diagonal entries act as additional linear
/// terms since `x_i² = x_i`).
#[derive(Debug, Clone)]
pub struct DenseProblem<T: Real> {
    pub b: Array1<T>,
    pub w: Array2<T>,
    pub objective: Objective,
}

impl<T: Real> DenseProblem<T> {
    pub fn new(b: Array1<T>, w: Array2<T>, objective: Objective) -> Result<Self> {
        check_group_size("N", b.len())?;
        if w.nrows() != b.len() || w.ncols() != b.len() {
            return Err(SolverError::Config(format!(
                "weight matrix shape ({}, {}) does not match bias size {}",
                w.nrows(),
                w.ncols(),
                b.len()
            )));
        }
        for i in 0..w.nrows() {
            for j in (i + 1)..w.ncols() {
                if w[[i, j]] != w[[j, i]] {
                    return Err(SolverError::Config(format!(
                        "weight matrix must be symmetric, differs at ({}, {})",
                        i, j
                    )));
                }
            }
        }
        let mut problem = Self { b, w, objective };
        if objective == Objective::Maximize {
            problem.b.mapv_inplace(|v| -v);
            problem.w.mapv_inplace(|v| -v);
        }
        Ok(problem)
    }

    pub fn n(&self) -> usize {
        self.b.len()
    }
}

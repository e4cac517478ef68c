//! Energy formulas and QUBO → Ising transforms.
//!
//! Pure numeric kernels shared by both engines and by the reference
//! comparisons in the test suite. Every operation exists in a single
//! and a batched form; batched forms are data-parallel over rows.
//!
//! Spin convention: `q = 2x - 1`. The Hamiltonian transform is exact,
//! so for matching encodings the spin energy equals the QUBO energy up
//! to floating rounding. Per-assignment evaluation uses a fixed
//! reduction order, which keeps results identical no matter how a batch
//! is tiled or partitioned.

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::real::Real;

/// Ising form of a dense problem: `E(q) = c + h·q + qᵀ J q` with `J`
/// symmetric and zero-diagonal (the quadratic sum counts both
/// triangles).
#[derive(Debug, Clone)]
pub struct DenseHamiltonian<T: Real> {
    pub h: Array1<T>,
    pub j: Array2<T>,
    pub c: T,
}

/// Ising form of a bipartite problem:
/// `E(s, t) = c + h0·s + h1·t + sᵀ J t`.
#[derive(Debug, Clone)]
pub struct BipartiteHamiltonian<T: Real> {
    pub h0: Array1<T>,
    pub h1: Array1<T>,
    pub j: Array2<T>,
    pub c: T,
}

fn bits_to_real<T: Real>(bits: &[u8]) -> Array1<T> {
    Array1::from_iter(bits.iter().map(|&b| if b != 0 { T::one() } else { T::zero() }))
}

fn spins_to_real<T: Real>(spins: &[i8]) -> Array1<T> {
    Array1::from_iter(spins.iter().map(|&q| if q > 0 { T::one() } else { -T::one() }))
}

pub mod dense {
    use super::*;

    /// QUBO energy of a single assignment: `b·x + xᵀ W x`.
    pub fn energy<T: Real>(w: &Array2<T>, b: &Array1<T>, x: &[u8]) -> T {
        let xf = bits_to_real::<T>(x);
        b.dot(&xf) + xf.dot(&w.dot(&xf))
    }

    /// QUBO energies of a batch of assignments (one row per assignment).
    pub fn batch_energy<T: Real>(w: &Array2<T>, b: &Array1<T>, xs: &Array2<u8>) -> Array1<T> {
        let rows: Vec<T> = (0..xs.nrows())
            .into_par_iter()
            .map(|i| energy(w, b, &xs.row(i).to_vec()))
            .collect();
        Array1::from_vec(rows)
    }

    /// Exact transform of `b·x + xᵀ W x` over `{0,1}` variables into the
    /// equivalent Ising form over `{-1,+1}` spins.
    pub fn hamiltonian<T: Real>(w: &Array2<T>, b: &Array1<T>) -> DenseHamiltonian<T> {
        let n = b.len();
        let two = T::one() + T::one();
        let four = two + two;

        let mut h = Array1::zeros(n);
        for i in 0..n {
            let row_sum = w.row(i).sum();
            let col_sum = w.column(i).sum();
            h[i] = (row_sum + col_sum) / four + b[i] / two;
        }

        let mut j = w.mapv(|v| v / four);
        let mut trace = T::zero();
        for i in 0..n {
            trace = trace + w[[i, i]];
            j[[i, i]] = T::zero();
        }

        let c = (w.sum() + trace) / four + b.sum() / two;
        DenseHamiltonian { h, j, c }
    }

    /// Ising energy of a single spin assignment.
    pub fn spin_energy<T: Real>(ham: &DenseHamiltonian<T>, q: &[i8]) -> T {
        let qf = spins_to_real::<T>(q);
        ham.c + ham.h.dot(&qf) + qf.dot(&ham.j.dot(&qf))
    }

    /// Ising energies of a batch of spin assignments (one row each).
    pub fn batch_spin_energy<T: Real>(ham: &DenseHamiltonian<T>, qs: &Array2<i8>) -> Array1<T> {
        let rows: Vec<T> = (0..qs.nrows())
            .into_par_iter()
            .map(|i| spin_energy(ham, &qs.row(i).to_vec()))
            .collect();
        Array1::from_vec(rows)
    }
}

pub mod bipartite {
    use super::*;

    /// QUBO energy of a single assignment pair:
    /// `b0·x0 + b1·x1 + x0ᵀ W x1`.
    pub fn energy<T: Real>(
        b0: &Array1<T>,
        b1: &Array1<T>,
        w: &Array2<T>,
        x0: &[u8],
        x1: &[u8],
    ) -> T {
        let xf0 = bits_to_real::<T>(x0);
        let xf1 = bits_to_real::<T>(x1);
        b0.dot(&xf0) + b1.dot(&xf1) + xf0.dot(&w.dot(&xf1))
    }

    /// QUBO energies of row-paired assignment batches.
    pub fn batch_energy<T: Real>(
        b0: &Array1<T>,
        b1: &Array1<T>,
        w: &Array2<T>,
        xs0: &Array2<u8>,
        xs1: &Array2<u8>,
    ) -> Array1<T> {
        assert_eq!(xs0.nrows(), xs1.nrows(), "batch sizes must match");
        let rows: Vec<T> = (0..xs0.nrows())
            .into_par_iter()
            .map(|i| energy(b0, b1, w, &xs0.row(i).to_vec(), &xs1.row(i).to_vec()))
            .collect();
        Array1::from_vec(rows)
    }

    /// QUBO energies for the full cross product of two assignment
    /// batches; entry (j, i) is the energy of (`xs0` row i, `xs1` row j).
    pub fn batch_energy_2d<T: Real>(
        b0: &Array1<T>,
        b1: &Array1<T>,
        w: &Array2<T>,
        xs0: &Array2<u8>,
        xs1: &Array2<u8>,
    ) -> Array2<T> {
        let rows: Vec<Vec<T>> = (0..xs1.nrows())
            .into_par_iter()
            .map(|j| {
                let x1 = xs1.row(j).to_vec();
                (0..xs0.nrows())
                    .map(|i| energy(b0, b1, w, &xs0.row(i).to_vec(), &x1))
                    .collect()
            })
            .collect();
        let mut out = Array2::zeros((xs1.nrows(), xs0.nrows()));
        for (j, row) in rows.into_iter().enumerate() {
            for (i, e) in row.into_iter().enumerate() {
                out[[j, i]] = e;
            }
        }
        out
    }

    /// Exact bipartite QUBO → Ising transform.
    pub fn hamiltonian<T: Real>(
        b0: &Array1<T>,
        b1: &Array1<T>,
        w: &Array2<T>,
    ) -> BipartiteHamiltonian<T> {
        let two = T::one() + T::one();
        let four = two + two;

        let mut h0 = Array1::zeros(b0.len());
        for i in 0..b0.len() {
            h0[i] = w.row(i).sum() / four + b0[i] / two;
        }
        let mut h1 = Array1::zeros(b1.len());
        for j in 0..b1.len() {
            h1[j] = w.column(j).sum() / four + b1[j] / two;
        }

        let j = w.mapv(|v| v / four);
        let c = w.sum() / four + (b0.sum() + b1.sum()) / two;
        BipartiteHamiltonian { h0, h1, j, c }
    }

    /// Ising energy of a single spin assignment pair.
    pub fn spin_energy<T: Real>(ham: &BipartiteHamiltonian<T>, q0: &[i8], q1: &[i8]) -> T {
        let qf0 = spins_to_real::<T>(q0);
        let qf1 = spins_to_real::<T>(q1);
        ham.c + ham.h0.dot(&qf0) + ham.h1.dot(&qf1) + qf0.dot(&ham.j.dot(&qf1))
    }

    /// Ising energies of row-paired spin batches.
    pub fn batch_spin_energy<T: Real>(
        ham: &BipartiteHamiltonian<T>,
        qs0: &Array2<i8>,
        qs1: &Array2<i8>,
    ) -> Array1<T> {
        assert_eq!(qs0.nrows(), qs1.nrows(), "batch sizes must match");
        let rows: Vec<T> = (0..qs0.nrows())
            .into_par_iter()
            .map(|i| spin_energy(ham, &qs0.row(i).to_vec(), &qs1.row(i).to_vec()))
            .collect();
        Array1::from_vec(rows)
    }
}

/// Spin encoding of a bit assignment (`q = 2x - 1`).
pub fn bits_to_spins(bits: &[u8]) -> Vec<i8> {
    bits.iter().map(|&b| if b != 0 { 1 } else { -1 }).collect()
}

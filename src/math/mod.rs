//! Sparse and dense linear algebra for stiffness matrices
//!
//! The sparse side has three storage schemes sharing one pipeline:
//! assembly in [`CooMatrix`], pattern freezing into [`CrsMatrix`] or
//! [`LlsMatrix`], in-place factorization, then substitution or CG/PCG.

pub mod constraints;
pub mod coo;
pub mod crs;
pub mod lls;
pub mod sparse;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

pub use constraints::Constraints;
pub use coo::CooMatrix;
pub use crs::CrsMatrix;
pub use lls::{LlsMatrix, NodeId};
pub use sparse::{
    solve_cg, solve_pcg, IdentityPreconditioner, LinearOperator, Preconditioner,
};

pub type Mat = DMatrix<f64>;

/// Dense square matrix stored as a list of rows
pub type Dense = Vec<Vec<f64>>;

/// Which decomposition currently occupies a matrix's storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Factorization {
    /// `A = L·D·Lᵀ`, unit `L`, `D` on the diagonal
    Ldlt,
    /// LDLᵀ restricted to the original sparsity pattern
    IncompleteLdlt,
    /// `A = L·Lᵀ`
    Cholesky,
}

/// Inner product over the first `n` entries
///
/// Panics if either slice is shorter than `n`.
#[inline]
pub fn dot(x: &[f64], y: &[f64], n: usize) -> f64 {
    x[..n].iter().zip(&y[..n]).map(|(a, b)| a * b).sum()
}

/// Dense matrix-vector product `M·v`
pub fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v, row.len())).collect()
}

/// Dense matrix-matrix product `A·B`
pub fn mat_mat(a: &[Vec<f64>], b: &[Vec<f64>]) -> Dense {
    let cols = b.first().map_or(0, |row| row.len());
    a.iter()
        .map(|row| {
            (0..cols)
                .map(|j| row.iter().zip(b).map(|(aik, bk)| aik * bk[j]).sum())
                .collect()
        })
        .collect()
}

/// Dense transpose
pub fn transpose(m: &[Vec<f64>]) -> Dense {
    let cols = m.first().map_or(0, |row| row.len());
    (0..cols)
        .map(|j| m.iter().map(|row| row[j]).collect())
        .collect()
}

/// Euclidean norm of a residual relative to a reference, squared
#[inline]
pub(crate) fn relative_residual_sq(r: &[f64], b_norm_sq: f64) -> f64 {
    dot(r, r, r.len()) / b_norm_sq
}

/// Convert a row-of-rows matrix into an nalgebra matrix
pub fn dense_to_mat(m: &[Vec<f64>]) -> Mat {
    let rows = m.len();
    let cols = m.first().map_or(0, |row| row.len());
    Mat::from_fn(rows, cols, |i, j| m[i][j])
}

//! Solution records returned by the solvers

use serde::{Deserialize, Serialize};

use crate::solver::SolverKind;

/// Outcome of a CG or PCG run on a reduced system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterativeSolution {
    /// Solution vector
    pub x: Vec<f64>,
    /// Iterations performed (0 when `b` is the zero vector)
    pub iterations: usize,
    /// Final `‖r‖² / ‖b‖²`
    pub relative_residual: f64,
}

/// Full-length solution of a constrained system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSolution {
    /// Solution with fixed DOFs set to zero
    pub x: Vec<f64>,
    /// Solver used
    pub kind: SolverKind,
    /// Iterations for CG/PCG, 0 for direct solves
    pub iterations: usize,
    /// Number of free DOFs actually solved for
    pub free_dofs: usize,
}

impl SystemSolution {
    /// Largest absolute displacement and its DOF
    pub fn max_abs(&self) -> Option<(usize, f64)> {
        self.x
            .iter()
            .map(|v| v.abs())
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

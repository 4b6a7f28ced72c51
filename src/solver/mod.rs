//! Solver selection, options, and the constrained-system facade

use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{MatrixError, MatrixResult};
use crate::math::{dot, Constraints, CooMatrix};
use crate::results::SystemSolution;

/// Which solver path to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    /// LDLᵀ on the compressed-row form, then substitution
    DirectCrs,
    /// LDLᵀ with fill-in on the linked-list form, then substitution
    DirectLls,
    /// Unpreconditioned conjugate gradient on the compressed-row form
    ConjugateGradient,
    /// CG preconditioned by incomplete LDLᵀ on the linked-list form
    PreconditionedCg,
}

impl Default for SolverKind {
    fn default() -> Self {
        Self::PreconditionedCg
    }
}

/// Options for a solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Solver path
    pub kind: SolverKind,
    /// Convergence threshold on `‖r‖² / ‖b‖²`
    pub tolerance: f64,
    /// Iteration cap for CG/PCG (None = `10·N + 10`)
    pub max_iterations: Option<usize>,
    /// Log every iteration at info level
    pub log: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            kind: SolverKind::PreconditionedCg,
            tolerance: 1e-16,
            max_iterations: None,
            log: false,
        }
    }
}

impl SolverOptions {
    /// Options for a direct LDLᵀ solve on the linked-list form
    pub fn direct() -> Self {
        Self {
            kind: SolverKind::DirectLls,
            ..Self::default()
        }
    }

    /// Options for plain conjugate gradient
    pub fn cg(tolerance: f64) -> Self {
        Self {
            kind: SolverKind::ConjugateGradient,
            tolerance,
            ..Self::default()
        }
    }

    /// Options for incomplete-LDLᵀ preconditioned CG
    pub fn pcg() -> Self {
        Self::default()
    }

    /// Load options from a JSON document; missing fields take defaults
    pub fn from_json(json: &str) -> MatrixResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> MatrixResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn validate(&self) -> MatrixResult<()> {
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(MatrixError::InvalidInput(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(MatrixError::InvalidInput(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Select the solver path
    pub fn with_kind(mut self, kind: SolverKind) -> Self {
        self.kind = kind;
        self
    }

    /// Enable logging
    pub fn with_logging(mut self) -> Self {
        self.log = true;
        self
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iterations = Some(max_iter);
        self
    }

    /// Set convergence tolerance
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// Effective iteration cap for a system of dimension `n`
    pub fn iteration_cap(&self, n: usize) -> usize {
        self.max_iterations.unwrap_or(10 * n + 10)
    }
}

/// An assembled stiffness matrix together with its fixed DOFs
#[derive(Debug, Clone)]
pub struct LinearSystem {
    matrix: CooMatrix,
    constraints: Constraints,
}

impl LinearSystem {
    pub fn new(matrix: CooMatrix, constraints: Constraints) -> MatrixResult<Self> {
        constraints.ensure_dim(matrix.size())?;
        Ok(Self {
            matrix,
            constraints,
        })
    }

    /// Assemble from `(row, col, value)` triplets and a `conf` vector
    pub fn from_triplets(
        size: usize,
        fixed: Vec<bool>,
        triplets: &[(usize, usize, f64)],
    ) -> MatrixResult<Self> {
        Self::new(
            CooMatrix::from_triplets(size, triplets),
            Constraints::new(fixed),
        )
    }

    pub fn matrix(&self) -> &CooMatrix {
        &self.matrix
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Solve `K·x = rhs` over the free DOFs
    ///
    /// `rhs` has full length; entries at fixed DOFs are ignored and the
    /// returned `x` is zero there.
    pub fn solve(&self, rhs: &[f64], options: &SolverOptions) -> MatrixResult<SystemSolution> {
        let b = self.constraints.reduce(rhs)?;
        if b.is_empty() {
            return Err(MatrixError::InvalidInput(
                "No free degrees of freedom".to_string(),
            ));
        }

        let free_dofs = b.len();
        debug!(
            "Solving {} of {} DOFs with {:?}",
            free_dofs,
            self.constraints.len(),
            options.kind
        );

        let (x, iterations) = match options.kind {
            SolverKind::DirectCrs => {
                let factor = self.matrix.to_crs(&self.constraints)?.factorized()?;
                let mut x = b;
                factor.substitute(&mut x)?;
                (x, 0)
            }
            SolverKind::DirectLls => {
                let factor = self.matrix.to_lls(&self.constraints)?.factorized()?;
                let mut x = b;
                factor.substitute(&mut x)?;
                (x, 0)
            }
            SolverKind::ConjugateGradient => {
                let a = self.matrix.to_crs(&self.constraints)?;
                let sol = a.cg(&b, options)?;
                (sol.x, sol.iterations)
            }
            SolverKind::PreconditionedCg => {
                let a = self.matrix.to_lls(&self.constraints)?;
                let sol = a.pcg(&a, &b, options)?;
                (sol.x, sol.iterations)
            }
        };

        if options.log {
            info!(
                "{:?} solved {} free DOFs in {} iterations",
                options.kind, free_dofs, iterations
            );
        }

        Ok(SystemSolution {
            x: self.constraints.expand(&x)?,
            kind: options.kind,
            iterations,
            free_dofs,
        })
    }

    /// `‖K·x − rhs‖ / ‖rhs‖` over the free DOFs, for full-length `x`
    pub fn residual(&self, x: &[f64], rhs: &[f64]) -> MatrixResult<f64> {
        let xr = self.constraints.reduce(x)?;
        let br = self.constraints.reduce(rhs)?;
        let kx = self.matrix.mul_v_reduced(&self.constraints, &xr)?;
        let r: Vec<f64> = kx.iter().zip(&br).map(|(a, b)| a - b).collect();
        let b_norm = dot(&br, &br, br.len()).sqrt();
        let r_norm = dot(&r, &r, r.len()).sqrt();
        Ok(if b_norm == 0.0 { r_norm } else { r_norm / b_norm })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Chain of springs fixed at DOF 0: k = [1, 2, 3, 4]
    fn spring_chain() -> LinearSystem {
        let mut coo = CooMatrix::new(5);
        for (e, k) in [1.0, 2.0, 3.0, 4.0].iter().enumerate() {
            coo.add_element_matrix(&[e, e + 1], &[[*k, -k], [-k, *k]]);
        }
        let mut fixed = vec![false; 5];
        fixed[0] = true;
        LinearSystem::new(coo, Constraints::new(fixed)).unwrap()
    }

    #[test]
    fn test_every_kind_agrees() {
        let system = spring_chain();
        // unit tip load: displacement u_i = Σ_{e<i} 1/k_e
        let rhs = [0.0, 0.0, 0.0, 0.0, 1.0];
        let expected = [0.0, 1.0, 1.5, 1.5 + 1.0 / 3.0, 1.5 + 1.0 / 3.0 + 0.25];
        for kind in [
            SolverKind::DirectCrs,
            SolverKind::DirectLls,
            SolverKind::ConjugateGradient,
            SolverKind::PreconditionedCg,
        ] {
            let options = SolverOptions::default().with_kind(kind).with_tolerance(1e-24);
            let sol = system.solve(&rhs, &options).unwrap();
            assert_eq!(sol.free_dofs, 4);
            for (u, e) in sol.x.iter().zip(&expected) {
                assert_relative_eq!(u, e, epsilon = 1e-9);
            }
            assert!(system.residual(&sol.x, &rhs).unwrap() < 1e-9);
            assert_eq!(sol.max_abs().map(|(dof, _)| dof), Some(4));
        }
    }

    #[test]
    fn test_options_from_json() {
        let json = r#"{"kind": "ConjugateGradient", "tolerance": 1e-10}"#;
        let options = SolverOptions::from_json(json).unwrap();
        assert_eq!(options.kind, SolverKind::ConjugateGradient);
        assert_relative_eq!(options.tolerance, 1e-10);
        assert_eq!(options.max_iterations, None);
        assert_eq!(options.iteration_cap(7), 80);

        assert!(SolverOptions::from_json(r#"{"tolerance": -1.0}"#).is_err());
        assert!(matches!(
            SolverOptions::from_json("{not json"),
            Err(MatrixError::Serialization(_))
        ));
    }

    #[test]
    fn test_all_fixed_is_rejected() {
        let system = LinearSystem::from_triplets(1, vec![true], &[(0, 0, 1.0)]).unwrap();
        assert!(system.solve(&[1.0], &SolverOptions::direct()).is_err());
    }

    #[test]
    fn test_conf_length_checked() {
        let err = LinearSystem::from_triplets(2, vec![false], &[]).unwrap_err();
        assert!(matches!(err, MatrixError::DimensionMismatch { expected: 2, found: 1 }));
    }
}

//! FEA Matrix - sparse symmetric stiffness matrices for finite element solvers
//!
//! This library covers the linear-algebra core of a structural solver:
//! - Triplet assembly of element stiffness contributions (COO)
//! - Compressed-row (CRS) and linked-list (LLS) storage
//! - Elimination of fixed degrees of freedom during conversion
//! - In-place LDLᵀ, incomplete LDLᵀ and Cholesky factorization
//! - Forward/backward substitution, CG and incomplete-LDLᵀ preconditioned CG
//! - Matrix-Market import and export
//!
//! ## Example
//! ```rust
//! use fea_matrix::prelude::*;
//!
//! // Two springs in series, left end fixed
//! let mut k = CooMatrix::new(3);
//! k.add_element_matrix(&[0, 1], &[[2.0, -2.0], [-2.0, 2.0]]);
//! k.add_element_matrix(&[1, 2], &[[1.0, -1.0], [-1.0, 1.0]]);
//!
//! let system = LinearSystem::new(k, Constraints::from_fixed_dofs(3, &[0])).unwrap();
//! let solution = system
//!     .solve(&[0.0, 0.0, 1.0], &SolverOptions::default())
//!     .unwrap();
//!
//! assert!((solution.x[2] - 1.5).abs() < 1e-8);
//! ```

pub mod error;
pub mod math;
pub mod mtx;
pub mod results;
pub mod solver;

// Re-export common types
pub mod prelude {
    pub use crate::error::{MatrixError, MatrixResult};
    pub use crate::math::{
        dot, Constraints, CooMatrix, CrsMatrix, Factorization, LinearOperator, LlsMatrix,
        Preconditioner,
    };
    pub use crate::mtx::{read_coo, read_matrix_market, write_matrix_market};
    pub use crate::results::{IterativeSolution, SystemSolution};
    pub use crate::solver::{LinearSystem, SolverKind, SolverOptions};
}

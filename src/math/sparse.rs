//! Iterative Krylov solvers shared by every sparse representation
//!
//! Stiffness matrices are SPD, so plain CG converges in at most `N` steps in
//! exact arithmetic. The cap on iterations comes from [`SolverOptions`];
//! running past it is reported as [`MatrixError::ConvergenceFailed`].

use log::{debug, info, trace, warn};

use super::{dot, relative_residual_sq};
use crate::error::{ensure_len, MatrixError, MatrixResult};
use crate::results::IterativeSolution;
use crate::solver::SolverOptions;

/// A square operator `y = A·x`
pub trait LinearOperator {
    /// Dimension of the operator
    fn dim(&self) -> usize;

    /// Apply the operator; `x.len()` equals `dim()`
    fn matvec(&self, x: &[f64]) -> Vec<f64>;
}

/// Approximate inverse `z = C⁻¹·r` used by PCG
pub trait Preconditioner {
    fn apply(&self, r: &[f64]) -> MatrixResult<Vec<f64>>;
}

/// `C = I`, turning PCG into plain CG
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn apply(&self, r: &[f64]) -> MatrixResult<Vec<f64>> {
        Ok(r.to_vec())
    }
}

/// y += alpha * x
#[inline]
fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// p = z + beta * p
#[inline]
fn update_direction(z: &[f64], beta: f64, p: &mut [f64]) {
    for (pi, zi) in p.iter_mut().zip(z) {
        *pi = zi + beta * *pi;
    }
}

fn report(label: &str, iteration: usize, residual: f64, options: &SolverOptions) {
    if options.log {
        info!("{label} iteration {iteration}: ‖r‖²/‖b‖² = {residual:.3e}");
    } else {
        trace!("{label} iteration {iteration}: ‖r‖²/‖b‖² = {residual:.3e}");
    }
}

/// Solve `A·x = b` with unpreconditioned conjugate gradient
///
/// Terminates when `‖r‖² / ‖b‖² < options.tolerance`.
pub fn solve_cg<A>(a: &A, b: &[f64], options: &SolverOptions) -> MatrixResult<IterativeSolution>
where
    A: LinearOperator + ?Sized,
{
    let n = a.dim();
    ensure_len(n, b.len())?;

    let b_norm_sq = dot(b, b, n);
    let mut x = vec![0.0; n];
    if b_norm_sq == 0.0 {
        return Ok(IterativeSolution {
            x,
            iterations: 0,
            relative_residual: 0.0,
        });
    }

    let mut r = b.to_vec();
    let mut p = r.clone();
    let mut r_dot_r = b_norm_sq;
    let max_iter = options.iteration_cap(n);
    let mut residual = 1.0;

    for iter in 1..=max_iter {
        let q = a.matvec(&p);
        let p_dot_q = dot(&p, &q, n);
        if p_dot_q <= 0.0 || !p_dot_q.is_finite() {
            warn!("CG breakdown at iteration {iter}: pᵀAp = {p_dot_q}");
            return Err(MatrixError::ConvergenceFailed {
                iterations: iter,
                residual,
            });
        }

        let alpha = r_dot_r / p_dot_q;
        axpy(alpha, &p, &mut x);
        axpy(-alpha, &q, &mut r);

        let r_dot_r_new = dot(&r, &r, n);
        residual = r_dot_r_new / b_norm_sq;
        report("CG", iter, residual, options);

        if residual < options.tolerance {
            debug!("CG converged in {iter} iterations (n = {n})");
            return Ok(IterativeSolution {
                x,
                iterations: iter,
                relative_residual: residual,
            });
        }

        let beta = r_dot_r_new / r_dot_r;
        r_dot_r = r_dot_r_new;
        update_direction(&r, beta, &mut p);
    }

    warn!("CG did not converge in {max_iter} iterations (residual {residual:.3e})");
    Err(MatrixError::ConvergenceFailed {
        iterations: max_iter,
        residual,
    })
}

/// Solve `A·x = b` with preconditioned conjugate gradient
///
/// The preconditioner must be read-only for the whole run.
pub fn solve_pcg<A, P>(
    a: &A,
    preconditioner: &P,
    b: &[f64],
    options: &SolverOptions,
) -> MatrixResult<IterativeSolution>
where
    A: LinearOperator + ?Sized,
    P: Preconditioner + ?Sized,
{
    let n = a.dim();
    ensure_len(n, b.len())?;

    let b_norm_sq = dot(b, b, n);
    let mut x = vec![0.0; n];
    if b_norm_sq == 0.0 {
        return Ok(IterativeSolution {
            x,
            iterations: 0,
            relative_residual: 0.0,
        });
    }

    let mut r = b.to_vec();
    let mut p = preconditioner.apply(&r)?;
    let mut rho = dot(&r, &p, n);
    let max_iter = options.iteration_cap(n);
    let mut residual = 1.0;

    for iter in 1..=max_iter {
        let q = a.matvec(&p);
        let p_dot_q = dot(&p, &q, n);
        if p_dot_q <= 0.0 || !p_dot_q.is_finite() {
            warn!("PCG breakdown at iteration {iter}: pᵀAp = {p_dot_q}");
            return Err(MatrixError::ConvergenceFailed {
                iterations: iter,
                residual,
            });
        }

        let alpha = rho / p_dot_q;
        axpy(alpha, &p, &mut x);
        axpy(-alpha, &q, &mut r);

        residual = relative_residual_sq(&r, b_norm_sq);
        report("PCG", iter, residual, options);

        if residual < options.tolerance {
            debug!("PCG converged in {iter} iterations (n = {n})");
            return Ok(IterativeSolution {
                x,
                iterations: iter,
                relative_residual: residual,
            });
        }

        let z = preconditioner.apply(&r)?;
        let rho_new = dot(&z, &r, n);
        let beta = rho_new / rho;
        rho = rho_new;
        update_direction(&z, beta, &mut p);
    }

    warn!("PCG did not converge in {max_iter} iterations (residual {residual:.3e})");
    Err(MatrixError::ConvergenceFailed {
        iterations: max_iter,
        residual,
    })
}

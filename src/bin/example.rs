//! FEA Matrix Example - Spring Grid
//!
//! Usage: `fea-matrix-example [matrix.mtx]`
//!
//! Without arguments a spring grid is assembled, its left edge fixed and its
//! right edge pulled; every solver path is run on it. With a Matrix-Market
//! file the matrix is solved against a unit load instead.

use anyhow::{Context, Result};
use fea_matrix::prelude::*;

/// Springs between grid neighbours, stiffness growing along x
fn spring_grid(nx: usize, ny: usize) -> CooMatrix {
    let node = |i: usize, j: usize| j * nx + i;
    let mut k = CooMatrix::new(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let stiffness = 1.0 + 10.0 * i as f64;
            if i + 1 < nx {
                k.add_element_matrix(
                    &[node(i, j), node(i + 1, j)],
                    &[[stiffness, -stiffness], [-stiffness, stiffness]],
                );
            }
            if j + 1 < ny {
                k.add_element_matrix(
                    &[node(i, j), node(i, j + 1)],
                    &[[stiffness, -stiffness], [-stiffness, stiffness]],
                );
            }
        }
    }
    k
}

fn run_grid() -> Result<()> {
    let (nx, ny) = (12, 8);
    let k = spring_grid(nx, ny);
    let n = k.size();
    println!(
        "Spring grid {}x{}: {} DOFs, {} stored entries ({:.1}% sparse)",
        nx,
        ny,
        n,
        k.nnz(),
        k.sparsity() * 100.0
    );

    // Left edge fixed, right edge loaded
    let fixed: Vec<usize> = (0..ny).map(|j| j * nx).collect();
    let mut rhs = vec![0.0; n];
    for j in 0..ny {
        rhs[j * nx + nx - 1] = 1.0;
    }

    let system = LinearSystem::new(k, Constraints::from_fixed_dofs(n, &fixed))?;
    println!("Free DOFs: {}\n", system.constraints().reduced_dim());

    for kind in [
        SolverKind::DirectCrs,
        SolverKind::DirectLls,
        SolverKind::ConjugateGradient,
        SolverKind::PreconditionedCg,
    ] {
        let options = SolverOptions::default()
            .with_kind(kind)
            .with_tolerance(1e-20);
        let solution = system
            .solve(&rhs, &options)
            .with_context(|| format!("{kind:?} solve failed"))?;
        let (dof, max) = solution.max_abs().unwrap_or((0, 0.0));
        println!(
            "  {:<18} iterations={:<4} max |u|={:.6} at DOF {} residual={:.2e}",
            format!("{kind:?}"),
            solution.iterations,
            max,
            dof,
            system.residual(&solution.x, &rhs)?
        );
    }
    Ok(())
}

fn run_file(path: &str) -> Result<()> {
    let coo = read_coo(path).with_context(|| format!("reading {path}"))?;
    let n = coo.size();
    println!("{}: {}x{} with {} stored entries\n", path, n, n, coo.nnz());

    let system = LinearSystem::new(coo, Constraints::none(n))?;
    let rhs = vec![1.0; n];
    let solution = system.solve(&rhs, &SolverOptions::default().with_logging())?;
    println!(
        "PCG converged in {} iterations, residual {:.2e}",
        solution.iterations,
        system.residual(&solution.x, &rhs)?
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    println!("=== FEA Matrix Example ===\n");
    match std::env::args().nth(1) {
        Some(path) => run_file(&path)?,
        None => run_grid()?,
    }
    println!("\n=== Done ===");
    Ok(())
}

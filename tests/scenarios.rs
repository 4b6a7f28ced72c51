use approx::assert_relative_eq;
use fea_matrix::mtx::{read_matrix_market, save_matrix_market};
use fea_matrix::prelude::*;

fn coo_from_dense(rows: &[&[f64]]) -> CooMatrix {
    let mut coo = CooMatrix::new(rows.len());
    for (r, row) in rows.iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            coo.add(r, c, v);
        }
    }
    coo
}

fn assert_vec_eq(actual: &[f64], expected: &[f64], epsilon: f64) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert_relative_eq!(a, e, epsilon = epsilon);
    }
}

#[test]
fn trivial_1x1() {
    let coo = coo_from_dense(&[&[4.0]]);
    let crs = coo.to_crs(&Constraints::none(1)).unwrap();

    let x = crs.solve(&[[12.0]]).unwrap();
    assert_vec_eq(&x[0], &[3.0], 1e-12);

    let cg = crs.cg(&[12.0], &SolverOptions::cg(1e-12)).unwrap();
    assert_eq!(cg.iterations, 1);
    assert_vec_eq(&cg.x, &[3.0], 1e-12);
}

#[test]
fn symmetric_2x2_both_paths() {
    let coo = coo_from_dense(&[&[4.0, 1.0], &[1.0, 3.0]]);
    let free = Constraints::none(2);
    let expected = [1.0 / 11.0, 7.0 / 11.0];

    let crs = coo.to_crs(&free).unwrap().solve(&[[1.0, 2.0]]).unwrap();
    let lls = coo.to_lls(&free).unwrap().solve(&[[1.0, 2.0]]).unwrap();
    assert_vec_eq(&crs[0], &expected, 1e-12);
    assert_vec_eq(&lls[0], &expected, 1e-12);
}

#[test]
fn tridiagonal_poisson_3x3() {
    let coo = coo_from_dense(&[&[2.0, -1.0, 0.0], &[-1.0, 2.0, -1.0], &[0.0, -1.0, 2.0]]);
    let free = Constraints::none(3);
    let b = [1.0, 0.0, 0.0];
    let expected = [0.75, 0.5, 0.25];

    assert_vec_eq(&coo.to_crs(&free).unwrap().solve(&[b]).unwrap()[0], &expected, 1e-12);
    assert_vec_eq(&coo.to_lls(&free).unwrap().solve(&[b]).unwrap()[0], &expected, 1e-12);
}

#[test]
fn constraint_reduction_drops_row_and_column() {
    let mut coo = CooMatrix::new(4);
    for i in 0..4 {
        coo.add(i, i, 10.0);
    }
    for (r, c) in [(0, 1), (2, 3)] {
        coo.add(r, c, -1.0);
        coo.add(c, r, -1.0);
    }
    let conf = Constraints::new(vec![false, true, false, false]);

    let crs = coo.to_crs(&conf).unwrap();
    assert_eq!(crs.dim(), 3);
    assert_eq!(crs.nnz(), 5);
    let expected = nalgebra::DMatrix::from_row_slice(
        3,
        3,
        &[10.0, 0.0, 0.0, 0.0, 10.0, -1.0, 0.0, -1.0, 10.0],
    );
    assert_eq!(crs.to_dense(), expected);

    let lls = coo.to_lls(&conf).unwrap();
    assert_eq!(lls.to_dense(), expected);
}

#[test]
fn matrix_market_round_trip() {
    let name = format!("fea_matrix_roundtrip_{}.mtx", std::process::id());
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, "% symmetric 2x2\n2 2 3\n1 1 2\n1 2 -1\n2 2 2\n").unwrap();

    let crs = read_matrix_market(&path).unwrap();
    let expected = nalgebra::DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 2.0]);
    assert_eq!(crs.to_dense(), expected);

    // Exported matrices read back identically
    let coo = coo_from_dense(&[&[2.0, -1.0], &[-1.0, 2.0]]);
    save_matrix_market(&path, &coo).unwrap();
    let back = read_matrix_market(&path).unwrap();
    assert_eq!(back.to_dense(), expected);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn missing_file_is_io_error() {
    let err = read_matrix_market("/nonexistent/dir/k.mtx").unwrap_err();
    assert!(matches!(err, MatrixError::Io(_)));
}

fn relative_residual(a: &LlsMatrix, x: &[f64], b: &[f64]) -> f64 {
    let ax = a.mul_v(x).unwrap();
    let r: Vec<f64> = ax.iter().zip(b).map(|(l, r)| l - r).collect();
    (dot(&r, &r, r.len()) / dot(b, b, b.len())).sqrt()
}

/// 11 x 5 spring grid whose right half is `jump` times stiffer,
/// left edge fixed: 50 free DOFs
fn stiff_grid(jump: f64) -> (CooMatrix, Constraints) {
    let (nx, ny) = (11, 5);
    let node = |i: usize, j: usize| j * nx + i;
    let mut coo = CooMatrix::new(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let k = if i >= nx / 2 { jump } else { 1.0 };
            if i + 1 < nx {
                coo.add_element_matrix(&[node(i, j), node(i + 1, j)], &[[k, -k], [-k, k]]);
            }
            if j + 1 < ny {
                coo.add_element_matrix(&[node(i, j), node(i, j + 1)], &[[k, -k], [-k, k]]);
            }
        }
    }
    let fixed: Vec<usize> = (0..ny).map(|j| node(0, j)).collect();
    (coo, Constraints::from_fixed_dofs(nx * ny, &fixed))
}

/// Uniform chain of 51 nodes fixed at one end: 50 free DOFs, κ ≈ 4·10³
fn spring_chain() -> CooMatrix {
    let mut coo = CooMatrix::new(50);
    for i in 0..50 {
        coo.add(i, i, if i == 49 { 1.0 } else { 2.0 });
        if i + 1 < 50 {
            coo.add(i, i + 1, -1.0);
            coo.add(i + 1, i, -1.0);
        }
    }
    coo
}

#[test]
fn pcg_beats_cg_on_ill_conditioned_chain() {
    let lls = spring_chain().to_lls(&Constraints::none(50)).unwrap();
    let b: Vec<f64> = (0..50).map(|i| ((i * 7) % 5) as f64 - 2.0).collect();
    let options = SolverOptions::default().with_tolerance(1e-12);

    let cg = lls.cg(&b, &options).unwrap();
    let pcg = lls.pcg(&lls, &b, &options).unwrap();
    assert!(
        pcg.iterations < cg.iterations,
        "PCG {} vs CG {}",
        pcg.iterations,
        cg.iterations
    );

    let direct = lls.solve(&[&b]).unwrap();
    let scale = direct[0].iter().fold(1.0, |m, v| v.abs().max(m));
    assert_vec_eq(&pcg.x, &direct[0], 1e-8 * scale);
}

/// Entries in [-0.5, 0.5) from a fixed-seed LCG, so every eigenvector is excited
fn scattered_rhs(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
        })
        .collect()
}

#[test]
fn pcg_beats_cg_on_stiffness_jump() {
    // κ ≈ 8·10³
    let (coo, conf) = stiff_grid(30.0);
    assert_eq!(conf.reduced_dim(), 50);
    let lls = coo.to_lls(&conf).unwrap();
    let b = scattered_rhs(50, 42);
    let options = SolverOptions::default().with_tolerance(1e-12);

    let cg = lls.cg(&b, &options).unwrap();
    let pcg = lls.pcg(&lls, &b, &options).unwrap();
    assert!(
        pcg.iterations < cg.iterations,
        "PCG {} vs CG {}",
        pcg.iterations,
        cg.iterations
    );

    for x in [&cg.x, &pcg.x] {
        assert!(relative_residual(&lls, x, &b) < 1e-5);
    }
}

#[test]
fn linear_system_end_to_end() {
    let (coo, conf) = stiff_grid(1000.0);
    let n = coo.size();
    let triplets: Vec<(usize, usize, f64)> = coo.triplets().collect();
    let system = LinearSystem::from_triplets(n, conf.as_slice().to_vec(), &triplets).unwrap();

    let mut rhs = vec![0.0; n];
    rhs[n - 1] = 1.0;
    rhs[0] = 123.0; // fixed DOF, ignored

    let direct = system.solve(&rhs, &SolverOptions::direct()).unwrap();
    assert_eq!(direct.iterations, 0);
    assert_eq!(direct.free_dofs, 50);
    for dof in conf.as_slice().iter().enumerate().filter(|(_, f)| **f).map(|(d, _)| d) {
        assert_eq!(direct.x[dof], 0.0);
    }
    assert!(system.residual(&direct.x, &rhs).unwrap() < 1e-8);

    let pcg = system
        .solve(&rhs, &SolverOptions::pcg().with_tolerance(1e-20))
        .unwrap();
    assert!(pcg.iterations > 0);
    let scale = direct.x.iter().fold(1.0, |m, v| v.abs().max(m));
    assert_vec_eq(&pcg.x, &direct.x, 1e-4 * scale);
}

#[test]
fn multiple_right_hand_sides_share_one_factor() {
    let coo = coo_from_dense(&[&[4.0, 1.0, 0.0], &[1.0, 3.0, 1.0], &[0.0, 1.0, 5.0]]);
    let crs = coo.to_crs(&Constraints::none(3)).unwrap();
    let xs = crs.solve(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]).unwrap();

    // Columns of the inverse: A·X = I
    let a = coo.to_dense();
    for (j, x) in xs.iter().enumerate() {
        let ax = &a * nalgebra::DVector::from_column_slice(x);
        for i in 0..3 {
            assert_relative_eq!(ax[i], if i == j { 1.0 } else { 0.0 }, epsilon = 1e-12);
        }
    }
}

#[test]
fn unreduced_rigid_body_mode_is_singular() {
    // Free-floating spring: K is only semi-definite
    let coo = coo_from_dense(&[&[1.0, -1.0], &[-1.0, 1.0]]);
    let err = coo.to_crs(&Constraints::none(2)).unwrap().factorized().unwrap_err();
    assert!(matches!(err, MatrixError::Singular { index: 1 }));
    let err = coo.to_lls(&Constraints::none(2)).unwrap().factorized().unwrap_err();
    assert!(matches!(err, MatrixError::Singular { index: 1 }));
}

#[test]
fn iteration_cap_is_reported() {
    let (coo, conf) = stiff_grid(1000.0);
    let crs = coo.to_crs(&conf).unwrap();
    let err = crs
        .cg(&vec![1.0; 50], &SolverOptions::cg(1e-12).with_max_iter(3))
        .unwrap_err();
    assert!(matches!(err, MatrixError::ConvergenceFailed { iterations: 3, .. }));
}

//! Triplet (COO) storage used during stiffness assembly
//!
//! Element contributions are summed into an ordered row map of ordered
//! column maps, so every conversion sees each row's columns in ascending
//! order without a final sort.

use std::collections::BTreeMap;

use log::debug;
use nalgebra::DMatrix;
use rayon::prelude::*;

use super::constraints::Constraints;
use super::crs::CrsMatrix;
use super::lls::LlsMatrix;
use super::sparse::LinearOperator;
use crate::error::{ensure_len, MatrixResult};

/// Sparse matrix accumulated as `(row, col) -> value`
///
/// Zero is never stored: writing 0 removes the entry. Indices past `size`
/// are ignored on write and read back as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooMatrix {
    size: usize,
    nz: usize,
    rows: BTreeMap<usize, BTreeMap<usize, f64>>,
}

impl CooMatrix {
    /// Create an empty `size x size` matrix
    pub fn new(size: usize) -> Self {
        Self {
            size,
            nz: 0,
            rows: BTreeMap::new(),
        }
    }

    /// Build from `(row, col, value)` triplets, summing duplicates
    pub fn from_triplets(size: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut coo = Self::new(size);
        for &(row, col, value) in triplets {
            coo.add(row, col, value);
        }
        coo
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of stored non-zeros
    pub fn nnz(&self) -> usize {
        self.nz
    }

    /// Fraction of structurally zero entries
    pub fn sparsity(&self) -> f64 {
        let total = self.size * self.size;
        if total == 0 {
            return 1.0;
        }
        1.0 - (self.nz as f64 / total as f64)
    }

    #[inline]
    fn in_range(&self, row: usize, col: usize) -> bool {
        row < self.size && col < self.size
    }

    /// Stored value, or 0 when absent or out of range
    pub fn query(&self, row: usize, col: usize) -> f64 {
        self.rows
            .get(&row)
            .and_then(|cols| cols.get(&col))
            .copied()
            .unwrap_or(0.0)
    }

    /// Store `value` exactly
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        if !self.in_range(row, col) {
            return;
        }
        if value == 0.0 {
            self.remove(row, col);
            return;
        }
        let cols = self.rows.entry(row).or_default();
        if cols.insert(col, value).is_none() {
            self.nz += 1;
        }
    }

    /// Accumulate `value` onto the stored entry
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        if value == 0.0 {
            return;
        }
        let sum = self.query(row, col) + value;
        self.set(row, col, sum);
    }

    fn remove(&mut self, row: usize, col: usize) {
        if let Some(cols) = self.rows.get_mut(&row) {
            if cols.remove(&col).is_some() {
                self.nz -= 1;
            }
            if cols.is_empty() {
                self.rows.remove(&row);
            }
        }
    }

    /// Sum a dense element matrix into the global DOFs `dofs`
    pub fn add_element_matrix<const N: usize>(
        &mut self,
        dofs: &[usize; N],
        k_elem: &[[f64; N]; N],
    ) {
        for (i, &di) in dofs.iter().enumerate() {
            for (j, &dj) in dofs.iter().enumerate() {
                self.add(di, dj, k_elem[i][j]);
            }
        }
    }

    /// Stored entries in row-major order
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&r, cols)| cols.iter().map(move |(&c, &v)| (r, c, v)))
    }

    /// `M·x` over the full matrix
    pub fn mul_v(&self, x: &[f64]) -> MatrixResult<Vec<f64>> {
        ensure_len(self.size, x.len())?;
        Ok(self.product(x))
    }

    fn product(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.size];
        for (&r, cols) in &self.rows {
            y[r] = cols.iter().map(|(&c, &v)| v * x[c]).sum();
        }
        y
    }

    /// `M·x` restricted to the free rows and columns
    ///
    /// `x` and the result both have the reduced dimension.
    pub fn mul_v_reduced(&self, constraints: &Constraints, x: &[f64]) -> MatrixResult<Vec<f64>> {
        constraints.ensure_dim(self.size)?;
        ensure_len(constraints.reduced_dim(), x.len())?;

        let mut y = vec![0.0; constraints.reduced_dim()];
        for (&r, cols) in &self.rows {
            let Some(ri) = constraints.reduced_index(r) else {
                continue;
            };
            y[ri] = cols
                .iter()
                .filter_map(|(&c, &v)| constraints.reduced_index(c).map(|ci| v * x[ci]))
                .sum();
        }
        Ok(y)
    }

    /// Emit the reduced CRS matrix, skipping fixed rows and columns
    pub fn to_crs(&self, constraints: &Constraints) -> MatrixResult<CrsMatrix> {
        constraints.ensure_dim(self.size)?;

        let n = constraints.reduced_dim();
        let mut row_offsets = Vec::with_capacity(n + 1);
        let mut col_indices = Vec::with_capacity(self.nz);
        let mut values = Vec::with_capacity(self.nz);
        row_offsets.push(0);

        for &r in constraints.free_dofs() {
            if let Some(cols) = self.rows.get(&r) {
                for (&c, &v) in cols {
                    if let Some(ci) = constraints.reduced_index(c) {
                        col_indices.push(ci);
                        values.push(v);
                    }
                }
            }
            row_offsets.push(col_indices.len());
        }

        debug!(
            "COO -> CRS: {} -> {} DOFs, {} non-zeros",
            self.size,
            n,
            values.len()
        );
        Ok(CrsMatrix::from_sorted_parts(n, row_offsets, col_indices, values))
    }

    /// Emit the reduced LLS matrix, skipping fixed rows and columns
    ///
    /// Column `c` of the result is read from row `c` of this matrix at
    /// columns `>= c`, which equals the lower column for a symmetric matrix.
    /// Columns are gathered in parallel, one task per free DOF.
    pub fn to_lls(&self, constraints: &Constraints) -> MatrixResult<LlsMatrix> {
        constraints.ensure_dim(self.size)?;

        let n = constraints.reduced_dim();
        let columns: Vec<(f64, Vec<(usize, f64)>)> = constraints
            .free_dofs()
            .par_iter()
            .map(|&c| {
                let mut diag = 0.0;
                let mut below = Vec::new();
                if let Some(cols) = self.rows.get(&c) {
                    for (&j, &v) in cols.range(c..) {
                        match constraints.reduced_index(j) {
                            Some(_) if j == c => diag = v,
                            Some(rj) => below.push((rj, v)),
                            None => {}
                        }
                    }
                }
                (diag, below)
            })
            .collect();

        debug!("COO -> LLS: {} -> {} DOFs", self.size, n);
        Ok(LlsMatrix::from_columns(columns))
    }

    /// Dense copy of the full matrix
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut mat = DMatrix::zeros(self.size, self.size);
        for (r, c, v) in self.triplets() {
            mat[(r, c)] = v;
        }
        mat
    }

    /// Forward sweep with the strict lower triangle: `v[i] -= Σ_{j<i} A(i,j)·v[j]`
    ///
    /// Reference implementation through `query`; quadratic in `N`.
    pub fn fe_lower(&self, v: &mut [f64]) -> MatrixResult<()> {
        ensure_len(self.size, v.len())?;
        for i in 0..self.size {
            let sum: f64 = (0..i).map(|j| self.query(i, j) * v[j]).sum();
            v[i] -= sum;
        }
        Ok(())
    }

    /// Forward sweep with the transposed strict upper triangle: `v[i] -= Σ_{j<i} A(j,i)·v[j]`
    pub fn fe_upper(&self, v: &mut [f64]) -> MatrixResult<()> {
        ensure_len(self.size, v.len())?;
        for i in 0..self.size {
            let sum: f64 = (0..i).map(|j| self.query(j, i) * v[j]).sum();
            v[i] -= sum;
        }
        Ok(())
    }

    /// Backward sweep with the transposed strict lower triangle: `v[i] -= Σ_{j>i} A(j,i)·v[j]`
    pub fn bs_lower(&self, v: &mut [f64]) -> MatrixResult<()> {
        ensure_len(self.size, v.len())?;
        for i in (0..self.size).rev() {
            let sum: f64 = (i + 1..self.size).map(|j| self.query(j, i) * v[j]).sum();
            v[i] -= sum;
        }
        Ok(())
    }

    /// Backward sweep with the strict upper triangle: `v[i] -= Σ_{j>i} A(i,j)·v[j]`
    pub fn bs_upper(&self, v: &mut [f64]) -> MatrixResult<()> {
        ensure_len(self.size, v.len())?;
        for i in (0..self.size).rev() {
            let sum: f64 = (i + 1..self.size).map(|j| self.query(i, j) * v[j]).sum();
            v[i] -= sum;
        }
        Ok(())
    }
}

impl LinearOperator for CooMatrix {
    fn dim(&self) -> usize {
        self.size
    }

    fn matvec(&self, x: &[f64]) -> Vec<f64> {
        self.product(x)
    }
}

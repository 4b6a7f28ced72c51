//! Compressed-row (CRS) storage
//!
//! Both triangles are stored. Factorizations work on the upper triangle and
//! mirror it into the lower one afterwards, so the forward sweep reads `L`
//! from the lower half and the backward sweep reads `Lᵀ` from the upper half.

use log::debug;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::sparse::{solve_cg, solve_pcg, LinearOperator, Preconditioner};
use super::Factorization;
use crate::error::{ensure_len, MatrixError, MatrixResult};
use crate::results::IterativeSolution;
use crate::solver::SolverOptions;

/// Square sparse matrix in compressed-row form
///
/// `row_offsets[r]..row_offsets[r + 1]` indexes the entries of row `r` in
/// `col_indices` and `values`; columns are strictly ascending in each row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrsMatrix {
    size: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
    factor: Option<Factorization>,
}

impl CrsMatrix {
    /// Empty `size x size` matrix
    pub fn new(size: usize) -> Self {
        Self {
            size,
            row_offsets: vec![0; size + 1],
            col_indices: Vec::new(),
            values: Vec::new(),
            factor: None,
        }
    }

    /// Trusted constructor for arrays already in canonical form
    pub(crate) fn from_sorted_parts(
        size: usize,
        row_offsets: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(row_offsets.len(), size + 1);
        Self {
            size,
            row_offsets,
            col_indices,
            values,
            factor: None,
        }
    }

    /// Build from raw CSR arrays, validating every structural invariant
    pub fn from_raw_parts(
        size: usize,
        row_offsets: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> MatrixResult<Self> {
        ensure_len(size + 1, row_offsets.len())?;
        ensure_len(col_indices.len(), values.len())?;
        if row_offsets[0] != 0 || row_offsets[size] != col_indices.len() {
            return Err(MatrixError::InvalidInput(
                "row offsets must start at 0 and end at nnz".to_string(),
            ));
        }
        for r in 0..size {
            let (start, end) = (row_offsets[r], row_offsets[r + 1]);
            if start > end || end > col_indices.len() {
                return Err(MatrixError::InvalidInput(format!(
                    "row offsets out of order at row {r}"
                )));
            }
            let cols = &col_indices[start..end];
            if cols.windows(2).any(|w| w[0] >= w[1]) {
                return Err(MatrixError::InvalidInput(format!(
                    "columns of row {r} are not strictly ascending"
                )));
            }
            if cols.last().is_some_and(|&c| c >= size) {
                return Err(MatrixError::InvalidInput(format!(
                    "column index out of range in row {r}"
                )));
            }
        }
        Ok(Self::from_sorted_parts(size, row_offsets, col_indices, values))
    }

    /// Import an nalgebra-sparse CSR matrix
    pub fn from_nalgebra(csr: &nalgebra_sparse::CsrMatrix<f64>) -> MatrixResult<Self> {
        if csr.nrows() != csr.ncols() {
            return Err(MatrixError::InvalidInput(format!(
                "matrix must be square, got {}x{}",
                csr.nrows(),
                csr.ncols()
            )));
        }
        Self::from_raw_parts(
            csr.nrows(),
            csr.row_offsets().to_vec(),
            csr.col_indices().to_vec(),
            csr.values().to_vec(),
        )
    }

    /// Export to nalgebra-sparse
    pub fn to_nalgebra(&self) -> MatrixResult<nalgebra_sparse::CsrMatrix<f64>> {
        nalgebra_sparse::CsrMatrix::try_from_csr_data(
            self.size,
            self.size,
            self.row_offsets.clone(),
            self.col_indices.clone(),
            self.values.clone(),
        )
        .map_err(|e| MatrixError::InvalidInput(e.to_string()))
    }

    pub fn dim(&self) -> usize {
        self.size
    }

    /// Allocated non-zeros
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Decomposition currently held in storage, if any
    pub fn factorization(&self) -> Option<Factorization> {
        self.factor
    }

    #[inline]
    fn row_range(&self, row: usize) -> (usize, usize) {
        (self.row_offsets[row], self.row_offsets[row + 1])
    }

    /// Index into `values` of entry `(row, col)`
    #[inline]
    fn position(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.size || col >= self.size {
            return None;
        }
        let (start, end) = self.row_range(row);
        self.col_indices[start..end]
            .binary_search(&col)
            .ok()
            .map(|pos| start + pos)
    }

    /// Stored value or 0
    pub fn query(&self, row: usize, col: usize) -> f64 {
        self.position(row, col).map_or(0.0, |k| self.values[k])
    }

    /// Insert `(col, value)` into `row` on a miss, or replace the stored
    /// value by `f(old)` on a hit; returns the value now stored
    pub fn set_with<F>(&mut self, row: usize, col: usize, value: f64, f: F) -> f64
    where
        F: FnOnce(f64) -> f64,
    {
        if row >= self.size || col >= self.size {
            return 0.0;
        }
        let (start, end) = self.row_range(row);
        match self.col_indices[start..end].binary_search(&col) {
            Ok(pos) => {
                let k = start + pos;
                self.values[k] = f(self.values[k]);
                self.values[k]
            }
            Err(pos) => {
                let k = start + pos;
                self.col_indices.insert(k, col);
                self.values.insert(k, value);
                for offset in &mut self.row_offsets[row + 1..] {
                    *offset += 1;
                }
                value
            }
        }
    }

    /// Store `value`; zero is never inserted
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> f64 {
        if value == 0.0 {
            return 0.0;
        }
        self.set_with(row, col, value, |_| value)
    }

    /// Accumulate `value`, inserting the entry if absent
    pub fn add(&mut self, row: usize, col: usize, value: f64) -> f64 {
        if value == 0.0 {
            return 0.0;
        }
        self.set_with(row, col, value, |old| old + value)
    }

    /// Scale a stored entry in place; absent entries stay absent
    pub fn mul(&mut self, row: usize, col: usize, factor: f64) -> f64 {
        match self.position(row, col) {
            Some(k) => {
                self.values[k] *= factor;
                self.values[k]
            }
            None => 0.0,
        }
    }

    /// Replace a stored entry by its square root; absent entries stay absent
    pub fn sqrt(&mut self, row: usize, col: usize) -> f64 {
        match self.position(row, col) {
            Some(k) => {
                self.values[k] = self.values[k].sqrt();
                self.values[k]
            }
            None => 0.0,
        }
    }

    /// `y = A·x`
    pub fn mul_v(&self, x: &[f64]) -> MatrixResult<Vec<f64>> {
        ensure_len(self.size, x.len())?;
        Ok(self.product(x))
    }

    fn product(&self, x: &[f64]) -> Vec<f64> {
        (0..self.size)
            .into_par_iter()
            .map(|r| {
                let (start, end) = self.row_range(r);
                self.col_indices[start..end]
                    .iter()
                    .zip(&self.values[start..end])
                    .map(|(&c, &v)| v * x[c])
                    .sum::<f64>()
            })
            .collect()
    }

    /// Strictly-upper entries of `row` as `(col, value)`
    fn upper_entries(&self, row: usize) -> Vec<(usize, f64)> {
        let (start, end) = self.row_range(row);
        let first = start + self.col_indices[start..end].partition_point(|&c| c <= row);
        (first..end)
            .map(|k| (self.col_indices[k], self.values[k]))
            .collect()
    }

    /// Copy the upper triangle onto the lower one
    fn mirror_upper(&mut self) {
        let upper: Vec<(usize, usize, f64)> = (0..self.size)
            .flat_map(|r| {
                self.upper_entries(r)
                    .into_iter()
                    .map(move |(c, v)| (r, c, v))
            })
            .collect();
        for (r, c, v) in upper {
            match self.position(c, r) {
                Some(k) => self.values[k] = v,
                None if v != 0.0 => {
                    self.set_with(c, r, v, |_| v);
                }
                None => {}
            }
        }
    }

    /// In-place `A = L·D·Lᵀ`
    ///
    /// Row `r` is scaled by `1/d` right of the diagonal, then its outer
    /// product updates the trailing upper triangle, inserting fill-in.
    pub fn ldlt(&mut self) -> MatrixResult<()> {
        if self.factor.is_some() {
            return Err(MatrixError::AlreadyFactorized);
        }
        let nnz_before = self.nnz();

        for r in 0..self.size {
            let d = self.query(r, r);
            if d == 0.0 || !d.is_finite() {
                return Err(MatrixError::Singular { index: r });
            }
            let w = 1.0 / d;
            let (start, end) = self.row_range(r);
            let first = start + self.col_indices[start..end].partition_point(|&c| c <= r);
            for v in &mut self.values[first..end] {
                *v *= w;
            }

            let upper = self.upper_entries(r);
            for (a, &(j, l_rj)) in upper.iter().enumerate() {
                for &(k, l_rk) in &upper[a..] {
                    self.add(j, k, -d * l_rj * l_rk);
                }
            }
        }

        self.mirror_upper();
        self.factor = Some(Factorization::Ldlt);
        debug!(
            "CRS LDLT: n = {}, nnz {} -> {} after fill-in",
            self.size,
            nnz_before,
            self.nnz()
        );
        Ok(())
    }

    /// In-place `A = L·Lᵀ`
    pub fn chol(&mut self) -> MatrixResult<()> {
        if self.factor.is_some() {
            return Err(MatrixError::AlreadyFactorized);
        }

        for r in 0..self.size {
            let d = self.query(r, r);
            if d <= 0.0 || !d.is_finite() {
                return Err(MatrixError::Singular { index: r });
            }
            let w = 1.0 / self.sqrt(r, r);
            for (c, _) in self.upper_entries(r) {
                self.mul(r, c, w);
            }

            let upper = self.upper_entries(r);
            for (a, &(j, u_rj)) in upper.iter().enumerate() {
                for &(k, u_rk) in &upper[a..] {
                    self.add(j, k, -u_rj * u_rk);
                }
            }
        }

        self.mirror_upper();
        self.factor = Some(Factorization::Cholesky);
        debug!("CRS Cholesky: n = {}, nnz = {}", self.size, self.nnz());
        Ok(())
    }

    /// Factored copy, leaving `self` untouched
    pub fn factorized(&self) -> MatrixResult<Self> {
        let mut factor = self.clone();
        factor.ldlt()?;
        Ok(factor)
    }

    fn ensure_ldlt(&self, len: usize) -> MatrixResult<()> {
        if self.factor != Some(Factorization::Ldlt) {
            return Err(MatrixError::NotFactorized);
        }
        ensure_len(self.size, len)
    }

    /// Forward substitution with the unit lower factor
    pub fn fe_lower(&self, v: &mut [f64]) -> MatrixResult<()> {
        self.ensure_ldlt(v.len())?;
        self.lower_sweep(v, false);
        Ok(())
    }

    /// Backward substitution with the unit upper factor
    pub fn bs_upper(&self, v: &mut [f64]) -> MatrixResult<()> {
        self.ensure_ldlt(v.len())?;
        self.upper_sweep(v, false);
        Ok(())
    }

    /// `v[i] /= D(i)`
    pub fn diag_divide(&self, v: &mut [f64]) -> MatrixResult<()> {
        self.ensure_ldlt(v.len())?;
        for (i, vi) in v.iter_mut().enumerate() {
            *vi /= self.query(i, i);
        }
        Ok(())
    }

    /// Full substitution `x = (L·D·Lᵀ)⁻¹·v`, in place
    pub fn substitute(&self, v: &mut [f64]) -> MatrixResult<()> {
        self.fe_lower(v)?;
        self.diag_divide(v)?;
        self.bs_upper(v)
    }

    /// Forward sweep over the lower triangle; `scaled` divides by the diagonal
    fn lower_sweep(&self, v: &mut [f64], scaled: bool) {
        for r in 0..self.size {
            let (start, end) = self.row_range(r);
            let mut sum = 0.0;
            let mut diag = 1.0;
            for k in start..end {
                let c = self.col_indices[k];
                if c < r {
                    sum += self.values[k] * v[c];
                } else {
                    if c == r && scaled {
                        diag = self.values[k];
                    }
                    break;
                }
            }
            v[r] = (v[r] - sum) / diag;
        }
    }

    /// Backward sweep over the upper triangle; `scaled` divides by the diagonal
    fn upper_sweep(&self, v: &mut [f64], scaled: bool) {
        for r in (0..self.size).rev() {
            let (start, end) = self.row_range(r);
            let mut sum = 0.0;
            let mut diag = 1.0;
            for k in (start..end).rev() {
                let c = self.col_indices[k];
                if c > r {
                    sum += self.values[k] * v[c];
                } else {
                    if c == r && scaled {
                        diag = self.values[k];
                    }
                    break;
                }
            }
            v[r] = (v[r] - sum) / diag;
        }
    }

    /// Direct solve for every right-hand side, factoring once
    pub fn solve<B: AsRef<[f64]>>(&self, rhs: &[B]) -> MatrixResult<Vec<Vec<f64>>> {
        let factor = self.factorized()?;
        rhs.iter()
            .map(|b| {
                let mut x = b.as_ref().to_vec();
                factor.substitute(&mut x)?;
                Ok(x)
            })
            .collect()
    }

    /// Unpreconditioned conjugate gradient
    pub fn cg(&self, b: &[f64], options: &SolverOptions) -> MatrixResult<IterativeSolution> {
        solve_cg(self, b, options)
    }

    /// Conjugate gradient preconditioned by the Cholesky factor of `p`
    pub fn pcg(
        &self,
        p: &CrsMatrix,
        b: &[f64],
        options: &SolverOptions,
    ) -> MatrixResult<IterativeSolution> {
        let mut c = p.clone();
        c.chol()?;
        solve_pcg(self, &c, b, options)
    }

    /// Dense copy
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut mat = DMatrix::zeros(self.size, self.size);
        for r in 0..self.size {
            let (start, end) = self.row_range(r);
            for k in start..end {
                mat[(r, self.col_indices[k])] = self.values[k];
            }
        }
        mat
    }
}

impl LinearOperator for CrsMatrix {
    fn dim(&self) -> usize {
        self.size
    }

    fn matvec(&self, x: &[f64]) -> Vec<f64> {
        self.product(x)
    }
}

impl Preconditioner for CrsMatrix {
    fn apply(&self, r: &[f64]) -> MatrixResult<Vec<f64>> {
        ensure_len(self.size, r.len())?;
        let mut z = r.to_vec();
        match self.factor {
            Some(Factorization::Ldlt) => self.substitute(&mut z)?,
            Some(Factorization::Cholesky) => {
                self.lower_sweep(&mut z, true);
                self.upper_sweep(&mut z, true);
            }
            _ => return Err(MatrixError::NotFactorized),
        }
        Ok(z)
    }
}

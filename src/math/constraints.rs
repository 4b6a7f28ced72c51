//! Constraint reduction: deleting fixed DOFs from the stiffness operator

use crate::error::{ensure_len, MatrixResult};

/// Marks constrained ("fixed") degrees of freedom
///
/// Fixed DOFs are removed from every emitted matrix. A free DOF `i` maps to
/// the reduced index `i - rind`, where `rind` counts the fixed DOFs before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
    fixed: Vec<bool>,
    reduced: Vec<Option<usize>>,
    free: Vec<usize>,
}

impl Constraints {
    /// Build from a `conf` vector (`true` = fixed)
    pub fn new(fixed: Vec<bool>) -> Self {
        let mut reduced = Vec::with_capacity(fixed.len());
        let mut free = Vec::with_capacity(fixed.len());
        let mut rind = 0;
        for (i, &is_fixed) in fixed.iter().enumerate() {
            if is_fixed {
                rind += 1;
                reduced.push(None);
            } else {
                reduced.push(Some(i - rind));
                free.push(i);
            }
        }
        Self {
            fixed,
            reduced,
            free,
        }
    }

    /// No constrained DOFs
    pub fn none(n: usize) -> Self {
        Self::new(vec![false; n])
    }

    /// Fix the listed DOFs out of `n`; indices past `n` are ignored
    pub fn from_fixed_dofs(n: usize, dofs: &[usize]) -> Self {
        let mut fixed = vec![false; n];
        for &d in dofs {
            if let Some(slot) = fixed.get_mut(d) {
                *slot = true;
            }
        }
        Self::new(fixed)
    }

    /// Full (unreduced) dimension
    pub fn len(&self) -> usize {
        self.fixed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty()
    }

    /// Number of fixed DOFs (`csize`)
    pub fn fixed_count(&self) -> usize {
        self.fixed.len() - self.free.len()
    }

    /// Dimension of the reduced system
    pub fn reduced_dim(&self) -> usize {
        self.free.len()
    }

    pub fn is_fixed(&self, dof: usize) -> bool {
        self.fixed.get(dof).copied().unwrap_or(false)
    }

    /// Reduced index of a free DOF, `None` if fixed or out of range
    #[inline]
    pub fn reduced_index(&self, dof: usize) -> Option<usize> {
        self.reduced.get(dof).copied().flatten()
    }

    /// Free DOFs in ascending order
    pub fn free_dofs(&self) -> &[usize] {
        &self.free
    }

    /// The raw `conf` vector
    pub fn as_slice(&self) -> &[bool] {
        &self.fixed
    }

    /// Check these constraints describe a matrix of dimension `n`
    pub fn ensure_dim(&self, n: usize) -> MatrixResult<()> {
        ensure_len(n, self.fixed.len())
    }

    /// Gather the free entries of a full-length vector
    pub fn reduce(&self, full: &[f64]) -> MatrixResult<Vec<f64>> {
        ensure_len(self.len(), full.len())?;
        Ok(self.free.iter().map(|&i| full[i]).collect())
    }

    /// Scatter a reduced vector back to full length, zero at fixed DOFs
    pub fn expand(&self, reduced: &[f64]) -> MatrixResult<Vec<f64>> {
        ensure_len(self.reduced_dim(), reduced.len())?;
        let mut full = vec![0.0; self.len()];
        for (&i, &v) in self.free.iter().zip(reduced) {
            full[i] = v;
        }
        Ok(full)
    }
}

impl From<Vec<bool>> for Constraints {
    fn from(fixed: Vec<bool>) -> Self {
        Self::new(fixed)
    }
}

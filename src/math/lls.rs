//! Linked-list (LLS) storage of a symmetric matrix
//!
//! Only the lower triangle is kept. Column `c` is a chain of nodes ordered
//! by ascending row, headed by its diagonal node `diag[c]` and threaded by
//! `up`/`down`. Nodes live in one arena and refer to each other by
//! [`NodeId`], so fill-in during factorization is a push plus a splice.
//!
//! After [`LlsMatrix::diag_up`] every diagonal node also heads a `left`
//! chain listing the entries of its row left of the diagonal, which is what
//! forward substitution walks.

use log::debug;
use nalgebra::DMatrix;

use super::sparse::{solve_cg, solve_pcg, LinearOperator, Preconditioner};
use super::Factorization;
use crate::error::{ensure_len, MatrixError, MatrixResult};
use crate::results::IterativeSolution;
use crate::solver::SolverOptions;

/// Stable handle of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
struct Node {
    row: usize,
    col: usize,
    value: f64,
    /// Previous node of the column chain
    up: Option<NodeId>,
    /// Next node of the column chain
    down: Option<NodeId>,
    /// Next node of the row chain (diagonal nodes head it)
    left: Option<NodeId>,
}

impl Node {
    fn new(row: usize, col: usize, value: f64) -> Self {
        Self {
            row,
            col,
            value,
            up: None,
            down: None,
            left: None,
        }
    }
}

/// Where an entry sits relative to its column chain
enum Slot {
    Found(NodeId),
    /// absent; belongs above this node
    Before(NodeId),
    /// absent; belongs below this node, the current tail
    After(NodeId),
}

/// Symmetric sparse matrix stored as per-column linked lists
#[derive(Debug, Clone, PartialEq)]
pub struct LlsMatrix {
    nodes: Vec<Node>,
    diag: Vec<NodeId>,
    factor: Option<Factorization>,
    row_linked: bool,
}

impl LlsMatrix {
    /// `size x size` matrix holding only zero diagonal nodes
    pub fn new(size: usize) -> Self {
        Self::from_columns((0..size).map(|_| (0.0, Vec::new())).collect())
    }

    /// Assemble from per-column `(diagonal, [(row, value)])` lists
    ///
    /// Rows below the diagonal must be strictly ascending and `> col`.
    pub(crate) fn from_columns(columns: Vec<(f64, Vec<(usize, f64)>)>) -> Self {
        let size = columns.len();
        let below: usize = columns.iter().map(|(_, rows)| rows.len()).sum();
        let mut lls = Self {
            nodes: Vec::with_capacity(size + below),
            diag: Vec::with_capacity(size),
            factor: None,
            row_linked: false,
        };

        for (c, (d, _)) in columns.iter().enumerate() {
            let id = lls.push_node(c, c, *d);
            lls.diag.push(id);
        }
        for (c, (_, rows)) in columns.into_iter().enumerate() {
            let mut tail = lls.diag[c];
            for (r, v) in rows {
                debug_assert!(r > c && r < size);
                let id = lls.push_node(r, c, v);
                lls.splice_after(id, tail);
                tail = id;
            }
        }
        lls
    }

    pub fn dim(&self) -> usize {
        self.diag.len()
    }

    /// Stored nodes, diagonal included
    pub fn nnz(&self) -> usize {
        self.nodes.len()
    }

    pub fn factorization(&self) -> Option<Factorization> {
        self.factor
    }

    /// Whether `diag_up` has built the row chains
    pub fn is_row_linked(&self) -> bool {
        self.row_linked
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn push_node(&mut self, row: usize, col: usize, value: f64) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(row, col, value));
        if self.row_linked && row != col {
            let head = self.diag[row];
            let first = self.node(head).left;
            self.node_mut(id).left = first;
            self.node_mut(head).left = Some(id);
        }
        id
    }

    /// Splice `id` into the column chain directly above `target`
    fn splice_before(&mut self, id: NodeId, target: NodeId) {
        let above = self.node(target).up;
        {
            let node = self.node_mut(id);
            node.up = above;
            node.down = Some(target);
        }
        if let Some(a) = above {
            self.node_mut(a).down = Some(id);
        }
        self.node_mut(target).up = Some(id);
    }

    /// Splice `id` into the column chain directly below `target`
    fn splice_after(&mut self, id: NodeId, target: NodeId) {
        let below = self.node(target).down;
        {
            let node = self.node_mut(id);
            node.up = Some(target);
            node.down = below;
        }
        if let Some(b) = below {
            self.node_mut(b).up = Some(id);
        }
        self.node_mut(target).down = Some(id);
    }

    /// Find `(row, col)` with `row > col` in column `col`
    fn locate(&self, row: usize, col: usize) -> Slot {
        let mut cur = self.diag[col];
        loop {
            match self.node(cur).down {
                Some(next) => {
                    let r = self.node(next).row;
                    if r == row {
                        return Slot::Found(next);
                    }
                    if r > row {
                        return Slot::Before(next);
                    }
                    cur = next;
                }
                None => return Slot::After(cur),
            }
        }
    }

    /// Value at `(row, col)`; the upper triangle reads its mirror
    pub fn query(&self, row: usize, col: usize) -> f64 {
        let size = self.dim();
        if row >= size || col >= size {
            return 0.0;
        }
        let (row, col) = if row < col { (col, row) } else { (row, col) };
        if row == col {
            return self.node(self.diag[col]).value;
        }
        match self.locate(row, col) {
            Slot::Found(id) => self.node(id).value,
            _ => 0.0,
        }
    }

    fn update_with<F>(&mut self, row: usize, col: usize, value: f64, f: F) -> f64
    where
        F: FnOnce(f64) -> f64,
    {
        let size = self.dim();
        if row >= size || col >= size {
            return 0.0;
        }
        let (row, col) = if row < col { (col, row) } else { (row, col) };
        if row == col {
            let head = self.diag[col];
            let node = self.node_mut(head);
            node.value = f(node.value);
            return node.value;
        }
        match self.locate(row, col) {
            Slot::Found(id) => {
                let node = self.node_mut(id);
                node.value = f(node.value);
                node.value
            }
            _ if value == 0.0 => 0.0,
            Slot::Before(target) => {
                let id = self.push_node(row, col, value);
                self.splice_before(id, target);
                value
            }
            Slot::After(target) => {
                let id = self.push_node(row, col, value);
                self.splice_after(id, target);
                value
            }
        }
    }

    /// Store `value` at `(row, col)` and its mirror
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> f64 {
        self.update_with(row, col, value, |_| value)
    }

    /// Accumulate `value` at `(row, col)` and its mirror, inserting on a miss
    pub fn add(&mut self, row: usize, col: usize, value: f64) -> f64 {
        if value == 0.0 {
            return 0.0;
        }
        self.update_with(row, col, value, |old| old + value)
    }

    /// Entries of column `col` from the diagonal down, as `(row, value)`
    pub fn column(&self, col: usize) -> ColumnIter<'_> {
        ColumnIter {
            matrix: self,
            next: self.diag.get(col).copied(),
        }
    }

    /// Entries of row `row` left of the diagonal, as `(col, value)`
    ///
    /// Empty until `diag_up` has run.
    pub fn row_lower(&self, row: usize) -> RowIter<'_> {
        RowIter {
            matrix: self,
            next: self.diag.get(row).and_then(|&d| self.node(d).left),
        }
    }

    /// Full in-place `A = L·D·Lᵀ`, inserting fill-in nodes
    pub fn ldlt(&mut self) -> MatrixResult<()> {
        self.factorize(Factorization::Ldlt)
    }

    /// In-place incomplete LDLᵀ on the existing pattern
    ///
    /// Every update whose target node exists is applied, the diagonal
    /// included; updates to structurally absent positions are dropped.
    pub fn ildlt(&mut self) -> MatrixResult<()> {
        self.factorize(Factorization::IncompleteLdlt)
    }

    fn factorize(&mut self, kind: Factorization) -> MatrixResult<()> {
        if self.factor.is_some() {
            return Err(MatrixError::AlreadyFactorized);
        }
        let fill_in = kind == Factorization::Ldlt;
        let nnz_before = self.nnz();
        let mut dropped = 0usize;

        for c in 0..self.dim() {
            let head = self.diag[c];
            let d = self.node(head).value;
            if d == 0.0 || !d.is_finite() {
                return Err(MatrixError::Singular { index: c });
            }

            let w = 1.0 / d;
            let mut cur = self.node(head).down;
            while let Some(id) = cur {
                let node = self.node_mut(id);
                node.value *= w;
                cur = node.down;
            }

            // A(k,i) -= d·L(i,c)·L(k,c) for every pair k >= i below the diagonal
            let mut pivot = self.node(head).down;
            while let Some(pid) = pivot {
                let i = self.node(pid).row;
                let v = d * self.node(pid).value;
                let mut cursor = self.diag[i];

                let mut walk = Some(pid);
                while let Some(kid) = walk {
                    let k = self.node(kid).row;
                    let delta = v * self.node(kid).value;

                    if k == i {
                        self.node_mut(cursor).value -= delta;
                    } else {
                        while let Some(next) = self.node(cursor).down {
                            if self.node(next).row >= k {
                                break;
                            }
                            cursor = next;
                        }
                        let next = self.node(cursor).down;
                        match next {
                            Some(next) if self.node(next).row == k => {
                                self.node_mut(next).value -= delta;
                                cursor = next;
                            }
                            _ if fill_in => {
                                let id = self.push_node(k, i, -delta);
                                self.splice_after(id, cursor);
                                cursor = id;
                            }
                            _ => dropped += 1,
                        }
                    }
                    walk = self.node(kid).down;
                }
                pivot = self.node(pid).down;
            }
        }

        self.factor = Some(kind);
        debug!(
            "LLS {:?}: n = {}, {} fill-in nodes, {} updates dropped",
            kind,
            self.dim(),
            self.nnz() - nnz_before,
            dropped
        );
        Ok(())
    }

    /// Thread every sub-diagonal node into the `left` chain of its row
    ///
    /// Runs once; later insertions keep the chains complete on their own.
    pub fn diag_up(&mut self) -> MatrixResult<()> {
        if self.row_linked {
            return Err(MatrixError::RowLinksPresent);
        }
        for c in 0..self.dim() {
            let mut cur = self.node(self.diag[c]).down;
            while let Some(id) = cur {
                let head = self.diag[self.node(id).row];
                let first = self.node(head).left;
                self.node_mut(id).left = first;
                self.node_mut(head).left = Some(id);
                cur = self.node(id).down;
            }
        }
        self.row_linked = true;
        Ok(())
    }

    fn ensure_factored(&self, len: usize) -> MatrixResult<()> {
        match self.factor {
            Some(Factorization::Ldlt) | Some(Factorization::IncompleteLdlt) => {}
            _ => return Err(MatrixError::NotFactorized),
        }
        ensure_len(self.dim(), len)
    }

    /// Forward substitution with the unit lower factor along the row chains
    pub fn fe_lower(&self, v: &mut [f64]) -> MatrixResult<()> {
        self.ensure_factored(v.len())?;
        if !self.row_linked {
            return Err(MatrixError::RowLinksMissing);
        }
        for i in 0..self.dim() {
            let sum: f64 = self.row_lower(i).map(|(c, l)| l * v[c]).sum();
            v[i] -= sum;
        }
        Ok(())
    }

    /// Backward substitution with `Lᵀ` along the column chains
    pub fn bs_upper(&self, v: &mut [f64]) -> MatrixResult<()> {
        self.ensure_factored(v.len())?;
        for i in (0..self.dim()).rev() {
            let sum: f64 = self.column(i).skip(1).map(|(r, l)| l * v[r]).sum();
            v[i] -= sum;
        }
        Ok(())
    }

    /// `v[i] /= D(i)`
    pub fn diag_divide(&self, v: &mut [f64]) -> MatrixResult<()> {
        self.ensure_factored(v.len())?;
        for (vi, &d) in v.iter_mut().zip(&self.diag) {
            *vi /= self.node(d).value;
        }
        Ok(())
    }

    /// `v = (L·D·Lᵀ)⁻¹·v` in place
    pub fn substitute(&self, v: &mut [f64]) -> MatrixResult<()> {
        self.fe_lower(v)?;
        self.diag_divide(v)?;
        self.bs_upper(v)
    }

    fn prepared(&self, kind: Factorization) -> MatrixResult<Self> {
        let mut f = self.clone();
        f.factorize(kind)?;
        if !f.row_linked {
            f.diag_up()?;
        }
        Ok(f)
    }

    /// Factored, row-linked copy ready for substitution
    pub fn factorized(&self) -> MatrixResult<Self> {
        self.prepared(Factorization::Ldlt)
    }

    /// Incomplete factor of this matrix, ready to precondition
    pub fn incomplete_factor(&self) -> MatrixResult<Self> {
        self.prepared(Factorization::IncompleteLdlt)
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

    /// `y = A·x` using both triangles
    pub fn mul_v(&self, x: &[f64]) -> MatrixResult<Vec<f64>> {
        ensure_len(self.dim(), x.len())?;
        Ok(self.product(x))
    }

    fn product(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.dim()];
        for c in 0..self.dim() {
            let mut entries = self.column(c);
            if let Some((_, d)) = entries.next() {
                y[c] += d * x[c];
            }
            for (r, v) in entries {
                y[r] += v * x[c];
                y[c] += v * x[r];
            }
        }
        y
    }

    /// Unpreconditioned conjugate gradient
    pub fn cg(&self, b: &[f64], options: &SolverOptions) -> MatrixResult<IterativeSolution> {
        solve_cg(self, b, options)
    }

    /// Conjugate gradient preconditioned by the incomplete LDLᵀ of `p`
    pub fn pcg(
        &self,
        p: &LlsMatrix,
        b: &[f64],
        options: &SolverOptions,
    ) -> MatrixResult<IterativeSolution> {
        let c = p.incomplete_factor()?;
        solve_pcg(self, &c, b, options)
    }

    /// Dense copy with both triangles filled
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut mat = DMatrix::zeros(self.dim(), self.dim());
        for node in &self.nodes {
            mat[(node.row, node.col)] = node.value;
            mat[(node.col, node.row)] = node.value;
        }
        mat
    }
}

impl LinearOperator for LlsMatrix {
    fn dim(&self) -> usize {
        self.diag.len()
    }

    fn matvec(&self, x: &[f64]) -> Vec<f64> {
        self.product(x)
    }
}

impl Preconditioner for LlsMatrix {
    fn apply(&self, r: &[f64]) -> MatrixResult<Vec<f64>> {
        let mut z = r.to_vec();
        self.substitute(&mut z)?;
        Ok(z)
    }
}

/// Walks a column chain downwards from the diagonal
pub struct ColumnIter<'a> {
    matrix: &'a LlsMatrix,
    next: Option<NodeId>,
}

impl Iterator for ColumnIter<'_> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.matrix.node(self.next?);
        self.next = node.down;
        Some((node.row, node.value))
    }
}

/// Walks a row chain built by `diag_up`
pub struct RowIter<'a> {
    matrix: &'a LlsMatrix,
    next: Option<NodeId>,
}

impl Iterator for RowIter<'_> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.matrix.node(self.next?);
        self.next = node.left;
        Some((node.col, node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Constraints, CooMatrix};
    use approx::assert_relative_eq;

    fn arrow(n: usize) -> CooMatrix {
        let mut coo = CooMatrix::new(n);
        for i in 0..n {
            coo.set(i, i, 10.0);
            if i > 0 {
                coo.set(0, i, 1.0);
                coo.set(i, 0, 1.0);
            }
        }
        coo
    }

    fn poisson(n: usize) -> LlsMatrix {
        let mut coo = CooMatrix::new(n);
        for i in 0..n {
            coo.set(i, i, 2.0);
            if i + 1 < n {
                coo.set(i, i + 1, -1.0);
                coo.set(i + 1, i, -1.0);
            }
        }
        coo.to_lls(&Constraints::none(n)).unwrap()
    }

    fn rows_of(m: &LlsMatrix, col: usize) -> Vec<usize> {
        m.column(col).map(|(r, _)| r).collect()
    }

    #[test]
    fn test_columns_from_coo() {
        let m = poisson(3);
        assert_eq!(m.nnz(), 5);
        assert_eq!(rows_of(&m, 0), vec![0, 1]);
        assert_eq!(rows_of(&m, 1), vec![1, 2]);
        assert_eq!(rows_of(&m, 2), vec![2]);
        assert_relative_eq!(m.query(0, 1), -1.0);
        assert_relative_eq!(m.query(1, 0), -1.0);
        assert_relative_eq!(m.query(0, 2), 0.0);
        assert_relative_eq!(m.query(7, 0), 0.0);
    }

    #[test]
    fn test_insertion_keeps_rows_ascending() {
        let mut m = LlsMatrix::new(5);
        m.add(4, 0, 1.0);
        m.add(2, 0, 2.0);
        m.add(0, 3, 3.0); // mirrored to (3, 0)
        m.add(1, 0, 4.0);
        m.add(2, 0, 1.0);
        assert_eq!(rows_of(&m, 0), vec![0, 1, 2, 3, 4]);
        assert_relative_eq!(m.query(0, 2), 3.0);
        assert_eq!(m.nnz(), 9);

        // up links mirror the down links
        let mut cur = Some(m.diag[0]);
        let mut prev = None;
        while let Some(id) = cur {
            assert_eq!(m.node(id).up, prev);
            prev = Some(id);
            cur = m.node(id).down;
        }
    }

    #[test]
    fn test_ldlt_matches_crs() {
        let coo = arrow(5);
        let mut lls = coo.to_lls(&Constraints::none(5)).unwrap();
        let crs = coo.to_crs(&Constraints::none(5)).unwrap().factorized().unwrap();
        lls.ldlt().unwrap();
        // the dense first column fills the whole trailing triangle
        assert_eq!(lls.nnz(), 15);
        for r in 0..5 {
            for c in 0..=r {
                assert_relative_eq!(lls.query(r, c), crs.query(r, c), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_ildlt_keeps_pattern() {
        let coo = arrow(5);
        let mut lls = coo.to_lls(&Constraints::none(5)).unwrap();
        let nnz = lls.nnz();
        lls.ildlt().unwrap();
        assert_eq!(lls.nnz(), nnz);
        assert_eq!(lls.factorization(), Some(Factorization::IncompleteLdlt));
        // diagonal still receives its update: 10 - 10·(1/10)² = 9.9
        assert_relative_eq!(lls.query(3, 3), 9.9, epsilon = 1e-12);
        assert_relative_eq!(lls.query(3, 0), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_ildlt_is_exact_without_fill_in() {
        let a = poisson(6);
        let mut full = a.clone();
        let mut incomplete = a.clone();
        full.ldlt().unwrap();
        incomplete.ildlt().unwrap();
        for c in 0..6 {
            assert_eq!(
                full.column(c).collect::<Vec<_>>(),
                incomplete.column(c).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn test_diag_up_builds_row_chains() {
        let mut m = arrow(4).to_lls(&Constraints::none(4)).unwrap();
        assert_eq!(m.row_lower(2).count(), 0);
        m.ldlt().unwrap();
        m.diag_up().unwrap();
        let mut cols: Vec<usize> = m.row_lower(3).map(|(c, _)| c).collect();
        cols.sort_unstable();
        assert_eq!(cols, vec![0, 1, 2]);
        assert!(matches!(m.diag_up(), Err(MatrixError::RowLinksPresent)));
    }

    #[test]
    fn test_insert_after_diag_up_is_row_linked() {
        let mut m = poisson(4);
        m.diag_up().unwrap();
        m.add(3, 0, 0.5);
        let mut cols: Vec<usize> = m.row_lower(3).map(|(c, _)| c).collect();
        cols.sort_unstable();
        assert_eq!(cols, vec![0, 2]);
    }

    #[test]
    fn test_misuse_errors() {
        let mut m = poisson(3);
        let mut v = vec![1.0; 3];
        assert!(matches!(m.fe_lower(&mut v), Err(MatrixError::NotFactorized)));
        m.ldlt().unwrap();
        assert!(matches!(m.fe_lower(&mut v), Err(MatrixError::RowLinksMissing)));
        assert!(matches!(m.ldlt(), Err(MatrixError::AlreadyFactorized)));
        m.diag_up().unwrap();
        let mut short = vec![1.0; 2];
        assert!(matches!(
            m.substitute(&mut short),
            Err(MatrixError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_pivot() {
        let mut m = LlsMatrix::new(2);
        m.set(0, 0, 1.0);
        assert!(matches!(m.ldlt(), Err(MatrixError::Singular { index: 1 })));
    }

    #[test]
    fn test_solve_and_mul_v() {
        let coo = arrow(6);
        let a = coo.to_lls(&Constraints::none(6)).unwrap();
        let b: Vec<f64> = (1..=6).map(|i| i as f64).collect();
        let x = a.solve(&[&b]).unwrap().remove(0);
        let ax = a.mul_v(&x).unwrap();
        for (l, r) in ax.iter().zip(&b) {
            assert_relative_eq!(l, r, epsilon = 1e-12);
        }
        assert_eq!(a.mul_v(&b).unwrap(), coo.mul_v(&b).unwrap());
    }

    #[test]
    fn test_pcg_with_exact_preconditioner() {
        let a = poisson(10);
        let b = vec![1.0; 10];
        let sol = a.pcg(&a, &b, &SolverOptions::default()).unwrap();
        assert_eq!(sol.iterations, 1);
        let cg = a.cg(&b, &SolverOptions::default().with_tolerance(1e-24)).unwrap();
        for (u, v) in sol.x.iter().zip(&cg.x) {
            assert_relative_eq!(u, v, epsilon = 1e-6);
        }
    }
}

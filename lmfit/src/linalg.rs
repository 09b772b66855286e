use dyn_stack::{MemBuffer, MemStack};
use faer::{
    Conj, Mat, Par,
    linalg::{
        householder::{
            apply_block_householder_sequence_transpose_on_the_left_in_place_scratch,
            apply_block_householder_sequence_transpose_on_the_left_in_place_with_conj,
        },
        solvers::ColPivQr,
        triangular_solve::solve_upper_triangular_in_place,
    },
};

/// Why the damped system couldn't be used.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub enum FactorError {
    /// The matrix had a NaN or infinite entry.
    #[error("The damped system contains non-finite entries")]
    NonFinite,
    /// The leading diagonal of R multiplied out to something that isn't
    /// strictly positive and finite, so the step isn't usable.
    #[error("The damped system is not positive definite (pivot product {0})")]
    NotPositiveDefinite(f64),
}

/// Column-pivoted QR, `A·P = Q·R`, solving the damped normal equations.
///
/// Signs of R's diagonal depend on the reflectors faer picks, so the rank
/// and the pivot product are read from its magnitudes, as if R had been
/// normalized to a non-negative diagonal. Column pivoting makes those
/// magnitudes non-increasing. The rank is the number of leading entries
/// above `ε · n · |R₀₀|`; directions past the rank get no correction at all.
///
/// Don't share one solver across threads. The right-hand side and the
/// Householder scratch are reused for every solve.
pub struct PivotedQr {
    n: usize,
    /// None when the last matrix was all zeros.
    qr: Option<ColPivQr<f64>>,
    /// `pivots[k]` is the original column that ended up in position k.
    pivots: Vec<usize>,
    rank: usize,
    pivot_product: f64,
    rhs: Mat<f64>,
    scratch: Option<MemBuffer>,
}

impl PivotedQr {
    /// Allocate a solver for n×n systems.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            qr: None,
            pivots: (0..n).collect(),
            rank: 0,
            pivot_product: 1.0,
            rhs: Mat::zeros(n, 1),
            scratch: None,
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.n
    }

    /// Numerical rank found by the last factorization.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Product of |R|'s diagonal over the first `rank` entries, from the last factorization.
    pub fn pivot_product(&self) -> f64 {
        self.pivot_product
    }

    #[cfg(test)]
    pub(crate) fn pivots(&self) -> &[usize] {
        &self.pivots
    }

    /// |R[k][k]| from the last factorization.
    #[cfg(test)]
    pub(crate) fn r_diagonal(&self, k: usize) -> f64 {
        self.qr.as_ref().map_or(0.0, |qr| qr.R()[(k, k)].abs())
    }

    /// Factor `a`, which must be `dim() × dim()`.
    pub fn factor(&mut self, a: &Mat<f64>) -> Result<(), FactorError> {
        let n = self.dim();
        debug_assert_eq!(a.nrows(), n, "damped system has the wrong number of rows");
        debug_assert_eq!(a.ncols(), n, "damped system has the wrong number of columns");

        let mut all_zero = true;
        for j in 0..n {
            for i in 0..n {
                let v = a[(i, j)];
                if !v.is_finite() {
                    return Err(FactorError::NonFinite);
                }
                all_zero &= v == 0.0;
            }
        }

        // faer scales by the largest column norm, which a zero matrix doesn't have.
        if all_zero {
            self.qr = None;
            for (k, pivot) in self.pivots.iter_mut().enumerate() {
                *pivot = k;
            }
            self.rank = 0;
            self.pivot_product = 1.0;
            return Ok(());
        }

        let qr = a.col_piv_qr();
        self.pivots.copy_from_slice(qr.P().arrays().0);

        let r = qr.R();
        if (0..n).any(|k| !r[(k, k)].is_finite()) {
            self.qr = None;
            return Err(FactorError::NonFinite);
        }
        let cutoff = f64::EPSILON * n as f64 * r[(0, 0)].abs();
        self.rank = (0..n).take_while(|&k| r[(k, k)].abs() > cutoff).count();
        self.pivot_product = (0..self.rank).map(|k| r[(k, k)].abs()).product();
        self.qr = Some(qr);

        if self.pivot_product.is_finite() && self.pivot_product > 0.0 {
            Ok(())
        } else {
            Err(FactorError::NotPositiveDefinite(self.pivot_product))
        }
    }

    /// Solve `A·x = rhs` with the last successful factorization.
    /// Entries of `x` whose pivoted position is past the rank are set to zero.
    pub fn solve(&mut self, rhs: &[f64], x: &mut [f64]) {
        debug_assert_eq!(rhs.len(), self.n);
        debug_assert_eq!(x.len(), self.n);

        x.fill(0.0);
        let Some(qr) = &self.qr else {
            return;
        };
        let rank = self.rank;

        for (i, &v) in rhs.iter().enumerate() {
            self.rhs[(i, 0)] = v;
        }

        // y = Qᵀ·rhs
        let q_basis = qr.Q_basis();
        let q_coeff = qr.Q_coeff();
        let scratch = self.scratch.get_or_insert_with(|| {
            MemBuffer::new(
                apply_block_householder_sequence_transpose_on_the_left_in_place_scratch::<f64>(
                    q_basis.nrows(),
                    q_coeff.nrows(),
                    1,
                ),
            )
        });
        apply_block_householder_sequence_transpose_on_the_left_in_place_with_conj(
            q_basis,
            q_coeff,
            Conj::No,
            self.rhs.as_mut(),
            Par::Seq,
            MemStack::new(scratch),
        );

        // Back-substitute the leading rank×rank block of R.
        solve_upper_triangular_in_place(
            qr.R().get(..rank, ..rank),
            self.rhs.as_mut().get_mut(..rank, ..),
            Par::Seq,
        );

        for (k, &original) in self.pivots.iter().enumerate().take(rank) {
            x[original] = self.rhs[(k, 0)];
        }
    }
}

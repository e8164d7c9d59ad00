//! Small dense linear algebra for the linear-regression end node.
//!
//! A leaf's posterior precision `XᵀX + diag(λ)σ²` is a tiny symmetric
//! positive-definite matrix (order = number of predictors + 1). These
//! helpers factor it into an upper Cholesky factor and solve the two
//! triangular systems the posterior draw needs.

use bart_core::Real;
use nalgebra::DMatrix;

/// Dot product of two equal-length slices.
///
/// # Panics
/// Panics if the lengths differ.
#[inline]
pub fn dot(a: &[Real], b: &[Real]) -> Real {
    assert_eq!(a.len(), b.len(), "dot product length mismatch");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Upper Cholesky factor `R` of a symmetric positive-definite matrix,
/// so that `RᵀR = A`.
///
/// Returns `None` when the matrix is not positive-definite.
pub fn cholesky_upper(a: &DMatrix<Real>) -> Option<DMatrix<Real>> {
    debug_assert_eq!(a.nrows(), a.ncols(), "matrix must be square");
    a.clone().cholesky().map(|c| c.l().transpose())
}

/// Solve `Rᵀ x = b` in place by forward substitution, `R` upper
/// triangular.
pub fn solve_upper_transposed_in_place(r: &DMatrix<Real>, b: &mut [Real]) {
    let n = b.len();
    debug_assert_eq!(r.nrows(), n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= r[(k, i)] * b[k];
        }
        b[i] = sum / r[(i, i)];
    }
}

/// Solve `R x = b` in place by back substitution, `R` upper triangular.
pub fn solve_upper_in_place(r: &DMatrix<Real>, b: &mut [Real]) {
    let n = b.len();
    debug_assert_eq!(r.nrows(), n);
    for i in (0..n).rev() {
        let mut sum = b[i];
        for k in (i + 1)..n {
            sum -= r[(i, k)] * b[k];
        }
        b[i] = sum / r[(i, i)];
    }
}

/// Sum of the logs of the diagonal of an upper-triangular factor
/// (half the log-determinant of `RᵀR`).
pub fn log_diagonal_sum(r: &DMatrix<Real>) -> Real {
    (0..r.nrows()).map(|i| r[(i, i)].ln()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd_3x3() -> DMatrix<Real> {
        // A = BᵀB + I for a fixed B, guaranteed positive-definite
        let b = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.0, 0.5, 1.0, 3.0, 2.0, 0.0, 1.0]);
        b.transpose() * &b + DMatrix::identity(3, 3)
    }

    #[test]
    fn cholesky_reconstructs() {
        let a = spd_3x3();
        let r = cholesky_upper(&a).unwrap();
        let back = r.transpose() * &r;
        for i in 0..3 {
            for j in 0..3 {
                assert!((back[(i, j)] - a[(i, j)]).abs() < 1e-10);
            }
            for j in 0..i {
                assert_eq!(r[(i, j)], 0.0, "R must be upper triangular");
            }
        }
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(cholesky_upper(&a).is_none());
    }

    #[test]
    fn triangular_solves_invert() {
        let a = spd_3x3();
        let r = cholesky_upper(&a).unwrap();
        let x = [1.0, -2.0, 0.5];
        // b = A x, then solving RᵀR y = b must recover x
        let bvec = &a * DMatrix::from_column_slice(3, 1, &x);
        let mut y = [bvec[(0, 0)], bvec[(1, 0)], bvec[(2, 0)]];
        solve_upper_transposed_in_place(&r, &mut y);
        solve_upper_in_place(&r, &mut y);
        for (yi, xi) in y.iter().zip(&x) {
            assert!((yi - xi).abs() < 1e-9, "{yi} vs {xi}");
        }
    }

    #[test]
    fn log_det_matches() {
        let a = spd_3x3();
        let r = cholesky_upper(&a).unwrap();
        assert!((2.0 * log_diagonal_sum(&r) - a.determinant().ln()).abs() < 1e-9);
    }
}

use crate::error::RvmError;
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::triangular::{Diag, SolveTriangular};
use ndarray_linalg::{Cholesky, Inverse, UPLO};

/// Lower-triangular Cholesky factor of a symmetric matrix, with diagonal
/// jitter retry. On failure the diagonal is inflated by a jitter that starts
/// at machine epsilon and doubles each attempt; past a ceiling of 1.0 the
/// failure is fatal.
pub fn cholesky_jittered(h: &Array2<f64>) -> Result<Array2<f64>, RvmError> {
    if let Ok(l) = h.cholesky(UPLO::Lower) {
        return Ok(l);
    }
    let mut jitter = f64::EPSILON;
    while jitter <= 1.0 {
        let mut inflated = h.clone();
        for d in inflated.diag_mut() {
            *d += jitter;
        }
        if let Ok(l) = inflated.cholesky(UPLO::Lower) {
            return Ok(l);
        }
        jitter *= 2.0;
    }
    Err(RvmError::NumericalBreakdown(format!(
        "Cholesky failed for a {0}x{0} matrix after jitter retries",
        h.nrows()
    )))
}

/// Solve L * X = B for a lower-triangular L and matrix right-hand side.
pub fn solve_lower_mat(l: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>, RvmError> {
    Ok(l.solve_triangular(UPLO::Lower, Diag::NonUnit, b)?)
}

/// Solve L * x = b for a lower-triangular L and vector right-hand side.
pub fn solve_lower(l: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, RvmError> {
    let b2 = b.clone().insert_axis(Axis(1));
    let x = l.solve_triangular(UPLO::Lower, Diag::NonUnit, &b2)?;
    Ok(x.remove_axis(Axis(1)))
}

/// Solve (L L^T) x = b given the lower Cholesky factor: a forward solve
/// followed by a backward solve.
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, RvmError> {
    let z = solve_lower(l, b)?;
    let lt = l.t().to_owned();
    let z2 = z.insert_axis(Axis(1));
    let x = lt.solve_triangular(UPLO::Upper, Diag::NonUnit, &z2)?;
    Ok(x.remove_axis(Axis(1)))
}

/// Inverse of (L L^T) from its lower Cholesky factor:
/// Sigma = (L^-1)^T (L^-1).
pub fn inv_from_cholesky(l: &Array2<f64>) -> Result<Array2<f64>, RvmError> {
    let eye = Array2::<f64>::eye(l.nrows());
    let l_inv = solve_lower_mat(l, &eye)?;
    Ok(l_inv.t().dot(&l_inv))
}

/// Reciprocal 1-norm condition estimate, 1 / (||A||_1 * ||A^-1||_1).
/// A matrix that cannot be inverted reports 0.
pub fn rcond(a: &Array2<f64>) -> f64 {
    match a.inv() {
        Ok(a_inv) => {
            let denom = norm1(a) * norm1(&a_inv);
            if denom > 0.0 {
                1.0 / denom
            } else {
                0.0
            }
        }
        Err(_) => 0.0,
    }
}

/// Induced matrix 1-norm: the maximum absolute column sum.
fn norm1(a: &Array2<f64>) -> f64 {
    let mut max = 0.0;
    for col in a.columns() {
        let sum: f64 = col.iter().map(|v| v.abs()).sum();
        if sum > max {
            max = sum;
        }
    }
    max
}

/// Force exact symmetry, (A + A^T) / 2.
pub fn symmetrize(a: &Array2<f64>) -> Array2<f64> {
    (a + &a.t()) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cholesky_solve_recovers_solution() {
        // H = [[4, 2], [2, 3]], x = [1, -1], b = H x
        let h = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![2.0, -1.0];
        let l = cholesky_jittered(&h).unwrap();
        let x = cholesky_solve(&l, &b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] + 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_jitter_recovers_semidefinite() {
        // rank-1, singular without jitter
        let h = array![[1.0, 1.0], [1.0, 1.0]];
        let l = cholesky_jittered(&h).unwrap();
        let rebuilt = l.dot(&l.t());
        assert!((rebuilt[[0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_inv_from_cholesky_matches_inverse() {
        let h = array![[5.0, 1.0], [1.0, 3.0]];
        let l = cholesky_jittered(&h).unwrap();
        let sigma = inv_from_cholesky(&l).unwrap();
        let ident = h.dot(&sigma);
        assert!((ident[[0, 0]] - 1.0).abs() < 1e-10);
        assert!(ident[[0, 1]].abs() < 1e-10);
        assert!((ident[[1, 1]] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_rcond_identity_is_one() {
        let eye = Array2::<f64>::eye(4);
        assert!((rcond(&eye) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rcond_near_singular_is_tiny() {
        let a = array![[1.0, 1.0], [1.0, 1.0 + 1e-12]];
        assert!(rcond(&a) < 1e-6);
    }

    #[test]
    fn test_symmetrize() {
        let a = array![[1.0, 2.0], [0.0, 1.0]];
        let s = symmetrize(&a);
        assert_eq!(s[[0, 1]], s[[1, 0]]);
        assert_eq!(s[[0, 1]], 1.0);
    }
}

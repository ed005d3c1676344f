use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// A candidate kernel template, before it is centered on a dataset.
///
/// Centering maps a template to concrete basis functions: the DC template
/// yields a single constant column, the RBF templates yield one basis per
/// training observation. The declared order of templates fixes the basis
/// ordering used everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelSpec {
    /// Constant bias basis, k(x) = 1.
    Dc,
    /// Radial basis function with a fixed bandwidth,
    /// k(x, c) = exp(-||x - c||^2 / sigma^2).
    Rbf { sigma: f64 },
    /// RBF whose effective bandwidth is sigma * sqrt(n_features), so the
    /// same sigma behaves comparably across input dimensionalities.
    RbfScaled { sigma: f64 },
}

impl KernelSpec {
    /// Center this template on a training matrix, producing concrete basis
    /// functions in row order.
    pub fn center(&self, x: &Array2<f64>) -> Vec<CenteredKernel> {
        match *self {
            KernelSpec::Dc => vec![CenteredKernel::Dc],
            KernelSpec::Rbf { sigma } => Self::centers_of(x, sigma),
            KernelSpec::RbfScaled { sigma } => {
                let scaled = sigma * (x.ncols() as f64).sqrt();
                Self::centers_of(x, scaled)
            }
        }
    }

    fn centers_of(x: &Array2<f64>, bandwidth: f64) -> Vec<CenteredKernel> {
        x.rows()
            .into_iter()
            .map(|row| CenteredKernel::Rbf {
                center: row.to_owned(),
                bandwidth,
            })
            .collect()
    }
}

/// A basis function: a kernel template bound to a concrete center.
#[derive(Debug, Clone, PartialEq)]
pub enum CenteredKernel {
    Dc,
    Rbf {
        center: Array1<f64>,
        bandwidth: f64,
    },
}

impl CenteredKernel {
    /// Evaluate this basis at every row of `x`, yielding one Gram column.
    pub fn evaluate(&self, x: &Array2<f64>) -> Array1<f64> {
        match self {
            CenteredKernel::Dc => Array1::ones(x.nrows()),
            CenteredKernel::Rbf { center, bandwidth } => {
                let inv_sq = 1.0 / (bandwidth * bandwidth);
                let mut col = Array1::<f64>::zeros(x.nrows());
                for (i, row) in x.rows().into_iter().enumerate() {
                    let mut dist_sq = 0.0;
                    for (a, b) in row.iter().zip(center.iter()) {
                        let d = a - b;
                        dist_sq += d * d;
                    }
                    col[i] = (-dist_sq * inv_sq).exp();
                }
                col
            }
        }
    }
}

/// Build the Gram matrix: column j is `kernels[j]` evaluated at every row
/// of `x`. Block evaluation is just `gram(x, &kernels[a..b])`.
pub fn gram(x: &Array2<f64>, kernels: &[CenteredKernel]) -> Array2<f64> {
    let mut phi = Array2::<f64>::zeros((x.nrows(), kernels.len()));
    for (j, kernel) in kernels.iter().enumerate() {
        phi.column_mut(j).assign(&kernel.evaluate(x));
    }
    phi
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Array2<f64> {
        Array2::from_shape_vec((3, 2), vec![0.0, 0.0, 1.0, 0.0, 0.0, 2.0]).unwrap()
    }

    #[test]
    fn test_dc_centers_to_single_basis() {
        let x = grid();
        let centered = KernelSpec::Dc.center(&x);
        assert_eq!(centered.len(), 1);
        let col = centered[0].evaluate(&x);
        assert_eq!(col.to_vec(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_rbf_centers_one_basis_per_row() {
        let x = grid();
        let centered = KernelSpec::Rbf { sigma: 1.0 }.center(&x);
        assert_eq!(centered.len(), 3);

        // self-similarity is exactly one
        let phi = gram(&x, &centered);
        for i in 0..3 {
            assert!((phi[[i, i]] - 1.0).abs() < 1e-12);
        }
        // symmetric in (point, center) for a shared bandwidth
        assert!((phi[[0, 1]] - phi[[1, 0]]).abs() < 1e-12);
        // farther points decay
        assert!(phi[[0, 2]] < phi[[0, 1]]);
    }

    #[test]
    fn test_rbf_known_value() {
        let x = grid();
        let kernel = CenteredKernel::Rbf {
            center: Array1::from(vec![0.0, 0.0]),
            bandwidth: 1.0,
        };
        let col = kernel.evaluate(&x);
        assert!((col[0] - 1.0).abs() < 1e-12);
        assert!((col[1] - (-1.0_f64).exp()).abs() < 1e-12);
        assert!((col[2] - (-4.0_f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_scaled_rbf_widens_with_dimension() {
        let x = grid();
        let plain = KernelSpec::Rbf { sigma: 1.0 }.center(&x);
        let scaled = KernelSpec::RbfScaled { sigma: 1.0 }.center(&x);
        let phi_plain = gram(&x, &plain);
        let phi_scaled = gram(&x, &scaled);
        // sqrt(2) bandwidth decays slower than 1.0 off the diagonal
        assert!(phi_scaled[[0, 1]] > phi_plain[[0, 1]]);
    }

    #[test]
    fn test_gram_shape_and_order() {
        let x = grid();
        let mut kernels = KernelSpec::Dc.center(&x);
        kernels.extend(KernelSpec::Rbf { sigma: 1.0 }.center(&x));
        let phi = gram(&x, &kernels);
        assert_eq!(phi.shape(), &[3, 4]);
        // first column is the bias
        assert_eq!(phi.column(0).to_vec(), vec![1.0, 1.0, 1.0]);
    }
}

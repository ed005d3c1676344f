use crate::error::RvmError;
use crate::linalg;
use crate::rvm::{ExitReason, TrainOptions, TrainingOutcome, TrainingWarning};
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::Inverse;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Figueiredo EM-style trainer: a fixed-point iteration derived from the
/// Jeffreys-prior EM for sparse linear models, adapted to binary targets
/// through probit surrogate responses. Bases are pruned by weight magnitude
/// relative to the largest weight.
pub struct Figueiredo;

impl Figueiredo {
    /// Train on -1/+1 targets `y` against the full Gram matrix `phi`
    /// (N x n_basis).
    pub fn fit(
        y: &Array1<f64>,
        phi: &Array2<f64>,
        opts: &TrainOptions,
    ) -> Result<TrainingOutcome, RvmError> {
        let n = phi.nrows();
        let n_basis = phi.ncols();
        if y.len() != n {
            return Err(RvmError::ShapeMismatch(format!(
                "{} targets but {} Gram rows",
                y.len(),
                n
            )));
        }

        if n_basis == 0 {
            return Ok(TrainingOutcome::empty(n_basis));
        }

        let mut warnings = Vec::new();

        // G = Phi' Phi, inflated until it is numerically invertible
        let mut g = phi.t().dot(phi);
        let mut jitter = f64::EPSILON;
        while linalg::rcond(&g) < 1e-6 {
            if warnings.is_empty() {
                warnings.push(TrainingWarning::IllConditionedGram);
                if opts.verbose {
                    println!("Figueiredo: ill-conditioned Gram matrix, regularizing diagonal");
                }
            }
            for d in g.diag_mut() {
                *d += jitter;
            }
            jitter *= 2.0;
        }

        // Least-squares initialization on the -1/+1 targets
        let g_inv = g.inv()?;
        let mut beta: Array1<f64> = g_inv.dot(&phi.t().dot(y));

        let normal = Normal::new(0.0, 1.0).unwrap();

        let mut converged = false;
        let mut exit_value = f64::INFINITY;
        let mut iterations = 0;

        for iteration in 1..=opts.max_iterations {
            iterations = iteration;
            let beta_prev = beta.clone();

            let active = active_indices(&beta);
            if active.is_empty() {
                break;
            }

            // Probit surrogate responses: the linear score shifted by the
            // truncated-normal mean correction for each class
            let mut scores = phi.dot(&beta);
            for i in 0..n {
                let pdf = normal.pdf(scores[i]);
                let cdf_neg = normal.cdf(-scores[i]);
                if y[i] > 0.0 {
                    scores[i] += pdf / (1.0 - cdf_neg).max(1e-12);
                } else {
                    scores[i] -= pdf / cdf_neg.max(1e-12);
                }
            }

            // Solve (I + U Phi_A' Phi_A U) z = U Phi_A' S with U = diag(|beta_A|)
            let phi_a = phi.select(Axis(1), &active);
            let u: Array1<f64> = active.iter().map(|&j| beta[j].abs()).collect();

            let mut system = phi_a.t().dot(&phi_a);
            for ((r, c), v) in system.indexed_iter_mut() {
                *v *= u[r] * u[c];
            }
            for d in system.diag_mut() {
                *d += 1.0;
            }
            let rhs = &u * &phi_a.t().dot(&scores);

            let l = linalg::cholesky_jittered(&system)?;
            let z = linalg::cholesky_solve(&l, &rhs)?;

            beta.fill(0.0);
            for (pos, &j) in active.iter().enumerate() {
                beta[j] = u[pos] * z[pos];
            }

            // Prune: keep only weights above the relevance fraction of the
            // largest weight; pruned entries are exactly zero
            let max_abs = beta.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            let threshold = max_abs * opts.beta_relevant_tolerance;
            for v in beta.iter_mut() {
                if v.abs() <= threshold {
                    *v = 0.0;
                }
            }

            let prev_norm = beta_prev.mapv(|v| v * v).sum().sqrt();
            let diff_norm = (&beta - &beta_prev).mapv(|v| v * v).sum().sqrt();
            exit_value = diff_norm / prev_norm.max(f64::EPSILON);

            if opts.verbose {
                println!(
                    "Figueiredo iteration {:>4}: {} relevant, relative change {:.3e}",
                    iteration,
                    active_indices(&beta).len(),
                    exit_value
                );
            }

            if exit_value < opts.beta_converged_tolerance {
                converged = true;
                break;
            }
        }

        let active = active_indices(&beta);
        if active.is_empty() {
            warnings.push(TrainingWarning::NoRelevantFeatures);
        }

        Ok(TrainingOutcome {
            beta,
            active,
            sigma: None,
            converged,
            exit_reason: if converged {
                ExitReason::BetaConverged
            } else {
                ExitReason::MaxIterations
            },
            exit_value,
            iterations,
            warnings,
        })
    }
}

fn active_indices(beta: &Array1<f64>) -> Vec<usize> {
    beta.iter()
        .enumerate()
        .filter(|(_, v)| **v != 0.0)
        .map(|(j, _)| j)
        .collect()
}

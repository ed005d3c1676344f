use crate::error::RvmError;
use crate::irls::{IrlsFit, PenalizedIrls};
use crate::kernel::{self, CenteredKernel};
use crate::linalg;
use crate::rvm::{ExitReason, TrainOptions, TrainingOutcome, TrainingWarning};
use ndarray::{s, Array1, Array2, Axis};

/// Supplier of Gram matrix columns. The trainer only ever asks for column
/// ranges, so implementations decide whether the matrix is materialized once
/// or rebuilt on demand.
pub trait GramSource {
    fn n_obs(&self) -> usize;
    fn n_basis(&self) -> usize;
    /// Columns `start..end` as an N x (end-start) matrix.
    fn block(&self, start: usize, end: usize) -> Array2<f64>;
    /// A single column.
    fn column(&self, j: usize) -> Array1<f64>;
}

/// Gram source over a fully precomputed matrix.
pub struct InMemoryGram {
    phi: Array2<f64>,
}

impl InMemoryGram {
    pub fn new(phi: Array2<f64>) -> Self {
        InMemoryGram { phi }
    }
}

impl GramSource for InMemoryGram {
    fn n_obs(&self) -> usize {
        self.phi.nrows()
    }

    fn n_basis(&self) -> usize {
        self.phi.ncols()
    }

    fn block(&self, start: usize, end: usize) -> Array2<f64> {
        self.phi.slice(s![.., start..end]).to_owned()
    }

    fn column(&self, j: usize) -> Array1<f64> {
        self.phi.column(j).to_owned()
    }
}

/// Gram source that re-evaluates kernel columns against the observations on
/// every request, bounding memory at one block.
pub struct StreamingGram<'a> {
    x: &'a Array2<f64>,
    kernels: &'a [CenteredKernel],
}

impl<'a> StreamingGram<'a> {
    pub fn new(x: &'a Array2<f64>, kernels: &'a [CenteredKernel]) -> Self {
        StreamingGram { x, kernels }
    }
}

impl GramSource for StreamingGram<'_> {
    fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    fn n_basis(&self) -> usize {
        self.kernels.len()
    }

    fn block(&self, start: usize, end: usize) -> Array2<f64> {
        kernel::gram(self.x, &self.kernels[start..end])
    }

    fn column(&self, j: usize) -> Array1<f64> {
        self.kernels[j].evaluate(self.x)
    }
}

/// The set of currently relevant bases, kept as a single sorted index list.
/// Positions inside the compact posterior vectors are the ranks in this
/// list.
#[derive(Debug, Clone, Default)]
pub struct ActiveSet {
    sorted: Vec<usize>,
}

impl ActiveSet {
    pub fn new() -> Self {
        ActiveSet { sorted: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn contains(&self, j: usize) -> bool {
        self.sorted.binary_search(&j).is_ok()
    }

    /// Rank of basis `j` inside the compact vectors.
    pub fn position(&self, j: usize) -> Option<usize> {
        self.sorted.binary_search(&j).ok()
    }

    /// Insert basis `j`, returning the rank it lands at.
    pub fn insert(&mut self, j: usize) -> usize {
        match self.sorted.binary_search(&j) {
            Ok(pos) => pos,
            Err(pos) => {
                self.sorted.insert(pos, j);
                pos
            }
        }
    }

    /// Remove basis `j`, returning the rank it held.
    pub fn remove(&mut self, j: usize) -> Option<usize> {
        match self.sorted.binary_search(&j) {
            Ok(pos) => {
                self.sorted.remove(pos);
                Some(pos)
            }
            Err(_) => None,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.sorted
    }
}

/// Candidate moves on the active set, each tagged with the basis it acts on.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Move {
    Add(usize),
    Remove(usize),
    Reestimate(usize),
}

/// Per-basis sufficient statistics for one outer iteration.
struct Stats {
    /// S_m: marginal sparsity factor, all bases
    s_cap: Array1<f64>,
    /// Q_m: marginal quality factor, all bases
    q_cap: Array1<f64>,
    /// s_m: S_m with the basis's own contribution removed when active
    s: Array1<f64>,
    /// q_m: same adjustment for Q_m
    q: Array1<f64>,
    /// theta_m = q_m^2 - s_m; positive iff the basis can be relevant
    theta: Array1<f64>,
}

/// Tipping-Faul fast marginal-likelihood trainer. Starts from the single
/// best-correlated basis and grows/shrinks the active set through
/// add/delete/re-estimate moves, re-fitting the Laplace posterior (IRLS)
/// after every move.
pub struct Sequential;

impl Sequential {
    /// Train on -1/+1 targets `y`. Gram columns come from `source` in
    /// ranges of `block_size` columns; pass `source.n_basis()` to evaluate
    /// everything in one shot (the in-memory variant).
    pub fn fit<G: GramSource>(
        y: &Array1<f64>,
        source: &G,
        opts: &TrainOptions,
        block_size: usize,
    ) -> Result<TrainingOutcome, RvmError> {
        let n = source.n_obs();
        let n_basis = source.n_basis();
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
        let block_size = block_size.max(1);

        let y01 = y.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });

        // Seed: the basis whose unit-normalized column has the largest
        // absolute projection onto the labels
        let seed = Self::seed_basis(y, source, block_size);

        // Initial weight from least squares on the logit of shrunk labels
        let shrunk = y.mapv(|v| (v * 0.9 + 1.0) / 2.0);
        let logit_targets = shrunk.mapv(|t| (t / (1.0 - t)).ln());
        let phi_seed = source.column(seed);
        let mu_seed = phi_seed.dot(&logit_targets) / phi_seed.dot(&phi_seed);

        let mut alpha = Array1::<f64>::from_elem(n_basis, f64::INFINITY);
        alpha[seed] = 1.0 / (mu_seed * mu_seed).max(f64::EPSILON);

        let mut active = ActiveSet::new();
        active.insert(seed);

        let mut phi_a = gather_columns(source, &active);
        let mut fit = PenalizedIrls::fit(
            &y01,
            &phi_a,
            &Array1::from(vec![mu_seed]),
            &Array1::from(vec![alpha[seed]]),
        )?;
        let mut sigma = fit.sigma()?;

        let mut warnings = Vec::new();
        let mut beta = Array1::<f64>::zeros(n_basis);
        beta[seed] = fit.mu[0];

        let mut converged = false;
        let mut exit_reason = ExitReason::MaxIterations;
        let mut exit_value = f64::INFINITY;
        let mut iterations = 0;

        for iteration in 1..=opts.max_iterations {
            iterations = iteration;
            let alpha_prev = alpha.clone();

            // 1. Sufficient statistics for every candidate basis
            let stats = Self::statistics(&y01, source, block_size, &phi_a, &fit, &active, &alpha)?;

            // 2-3. Score the three move families and arbitrate
            let chosen = Self::select_move(&stats, &active, &alpha, iteration);
            let (best_move, delta_l) = match chosen {
                Some(pair) => pair,
                None => {
                    converged = true;
                    exit_reason = ExitReason::NoGoodActions;
                    exit_value = 0.0;
                    break;
                }
            };

            // 4. Stop when the best move is not worth taking
            if delta_l < opts.likelihood_increase_threshold {
                converged = true;
                exit_reason = ExitReason::NoGoodActions;
                exit_value = delta_l;
                break;
            }
            exit_value = delta_l;

            // 5. Apply the move; the posterior edits are warm starts only,
            // the IRLS refresh below is authoritative
            let mut mu = fit.mu.clone();
            match best_move {
                Move::Add(j) => {
                    let alpha_star = stats.s[j] * stats.s[j] / stats.theta[j];
                    let sigma_jj = 1.0 / (alpha_star + stats.s_cap[j]);
                    let mu_new = sigma_jj * stats.q_cap[j];

                    let phi_j = source.column(j);
                    let weighted = &phi_j * &fit.weights;
                    let shift = sigma.dot(&phi_a.t().dot(&weighted));
                    mu = &mu - &(shift * mu_new);

                    let pos = active.insert(j);
                    let mut grown = mu.to_vec();
                    grown.insert(pos, mu_new);
                    mu = Array1::from(grown);
                    alpha[j] = alpha_star;
                }
                Move::Remove(j) => {
                    let pos = active.remove(j).expect("remove move targets an active basis");
                    let ratio = mu[pos] / sigma[[pos, pos]];
                    mu = &mu + &(sigma.column(pos).to_owned() * ratio);
                    let mut shrunk = mu.to_vec();
                    shrunk.remove(pos);
                    mu = Array1::from(shrunk);
                    alpha[j] = f64::INFINITY;
                }
                Move::Reestimate(j) => {
                    let alpha_star = stats.s[j] * stats.s[j] / stats.theta[j];
                    let pos = active.position(j).expect("re-estimate targets an active basis");
                    let kappa = 1.0 / (sigma[[pos, pos]] + 1.0 / (alpha_star - alpha[j]));
                    let scale = mu[pos] * kappa;
                    mu = &mu - &(sigma.column(pos).to_owned() * scale);
                    alpha[j] = alpha_star;
                }
            }

            if opts.verbose {
                let label = match best_move {
                    Move::Add(j) => format!("add {}", j),
                    Move::Remove(j) => format!("remove {}", j),
                    Move::Reestimate(j) => format!("re-estimate {}", j),
                };
                println!(
                    "Sequential iteration {:>4}: {}, delta L {:.3e}, {} relevant",
                    iteration,
                    label,
                    delta_l,
                    active.len()
                );
            }

            if active.is_empty() {
                warnings.push(TrainingWarning::NoRelevantFeatures);
                beta.fill(0.0);
                converged = true;
                exit_reason = ExitReason::NoGoodActions;
                break;
            }

            // 6. Refresh the Laplace posterior on the updated active set
            phi_a = gather_columns(source, &active);
            let alpha_a: Array1<f64> = active.indices().iter().map(|&j| alpha[j]).collect();
            fit = PenalizedIrls::fit(&y01, &phi_a, &mu, &alpha_a)?;
            sigma = fit.sigma()?;

            // 7. Full zero-padded weight vector for inspection
            beta.fill(0.0);
            for (pos, &j) in active.indices().iter().enumerate() {
                beta[j] = fit.mu[pos];
            }

            // 8. Precision-path convergence: all |log alpha - log alpha_prev|
            // below tolerance (inf vs inf counts as no change)
            if iteration > 1 {
                let max_tau = alpha
                    .iter()
                    .zip(alpha_prev.iter())
                    .map(|(&a, &b)| log_alpha_change(a, b))
                    .fold(0.0_f64, f64::max);
                if max_tau < opts.beta_converged_tolerance {
                    converged = true;
                    exit_reason = ExitReason::AlphaNotChanging;
                    exit_value = max_tau;
                    break;
                }
            }
        }

        if active.is_empty() && !warnings.contains(&TrainingWarning::NoRelevantFeatures) {
            warnings.push(TrainingWarning::NoRelevantFeatures);
        }

        Ok(TrainingOutcome {
            beta,
            active: active.indices().to_vec(),
            sigma: Some(linalg::symmetrize(&sigma)),
            converged,
            exit_reason,
            exit_value,
            iterations,
            warnings,
        })
    }

    /// Argmax over |phi_hat' y| with unit-normalized columns, scanned in
    /// blocks.
    fn seed_basis<G: GramSource>(y: &Array1<f64>, source: &G, block_size: usize) -> usize {
        let n_basis = source.n_basis();
        let mut best = 0;
        let mut best_corr = -1.0;
        let mut start = 0;
        while start < n_basis {
            let end = (start + block_size).min(n_basis);
            let block = source.block(start, end);
            for (offset, j) in (start..end).enumerate() {
                let col = block.column(offset);
                let norm = col.dot(&col).sqrt();
                if norm == 0.0 {
                    continue;
                }
                let corr = col.dot(y).abs() / norm;
                if corr > best_corr {
                    best_corr = corr;
                    best = j;
                }
            }
            start = end;
        }
        best
    }

    /// S_m, Q_m for every basis (blockwise), then the active-set-adjusted
    /// s_m, q_m and theta_m.
    fn statistics<G: GramSource>(
        y01: &Array1<f64>,
        source: &G,
        block_size: usize,
        phi_a: &Array2<f64>,
        fit: &IrlsFit,
        active: &ActiveSet,
        alpha: &Array1<f64>,
    ) -> Result<Stats, RvmError> {
        let n_basis = source.n_basis();
        let resid = y01 - &fit.fitted;

        let mut s_cap = Array1::<f64>::zeros(n_basis);
        let mut q_cap = Array1::<f64>::zeros(n_basis);

        let mut start = 0;
        while start < n_basis {
            let end = (start + block_size).min(n_basis);
            let block = source.block(start, end);

            // B Phi_block, with B = diag of the IRLS weights
            let mut block_weighted = block.clone();
            for (i, mut row) in block_weighted.axis_iter_mut(Axis(0)).enumerate() {
                row *= fit.weights[i];
            }

            // V = L^-1 Phi_A' B Phi_block gives the posterior correction
            let cross = phi_a.t().dot(&block_weighted);
            let v = linalg::solve_lower_mat(&fit.chol_lower, &cross)?;

            for (offset, j) in (start..end).enumerate() {
                let col = block.column(offset);
                let col_weighted = block_weighted.column(offset);
                let v_col = v.column(offset);
                s_cap[j] = col.dot(&col_weighted) - v_col.dot(&v_col);
                q_cap[j] = col.dot(&resid);
            }
            start = end;
        }

        let mut s = s_cap.clone();
        let mut q = q_cap.clone();
        for &j in active.indices() {
            let denom = alpha[j] - s_cap[j];
            s[j] = alpha[j] * s_cap[j] / denom;
            q[j] = alpha[j] * q_cap[j] / denom;
        }
        let theta = &(&q * &q) - &s;

        Ok(Stats {
            s_cap,
            q_cap,
            s,
            q,
            theta,
        })
    }

    /// Score every eligible move and arbitrate per the selection rules:
    /// iteration 1 considers add/re-estimate only; afterwards a positive
    /// best removal is weighed against re-estimating that same basis;
    /// otherwise the overall best of the three families wins.
    fn select_move(
        stats: &Stats,
        active: &ActiveSet,
        alpha: &Array1<f64>,
        iteration: usize,
    ) -> Option<(Move, f64)> {
        let n_basis = stats.s_cap.len();

        let mut d_mod = Array1::<f64>::zeros(n_basis);
        let mut best_add: Option<(usize, f64)> = None;
        let mut best_rem: Option<(usize, f64)> = None;
        let mut best_mod: Option<(usize, f64)> = None;

        for j in 0..n_basis {
            let is_active = active.contains(j);
            let relevant = stats.theta[j] > 0.0;

            if !is_active && relevant {
                let delta = 0.5
                    * (stats.theta[j] / stats.s_cap[j]
                        + (stats.s_cap[j] / (stats.q_cap[j] * stats.q_cap[j])).ln());
                if best_add.map_or(true, |(_, b)| delta > b) {
                    best_add = Some((j, delta));
                }
            }

            if is_active {
                let delta = -0.5
                    * (stats.q[j] * stats.q[j] / (stats.s[j] + alpha[j])
                        - (1.0 + stats.s[j] / alpha[j]).ln());
                if best_rem.map_or(true, |(_, b)| delta > b) {
                    best_rem = Some((j, delta));
                }

                if relevant {
                    let alpha_star = stats.s[j] * stats.s[j] / stats.theta[j];
                    let delta_inv = 1.0 / alpha_star - 1.0 / alpha[j];
                    let delta = 0.5
                        * (delta_inv * stats.q_cap[j] * stats.q_cap[j]
                            / (delta_inv * stats.s_cap[j] + 1.0)
                            - (1.0 + stats.s_cap[j] * delta_inv).ln());
                    d_mod[j] = delta;
                    if best_mod.map_or(true, |(_, b)| delta > b) {
                        best_mod = Some((j, delta));
                    }
                }
            }
        }

        let add = best_add.map(|(j, d)| (Move::Add(j), d));
        let rem = best_rem.map(|(j, d)| (Move::Remove(j), d));
        let modify = best_mod.map(|(j, d)| (Move::Reestimate(j), d));

        if iteration == 1 {
            // no removal on the very first pass
            return pick_better(add, modify);
        }

        if let Some((Move::Remove(jr), rem_delta)) = rem {
            if rem_delta > 0.0 {
                // removal looks profitable: weigh it against re-estimating
                // that same basis
                let mod_at_jr = d_mod[jr];
                if mod_at_jr > rem_delta {
                    return Some((Move::Reestimate(jr), mod_at_jr));
                }
                return Some((Move::Remove(jr), rem_delta));
            }
        }

        pick_better(pick_better(add, rem), modify)
    }
}

fn pick_better(
    a: Option<(Move, f64)>,
    b: Option<(Move, f64)>,
) -> Option<(Move, f64)> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if x.1 >= y.1 { x } else { y }),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

fn gather_columns<G: GramSource>(source: &G, active: &ActiveSet) -> Array2<f64> {
    let mut phi_a = Array2::<f64>::zeros((source.n_obs(), active.len()));
    for (pos, &j) in active.indices().iter().enumerate() {
        phi_a.column_mut(pos).assign(&source.column(j));
    }
    phi_a
}

fn log_alpha_change(a: f64, b: f64) -> f64 {
    if a.is_infinite() && b.is_infinite() {
        0.0
    } else {
        (a.ln() - b.ln()).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_set_stays_sorted() {
        let mut set = ActiveSet::new();
        assert_eq!(set.insert(5), 0);
        assert_eq!(set.insert(2), 0);
        assert_eq!(set.insert(9), 2);
        assert_eq!(set.indices(), &[2, 5, 9]);
        assert!(set.contains(5));
        assert_eq!(set.position(9), Some(2));
    }

    #[test]
    fn test_active_set_remove_reports_rank() {
        let mut set = ActiveSet::new();
        set.insert(3);
        set.insert(7);
        set.insert(1);
        assert_eq!(set.remove(7), Some(2));
        assert_eq!(set.indices(), &[1, 3]);
        assert_eq!(set.remove(7), None);
    }

    #[test]
    fn test_log_alpha_change_handles_infinities() {
        assert_eq!(log_alpha_change(f64::INFINITY, f64::INFINITY), 0.0);
        assert!(log_alpha_change(f64::INFINITY, 1.0).is_infinite());
        assert!((log_alpha_change(2.0, 1.0) - 2.0_f64.ln()).abs() < 1e-12);
    }
}

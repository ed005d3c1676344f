use crate::dataset::Dataset;
use crate::error::RvmError;
use crate::figueiredo::Figueiredo;
use crate::kernel::{self, CenteredKernel, KernelSpec};
use crate::sequential::{InMemoryGram, Sequential, StreamingGram};
use crate::Algorithm;
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;
use std::str::FromStr;

/// Query observations are scored in row blocks of this size to bound peak
/// memory during prediction.
const PREDICT_BLOCK_ROWS: usize = 1000;

/// Training knobs shared by both trainer families. All fields are optional
/// knobs with defaults; see each field for which algorithm reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    /// Hard cap on the outer training loop (default 1000)
    pub max_iterations: usize,
    /// Convergence threshold: relative beta change (Figueiredo) or largest
    /// |delta log alpha| (Sequential); default 1e-3
    pub beta_converged_tolerance: f64,
    /// Figueiredo pruning threshold as a fraction of the largest |beta|
    /// (default 1e-3)
    pub beta_relevant_tolerance: f64,
    /// Sequential stop threshold on the marginal-likelihood gain of the
    /// best move (default 1e-6)
    pub likelihood_increase_threshold: f64,
    /// Column block size for the streaming Sequential variant (default 1000)
    pub block_size: usize,
    /// Print per-iteration progress diagnostics
    pub verbose: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            max_iterations: 1000,
            beta_converged_tolerance: 1e-3,
            beta_relevant_tolerance: 1e-3,
            likelihood_increase_threshold: 1e-6,
            block_size: 1000,
            verbose: false,
        }
    }
}

/// Why training stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Figueiredo: relative beta change fell below tolerance
    BetaConverged,
    /// Sequential: no move improves the marginal likelihood enough
    NoGoodActions,
    /// Sequential: every log-precision change fell below tolerance
    AlphaNotChanging,
    /// The iteration cap was reached before convergence
    MaxIterations,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::BetaConverged => "Beta Converged",
            ExitReason::NoGoodActions => "No Good Actions",
            ExitReason::AlphaNotChanging => "Alpha Not Changing",
            ExitReason::MaxIterations => "Max Iterations",
        };
        write!(f, "{}", label)
    }
}

/// Recoverable conditions recorded on the model during training. These are
/// data, not errors: training continues (or finishes) and the model stays
/// usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingWarning {
    /// Figueiredo found rcond(Phi'Phi) below 1e-6 and applied diagonal
    /// regularization
    IllConditionedGram,
    /// Training ended with an empty active set; predictions are NaN
    NoRelevantFeatures,
}

impl fmt::Display for TrainingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrainingWarning::IllConditionedGram => "Ill-conditioned Gram matrix",
            TrainingWarning::NoRelevantFeatures => "No relevant features",
        };
        write!(f, "{}", label)
    }
}

/// Convergence bookkeeping exposed after training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningResults {
    pub exit_reason: ExitReason,
    /// The quantity the exit decision was made on: last best delta-L for
    /// "No Good Actions"/"Max Iterations", largest |delta log alpha| for
    /// "Alpha Not Changing", final relative beta change for Figueiredo
    pub exit_value: f64,
    /// Outer iterations actually run
    pub iterations: usize,
}

/// Raw result of one trainer run, before the orchestrator binds it to the
/// centered kernel set.
#[derive(Debug)]
pub struct TrainingOutcome {
    /// Full weight vector, zero-padded over all candidate bases
    pub beta: Array1<f64>,
    /// Sorted indices of the relevant bases
    pub active: Vec<usize>,
    /// Posterior covariance over the active weights (Sequential only)
    pub sigma: Option<Array2<f64>>,
    pub converged: bool,
    pub exit_reason: ExitReason,
    pub exit_value: f64,
    pub iterations: usize,
    pub warnings: Vec<TrainingWarning>,
}

impl TrainingOutcome {
    /// Outcome for a degenerate run with nothing to select from.
    pub(crate) fn empty(n_basis: usize) -> Self {
        TrainingOutcome {
            beta: Array1::zeros(n_basis),
            active: Vec::new(),
            sigma: None,
            converged: true,
            exit_reason: ExitReason::NoGoodActions,
            exit_value: 0.0,
            iterations: 0,
            warnings: vec![TrainingWarning::NoRelevantFeatures],
        }
    }
}

/// Relevance Vector Machine binary classifier with a probit link.
///
/// Candidate bases are kernel templates centered on the training set; the
/// selected trainer learns a sparse weight vector over them by maximizing
/// the Bayesian evidence under per-basis precision hyperparameters. After
/// training, only the relevant bases and their weights are kept, and
/// [`Rvm::predict_proba`] maps the sparse linear score through the standard
/// normal CDF.
///
/// Note on links: the IRLS inner loop of the Sequential trainers uses a
/// logistic link while prediction reports probabilities through the probit
/// (standard normal CDF). This is a known modeling inconsistency; it is
/// kept deliberately so that trained models score the same way across the
/// trainer families.
#[derive(Debug, Clone)]
pub struct Rvm {
    /// Candidate kernel templates, centered on the dataset in declared order
    pub kernels: Vec<KernelSpec>,
    algorithm: Algorithm,
    pub options: TrainOptions,

    // Learned state, written once by train()
    /// Weights of the relevant bases, aligned to `sparse_kernels`
    pub sparse_beta: Array1<f64>,
    /// The relevant basis functions, in sorted basis-index order
    pub sparse_kernels: Vec<CenteredKernel>,
    /// Full weight vector, zero-padded over all candidate bases
    pub beta: Array1<f64>,
    /// Posterior covariance over the active weights (Sequential only)
    pub sigma: Option<Array2<f64>>,
    pub learning_converged: bool,
    pub learning_results: Option<LearningResults>,
    pub warnings: Vec<TrainingWarning>,
    n_features: Option<usize>,
}

impl Default for Rvm {
    fn default() -> Self {
        Rvm {
            kernels: vec![KernelSpec::Dc, KernelSpec::RbfScaled { sigma: 1.0 }],
            algorithm: Algorithm::Figueiredo,
            options: TrainOptions::default(),
            sparse_beta: Array1::zeros(0),
            sparse_kernels: Vec::new(),
            beta: Array1::zeros(0),
            sigma: None,
            learning_converged: false,
            learning_results: None,
            warnings: Vec::new(),
            n_features: None,
        }
    }
}

impl Rvm {
    /// A classifier with the default basis (DC bias + dimension-scaled RBF)
    /// and the Figueiredo trainer.
    pub fn new() -> Self {
        Rvm::default()
    }

    /// A classifier using the given training algorithm.
    pub fn with_algorithm(algorithm: Algorithm) -> Self {
        Rvm {
            algorithm,
            ..Rvm::default()
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Select the training algorithm by name. Unknown names are rejected
    /// with [`RvmError::InvalidAlgorithm`] and leave the model untouched.
    pub fn set_algorithm(&mut self, name: &str) -> Result<(), RvmError> {
        self.algorithm = Algorithm::from_str(name)?;
        Ok(())
    }

    /// Train on a -1/+1 labeled dataset. Fails with
    /// [`RvmError::NonBinaryInput`] before any computation when the labels
    /// are not binary.
    pub fn train(&mut self, data: &Dataset) -> Result<(), RvmError> {
        if !data.is_binary() {
            return Err(RvmError::NonBinaryInput);
        }

        let x = data.observations();
        let centered: Vec<CenteredKernel> =
            self.kernels.iter().flat_map(|k| k.center(x)).collect();

        let outcome = if centered.is_empty() {
            TrainingOutcome::empty(0)
        } else {
            match self.algorithm {
                Algorithm::Figueiredo => {
                    let phi = kernel::gram(x, &centered);
                    Figueiredo::fit(data.labels(), &phi, &self.options)?
                }
                Algorithm::Sequential => {
                    let source = StreamingGram::new(x, &centered);
                    Sequential::fit(data.labels(), &source, &self.options, self.options.block_size)?
                }
                Algorithm::SequentialInMemory => {
                    let phi = kernel::gram(x, &centered);
                    let n_basis = phi.ncols();
                    let source = InMemoryGram::new(phi);
                    Sequential::fit(data.labels(), &source, &self.options, n_basis)?
                }
            }
        };

        self.sparse_beta = outcome
            .active
            .iter()
            .map(|&j| outcome.beta[j])
            .collect();
        self.sparse_kernels = outcome
            .active
            .iter()
            .map(|&j| centered[j].clone())
            .collect();
        self.beta = outcome.beta;
        self.sigma = outcome.sigma;
        self.learning_converged = outcome.converged;
        self.learning_results = Some(LearningResults {
            exit_reason: outcome.exit_reason,
            exit_value: outcome.exit_value,
            iterations: outcome.iterations,
        });
        self.warnings = outcome.warnings;
        self.n_features = Some(data.n_features());
        Ok(())
    }

    /// Positive-class probability for each query row, through the standard
    /// normal CDF. Rows are processed in blocks of 1000. A model with no
    /// relevant bases returns NaN for every query.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, RvmError> {
        if let Some(d) = self.n_features {
            if x.ncols() != d {
                return Err(RvmError::ShapeMismatch(format!(
                    "query has {} features, model was trained on {}",
                    x.ncols(),
                    d
                )));
            }
        }

        let n_q = x.nrows();
        if self.sparse_kernels.is_empty() {
            return Ok(Array1::from_elem(n_q, f64::NAN));
        }

        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut out = Array1::<f64>::zeros(n_q);
        let mut start = 0;
        while start < n_q {
            let end = (start + PREDICT_BLOCK_ROWS).min(n_q);
            let rows = x.slice(s![start..end, ..]).to_owned();
            let gamma = kernel::gram(&rows, &self.sparse_kernels);
            let scores = gamma.dot(&self.sparse_beta);
            for (offset, score) in scores.iter().enumerate() {
                out[start + offset] = normal.cdf(*score);
            }
            start = end;
        }
        Ok(out)
    }

    /// Hard -1/+1 decisions at the 0.5 probability threshold. NaN scores
    /// stay NaN.
    pub fn predict_class(&self, x: &Array2<f64>) -> Result<Array1<f64>, RvmError> {
        let proba = self.predict_proba(x)?;
        Ok(proba.mapv(|p| {
            if p.is_nan() {
                f64::NAN
            } else if p > 0.5 {
                1.0
            } else {
                -1.0
            }
        }))
    }

    /// Number of relevant bases kept after training.
    pub fn n_relevant(&self) -> usize {
        self.sparse_kernels.len()
    }
}

impl fmt::Display for Rvm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^78}", " RVM Classification Results ")?;
        let results = match &self.learning_results {
            Some(r) => r,
            None => return writeln!(f, "Model not trained yet."),
        };
        writeln!(
            f,
            "{:<20} {:>18} || {:<16} {:>15}",
            "Algorithm:",
            format!("{:?}", self.algorithm),
            "Converged:",
            self.learning_converged
        )?;
        writeln!(
            f,
            "{:<20} {:>18} || {:<16} {:>15}",
            "Relevant bases:",
            format!("{} / {}", self.n_relevant(), self.beta.len()),
            "Iterations:",
            results.iterations
        )?;
        writeln!(
            f,
            "{:<20} {:>18} || {:<16} {:>15.4e}",
            "Exit reason:",
            results.exit_reason.to_string(),
            "Exit value:",
            results.exit_value
        )?;
        for warning in &self.warnings {
            writeln!(f, "Warning: {}", warning)?;
        }

        writeln!(f, "\n{:-^78}", "")?;
        writeln!(f, "{:<12} | {:>12}", "Basis", "Weight")?;
        writeln!(f, "{:-^78}", "")?;
        for (pos, weight) in self.sparse_beta.iter().enumerate() {
            writeln!(f, "k{:<11} | {:>12.4}", pos, weight)?;
        }
        writeln!(f, "{:=^78}", "")
    }
}

pub mod dataset;
pub mod error;
pub mod figueiredo;
pub mod irls;
pub mod kernel;
pub mod linalg;
pub mod rvm;
pub mod sequential;

pub use dataset::Dataset;
pub use error::RvmError;
pub use figueiredo::Figueiredo;
pub use irls::{IrlsFit, PenalizedIrls};
pub use kernel::{gram, CenteredKernel, KernelSpec};
pub use rvm::{ExitReason, LearningResults, Rvm, TrainOptions, TrainingWarning};
pub use sequential::{GramSource, InMemoryGram, Sequential, StreamingGram};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Training algorithm for the sparse Bayesian (RVM) classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Figueiredo EM-style iteration with Jeffreys prior.
    /// Builds the full Gram matrix once and prunes bases by weight magnitude.
    Figueiredo,
    /// Tipping-Faul fast marginal-likelihood maximization with
    /// add/delete/re-estimate moves. Recomputes Gram columns in blocks,
    /// keeping memory at O(n_obs * block_size + |active|^2).
    Sequential,
    /// Same algorithm as `Sequential` but against a single precomputed
    /// Gram matrix, O(n_obs * n_basis) memory.
    SequentialInMemory,
}

impl FromStr for Algorithm {
    type Err = RvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Figueiredo" => Ok(Algorithm::Figueiredo),
            "Sequential" => Ok(Algorithm::Sequential),
            "SequentialInMemory" => Ok(Algorithm::SequentialInMemory),
            other => Err(RvmError::InvalidAlgorithm(other.to_string())),
        }
    }
}

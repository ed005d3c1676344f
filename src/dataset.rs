use crate::error::RvmError;
use ndarray::{Array1, Array2, Axis};

/// A labeled two-class dataset: an observation matrix plus -1/+1 targets.
///
/// This is the minimal container the trainers consume. Rows are
/// observations, columns are features.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// N x D observation matrix
    observations: Array2<f64>,
    /// N targets, expected in {-1.0, +1.0}
    labels: Array1<f64>,
}

impl Dataset {
    /// Create a new Dataset from an observation matrix and a label vector.
    ///
    /// Only shapes are validated here; label values are checked by
    /// [`Dataset::is_binary`] at training time.
    ///
    /// # Examples
    /// ```
    /// use sparsebayes::Dataset;
    /// use ndarray::{Array1, Array2};
    ///
    /// let x = Array2::from_shape_vec((3, 2), vec![0.0, 1.0, 1.0, 0.0, 1.0, 1.0]).unwrap();
    /// let y = Array1::from(vec![-1.0, 1.0, 1.0]);
    /// let data = Dataset::new(x, y).unwrap();
    /// assert_eq!(data.n_observations(), 3);
    /// assert_eq!(data.n_features(), 2);
    /// ```
    pub fn new(observations: Array2<f64>, labels: Array1<f64>) -> Result<Self, RvmError> {
        if observations.nrows() != labels.len() {
            return Err(RvmError::ShapeMismatch(format!(
                "{} observations but {} labels",
                observations.nrows(),
                labels.len()
            )));
        }
        Ok(Dataset {
            observations,
            labels,
        })
    }

    pub fn n_observations(&self) -> usize {
        self.observations.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.observations.ncols()
    }

    pub fn observations(&self) -> &Array2<f64> {
        &self.observations
    }

    /// Targets in -1/+1 form.
    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }

    /// Select a subset of observations by row index. `None` returns a copy
    /// of the full matrix.
    pub fn get_observations(&self, indices: Option<&[usize]>) -> Array2<f64> {
        match indices {
            Some(idx) => self.observations.select(Axis(0), idx),
            None => self.observations.clone(),
        }
    }

    /// True when every label is exactly -1 or +1.
    pub fn is_binary(&self) -> bool {
        self.labels.iter().all(|&v| v == -1.0 || v == 1.0)
    }

    /// Targets remapped to {0, 1}, as consumed by the IRLS inner loop.
    pub fn labels01(&self) -> Array1<f64> {
        self.labels.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
    }

    /// One-hot N x 2 target matrix; column 0 flags the negative class,
    /// column 1 the positive class.
    pub fn targets_binary_matrix(&self) -> Array2<f64> {
        let n = self.labels.len();
        let mut out = Array2::<f64>::zeros((n, 2));
        for (i, &v) in self.labels.iter().enumerate() {
            if v > 0.0 {
                out[[i, 1]] = 1.0;
            } else {
                out[[i, 0]] = 1.0;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let x =
            Array2::from_shape_vec((4, 2), vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
        let y = Array1::from(vec![-1.0, 1.0, 1.0, -1.0]);
        Dataset::new(x, y).unwrap()
    }

    #[test]
    fn test_dataset_creation() {
        let data = sample();
        assert_eq!(data.n_observations(), 4);
        assert_eq!(data.n_features(), 2);
        assert!(data.is_binary());
    }

    #[test]
    fn test_dataset_shape_mismatch() {
        let x = Array2::<f64>::zeros((3, 2));
        let y = Array1::from(vec![1.0, -1.0]);
        assert!(Dataset::new(x, y).is_err());
    }

    #[test]
    fn test_non_binary_labels_detected() {
        let x = Array2::<f64>::zeros((3, 1));
        let y = Array1::from(vec![0.0, 1.0, 2.0]);
        let data = Dataset::new(x, y).unwrap();
        assert!(!data.is_binary());
    }

    #[test]
    fn test_labels01() {
        let data = sample();
        let y01 = data.labels01();
        assert_eq!(y01.to_vec(), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_targets_binary_matrix() {
        let data = sample();
        let t = data.targets_binary_matrix();
        assert_eq!(t.shape(), &[4, 2]);
        assert_eq!(t[[0, 0]], 1.0);
        assert_eq!(t[[0, 1]], 0.0);
        assert_eq!(t[[1, 1]], 1.0);
        // each row sums to one
        for row in t.rows() {
            assert_eq!(row.sum(), 1.0);
        }
    }

    #[test]
    fn test_get_observations_subset() {
        let data = sample();
        let sub = data.get_observations(Some(&[1, 3]));
        assert_eq!(sub.shape(), &[2, 2]);
        assert_eq!(sub[[0, 0]], 1.0);
        assert_eq!(sub[[1, 1]], 1.0);
    }
}

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Normal;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sparsebayes::{Algorithm, Dataset, Rvm, TrainingWarning};

// Two Gaussian clusters at (-2, 0) and (+2, 0), unit variance
fn two_gaussians(n_per_class: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();

    let n = 2 * n_per_class;
    let mut rows = Vec::with_capacity(n * 2);
    let mut labels = Vec::with_capacity(n);
    for &(cx, label) in &[(-2.0, -1.0), (2.0, 1.0)] {
        for _ in 0..n_per_class {
            rows.push(cx + noise.sample(&mut rng));
            rows.push(noise.sample(&mut rng));
            labels.push(label);
        }
    }
    let x = Array2::from_shape_vec((n, 2), rows).unwrap();
    Dataset::new(x, Array1::from(labels)).unwrap()
}

fn train_accuracy(model: &Rvm, data: &Dataset) -> f64 {
    let predicted = model.predict_class(data.observations()).unwrap();
    let hits = predicted
        .iter()
        .zip(data.labels().iter())
        .filter(|(p, t)| *p == *t)
        .count();
    hits as f64 / data.n_observations() as f64
}

#[test]
fn test_figueiredo_separable_gaussians() {
    let data = two_gaussians(100, 42);
    let mut model = Rvm::with_algorithm(Algorithm::Figueiredo);
    model.train(&data).unwrap();

    assert!(model.learning_converged);
    assert!(model.n_relevant() >= 1);
    assert!(model.n_relevant() <= 10);
    assert!(train_accuracy(&model, &data) >= 0.95);
}

#[test]
fn test_figueiredo_pruning_is_exact() {
    let data = two_gaussians(50, 7);
    let mut model = Rvm::with_algorithm(Algorithm::Figueiredo);
    model.train(&data).unwrap();

    let max_abs = model.beta.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    assert!(max_abs > 0.0);
    let threshold = max_abs * model.options.beta_relevant_tolerance;
    for &b in model.beta.iter() {
        // pruned weights are exactly zero, survivors clear the threshold
        assert!(b == 0.0 || b.abs() > threshold);
    }
    // full vector and sparse vector agree
    let nonzero = model.beta.iter().filter(|v| **v != 0.0).count();
    assert_eq!(nonzero, model.n_relevant());
    assert_eq!(model.sparse_beta.len(), model.n_relevant());
}

#[test]
fn test_figueiredo_single_observation() {
    let x = Array2::from_shape_vec((1, 2), vec![0.5, -0.5]).unwrap();
    let y = Array1::from(vec![1.0]);
    let data = Dataset::new(x, y).unwrap();

    let mut model = Rvm::with_algorithm(Algorithm::Figueiredo);
    model.train(&data).unwrap();

    // degenerate but defined: training completes and scoring returns a value
    let scores = model.predict_proba(data.observations()).unwrap();
    assert_eq!(scores.len(), 1);
}

#[test]
fn test_figueiredo_single_positive_among_negatives() {
    // nine negatives near the origin, one positive far away
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let offsets = [
        (0.0, 0.0),
        (0.3, 0.1),
        (-0.2, 0.2),
        (0.1, -0.3),
        (-0.1, -0.1),
        (0.2, 0.3),
        (-0.3, 0.0),
        (0.0, 0.3),
        (0.3, -0.2),
    ];
    for &(a, b) in &offsets {
        rows.push(a);
        rows.push(b);
        labels.push(-1.0);
    }
    rows.push(5.0);
    rows.push(5.0);
    labels.push(1.0);

    let x = Array2::from_shape_vec((10, 2), rows).unwrap();
    let data = Dataset::new(x, Array1::from(labels)).unwrap();

    let mut model = Rvm::with_algorithm(Algorithm::Figueiredo);
    model.train(&data).unwrap();

    let scores = model.predict_proba(data.observations()).unwrap();
    // the lone positive scores above one half and above every negative
    assert!(scores[9] > 0.5);
    for i in 0..9 {
        assert!(scores[9] > scores[i]);
    }
}

#[test]
fn test_figueiredo_ill_conditioned_gram_warns_once() {
    // every observation identical: all RBF columns collapse onto the bias
    let x = Array2::from_elem((20, 2), 1.0);
    let labels: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
    let data = Dataset::new(x, Array1::from(labels)).unwrap();

    let mut model = Rvm::with_algorithm(Algorithm::Figueiredo);
    model.train(&data).unwrap();

    let count = model
        .warnings
        .iter()
        .filter(|w| **w == TrainingWarning::IllConditionedGram)
        .count();
    assert_eq!(count, 1);
}

#[test]
fn test_figueiredo_max_iterations_cap() {
    let data = two_gaussians(100, 42);
    let mut model = Rvm::with_algorithm(Algorithm::Figueiredo);
    model.options.max_iterations = 2;
    model.train(&data).unwrap();

    assert!(!model.learning_converged);
    let results = model.learning_results.as_ref().unwrap();
    assert_eq!(results.iterations, 2);
    // a valid sparse representation is still emitted
    assert!(model.n_relevant() >= 1);
    let scores = model.predict_proba(data.observations()).unwrap();
    assert!(scores.iter().all(|s| s.is_finite()));
}

#[test]
fn test_figueiredo_training_is_deterministic() {
    let data = two_gaussians(60, 11);

    let mut first = Rvm::with_algorithm(Algorithm::Figueiredo);
    first.train(&data).unwrap();
    let mut second = Rvm::with_algorithm(Algorithm::Figueiredo);
    second.train(&data).unwrap();

    assert_eq!(first.n_relevant(), second.n_relevant());
    assert_eq!(first.sparse_beta, second.sparse_beta);
    assert_eq!(first.sparse_kernels, second.sparse_kernels);
}

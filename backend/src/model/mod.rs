pub mod forest;
pub mod loader;

use ndarray::{Array2, ArrayView2};

pub use forest::ForestModel;
pub use loader::{ModelLoadError, ModelLoader};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model expects {expected} features, got {found}")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Input contains a non-finite value at row {row}, column {column}")]
    NonFiniteInput { row: usize, column: usize },
    #[error("Input contains no rows")]
    EmptyInput,
    #[error("Classifier produced a {rows}x{cols} probability matrix")]
    MalformedOutput { rows: usize, cols: usize },
}

/// A fitted binary classifier.
///
/// `predict_proba` returns one row per input row with the probability of
/// class 0 in column 0 and of the positive (default) class in column 1.
pub trait Classifier: Send + Sync {
    fn model_type(&self) -> &str;

    fn n_features_in(&self) -> usize;

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array2<f64>, InferenceError>;
}

use std::sync::Arc;

use log::{debug, error};
use ndarray::{Array2, ArrayView2};
use risk_shared::{BatchResult, CreditApplication, ModelInfo, PredictionResult, REQUIRED_FEATURES};

use super::batch::{BatchError, ScoredBatch, parse_feature_table};
use super::risk::classify_risk;
use crate::model::{Classifier, InferenceError};
use crate::storage::{ResultStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("Model not loaded")]
    Unavailable,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("Model inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Request-independent scoring context. Holds the classifier, if one was
/// loaded, for the lifetime of the process.
#[derive(Clone)]
pub struct ScoringService {
    model: Option<Arc<dyn Classifier>>,
}

impl ScoringService {
    pub fn new(model: Arc<dyn Classifier>) -> Self {
        Self { model: Some(model) }
    }

    /// A service without a model; every scoring call reports `Unavailable`.
    pub fn unavailable() -> Self {
        Self { model: None }
    }

    pub fn classifier(&self) -> Result<&dyn Classifier, ScoringError> {
        self.model.as_deref().ok_or(ScoringError::Unavailable)
    }

    pub fn model_info(&self) -> Result<ModelInfo, ScoringError> {
        let model = self.classifier()?;
        Ok(ModelInfo {
            model_type: model.model_type().to_string(),
            expected_features: model.n_features_in(),
            required_features: REQUIRED_FEATURES.iter().map(|f| f.to_string()).collect(),
        })
    }

    pub fn predict(
        &self,
        application: &CreditApplication,
    ) -> Result<PredictionResult, ScoringError> {
        let model = self.classifier()?;
        let features = application.features();
        if let Some(pos) = features.iter().position(|v| !v.is_finite()) {
            return Err(ScoringError::Validation(format!(
                "Field {} must be a finite number",
                REQUIRED_FEATURES[pos]
            )));
        }

        let input = Array2::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| ScoringError::Validation(e.to_string()))?;
        let probability = positive_class(model, input.view())?
            .first()
            .copied()
            .ok_or(InferenceError::EmptyInput)?;
        let (risk_level, risk_score) = classify_risk(probability);

        debug!("Scored application: p={:.4} level={}", probability, risk_level);
        Ok(PredictionResult {
            default_probability: probability,
            risk_level,
            risk_score,
        })
    }

    /// Score an uploaded CSV without touching the filesystem.
    pub fn score_batch(&self, upload: &[u8]) -> Result<ScoredBatch, ScoringError> {
        let model = self.classifier()?;
        let text = std::str::from_utf8(upload)
            .map_err(|e| ScoringError::Validation(format!("File is not valid UTF-8: {}", e)))?;
        let features = parse_feature_table(text)?;
        let probabilities = positive_class(model, features.view())?;
        Ok(ScoredBatch::new(features, probabilities))
    }

    /// Score an uploaded CSV and store the annotated table for a single
    /// download. The result file is removed again if anything fails.
    pub fn batch_predict(
        &self,
        store: &ResultStore,
        upload: &[u8],
    ) -> Result<BatchResult, ScoringError> {
        let scored = self.score_batch(upload)?;

        let reference = store.save(|writer| {
            scored
                .write_csv(writer)
                .map_err(|e| ScoringError::from(StorageError::Io(e.into())))
        })?;

        let counts = scored.counts();
        Ok(BatchResult {
            total_records: scored.total_records(),
            high_risk: counts.high,
            medium_risk: counts.medium,
            low_risk: counts.low,
            download_link: ResultStore::download_link(&reference),
        })
    }
}

fn positive_class(
    model: &dyn Classifier,
    features: ArrayView2<'_, f64>,
) -> Result<Vec<f64>, InferenceError> {
    let proba = model.predict_proba(features)?;
    let (rows, cols) = proba.dim();
    if cols < 2 || rows != features.nrows() {
        error!(
            "Classifier returned a {}x{} probability matrix for {} rows",
            rows,
            cols,
            features.nrows()
        );
        return Err(InferenceError::MalformedOutput { rows, cols });
    }
    Ok(proba.column(1).to_vec())
}

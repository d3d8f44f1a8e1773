use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use risk_shared::REQUIRED_FEATURES;

use super::Classifier;
use super::forest::{ForestArtifact, ForestModel};

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model file not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read model file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid model: {0}")]
    Invalid(String),
}

pub struct ModelLoader;

impl ModelLoader {
    /// Read and validate a forest artifact from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ForestModel, ModelLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }

        let raw = fs::read_to_string(path)?;
        let artifact: ForestArtifact = serde_json::from_str(&raw)?;
        let model = ForestModel::from_artifact(artifact).map_err(ModelLoadError::Invalid)?;

        info!("Model loaded successfully from {}", path.display());
        info!("Model expects {} features ({} trees)", model.n_features_in(), model.n_trees());

        if model.n_features_in() != REQUIRED_FEATURES.len() {
            warn!(
                "Model expects {} features but requests carry {}; predictions will be rejected",
                model.n_features_in(),
                REQUIRED_FEATURES.len()
            );
        } else if let Some(names) = model.feature_names() {
            if names.iter().map(String::as_str).ne(REQUIRED_FEATURES) {
                warn!(
                    "Model feature names {:?} differ from the request layout {:?}",
                    names, REQUIRED_FEATURES
                );
            }
        }

        Ok(model)
    }
}

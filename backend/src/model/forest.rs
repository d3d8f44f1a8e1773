use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::Deserialize;

use super::{Classifier, InferenceError};

/// Serialized form of a fitted random forest pipeline.
#[derive(Debug, Deserialize)]
pub struct ForestArtifact {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub n_features_in: usize,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    #[serde(default)]
    pub scaler: Option<ScalerParams>,
    pub trees: Vec<TreeNodes>,
}

fn default_model_type() -> String {
    "RandomForestClassifier".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TreeNodes {
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NodeEntry {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf([f64; 2]),
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_params(params: TreeNodes, n_features: usize) -> Result<Self, String> {
        if params.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        let len = params.nodes.len();
        let mut nodes = Vec::with_capacity(len);
        for (idx, node) in params.nodes.into_iter().enumerate() {
            let node = match node {
                NodeEntry::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature >= n_features {
                        return Err(format!(
                            "node {} splits on feature {} but the model has {} features",
                            idx, feature, n_features
                        ));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {} has a non-finite threshold", idx));
                    }
                    // Children always come after their parent, so traversal terminates.
                    for child in [left, right] {
                        if child <= idx || child >= len {
                            return Err(format!(
                                "node {} points to invalid child {}",
                                idx, child
                            ));
                        }
                    }
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    }
                }
                NodeEntry::Leaf { value } => Node::Leaf(normalize_leaf(idx, &value)?),
            };
            nodes.push(node);
        }
        Ok(Self { nodes })
    }

    fn leaf(&self, x: &[f64]) -> &[f64; 2] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf(distribution) => return distribution,
            }
        }
    }
}

fn normalize_leaf(idx: usize, value: &[f64]) -> Result<[f64; 2], String> {
    if value.len() != 2 {
        return Err(format!(
            "leaf {} has {} class weights, expected 2",
            idx,
            value.len()
        ));
    }
    if value.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(format!("leaf {} has negative or non-finite weights", idx));
    }
    let total = value[0] + value[1];
    if total <= 0.0 {
        return Err(format!("leaf {} has zero total weight", idx));
    }
    Ok([value[0] / total, value[1] / total])
}

#[derive(Debug, Clone)]
struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    fn from_params(params: ScalerParams, n_features: usize) -> Result<Self, String> {
        if params.mean.len() != n_features || params.scale.len() != n_features {
            return Err(format!(
                "scaler has {} means and {} scales, expected {}",
                params.mean.len(),
                params.scale.len(),
                n_features
            ));
        }
        if params.mean.iter().any(|m| !m.is_finite()) {
            return Err("scaler mean contains a non-finite value".to_string());
        }
        if params.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err("scaler scale must be finite and non-zero".to_string());
        }
        Ok(Self {
            mean: params.mean,
            scale: params.scale,
        })
    }

    fn transform_into(&self, row: ArrayView1<'_, f64>, out: &mut [f64]) {
        for (j, value) in row.iter().enumerate() {
            out[j] = (value - self.mean[j]) / self.scale[j];
        }
    }
}

/// Random forest with an optional standardisation step in front of it.
#[derive(Debug, Clone)]
pub struct ForestModel {
    model_type: String,
    n_features_in: usize,
    feature_names: Option<Vec<String>>,
    scaler: Option<StandardScaler>,
    trees: Vec<Tree>,
}

impl ForestModel {
    pub fn from_artifact(artifact: ForestArtifact) -> Result<Self, String> {
        let n_features = artifact.n_features_in;
        if n_features == 0 {
            return Err("n_features_in must be positive".to_string());
        }
        if let Some(names) = &artifact.feature_names {
            if names.len() != n_features {
                return Err(format!(
                    "{} feature names given for {} features",
                    names.len(),
                    n_features
                ));
            }
        }
        if artifact.trees.is_empty() {
            return Err("model has no trees".to_string());
        }

        let scaler = artifact
            .scaler
            .map(|params| StandardScaler::from_params(params, n_features))
            .transpose()?;
        let trees = artifact
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, params)| {
                Tree::from_params(params, n_features).map_err(|e| format!("tree {}: {}", i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            model_type: artifact.model_type,
            n_features_in: n_features,
            feature_names: artifact.feature_names,
            scaler,
            trees,
        })
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for ForestModel {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array2<f64>, InferenceError> {
        let (n_rows, n_cols) = features.dim();
        if n_cols != self.n_features_in {
            return Err(InferenceError::FeatureCountMismatch {
                expected: self.n_features_in,
                found: n_cols,
            });
        }
        if n_rows == 0 {
            return Err(InferenceError::EmptyInput);
        }

        let n_trees = self.trees.len() as f64;
        let mut proba = Array2::<f64>::zeros((n_rows, 2));
        let mut x = vec![0.0; n_cols];

        for (i, row) in features.outer_iter().enumerate() {
            if let Some(column) = row.iter().position(|v| !v.is_finite()) {
                return Err(InferenceError::NonFiniteInput { row: i, column });
            }
            match &self.scaler {
                Some(scaler) => scaler.transform_into(row, &mut x),
                None => x.iter_mut().zip(row.iter()).for_each(|(dst, v)| *dst = *v),
            }

            let mut acc = [0.0; 2];
            for tree in &self.trees {
                let leaf = tree.leaf(&x);
                acc[0] += leaf[0];
                acc[1] += leaf[1];
            }
            proba[[i, 0]] = acc[0] / n_trees;
            proba[[i, 1]] = acc[1] / n_trees;
        }

        Ok(proba)
    }
}

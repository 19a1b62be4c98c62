//! Pre-trained classifier artifacts.
//!
//! The offline training step fits two random forests (crop, fertilizer) and
//! three label encoders (district, crop, fertilizer), then exports them as
//! JSON: each tree as its node arrays, each encoder as its ordered class list.
//! Everything here is read-only after loading and safe to share across requests.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Feature order: `[district_code, nitrogen, phosphorus, potassium, pH, rainfall]`.
pub const FEATURE_COUNT: usize = 6;

const LEAF: i64 = -1;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse artifact {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid artifact: {0}")]
    Invalid(String),
    #[error("unseen label '{value}' for encoder '{encoder}'")]
    UnknownLabel { encoder: &'static str, value: String },
    #[error("code {code} out of range for encoder '{encoder}' ({size} classes)")]
    UnknownCode {
        encoder: &'static str,
        code: usize,
        size: usize,
    },
    #[error("expected {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },
}

// ============ Decision Trees ============

/// One fitted tree in node-array form. Node 0 is the root.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    /// Per-node class weights; only leaf rows are read.
    pub value: Vec<Vec<f64>>,
}

impl DecisionTree {
    fn validate(&self, n_features: usize, classes: usize) -> Result<(), ModelError> {
        let nodes = self.children_left.len();
        if nodes == 0 {
            return Err(ModelError::Invalid("tree has no nodes".to_string()));
        }
        if self.children_right.len() != nodes
            || self.feature.len() != nodes
            || self.threshold.len() != nodes
            || self.value.len() != nodes
        {
            return Err(ModelError::Invalid(
                "tree node arrays differ in length".to_string(),
            ));
        }

        for node in 0..nodes {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == LEAF {
                if self.value[node].len() != classes {
                    return Err(ModelError::Invalid(format!(
                        "leaf {} has {} class weights, expected {}",
                        node,
                        self.value[node].len(),
                        classes
                    )));
                }
                continue;
            }
            // Children must point forward so traversal always terminates
            let in_range = |child: i64| child > node as i64 && (child as usize) < nodes;
            if !in_range(left) || !in_range(right) {
                return Err(ModelError::Invalid(format!(
                    "node {} has out-of-range children ({}, {})",
                    node, left, right
                )));
            }
            let feature = self.feature[node];
            if feature < 0 || feature as usize >= n_features {
                return Err(ModelError::Invalid(format!(
                    "node {} splits on feature {} (only {} features)",
                    node, feature, n_features
                )));
            }
        }
        Ok(())
    }

    /// Normalized class distribution of the leaf reached by `features`.
    fn leaf_distribution(&self, features: &[f64]) -> Vec<f64> {
        let mut node = 0usize;
        while self.children_left[node] != LEAF {
            let feature = self.feature[node] as usize;
            node = if features[feature] <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }

        let weights = &self.value[node];
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            weights.iter().map(|w| w / total).collect()
        } else {
            vec![0.0; weights.len()]
        }
    }
}

// ============ Random Forest ============

/// Multi-class random forest: probabilities are the mean of per-tree leaf
/// distributions, the top label is their argmax.
#[derive(Debug, Clone, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    pub classes: usize,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn from_json_str(raw: &str, path: &str) -> Result<Self, ModelError> {
        let forest: RandomForest =
            serde_json::from_str(raw).map_err(|source| ModelError::Parse {
                path: path.to_string(),
                source,
            })?;
        forest.validate()?;
        Ok(forest)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_features != FEATURE_COUNT {
            return Err(ModelError::FeatureCount {
                expected: FEATURE_COUNT,
                actual: self.n_features,
            });
        }
        if self.classes == 0 {
            return Err(ModelError::Invalid("forest has no classes".to_string()));
        }
        if self.trees.is_empty() {
            return Err(ModelError::Invalid("forest has no trees".to_string()));
        }
        for tree in &self.trees {
            tree.validate(self.n_features, self.classes)?;
        }
        Ok(())
    }

    /// Class-probability vector (fractions summing to 1).
    pub fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, ModelError> {
        if features.len() != self.n_features {
            return Err(ModelError::FeatureCount {
                expected: self.n_features,
                actual: features.len(),
            });
        }

        let mut sums = vec![0.0; self.classes];
        for tree in &self.trees {
            for (sum, p) in sums.iter_mut().zip(tree.leaf_distribution(features)) {
                *sum += p;
            }
        }
        let count = self.trees.len() as f64;
        Ok(sums.into_iter().map(|s| s / count).collect())
    }

    /// Index of the most probable class; the lowest index wins ties.
    pub fn predict(&self, features: &[f64]) -> Result<usize, ModelError> {
        let probabilities = self.predict_proba(features)?;
        Ok(argmax(&probabilities))
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Class indices ordered by descending probability, capped at `n`.
/// Ties keep the lower index first.
pub fn top_indices(probabilities: &[f64], n: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probabilities.len()).collect();
    indices.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    indices.truncate(n);
    indices
}

// ============ Label Encoders ============

/// Closed-vocabulary name <-> code mapping; code is the position in `classes`.
#[derive(Debug, Clone)]
pub struct LabelEncoder {
    name: &'static str,
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelEncoder {
    pub fn new(name: &'static str, classes: Vec<String>) -> Result<Self, ModelError> {
        if classes.is_empty() {
            return Err(ModelError::Invalid(format!("encoder '{}' is empty", name)));
        }
        let mut index = HashMap::with_capacity(classes.len());
        for (code, class) in classes.iter().enumerate() {
            if index.insert(class.clone(), code).is_some() {
                return Err(ModelError::Invalid(format!(
                    "encoder '{}' lists '{}' twice",
                    name, class
                )));
            }
        }
        Ok(Self {
            name,
            classes,
            index,
        })
    }

    /// Forward mapping. Fails for anything outside the training vocabulary.
    pub fn transform(&self, value: &str) -> Result<usize, ModelError> {
        self.index
            .get(value)
            .copied()
            .ok_or_else(|| ModelError::UnknownLabel {
                encoder: self.name,
                value: value.to_string(),
            })
    }

    pub fn inverse_transform(&self, code: usize) -> Result<&str, ModelError> {
        self.classes
            .get(code)
            .map(String::as_str)
            .ok_or(ModelError::UnknownCode {
                encoder: self.name,
                code,
                size: self.classes.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct EncoderFile {
    district: Vec<String>,
    crop: Vec<String>,
    fertilizer: Vec<String>,
}

// ============ Bundle ============

/// Both forests and all three encoders, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub crop_model: RandomForest,
    pub fertilizer_model: RandomForest,
    pub district_encoder: LabelEncoder,
    pub crop_encoder: LabelEncoder,
    pub fertilizer_encoder: LabelEncoder,
}

impl ModelBundle {
    pub fn new(
        crop_model: RandomForest,
        fertilizer_model: RandomForest,
        district_encoder: LabelEncoder,
        crop_encoder: LabelEncoder,
        fertilizer_encoder: LabelEncoder,
    ) -> Result<Self, ModelError> {
        crop_model.validate()?;
        fertilizer_model.validate()?;
        if crop_model.classes != crop_encoder.len() {
            return Err(ModelError::Invalid(format!(
                "crop model has {} classes but the crop encoder has {}",
                crop_model.classes,
                crop_encoder.len()
            )));
        }
        if fertilizer_model.classes != fertilizer_encoder.len() {
            return Err(ModelError::Invalid(format!(
                "fertilizer model has {} classes but the fertilizer encoder has {}",
                fertilizer_model.classes,
                fertilizer_encoder.len()
            )));
        }
        Ok(Self {
            crop_model,
            fertilizer_model,
            district_encoder,
            crop_encoder,
            fertilizer_encoder,
        })
    }

    /// Load `crop_model.json`, `fert_model.json` and `encoders.json` from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ModelError> {
        let dir = dir.as_ref();
        let crop_model = RandomForest::from_json_str(
            &read_artifact(&dir.join("crop_model.json"))?,
            "crop_model.json",
        )?;
        let fertilizer_model = RandomForest::from_json_str(
            &read_artifact(&dir.join("fert_model.json"))?,
            "fert_model.json",
        )?;

        let encoders_path = dir.join("encoders.json");
        let encoders: EncoderFile = serde_json::from_str(&read_artifact(&encoders_path)?)
            .map_err(|source| ModelError::Parse {
                path: encoders_path.display().to_string(),
                source,
            })?;

        let bundle = Self::new(
            crop_model,
            fertilizer_model,
            LabelEncoder::new("district", encoders.district)?,
            LabelEncoder::new("crop", encoders.crop)?,
            LabelEncoder::new("fertilizer", encoders.fertilizer)?,
        )?;

        tracing::info!(
            "Loaded classifier artifacts from {}: {} districts, {} crops, {} fertilizers",
            dir.display(),
            bundle.district_encoder.len(),
            bundle.crop_encoder.len(),
            bundle.fertilizer_encoder.len()
        );
        Ok(bundle)
    }
}

fn read_artifact(path: &Path) -> Result<String, ModelError> {
    std::fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.display().to_string(),
        source,
    })
}

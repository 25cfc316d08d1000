//! Pretrained classifier consumed through a "vector in, class out" contract.
//!
//! A model artifact is a JSON document carrying the model itself together with
//! the label convention it was trained with. The convention is versioned so the
//! numeric class of a prediction is never interpreted by guesswork.

use crate::{
    error::ModelError,
    layout::{FEATURE_COUNT, FEATURE_VERSION},
    types::{FeatureVector, Label},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use tracing::{info, warn};

/// Raw class emitted by a model before it is mapped to a `Label`.
pub type ClassLabel = i64;

pub trait Classifier: Send + Sync {
    fn predict(&self, vector: &FeatureVector) -> Result<ClassLabel, ModelError>;

    fn labels(&self) -> &LabelConvention;

    fn version(&self) -> &str;

    fn classify(&self, vector: &FeatureVector) -> Result<Label, ModelError> {
        let class = self.predict(vector)?;
        Ok(self.labels().label_for(class))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConvention {
    pub version: String,
    pub classes: BTreeMap<ClassLabel, Label>,
}

impl LabelConvention {
    /// Convention `v1`: 0 is legitimate, 1 is phishing, anything else suspicious.
    pub fn v1() -> Self {
        Self {
            version: "v1".to_string(),
            classes: BTreeMap::from([(0, Label::Legitimate), (1, Label::Phishing)]),
        }
    }

    pub fn label_for(&self, class: ClassLabel) -> Label {
        self.classes.get(&class).copied().unwrap_or(Label::Suspicious)
    }
}

impl Default for LabelConvention {
    fn default() -> Self {
        Self::v1()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    #[serde(default = "current_feature_version")]
    pub feature_version: u8,
    pub feature_count: usize,
    #[serde(default)]
    pub labels: Option<LabelConvention>,
    pub model: ModelKind,
}

fn current_feature_version() -> u8 {
    FEATURE_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Forest(ForestModel),
    Linear(LinearModel),
}

/// Tree ensemble with averaged leaf distributions, as exported from a
/// random forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub classes: Vec<ClassLabel>,
    pub trees: Vec<DecisionTree>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
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

impl DecisionTree {
    /// Children must come after their parent, which rules out cycles.
    fn validate(&self, tree: usize, class_count: usize) -> Result<(), ModelError> {
        let invalid = |reason: String| ModelError::InvalidTree { tree, reason };

        if self.nodes.is_empty() {
            return Err(invalid("no nodes".to_string()));
        }

        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split { feature, left, right, .. } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(invalid(format!("node {} splits on feature {}", index, feature)));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(invalid(format!("node {} has bad child {}", index, child)));
                        }
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.len() != class_count {
                        return Err(invalid(format!(
                            "leaf {} has {} class weights, expected {}",
                            index,
                            value.len(),
                            class_count
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn leaf_distribution(&self, vector: &FeatureVector) -> Vec<f64> {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Split { feature, threshold, left, right } => {
                    index = if vector.get(*feature) <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf { value } => {
                    let total: f64 = value.iter().sum();
                    return if total > 0.0 {
                        value.iter().map(|v| v / total).collect()
                    } else {
                        value.clone()
                    };
                }
            }
        }
    }
}

impl ForestModel {
    fn validate(&self) -> Result<(), ModelError> {
        if self.classes.is_empty() {
            return Err(ModelError::InvalidTree { tree: 0, reason: "forest declares no classes".to_string() });
        }
        if self.trees.is_empty() {
            return Err(ModelError::InvalidTree { tree: 0, reason: "forest has no trees".to_string() });
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i, self.classes.len())?;
        }
        Ok(())
    }

    pub fn predict_proba(&self, vector: &FeatureVector) -> Vec<f64> {
        let mut proba = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.leaf_distribution(vector)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    fn predict(&self, vector: &FeatureVector) -> Result<ClassLabel, ModelError> {
        let proba = self.predict_proba(vector);
        let mut best = 0;
        for (i, p) in proba.iter().enumerate() {
            if !p.is_finite() {
                return Err(ModelError::Inference(format!("class {} has non-finite probability", i)));
            }
            if *p > proba[best] {
                best = i;
            }
        }
        Ok(self.classes[best])
    }
}

/// Logistic scorer with an uncertainty band between the two thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    #[serde(default = "default_allow_below")]
    pub allow_below: f64,
    #[serde(default = "default_block_above")]
    pub block_above: f64,
    #[serde(default)]
    pub legitimate_class: ClassLabel,
    #[serde(default = "default_phishing_class")]
    pub phishing_class: ClassLabel,
    #[serde(default = "default_suspicious_class")]
    pub suspicious_class: ClassLabel,
}

fn default_allow_below() -> f64 {
    0.3
}

fn default_block_above() -> f64 {
    0.8
}

fn default_phishing_class() -> ClassLabel {
    1
}

fn default_suspicious_class() -> ClassLabel {
    2
}

impl LinearModel {
    /// Zero weights: every URL scores 0.5 and lands in the suspicious band.
    pub fn neutral() -> Self {
        Self {
            weights: vec![0.0; FEATURE_COUNT],
            bias: 0.0,
            allow_below: default_allow_below(),
            block_above: default_block_above(),
            legitimate_class: 0,
            phishing_class: default_phishing_class(),
            suspicious_class: default_suspicious_class(),
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.weights.len() != FEATURE_COUNT {
            return Err(ModelError::FeatureCount {
                expected: self.weights.len(),
                actual: FEATURE_COUNT,
            });
        }
        Ok(())
    }

    pub fn probability(&self, vector: &FeatureVector) -> f64 {
        let z = self.bias
            + self
                .weights
                .iter()
                .zip(vector.as_slice())
                .map(|(w, x)| w * x)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }

    fn predict(&self, vector: &FeatureVector) -> Result<ClassLabel, ModelError> {
        let p = self.probability(vector);
        if p.is_nan() {
            return Err(ModelError::Inference("score is NaN".to_string()));
        }
        Ok(if p < self.allow_below {
            self.legitimate_class
        } else if p > self.block_above {
            self.phishing_class
        } else {
            self.suspicious_class
        })
    }
}

pub struct TrainedModel {
    version: String,
    labels: LabelConvention,
    kind: ModelKind,
}

impl TrainedModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        if artifact.feature_count != FEATURE_COUNT {
            return Err(ModelError::FeatureCount {
                expected: artifact.feature_count,
                actual: FEATURE_COUNT,
            });
        }
        if artifact.feature_version != FEATURE_VERSION {
            return Err(ModelError::LayoutVersion {
                artifact: artifact.feature_version,
                current: FEATURE_VERSION,
            });
        }

        match &artifact.model {
            ModelKind::Forest(forest) => forest.validate()?,
            ModelKind::Linear(linear) => linear.validate()?,
        }

        Ok(Self {
            version: artifact.version,
            labels: artifact.labels.unwrap_or_default(),
            kind: artifact.model,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let artifact: ModelArtifact = serde_json::from_str(json)?;
        Self::from_artifact(artifact)
    }

    pub fn neutral() -> Self {
        Self {
            version: "neutral".to_string(),
            labels: LabelConvention::v1(),
            kind: ModelKind::Linear(LinearModel::neutral()),
        }
    }

    /// Loads the artifact at `path`, or the neutral model when the file is absent.
    pub fn load_or_neutral(path: &str) -> Result<Self, ModelError> {
        if !Path::new(path).exists() {
            warn!("Model artifact not found at {}, every URL will be scored as suspicious", path);
            return Ok(Self::neutral());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_string(),
            source,
        })?;
        let model = Self::from_json(&content)?;
        info!(
            "Loaded model {} from {} (labels {})",
            model.version, path, model.labels.version
        );
        Ok(model)
    }
}

impl Classifier for TrainedModel {
    fn predict(&self, vector: &FeatureVector) -> Result<ClassLabel, ModelError> {
        match &self.kind {
            ModelKind::Forest(forest) => forest.predict(vector),
            ModelKind::Linear(linear) => linear.predict(vector),
        }
    }

    fn labels(&self) -> &LabelConvention {
        &self.labels
    }

    fn version(&self) -> &str {
        &self.version
    }
}

use linfa::prelude::*;
use linfa::Dataset;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::TreeConfig;
use crate::encoder::{preprocess, FeatureEncoder, Preprocess};
use crate::error::{PipelineError, Result};
use crate::masking::MASKING_FUNCTION;
use crate::transaction::{EncodedRecord, FEATURE_COUNT, FEATURE_NAMES};

/// Decision tree as stored in the pipeline artifact.
///
/// Leaves keep the training counts that reached them, so the fraud
/// probability of a leaf is its share of fraudulent training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        fraud: usize,
        total: usize,
        /// Label the tree learner assigned, used when no training row landed here
        majority: bool,
    },
}

impl TreeNode {
    // Convert a fitted linfa node into our own representation
    fn compile(node: &linfa_trees::TreeNode<f64, usize>) -> Result<TreeNode> {
        if node.is_leaf() {
            return Ok(TreeNode::Leaf {
                fraud: 0,
                total: 0,
                majority: node.prediction() == Some(1),
            });
        }

        let (feature, threshold, _) = node.split();
        let children = node.children();
        let missing = || PipelineError::Training("split node without two children".to_string());
        let left = children.first().and_then(|c| c.as_deref()).ok_or_else(missing)?;
        let right = children.get(1).and_then(|c| c.as_deref()).ok_or_else(missing)?;

        Ok(TreeNode::Split {
            feature,
            threshold,
            left: Box::new(TreeNode::compile(left)?),
            right: Box::new(TreeNode::compile(right)?),
        })
    }

    pub fn probability(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] < *threshold {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                }
                TreeNode::Leaf { fraud, total, .. } if *total > 0 => {
                    return *fraud as f64 / *total as f64;
                }
                TreeNode::Leaf { majority, .. } => return if *majority { 1.0 } else { 0.0 },
            }
        }
    }

    // Count one training row in the leaf it lands in
    fn record(&mut self, features: &[f64; FEATURE_COUNT], is_fraud: bool) {
        match self {
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if features[*feature] < *threshold {
                    left.record(features, is_fraud)
                } else {
                    right.record(features, is_fraud)
                }
            }
            TreeNode::Leaf { fraud, total, .. } => {
                *total += 1;
                if is_fraud {
                    *fraud += 1;
                }
            }
        }
    }

    /// Every split must reference a feature the encoder produces.
    pub fn check_features(&self) -> std::result::Result<(), String> {
        match self {
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if *feature >= FEATURE_COUNT {
                    return Err(format!("split on unknown feature index {feature}"));
                }
                if !threshold.is_finite() {
                    return Err(format!("non-finite split threshold on feature {feature}"));
                }
                left.check_features()?;
                right.check_features()
            }
            TreeNode::Leaf { fraud, total, .. } => {
                if fraud > total {
                    Err(format!("leaf with {fraud} fraud rows out of {total}"))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
            TreeNode::Leaf { .. } => 0,
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            TreeNode::Split { left, right, .. } => left.leaf_count() + right.leaf_count(),
            TreeNode::Leaf { .. } => 1,
        }
    }
}

/// The fitted pipeline: preprocessing configuration plus the trained tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudPipeline {
    pub masking: String,
    pub encoder: FeatureEncoder,
    pub features: Vec<String>,
    pub tree: TreeNode,
}

impl FraudPipeline {
    /// Fit the classifier on labeled, already masked records.
    pub fn fit<R: Preprocess>(
        encoder: FeatureEncoder,
        records: &[R],
        params: &TreeConfig,
    ) -> Result<Self> {
        let encoded = preprocess(records, &encoder);
        if encoded.is_empty() {
            return Err(PipelineError::InputFormat(
                "no labeled rows available for training".to_string(),
            ));
        }

        let labels = encoded
            .iter()
            .enumerate()
            .map(|(i, r)| {
                r.is_fraud.ok_or_else(|| {
                    PipelineError::InputFormat(format!("row {} has no isFraud label", i + 1))
                })
            })
            .collect::<Result<Vec<bool>>>()?;

        // Convert to ndarray
        let features: Vec<[f64; FEATURE_COUNT]> =
            encoded.iter().map(EncodedRecord::to_feature_vector).collect();
        let mut data = Array2::zeros((features.len(), FEATURE_COUNT));
        for (i, row) in features.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                data[[i, j]] = value;
            }
        }
        let targets: Array1<usize> = labels.iter().map(|&fraud| usize::from(fraud)).collect();
        let dataset = Dataset::new(data, targets);

        let fitted: DecisionTree<f64, usize> = DecisionTree::params()
            .split_quality(SplitQuality::Gini)
            .max_depth(Some(params.max_depth))
            .min_weight_split(params.min_samples_split as f32)
            .min_weight_leaf(params.min_samples_leaf as f32)
            .fit(&dataset)
            .map_err(|e| PipelineError::Training(e.to_string()))?;

        let mut tree = TreeNode::compile(fitted.root_node())?;

        // Leaf statistics from the training rows
        for (row, &fraud) in features.iter().zip(labels.iter()) {
            tree.record(row, fraud);
        }

        Ok(Self {
            masking: MASKING_FUNCTION.to_string(),
            encoder,
            features: FEATURE_NAMES.iter().map(|f| f.to_string()).collect(),
            tree,
        })
    }

    /// Fraud probability for every record, after this pipeline's own preprocessing.
    pub fn predict_proba<R: Preprocess>(&self, records: &[R]) -> Vec<f64> {
        preprocess(records, &self.encoder)
            .iter()
            .map(|r| self.tree.probability(&r.to_feature_vector()))
            .collect()
    }

    pub fn predict<R: Preprocess>(&self, records: &[R], threshold: f64) -> Vec<bool> {
        self.predict_proba(records)
            .into_iter()
            .map(|p| p >= threshold)
            .collect()
    }
}

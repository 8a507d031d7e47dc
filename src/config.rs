//! Layered configuration: built-in defaults, optional TOML file, environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::encoder::{default_type_codes, FeatureEncoder};

const DECISION_THRESHOLD: f64 = 0.3;
const TEST_RATIO: f64 = 0.2;
const SPLIT_SEED: u64 = 42;
const MAX_DEPTH: usize = 10;
const MIN_SAMPLES_SPLIT: usize = 2;
const MIN_SAMPLES_LEAF: usize = 2;

const ENV_PREFIX: &str = "FRAUD_SCORING";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeCode {
    pub name: String,
    pub code: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Fraud probability at or above which a transaction is labeled fraud
    pub threshold: f64,
    pub split: SplitConfig,
    pub tree: TreeConfig,
    pub type_codes: Vec<TypeCode>,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Share of labeled rows held out for evaluation
    pub test_ratio: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub report_file: String,
    pub roc_file: String,
    pub predictions_file: String,
    pub unlabeled_predictions_file: String,
    /// Fitted pipeline location; relative paths resolve against `dir`
    pub artifact: PathBuf,
}

impl OutputConfig {
    pub fn report_path(&self) -> PathBuf {
        self.dir.join(&self.report_file)
    }

    pub fn roc_path(&self) -> PathBuf {
        self.dir.join(&self.roc_file)
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.dir.join(&self.predictions_file)
    }

    pub fn unlabeled_predictions_path(&self) -> PathBuf {
        self.dir.join(&self.unlabeled_predictions_file)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(&self.artifact)
    }
}

impl PipelineConfig {
    /// Load defaults, then an optional config file, then `FRAUD_SCORING__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&PipelineConfig::default())
                .context("Failed to serialize default configuration")?,
        );
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let loaded: PipelineConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            anyhow::bail!("threshold must be within [0, 1], got {}", self.threshold);
        }
        if !(self.split.test_ratio > 0.0 && self.split.test_ratio < 1.0) {
            anyhow::bail!(
                "split.test_ratio must be within (0, 1), got {}",
                self.split.test_ratio
            );
        }
        if self.tree.max_depth == 0 {
            anyhow::bail!("tree.max_depth must be at least 1");
        }
        Ok(())
    }

    pub fn encoder(&self) -> FeatureEncoder {
        FeatureEncoder::new(&self.type_codes)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: DECISION_THRESHOLD,
            split: SplitConfig {
                test_ratio: TEST_RATIO,
                seed: SPLIT_SEED,
            },
            tree: TreeConfig {
                max_depth: MAX_DEPTH,
                min_samples_split: MIN_SAMPLES_SPLIT,
                min_samples_leaf: MIN_SAMPLES_LEAF,
            },
            type_codes: default_type_codes(),
            output: OutputConfig {
                dir: PathBuf::from("."),
                report_file: "model_report.txt".to_string(),
                roc_file: "roc_curve.svg".to_string(),
                predictions_file: "fraud_predictions.csv".to_string(),
                unlabeled_predictions_file: "fraud_predictions_unlabeled.csv".to_string(),
                artifact: PathBuf::from("decision_tree_pipeline.json"),
            },
        }
    }
}

//! One run of the pipeline: load, mask, then train or score.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::encoder::{preprocess, DROPPED_COLUMNS};
use crate::error::{PipelineError, Result};
use crate::masking::mask_account_ids;
use crate::model::FraudPipeline;
use crate::persistence;
use crate::report::{self, EvaluationMetrics};
use crate::storage::{CsvFile, PredictionSink, TransactionSource};
use crate::transaction::{PredictionResult, TransactionRecord, TransactionSet, COL_IS_FRAUD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Labels present: fit, evaluate, report and persist.
    Train,
    /// No labels: load the persisted pipeline and predict.
    Score,
}

impl RunMode {
    pub fn detect(set: &TransactionSet) -> Self {
        if set.has_column(COL_IS_FRAUD) {
            RunMode::Train
        } else {
            RunMode::Score
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub mode: RunMode,
    pub predictions: Vec<PredictionResult>,
    pub metrics: Option<EvaluationMetrics>,
}

/// Row indices of the (training, evaluation) partitions.
///
/// The evaluation share is rounded up, like scikit-learn's `train_test_split`.
pub fn train_test_split(n: usize, test_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = ((n as f64) * test_ratio).ceil() as usize;
    let train = indices.split_off(n_test.min(n));
    (train, indices)
}

fn select(records: &[TransactionRecord], indices: &[usize]) -> Vec<TransactionRecord> {
    indices.iter().map(|&i| records[i].clone()).collect()
}

fn label_of(records: &[TransactionRecord]) -> Result<Vec<bool>> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            r.is_fraud.ok_or_else(|| {
                PipelineError::InputFormat(format!("row {} has no isFraud label", i + 1))
            })
        })
        .collect()
}

/// Run the pipeline over `source`.
///
/// Predictions always land in a CSV file under the configured output
/// directory; `extra_sink` receives the same rows when given.
pub fn run(
    source: &dyn TransactionSource,
    config: &PipelineConfig,
    extra_sink: Option<&dyn PredictionSink>,
) -> Result<RunSummary> {
    let mut set = source.load()?;
    mask_account_ids(&mut set.records);

    let mode = RunMode::detect(&set);
    let encoder = config.encoder();
    let dropped: Vec<&String> = set
        .columns
        .iter()
        .filter(|c| DROPPED_COLUMNS.contains(&c.as_str()))
        .collect();
    info!(
        ?mode,
        rows = set.records.len(),
        columns = ?encoder.retained_columns(&set.columns),
        ?dropped,
        "Input inspected"
    );

    let (predictions, metrics) = if set.records.is_empty() {
        warn!("No transactions to process");
        (Vec::new(), None)
    } else {
        match mode {
            RunMode::Train => {
                let (predictions, metrics) = train(&set.records, config)?;
                (predictions, Some(metrics))
            }
            RunMode::Score => (score(&set.records, config)?, None),
        }
    };

    let csv_path = match mode {
        RunMode::Train => config.output.predictions_path(),
        RunMode::Score => config.output.unlabeled_predictions_path(),
    };
    CsvFile::new(&csv_path).write(&predictions)?;
    if let Some(sink) = extra_sink {
        sink.write(&predictions)?;
    }
    info!(path = %csv_path.display(), rows = predictions.len(), "Predictions saved");

    Ok(RunSummary {
        mode,
        predictions,
        metrics,
    })
}

fn train(
    records: &[TransactionRecord],
    config: &PipelineConfig,
) -> Result<(Vec<PredictionResult>, EvaluationMetrics)> {
    let (train_idx, eval_idx) =
        train_test_split(records.len(), config.split.test_ratio, config.split.seed);
    let train_set = select(records, &train_idx);
    let eval_set = select(records, &eval_idx);
    info!(
        train = train_set.len(),
        eval = eval_set.len(),
        "Split labeled data"
    );

    let pipeline = FraudPipeline::fit(config.encoder(), &train_set, &config.tree)?;
    info!(
        depth = pipeline.tree.depth(),
        leaves = pipeline.tree.leaf_count(),
        "Decision tree fitted"
    );

    let train_scores = pipeline.predict_proba(&train_set);
    let eval_scores = pipeline.predict_proba(&eval_set);
    let threshold = config.threshold;
    let train_pred: Vec<bool> = train_scores.iter().map(|&p| p >= threshold).collect();
    let eval_pred: Vec<bool> = eval_scores.iter().map(|&p| p >= threshold).collect();
    let train_actual = label_of(&train_set)?;
    let eval_actual = label_of(&eval_set)?;

    let metrics = EvaluationMetrics::compute(
        &train_actual,
        &train_pred,
        &train_scores,
        &eval_actual,
        &eval_pred,
        &eval_scores,
    );
    info!("Training Accuracy: {:.4}", metrics.train_accuracy);
    info!("Testing Accuracy: {:.4}", metrics.eval_accuracy);
    match metrics.roc_auc() {
        Some(auc) => info!("ROC AUC: {auc:.4}"),
        None => warn!("ROC AUC undefined: evaluation set holds a single class"),
    }

    let output = &config.output;
    std::fs::create_dir_all(&output.dir)?;
    report::write_report(&metrics, &output.report_path())?;
    report::plot_roc(&metrics, &output.roc_path())?;

    let predictions = preprocess(&eval_set, &pipeline.encoder)
        .into_iter()
        .zip(eval_pred)
        .zip(eval_scores)
        .zip(eval_actual)
        .map(|(((record, predicted), probability), actual)| PredictionResult {
            record,
            predicted_label: predicted,
            fraud_probability: probability,
            actual_label: Some(actual),
        })
        .collect();

    persistence::save(&pipeline, &output.artifact_path())?;
    Ok((predictions, metrics))
}

fn score(records: &[TransactionRecord], config: &PipelineConfig) -> Result<Vec<PredictionResult>> {
    let pipeline = persistence::load(&config.output.artifact_path())?;

    let scores = pipeline.predict_proba(records);
    let fraud = scores.iter().filter(|&&p| p >= config.threshold).count();
    info!(rows = records.len(), flagged = fraud, "Scored transactions");

    Ok(preprocess(records, &pipeline.encoder)
        .into_iter()
        .zip(scores)
        .map(|(record, probability)| PredictionResult {
            record,
            predicted_label: probability >= config.threshold,
            fraud_probability: probability,
            actual_label: None,
        })
        .collect())
}

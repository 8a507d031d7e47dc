//! Evaluation metrics, the text report and the ROC plot.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

use plotters::prelude::*;
use tracing::info;

use crate::error::{PipelineError, Result};

const CLASS_NAMES: [&str; 2] = ["legit", "fraud"];

/// Points of a ROC curve, from (0, 0) to (1, 1).
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
}

impl RocCurve {
    // Trapezoidal area under the curve
    pub fn auc(&self) -> f64 {
        self.fpr
            .windows(2)
            .zip(self.tpr.windows(2))
            .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
            .sum()
    }

    fn points(&self) -> Vec<(f64, f64)> {
        self.fpr.iter().copied().zip(self.tpr.iter().copied()).collect()
    }
}

/// ROC curve over the distinct score thresholds, highest first.
///
/// Returns `None` when `labels` holds a single class, since one of the two
/// rates is then undefined.
pub fn roc_curve(labels: &[bool], scores: &[f64]) -> Option<RocCurve> {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (pos, &i) in order.iter().enumerate() {
        if labels[i] {
            tp += 1;
        } else {
            fp += 1;
        }
        // Emit a point only once all rows sharing this score are counted
        let last_of_score = order
            .get(pos + 1)
            .map_or(true, |&next| scores[next] != scores[i]);
        if last_of_score {
            fpr.push(fp as f64 / negatives as f64);
            tpr.push(tp as f64 / positives as f64);
        }
    }
    Some(RocCurve { fpr, tpr })
}

/// Counts indexed as `[actual][predicted]`, legit first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn new(actual: &[bool], predicted: &[bool]) -> Self {
        let mut counts = [[0usize; 2]; 2];
        for (&a, &p) in actual.iter().zip(predicted.iter()) {
            counts[usize::from(a)][usize::from(p)] += 1;
        }
        Self { counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.counts[0][0] + self.counts[1][1], self.total())
    }

    pub fn class_scores(&self, class: usize) -> ClassScores {
        let other = 1 - class;
        let tp = self.counts[class][class];
        let fp = self.counts[other][class];
        let fn_ = self.counts[class][other];
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassScores {
            precision,
            recall,
            f1,
            support: tp + fn_,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn accuracy(actual: &[bool], predicted: &[bool]) -> f64 {
    ConfusionMatrix::new(actual, predicted).accuracy()
}

/// Outcome of a training run, measured on both partitions.
#[derive(Debug, Clone)]
pub struct EvaluationMetrics {
    pub train_accuracy: f64,
    pub eval_accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub train_roc: Option<RocCurve>,
    pub eval_roc: Option<RocCurve>,
}

impl EvaluationMetrics {
    pub fn compute(
        train_actual: &[bool],
        train_predicted: &[bool],
        train_scores: &[f64],
        eval_actual: &[bool],
        eval_predicted: &[bool],
        eval_scores: &[f64],
    ) -> Self {
        Self {
            train_accuracy: accuracy(train_actual, train_predicted),
            eval_accuracy: accuracy(eval_actual, eval_predicted),
            confusion: ConfusionMatrix::new(eval_actual, eval_predicted),
            train_roc: roc_curve(train_actual, train_scores),
            eval_roc: roc_curve(eval_actual, eval_scores),
        }
    }

    pub fn roc_auc(&self) -> Option<f64> {
        self.eval_roc.as_ref().map(RocCurve::auc)
    }
}

fn format_auc(auc: Option<f64>) -> String {
    match auc {
        Some(auc) => format!("{auc:.4}"),
        None => "undefined (evaluation set holds a single class)".to_string(),
    }
}

/// Classification report, confusion matrix and ROC AUC as plain text.
impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cm = &self.confusion;
        let scores = [cm.class_scores(0), cm.class_scores(1)];
        let total = cm.total();

        writeln!(f, "Classification Report:")?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, s) in CLASS_NAMES.iter().zip(scores.iter()) {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, s.precision, s.recall, s.f1, s.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy",
            "",
            "",
            cm.accuracy(),
            total
        )?;

        // Class weights for the two summary rows
        let support_weights = if total == 0 {
            [0.0, 0.0]
        } else {
            [
                scores[0].support as f64 / total as f64,
                scores[1].support as f64 / total as f64,
            ]
        };
        for (label, w) in [("macro avg", [0.5, 0.5]), ("weighted avg", support_weights)] {
            let avg = |g: fn(&ClassScores) -> f64| w[0] * g(&scores[0]) + w[1] * g(&scores[1]);
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                label,
                avg(|s| s.precision),
                avg(|s| s.recall),
                avg(|s| s.f1),
                total
            )?;
        }

        writeln!(f, "\nConfusion Matrix:")?;
        writeln!(f, "[[{} {}]", cm.counts[0][0], cm.counts[0][1])?;
        writeln!(f, " [{} {}]]", cm.counts[1][0], cm.counts[1][1])?;
        writeln!(f, "\nTraining Accuracy: {:.4}", self.train_accuracy)?;
        writeln!(f, "Testing Accuracy: {:.4}", self.eval_accuracy)?;
        writeln!(f, "ROC AUC: {}", format_auc(self.roc_auc()))
    }
}

pub fn write_report(metrics: &EvaluationMetrics, path: &Path) -> Result<()> {
    fs::write(path, metrics.to_string())?;
    info!(path = %path.display(), "Report saved");
    Ok(())
}

/// Train and evaluation ROC curves against the no-skill diagonal, as SVG.
pub fn plot_roc(metrics: &EvaluationMetrics, path: &Path) -> Result<()> {
    draw_roc(metrics, path).map_err(|e| PipelineError::Storage(format!("ROC plot: {e}")))?;
    info!(path = %path.display(), "ROC curve saved");
    Ok(())
}

fn draw_roc(
    metrics: &EvaluationMetrics,
    path: &Path,
) -> std::result::Result<(), Box<dyn Error>> {
    let root = SVGBackend::new(path, (600, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("ROC Curve", ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(48)
        .build_cartesian_2d(0f64..1f64, 0f64..1f64)?;
    chart
        .configure_mesh()
        .x_desc("False Positive Rate")
        .y_desc("True Positive Rate")
        .draw()?;

    for (curve, label, color) in [
        (&metrics.train_roc, "Train ROC", BLUE),
        (&metrics.eval_roc, "Test ROC", RED),
    ] {
        if let Some(curve) = curve {
            chart
                .draw_series(LineSeries::new(curve.points(), color.stroke_width(2)))?
                .label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }
    }
    chart.draw_series(LineSeries::new(
        vec![(0.0, 0.0), (1.0, 1.0)],
        BLACK.mix(0.4),
    ))?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_ranking_has_unit_auc() {
        let labels = [false, false, true, true];
        let scores = [0.1, 0.2, 0.8, 0.9];
        let curve = roc_curve(&labels, &scores).unwrap();
        assert_eq!(curve.auc(), 1.0);
        assert_eq!(curve.fpr.first(), Some(&0.0));
        assert_eq!(curve.tpr.last(), Some(&1.0));
    }

    #[test]
    fn test_auc_with_ties_and_overlap() {
        // Hand computed: pairs (pos, neg) ranked correctly 3 of 4 -> 0.75
        let labels = [false, false, true, true];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let curve = roc_curve(&labels, &scores).unwrap();
        assert!((curve.auc() - 0.75).abs() < 1e-12);

        // All scores tied: the curve is the diagonal
        let tied = roc_curve(&labels, &[0.5; 4]).unwrap();
        assert_eq!(tied.fpr, vec![0.0, 1.0]);
        assert!((tied.auc() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_class_has_no_curve() {
        assert!(roc_curve(&[false, false], &[0.2, 0.7]).is_none());
        assert!(roc_curve(&[], &[]).is_none());
    }

    #[test]
    fn test_confusion_matrix_scores() {
        let actual = [true, true, false, false, false];
        let predicted = [true, false, true, false, false];
        let cm = ConfusionMatrix::new(&actual, &predicted);
        assert_eq!(cm.counts, [[2, 1], [1, 1]]);
        assert_eq!(cm.accuracy(), 0.6);

        let fraud = cm.class_scores(1);
        assert_eq!(fraud.precision, 0.5);
        assert_eq!(fraud.recall, 0.5);
        assert_eq!(fraud.support, 2);
    }

    #[test]
    fn test_zero_division_yields_zero() {
        let cm = ConfusionMatrix::new(&[false, false], &[false, false]);
        let fraud = cm.class_scores(1);
        assert_eq!(fraud.precision, 0.0);
        assert_eq!(fraud.recall, 0.0);
        assert_eq!(fraud.f1, 0.0);
    }

    #[test]
    fn test_report_mentions_auc_even_when_undefined() {
        let metrics = EvaluationMetrics::compute(
            &[false, true],
            &[false, true],
            &[0.0, 1.0],
            &[false],
            &[false],
            &[0.0],
        );
        let report = metrics.to_string();
        assert!(report.contains("ROC AUC: undefined"));
        assert!(report.contains("Confusion Matrix:"));
        assert!(report.contains("Training Accuracy: 1.0000"));
    }
}

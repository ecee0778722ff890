//! Accuracy of the pipeline over a labelled directory tree.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{FractureError, Result};
use crate::mapping::BodyPart;
use crate::pipeline::{FractureLabel, PredictionPipeline};
use crate::preprocess::ImageRef;
use crate::utils::{load_dataset, DatasetEntry};

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub image_path: PathBuf,
    pub expected_part: BodyPart,
    pub predicted_part: Option<BodyPart>,
    pub expected_label: FractureLabel,
    pub predicted_label: Option<FractureLabel>,
    pub error: Option<String>,
}

impl EvaluationRecord {
    pub fn part_correct(&self) -> bool {
        self.predicted_part == Some(self.expected_part)
    }

    pub fn status_correct(&self) -> bool {
        self.predicted_label == Some(self.expected_label)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    pub total: usize,
    pub failed: usize,
    pub part_correct: usize,
    pub status_correct: usize,
    pub records: Vec<EvaluationRecord>,
}

impl EvaluationReport {
    fn ratio(hits: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Fraction of images whose body part was predicted correctly.
    pub fn part_accuracy(&self) -> f64 {
        Self::ratio(self.part_correct, self.total)
    }

    /// Fraction of images whose fracture classifier argmax matched the label.
    pub fn status_accuracy(&self) -> f64 {
        Self::ratio(self.status_correct, self.total)
    }

    fn push(&mut self, record: EvaluationRecord) {
        self.total += 1;
        if record.error.is_some() {
            self.failed += 1;
        }
        if record.part_correct() {
            self.part_correct += 1;
        }
        if record.status_correct() {
            self.status_correct += 1;
        }
        self.records.push(record);
    }
}

fn evaluate_entry(pipeline: &PredictionPipeline, entry: &DatasetEntry) -> EvaluationRecord {
    let image = ImageRef::path(&entry.image_path);
    let mut record = EvaluationRecord {
        image_path: entry.image_path.clone(),
        expected_part: entry.body_part,
        predicted_part: None,
        expected_label: entry.label,
        predicted_label: None,
        error: None,
    };

    let outcome = pipeline.classify_part(&image).and_then(|part| {
        record.predicted_part = Some(part);
        // status is judged on the labelled part's model, as the dataset is organised
        pipeline.classify_fracture(&image, entry.body_part)
    });
    match outcome {
        Ok(result) => record.predicted_label = Some(result.raw_model_label),
        Err(e) => {
            warn!(path = %entry.image_path.display(), error = %e, "evaluation sample failed");
            record.error = Some(e.to_string());
        }
    }
    record
}

/// Runs every entry through the pipeline. Samples that fail count as misses.
pub fn evaluate_entries(pipeline: &PredictionPipeline, entries: &[DatasetEntry]) -> EvaluationReport {
    let t = Instant::now();
    let mut report = EvaluationReport::default();
    for entry in entries {
        report.push(evaluate_entry(pipeline, entry));
    }
    info!(
        total = report.total,
        failed = report.failed,
        part_accuracy = report.part_accuracy(),
        status_accuracy = report.status_accuracy(),
        elapsed = ?t.elapsed(),
        "evaluation finished"
    );
    report
}

/// Evaluates the dataset rooted at `root`, laid out as
/// `<root>/<Part>/<fractured|normal>/<image>`.
pub fn evaluate(pipeline: &PredictionPipeline, root: &Path) -> Result<EvaluationReport> {
    let entries = load_dataset(root)?;
    if entries.is_empty() {
        return Err(FractureError::InvalidInput(format!(
            "no labelled images under {}",
            root.display()
        )));
    }
    Ok(evaluate_entries(pipeline, &entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(part: Option<BodyPart>, label: Option<FractureLabel>) -> EvaluationRecord {
        EvaluationRecord {
            image_path: PathBuf::from("x.png"),
            expected_part: BodyPart::Hand,
            predicted_part: part,
            expected_label: FractureLabel::Fractured,
            predicted_label: label,
            error: None,
        }
    }

    #[test]
    fn accuracy_counts_hits() {
        let mut report = EvaluationReport::default();
        report.push(record(Some(BodyPart::Hand), Some(FractureLabel::Fractured)));
        report.push(record(Some(BodyPart::Elbow), Some(FractureLabel::Fractured)));
        report.push(record(Some(BodyPart::Hand), Some(FractureLabel::Normal)));
        let mut failed = record(None, None);
        failed.error = Some("decode".into());
        report.push(failed);

        assert_eq!(report.total, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.part_accuracy(), 0.5);
        assert_eq!(report.status_accuracy(), 0.5);
    }

    #[test]
    fn empty_report_is_zero() {
        let report = EvaluationReport::default();
        assert_eq!(report.part_accuracy(), 0.0);
    }
}

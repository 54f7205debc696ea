//! Reject-threshold calibration from labeled example questions.
//!
//! Every question is scored with [`RetrievalPipeline::reject_score`]. Good
//! questions are positives, bad ones negatives. Each distinct score is a
//! candidate threshold (predict "answerable" when `score >= threshold`), and
//! the candidate with the best F1 wins. Ties go to the smallest threshold.

use std::collections::HashSet;

use crate::{
    error::{Error, Result},
    pipeline::RetrievalPipeline,
};

/// The selected operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub threshold: f32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

/// One point of the precision/recall curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub threshold: f32,
    pub precision: f32,
    pub recall: f32,
}

impl CurvePoint {
    pub fn f1(&self) -> f32 {
        let sum = self.precision + self.recall;
        if sum == 0.0 {
            0.0
        } else {
            2.0 * self.precision * self.recall / sum
        }
    }
}

/// Precision/recall at every distinct score, ascending by threshold.
pub fn precision_recall_curve(good: &[f32], bad: &[f32]) -> Vec<CurvePoint> {
    let mut thresholds: Vec<f32> = good.iter().chain(bad).copied().collect();
    thresholds.sort_by(f32::total_cmp);
    thresholds.dedup();

    thresholds
        .into_iter()
        .map(|threshold| {
            let tp = good.iter().filter(|s| **s >= threshold).count();
            let fp = bad.iter().filter(|s| **s >= threshold).count();
            let precision = if tp + fp == 0 {
                0.0
            } else {
                tp as f32 / (tp + fp) as f32
            };
            let recall = if good.is_empty() {
                0.0
            } else {
                tp as f32 / good.len() as f32
            };
            CurvePoint {
                threshold,
                precision,
                recall,
            }
        })
        .collect()
}

/// Pick the max-F1 threshold for the given scores.
pub fn select_threshold(good: &[f32], bad: &[f32]) -> Result<Calibration> {
    if good.is_empty() || bad.is_empty() {
        return Err(Error::CalibrationInput(
            "need at least one good and one bad question".into(),
        ));
    }
    if good.iter().chain(bad).any(|s| !s.is_finite()) {
        return Err(Error::CalibrationInput("scores must be finite".into()));
    }

    let mut best: Option<(CurvePoint, f32)> = None;
    for point in precision_recall_curve(good, bad) {
        let f1 = point.f1();
        // strictly greater, so the smallest threshold wins ties
        if best.is_none_or(|(_, best_f1)| f1 > best_f1) {
            best = Some((point, f1));
        }
    }

    let (point, f1) = best.ok_or_else(|| {
        Error::CalibrationInput("no candidate thresholds".into())
    })?;
    Ok(Calibration {
        threshold: point.threshold,
        precision: point.precision,
        recall: point.recall,
        f1,
    })
}

/// Score both question sets and select the reject threshold.
pub fn calibrate(
    pipeline: &RetrievalPipeline<'_>,
    good: &[String],
    bad: &[String],
) -> Result<Calibration> {
    if good.is_empty() || bad.is_empty() {
        return Err(Error::CalibrationInput(
            "need at least one good and one bad question".into(),
        ));
    }
    let good_set: HashSet<&str> = good.iter().map(String::as_str).collect();
    if let Some(both) = bad.iter().find(|q| good_set.contains(q.as_str())) {
        return Err(Error::CalibrationInput(format!(
            "question is labeled both good and bad: {both:?}"
        )));
    }

    let score_all = |questions: &[String]| -> Result<Vec<f32>> {
        questions
            .iter()
            .map(|q| pipeline.reject_score(q))
            .collect()
    };
    let good_scores = score_all(good)?;
    let bad_scores = score_all(bad)?;
    tracing::debug!(?good_scores, ?bad_scores, "calibration scores");

    let calibration = select_threshold(&good_scores, &bad_scores)?;
    tracing::info!(
        threshold = calibration.threshold,
        precision = calibration.precision,
        recall = calibration.recall,
        f1 = calibration.f1,
        "selected reject throttle"
    );
    Ok(calibration)
}

//! Precision and recall over labelled test lines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::loss::Scored;

/// Gold, predicted and correctly predicted counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub gold: u64,
    pub predicted: u64,
    pub predicted_gold: u64,
}

impl Metrics {
    /// `NaN` when nothing was predicted.
    pub fn precision(&self) -> f64 {
        if self.predicted == 0 {
            f64::NAN
        } else {
            self.predicted_gold as f64 / self.predicted as f64
        }
    }

    /// `NaN` when there was nothing to find.
    pub fn recall(&self) -> f64 {
        if self.gold == 0 {
            f64::NAN
        } else {
            self.predicted_gold as f64 / self.gold as f64
        }
    }

    pub fn f1(&self) -> f64 {
        if self.predicted + self.gold == 0 {
            f64::NAN
        } else {
            2.0 * self.predicted_gold as f64 / (self.predicted + self.gold) as f64
        }
    }
}

/// Accumulates predictions against gold labels.
#[derive(Debug, Clone, Default)]
pub struct Meter {
    global: Metrics,
    per_label: BTreeMap<u32, Metrics>,
    nexamples: u64,
}

impl Meter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one example's predictions against its gold labels.
    pub fn log(&mut self, gold: &[u32], predictions: &[Scored]) {
        self.nexamples += 1;
        self.global.gold += gold.len() as u64;
        self.global.predicted += predictions.len() as u64;

        for &(_, label) in predictions {
            let m = self.per_label.entry(label).or_default();
            m.predicted += 1;
            if gold.contains(&label) {
                m.predicted_gold += 1;
                self.global.predicted_gold += 1;
            }
        }
        for &label in gold {
            self.per_label.entry(label).or_default().gold += 1;
        }
    }

    pub fn nexamples(&self) -> u64 {
        self.nexamples
    }

    pub fn global(&self) -> Metrics {
        self.global
    }

    /// Counts for `label`; all zero when it never appeared.
    pub fn label(&self, label: u32) -> Metrics {
        self.per_label.get(&label).copied().unwrap_or_default()
    }

    /// Freeze into a report, naming labels with `name`.
    pub fn report<F>(&self, k: usize, mut name: F) -> TestReport
    where
        F: FnMut(u32) -> String,
    {
        TestReport {
            nexamples: self.nexamples,
            k,
            precision: self.global.precision(),
            recall: self.global.recall(),
            f1: self.global.f1(),
            labels: self
                .per_label
                .iter()
                .map(|(&id, m)| LabelReport {
                    label: name(id),
                    metrics: *m,
                    precision: m.precision(),
                    recall: m.recall(),
                    f1: m.f1(),
                })
                .collect(),
            skipped_lines: 0,
        }
    }
}

/// Per-label line of a [`TestReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelReport {
    pub label: String,
    pub metrics: Metrics,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Result of evaluating a model on a labelled file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Lines evaluated
    pub nexamples: u64,
    /// Predictions per line
    pub k: usize,
    /// Precision at `k`
    pub precision: f64,
    /// Recall at `k`
    pub recall: f64,
    pub f1: f64,
    /// Per label, ordered by label id
    pub labels: Vec<LabelReport>,
    /// Lines dropped for invalid UTF-8
    pub skipped_lines: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let mut meter = Meter::new();
        meter.log(&[0], &[(-0.1, 0)]);
        meter.log(&[1], &[(-0.2, 1)]);
        let report = meter.report(1, |id| format!("__label__{id}"));
        assert_eq!(report.nexamples, 2);
        assert_eq!(report.precision, 1.0);
        assert_eq!(report.recall, 1.0);
        assert_eq!(report.labels.len(), 2);
        assert_eq!(report.labels[1].label, "__label__1");
    }

    #[test]
    fn test_partial_predictions() {
        let mut meter = Meter::new();
        meter.log(&[0, 1], &[(-0.1, 0), (-0.5, 2)]);
        let g = meter.global();
        assert_eq!((g.gold, g.predicted, g.predicted_gold), (2, 2, 1));
        assert_eq!(g.precision(), 0.5);
        assert_eq!(meter.label(2).precision(), 0.0);
        assert_eq!(meter.label(1).recall(), 0.0);
        assert!(meter.label(1).precision().is_nan());
    }

    #[test]
    fn test_empty_meter_is_nan() {
        let meter = Meter::new();
        assert!(meter.global().precision().is_nan());
        assert!(meter.global().recall().is_nan());
        assert_eq!(meter.label(9), Metrics::default());
    }
}

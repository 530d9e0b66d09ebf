use serde::{Deserialize, Serialize};

/// Classification quality over a set of predictions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl MetricsSnapshot {
    /// Derive ratios from raw counts; empty denominators yield 0
    pub fn from_counts(true_positives: usize, false_positives: usize, false_negatives: usize) -> Self {
        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, true_positives + false_negatives);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            precision,
            recall,
            f1,
            true_positives,
            false_positives,
            false_negatives,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Per-brand outcome counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrandStats {
    /// Display name of the brand
    pub brand: String,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl BrandStats {
    pub fn new(brand: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            ..Default::default()
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_counts(self.true_positives, self.false_positives, self.false_negatives)
    }

    /// How often the brand was predicted, right or wrong
    pub fn mentions(&self) -> usize {
        self.true_positives + self.false_positives
    }
}

/// Row of the low-precision report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowPrecisionEntry {
    pub brand: String,
    pub precision: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub mentions: usize,
}

impl From<&BrandStats> for LowPrecisionEntry {
    fn from(stats: &BrandStats) -> Self {
        Self {
            brand: stats.brand.clone(),
            precision: stats.metrics().precision,
            true_positives: stats.true_positives,
            false_positives: stats.false_positives,
            false_negatives: stats.false_negatives,
            mentions: stats.mentions(),
        }
    }
}

/// Ground truth vs prediction for one dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueComparison {
    pub dialogue_id: String,
    pub ground_truth: Vec<String>,
    pub predicted: Vec<String>,
    pub true_positives: Vec<String>,
    pub false_positives: Vec<String>,
    pub false_negatives: Vec<String>,
}

impl DialogueComparison {
    /// "OK" when prediction and annotation agree, "DIFF" otherwise
    pub fn status(&self) -> &'static str {
        if self.false_positives.is_empty() && self.false_negatives.is_empty() {
            "OK"
        } else {
            "DIFF"
        }
    }
}

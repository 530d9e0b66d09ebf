use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;

use crate::error::Result;
use crate::models::{DialogueComparison, LowPrecisionEntry, MetricsSnapshot, ScoredDetection};

/// One line of `result.csv`
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRow<'a> {
    pub dialog_id: &'a str,
    /// Span as found in the dialogue
    pub original_text: &'a str,
    /// Term that matched (synonym or canonical name)
    pub detected_brand: &'a str,
    /// Canonical catalog brand
    pub normalized_brand: &'a str,
    pub confidence: f64,
    pub confirmed: bool,
}

impl<'a> From<&'a ScoredDetection> for DetectionRow<'a> {
    fn from(scored: &'a ScoredDetection) -> Self {
        Self {
            dialog_id: scored.candidate.dialogue_id.as_str(),
            original_text: &scored.candidate.matched_text,
            detected_brand: &scored.candidate.matched_term,
            normalized_brand: &scored.candidate.brand,
            confidence: round4(scored.confidence),
            confirmed: scored.confirmed,
        }
    }
}

/// Contents of `metrics.json`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsRecord {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
}

impl MetricsRecord {
    pub fn new(metrics: &MetricsSnapshot, run_id: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            precision: round4(metrics.precision),
            recall: round4(metrics.recall),
            f1: round4(metrics.f1),
            true_positives: metrics.true_positives,
            false_positives: metrics.false_positives,
            false_negatives: metrics.false_negatives,
            run_id: run_id.to_string(),
            generated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct LowPrecisionRow<'a> {
    brand: &'a str,
    precision: f64,
    tp: usize,
    fp: usize,
    #[serde(rename = "fn")]
    fn_: usize,
    mentions: usize,
}

/// Round to 4 decimals for reporting
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Write one row per scored detection
pub fn write_detections_csv(path: &Path, scored: &[ScoredDetection]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for detection in scored {
        writer.serialize(DetectionRow::from(detection))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_metrics_json(path: &Path, record: &MetricsRecord) -> Result<()> {
    write_json(path, record)
}

/// Write the low-precision ranking as CSV, precision as a percentage
pub fn write_low_precision_csv(path: &Path, entries: &[LowPrecisionEntry]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for entry in entries {
        writer.serialize(LowPrecisionRow {
            brand: &entry.brand,
            precision: (entry.precision * 10_000.0).round() / 100.0,
            tp: entry.true_positives,
            fp: entry.false_positives,
            fn_: entry.false_negatives,
            mentions: entry.mentions,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the two-sheet combined report: aggregate metrics and per-dialogue comparison
pub fn write_report_xlsx(
    path: &Path,
    metrics: &MetricsSnapshot,
    comparisons: &[DialogueComparison],
) -> Result<()> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name("Metrics")?;
    let metric_rows: [(&str, f64); 6] = [
        ("precision", round4(metrics.precision)),
        ("recall", round4(metrics.recall)),
        ("f1", round4(metrics.f1)),
        ("true_positives", metrics.true_positives as f64),
        ("false_positives", metrics.false_positives as f64),
        ("false_negatives", metrics.false_negatives as f64),
    ];
    for (col, (name, value)) in metric_rows.iter().enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, *name, &header)?;
        sheet.write_number(1, col, *value)?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Details")?;
    let columns = [
        "dialog_id",
        "ground_truth",
        "predicted",
        "true_positives",
        "false_positives",
        "false_negatives",
        "status",
    ];
    for (col, name) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, &header)?;
    }
    for (index, row) in comparisons.iter().enumerate() {
        let r = index as u32 + 1;
        sheet.write_string(r, 0, &row.dialogue_id)?;
        sheet.write_string(r, 1, row.ground_truth.join(", "))?;
        sheet.write_string(r, 2, row.predicted.join(", "))?;
        sheet.write_string(r, 3, row.true_positives.join(", "))?;
        sheet.write_string(r, 4, row.false_positives.join(", "))?;
        sheet.write_string(r, 5, row.false_negatives.join(", "))?;
        sheet.write_string(r, 6, row.status())?;
    }
    sheet.set_column_width(1, 40)?;
    sheet.set_column_width(2, 40)?;

    workbook.save(path)?;
    Ok(())
}

/// Write any serializable value as pretty JSON
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateDetection, DialogueId, MatchSource};
    use tempfile::tempdir;

    fn scored() -> ScoredDetection {
        ScoredDetection::judged(
            CandidateDetection {
                dialogue_id: DialogueId::new("1"),
                brand: "Сбер".to_string(),
                matched_term: "сбербанк".to_string(),
                matched_text: "Сбербанк".to_string(),
                source: MatchSource::Synonym,
            },
            0.912345,
            0.5,
            1,
        )
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }

    #[test]
    fn test_write_detections_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result.csv");
        write_detections_csv(&path, &[scored()]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "dialog_id,original_text,detected_brand,normalized_brand,confidence,confirmed"
        );
        assert_eq!(lines.next().unwrap(), "1,Сбербанк,сбербанк,Сбер,0.9123,true");
    }

    #[test]
    fn test_write_low_precision_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("low_precision_brands.csv");
        let entry = LowPrecisionEntry {
            brand: "Мир".to_string(),
            precision: 0.25,
            true_positives: 1,
            false_positives: 3,
            false_negatives: 0,
            mentions: 4,
        };
        write_low_precision_csv(&path, &[entry]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("brand,precision,tp,fp,fn,mentions\n"));
        assert!(content.contains("Мир,25.0,1,3,0,4"));
    }

    #[test]
    fn test_write_metrics_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let metrics = MetricsSnapshot::from_counts(2, 1, 1);
        write_metrics_json(&path, &MetricsRecord::new(&metrics, "run-1", Utc::now())).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["precision"], 0.6667);
        assert_eq!(value["true_positives"], 2);
        assert_eq!(value["run_id"], "run-1");
    }

    #[test]
    fn test_write_json_is_complete_on_return() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scored.json");
        let scored = vec![scored(); 200];
        write_json(&path, &scored).unwrap();

        let reread: Vec<ScoredDetection> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread, scored);

        // a directory cannot be opened as a file
        assert!(write_json(dir.path(), &scored).is_err());
    }

    #[test]
    fn test_write_report_xlsx() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let comparison = DialogueComparison {
            dialogue_id: "1".to_string(),
            ground_truth: vec!["Сбер".to_string()],
            predicted: vec![],
            true_positives: vec![],
            false_positives: vec![],
            false_negatives: vec!["Сбер".to_string()],
        };
        write_report_xlsx(&path, &MetricsSnapshot::from_counts(0, 0, 1), &[comparison]).unwrap();

        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}

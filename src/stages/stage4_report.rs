use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::io::{
    read_json, write_detections_csv, write_low_precision_csv, write_metrics_json,
    write_report_xlsx, MetricsRecord,
};
use crate::models::{
    index_dialogues, normalize_term, BrandStats, Catalog, Dialogue, DialogueComparison,
    LowPrecisionEntry, MetricsSnapshot, ScoredDetection,
};

/// Configuration for Stage 4
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Length of the low-precision ranking
    pub top_n: usize,
    /// Curated alias table, normalized alias -> normalized canonical name
    pub aliases: BTreeMap<String, String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            aliases: BTreeMap::new(),
        }
    }
}

impl ReportConfig {
    /// Load a `{"alias": "canonical"}` JSON table; both sides are normalized
    pub fn with_aliases_file(mut self, path: &Path) -> Result<Self> {
        let raw: BTreeMap<String, String> = read_json(path)?;
        self.aliases = raw
            .into_iter()
            .map(|(alias, canonical)| (normalize_term(&alias), normalize_term(&canonical)))
            .filter(|(alias, canonical)| !alias.is_empty() && alias != canonical)
            .collect();
        info!("Loaded {} brand aliases from {:?}", self.aliases.len(), path);
        Ok(self)
    }

    /// Identity of a brand name for metric comparison
    fn brand_key(&self, name: &str) -> String {
        let normalized = normalize_term(name);
        match self.aliases.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => normalized,
        }
    }
}

/// Everything Stage 4 derives from a run
#[derive(Debug, Clone)]
pub struct AggregateReport {
    /// Totals over all dialogues
    pub metrics: MetricsSnapshot,
    /// Counts per brand, sorted by brand name
    pub per_brand: Vec<BrandStats>,
    /// Worst-precision brands, at most `top_n`
    pub low_precision: Vec<LowPrecisionEntry>,
    /// One row per dialogue, sorted by dialogue id
    pub comparisons: Vec<DialogueComparison>,
}

/// Paths written by [`render_reports`]
#[derive(Debug)]
pub struct ReportPaths {
    pub detections: PathBuf,
    pub metrics: PathBuf,
    pub low_precision: PathBuf,
    pub workbook: PathBuf,
}

/// Execute Stage 4: compare confirmed detections with the annotations
///
/// 1. Reject detections whose brand is missing from the catalog
/// 2. Build the predicted set per dialogue from confirmed detections
/// 3. Count TP/FP/FN per dialogue and per brand
/// 4. Rank every annotated or predicted brand by ascending precision
///
/// Failed and unconfirmed detections contribute nothing to the predicted set,
/// so a brand they would have found shows up as a false negative.
pub fn aggregate(
    scored: &[ScoredDetection],
    dialogues: &[Dialogue],
    catalog: &Catalog,
    config: &ReportConfig,
) -> Result<AggregateReport> {
    let index = index_dialogues(dialogues);

    let mut predicted: HashMap<&str, BTreeMap<String, &str>> = HashMap::new();
    for detection in scored {
        if !catalog.contains(detection.brand()) {
            return Err(PipelineError::CatalogMismatch {
                dialogue_id: detection.dialogue_id().to_string(),
                brand: detection.brand().to_string(),
            });
        }
        if !index.contains_key(detection.dialogue_id()) {
            return Err(PipelineError::InputSchema {
                location: format!("scored detection for brand {:?}", detection.brand()),
                message: format!("unknown dialogue id {}", detection.dialogue_id()),
            });
        }
        if detection.confirmed {
            predicted
                .entry(detection.dialogue_id().as_str())
                .or_default()
                .insert(config.brand_key(detection.brand()), detection.brand());
        }
    }

    // Catalog spelling wins for display; annotation spelling fills the gaps
    let mut display: HashMap<String, String> = catalog
        .iter()
        .map(|brand| (config.brand_key(brand), brand.to_string()))
        .collect();

    let mut ordered: Vec<&Dialogue> = dialogues.iter().collect();
    ordered.sort_by(|a, b| a.dialogue_id.cmp(&b.dialogue_id));

    let mut per_brand: BTreeMap<String, BrandStats> = BTreeMap::new();
    let mut comparisons = Vec::with_capacity(ordered.len());
    let (mut tp_total, mut fp_total, mut fn_total) = (0, 0, 0);

    for dialogue in ordered {
        let truth: BTreeMap<String, &str> = dialogue
            .ground_truth
            .iter()
            .map(|brand| (config.brand_key(brand), brand.as_str()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        let guessed = predicted.remove(dialogue.dialogue_id.as_str()).unwrap_or_default();

        for (key, name) in &truth {
            display.entry(key.clone()).or_insert_with(|| name.to_string());
        }

        let truth_keys: BTreeSet<&String> = truth.keys().collect();
        let guessed_keys: BTreeSet<&String> = guessed.keys().collect();

        let mut row = DialogueComparison {
            dialogue_id: dialogue.dialogue_id.to_string(),
            ground_truth: truth.values().map(|s| s.to_string()).collect(),
            predicted: guessed.values().map(|s| s.to_string()).collect(),
            true_positives: Vec::new(),
            false_positives: Vec::new(),
            false_negatives: Vec::new(),
        };

        for key in truth_keys.union(&guessed_keys) {
            let name = display.get(*key).cloned().unwrap_or_else(|| key.to_string());
            let stats = per_brand
                .entry(key.to_string())
                .or_insert_with(|| BrandStats::new(name.clone()));

            match (truth_keys.contains(key), guessed_keys.contains(key)) {
                (true, true) => {
                    stats.true_positives += 1;
                    tp_total += 1;
                    row.true_positives.push(name);
                }
                (false, true) => {
                    stats.false_positives += 1;
                    fp_total += 1;
                    row.false_positives.push(name);
                }
                _ => {
                    stats.false_negatives += 1;
                    fn_total += 1;
                    row.false_negatives.push(name);
                }
            }
        }

        if row.status() == "DIFF" {
            debug!(
                "Dialogue {}: fp={:?} fn={:?}",
                row.dialogue_id, row.false_positives, row.false_negatives
            );
        }
        comparisons.push(row);
    }

    let metrics = MetricsSnapshot::from_counts(tp_total, fp_total, fn_total);
    let mut per_brand: Vec<BrandStats> = per_brand.into_values().collect();
    per_brand.sort_by(|a, b| a.brand.cmp(&b.brand));
    let low_precision = rank_low_precision(&per_brand, config.top_n);

    info!(
        "Stage 4: precision={:.4} recall={:.4} f1={:.4} (tp={}, fp={}, fn={})",
        metrics.precision,
        metrics.recall,
        metrics.f1,
        metrics.true_positives,
        metrics.false_positives,
        metrics.false_negatives
    );

    Ok(AggregateReport {
        metrics,
        per_brand,
        low_precision,
        comparisons,
    })
}

/// Brands by ascending precision, then descending mentions, then name
///
/// Brands that were never predicted rank at precision 0.
pub fn rank_low_precision(per_brand: &[BrandStats], top_n: usize) -> Vec<LowPrecisionEntry> {
    let mut entries: Vec<LowPrecisionEntry> = per_brand.iter().map(LowPrecisionEntry::from).collect();

    entries.sort_by(|a, b| {
        a.precision
            .total_cmp(&b.precision)
            .then_with(|| b.mentions.cmp(&a.mentions))
            .then_with(|| a.brand.cmp(&b.brand))
    });
    entries.truncate(top_n);
    entries
}

/// Write `result.csv`, `metrics.json`, `low_precision_brands.csv` and `report.xlsx`
pub fn render_reports(
    output_dir: &Path,
    scored: &[ScoredDetection],
    report: &AggregateReport,
    run_id: &str,
    generated_at: DateTime<Utc>,
) -> Result<ReportPaths> {
    std::fs::create_dir_all(output_dir)?;

    let paths = ReportPaths {
        detections: output_dir.join("result.csv"),
        metrics: output_dir.join("metrics.json"),
        low_precision: output_dir.join("low_precision_brands.csv"),
        workbook: output_dir.join("report.xlsx"),
    };

    info!("Writing detections to {:?}", paths.detections);
    write_detections_csv(&paths.detections, scored)?;

    info!("Writing metrics to {:?}", paths.metrics);
    let record = MetricsRecord::new(&report.metrics, run_id, generated_at);
    write_metrics_json(&paths.metrics, &record)?;

    info!("Writing low-precision ranking to {:?}", paths.low_precision);
    write_low_precision_csv(&paths.low_precision, &report.low_precision)?;

    info!("Writing combined report to {:?}", paths.workbook);
    write_report_xlsx(&paths.workbook, &report.metrics, &report.comparisons)?;

    Ok(paths)
}

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::models::{parse_ground_truth, Catalog, Dialogue, DialogueId};

/// Read a single-column, header-less brand list
pub fn read_catalog(path: &Path) -> Result<Catalog> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let catalog = parse_catalog(reader)?;
    info!("Loaded {} catalog brands from {:?}", catalog.len(), path);
    Ok(catalog)
}

fn parse_catalog<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Catalog> {
    let mut names = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(name) = record.get(0) {
            names.push(name.to_string());
        }
    }
    Ok(Catalog::new(names))
}

/// One row of the dialogue export
#[derive(Debug, Deserialize)]
struct DialogueRow {
    #[serde(alias = "dialog_id", alias = "dialogue_id")]
    source_text_index: String,
    #[serde(alias = "text")]
    source_text: String,
    #[serde(default, alias = "ground_truth")]
    extracted_brands: String,
}

/// Read the dialogue CSV with its ground-truth annotations
///
/// Duplicate identifiers and unparseable annotations are input-schema errors.
pub fn read_dialogues(path: &Path) -> Result<Vec<Dialogue>> {
    let reader = csv::Reader::from_path(path)?;
    let dialogues = parse_dialogues(reader, &path.display().to_string())?;
    info!("Loaded {} dialogues from {:?}", dialogues.len(), path);
    Ok(dialogues)
}

fn parse_dialogues<R: std::io::Read>(mut reader: csv::Reader<R>, source: &str) -> Result<Vec<Dialogue>> {
    let mut dialogues = Vec::new();
    let mut seen = HashSet::new();

    for (row_index, row) in reader.deserialize::<DialogueRow>().enumerate() {
        // Header is line 1
        let location = format!("{} row {}", source, row_index + 2);
        let row = row?;

        let dialogue_id = DialogueId::new(row.source_text_index);
        if dialogue_id.as_str().is_empty() {
            return Err(PipelineError::InputSchema {
                location,
                message: "empty dialogue id".to_string(),
            });
        }
        if !seen.insert(dialogue_id.clone()) {
            return Err(PipelineError::InputSchema {
                location,
                message: format!("duplicate dialogue id {}", dialogue_id),
            });
        }

        let ground_truth =
            parse_ground_truth(&row.extracted_brands).map_err(|e| PipelineError::InputSchema {
                location: location.clone(),
                message: format!("ground truth is not a JSON brand list: {}", e),
            })?;

        dialogues.push(Dialogue {
            dialogue_id,
            text: row.source_text,
            ground_truth,
        });
    }

    Ok(dialogues)
}

/// Read an intermediate JSON artifact written by an earlier step
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

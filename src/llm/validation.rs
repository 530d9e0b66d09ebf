use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Synonyms returned for one brand of a batch
#[derive(Debug, Clone, Deserialize)]
pub struct SynonymItem {
    pub original: String,
    #[serde(default)]
    pub exact_variants: Vec<String>,
    #[serde(default)]
    pub phonetic_variants: Vec<String>,
    #[serde(default)]
    pub colloquial_variants: Vec<String>,
}

impl SynonymItem {
    /// All variant lists in schema order
    pub fn variants(&self) -> impl Iterator<Item = &String> {
        self.exact_variants
            .iter()
            .chain(&self.phonetic_variants)
            .chain(&self.colloquial_variants)
    }
}

#[derive(Debug, Deserialize)]
struct SynonymBatch {
    items: Vec<SynonymItem>,
}

/// A judge verdict for one candidate
#[derive(Debug, Clone, Deserialize)]
pub struct Judgment {
    pub confidence: f64,
    #[serde(default)]
    pub quote: Option<String>,
}

/// Strip a Markdown code fence if the model wrapped its JSON in one
pub fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a synonym batch answer and map items back onto the requested brands
///
/// Items for brands that were not requested are dropped. Requested brands the model
/// skipped are absent from the map; the caller decides what that means.
pub fn parse_synonym_batch(content: &str, brands: &[&str]) -> Result<HashMap<String, Vec<String>>> {
    let batch: SynonymBatch = serde_json::from_str(extract_json(content))
        .map_err(|e| PipelineError::MalformedResponse(format!("synonym batch: {}", e)))?;

    let requested: HashMap<&str, &str> = brands.iter().map(|b| (b.trim(), *b)).collect();
    let mut synonyms: HashMap<String, Vec<String>> = HashMap::new();

    for item in &batch.items {
        let Some(brand) = requested.get(item.original.trim()) else {
            continue;
        };
        synonyms
            .entry(brand.to_string())
            .or_default()
            .extend(item.variants().map(|v| v.trim().to_string()).filter(|v| !v.is_empty()));
    }

    Ok(synonyms)
}

/// Parse and check a judge verdict
pub fn parse_judgment(content: &str) -> Result<Judgment> {
    let judgment: Judgment = serde_json::from_str(extract_json(content))
        .map_err(|e| PipelineError::MalformedResponse(format!("judgment: {}", e)))?;

    if !judgment.confidence.is_finite() || !(0.0..=1.0).contains(&judgment.confidence) {
        return Err(PipelineError::MalformedResponse(format!(
            "confidence {} outside [0, 1]",
            judgment.confidence
        )));
    }

    Ok(judgment)
}

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque dialogue identifier
///
/// Identifiers come from the annotation export as either numbers or strings.
/// Ordering is numeric when both sides are integers, so "2" sorts before "10";
/// integer ids sort before non-integer ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialogueId(pub String);

impl DialogueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for DialogueId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for DialogueId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DialogueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DialogueId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A transcribed dialogue with its reference brand annotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialogue {
    /// Unique identifier
    pub dialogue_id: DialogueId,
    /// Raw transcribed text
    pub text: String,
    /// Brands actually present according to the annotation; used only for metrics
    pub ground_truth: BTreeSet<String>,
}

impl Dialogue {
    pub fn new<I, S>(dialogue_id: impl Into<String>, text: impl Into<String>, ground_truth: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dialogue_id: DialogueId::new(dialogue_id),
            text: text.into(),
            ground_truth: ground_truth.into_iter().map(Into::into).collect(),
        }
    }
}

/// One entry of the annotation list: either a bare name or an object with a `brand` field
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GroundTruthEntry {
    Name(String),
    Tagged { brand: String },
}

/// Parse the JSON-encoded ground truth annotation of a dialogue
///
/// Blank input means "no brands". Blank names inside the list are dropped.
pub fn parse_ground_truth(raw: &str) -> Result<BTreeSet<String>, serde_json::Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(BTreeSet::new());
    }

    let entries: Vec<GroundTruthEntry> = serde_json::from_str(raw)?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            GroundTruthEntry::Name(name) => name,
            GroundTruthEntry::Tagged { brand } => brand,
        })
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

/// Build an id lookup over a dialogue slice
pub fn index_dialogues(dialogues: &[Dialogue]) -> HashMap<&DialogueId, &Dialogue> {
    dialogues.iter().map(|d| (&d.dialogue_id, d)).collect()
}

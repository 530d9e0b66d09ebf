use serde::{Deserialize, Serialize};

use super::DialogueId;

/// Which kind of term produced a lexical match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// The catalog name itself
    Canonical,
    /// A generated synonym
    Synonym,
}

/// An unconfirmed lexical match between a dialogue and a catalog brand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDetection {
    /// Dialogue the match was found in
    pub dialogue_id: DialogueId,
    /// Canonical catalog brand the term resolves to
    pub brand: String,
    /// The synonym or canonical name that matched, in display casing
    pub matched_term: String,
    /// The span as it appears in the dialogue text (whitespace collapsed)
    pub matched_text: String,
    /// Whether the canonical name or a synonym matched
    pub source: MatchSource,
}

/// A candidate after the confidence filter has judged it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDetection {
    #[serde(flatten)]
    pub candidate: CandidateDetection,
    /// Judge confidence in [0.0, 1.0]; 0.0 when the judgment failed
    pub confidence: f64,
    /// Whether confidence exceeded the caller's acceptance threshold
    pub confirmed: bool,
    /// Why the judgment failed, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Number of requests issued for this candidate
    #[serde(default)]
    pub attempts: u32,
}

impl ScoredDetection {
    /// Score a candidate from a successful judgment
    pub fn judged(candidate: CandidateDetection, confidence: f64, threshold: f64, attempts: u32) -> Self {
        Self {
            candidate,
            confidence,
            confirmed: confidence > threshold,
            failure: None,
            attempts,
        }
    }

    /// Record a terminal failure: unconfirmed with zero confidence
    pub fn failed(candidate: CandidateDetection, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            candidate,
            confidence: 0.0,
            confirmed: false,
            failure: Some(reason.into()),
            attempts,
        }
    }

    pub fn brand(&self) -> &str {
        &self.candidate.brand
    }

    pub fn dialogue_id(&self) -> &DialogueId {
        &self.candidate.dialogue_id
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

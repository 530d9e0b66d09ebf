use tracing::{debug, info};

use crate::models::{
    normalize_term, CandidateDetection, Dialogue, MatchSource, NormalizedText, SynonymSet,
};

/// Configuration for Stage 2
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Terms shorter than this (in characters, after normalization) are never matched
    pub min_term_chars: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { min_term_chars: 4 }
    }
}

/// A searchable term of one brand
#[derive(Debug)]
struct Term<'a> {
    normalized: String,
    display: &'a str,
    source: MatchSource,
}

/// Execute Stage 2: lexical matching
///
/// For each dialogue (by id) and each brand (by name), every term of the brand
/// (canonical name first, then synonyms) is searched as a case- and
/// whitespace-insensitive substring. At most one candidate per (dialogue, brand)
/// is emitted: the longest matching term, earliest position on ties.
///
/// Pure and deterministic; precision is left to the confidence filter.
pub fn match_synonyms(
    dialogues: &[Dialogue],
    synonyms: &SynonymSet,
    config: &MatchConfig,
) -> Vec<CandidateDetection> {
    let brand_terms: Vec<(&str, Vec<Term<'_>>)> = synonyms
        .iter()
        .map(|(brand, brand_synonyms)| {
            let canonical = std::iter::once((brand, MatchSource::Canonical));
            let others = brand_synonyms
                .iter()
                .map(|s| (s.as_str(), MatchSource::Synonym));
            let terms = canonical
                .chain(others)
                .map(|(display, source)| Term {
                    normalized: normalize_term(display),
                    display,
                    source,
                })
                .filter(|term| term.normalized.chars().count() >= config.min_term_chars)
                .collect();
            (brand, terms)
        })
        .collect();

    let searchable = brand_terms.iter().filter(|(_, terms)| !terms.is_empty()).count();
    debug!(
        "Stage 2: {} of {} brands have matchable terms",
        searchable,
        brand_terms.len()
    );

    let mut ordered: Vec<&Dialogue> = dialogues.iter().collect();
    ordered.sort_by(|a, b| a.dialogue_id.cmp(&b.dialogue_id));

    let mut candidates = Vec::new();
    let mut dialogues_with_matches = 0;

    for dialogue in ordered {
        let text = NormalizedText::new(&dialogue.text);
        let before = candidates.len();

        for (brand, terms) in &brand_terms {
            if let Some(candidate) = best_match(dialogue, &text, brand, terms) {
                candidates.push(candidate);
            }
        }

        if candidates.len() > before {
            dialogues_with_matches += 1;
        }
    }

    info!(
        "Stage 2: {} candidates in {}/{} dialogues",
        candidates.len(),
        dialogues_with_matches,
        dialogues.len()
    );

    candidates
}

/// Pick the longest (then earliest) matching term of one brand
fn best_match(
    dialogue: &Dialogue,
    text: &NormalizedText,
    brand: &str,
    terms: &[Term<'_>],
) -> Option<CandidateDetection> {
    let mut best: Option<(&Term<'_>, usize, usize)> = None;

    for term in terms {
        let Some((start, end)) = text.find(&term.normalized) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((current, current_start, _)) => {
                let len = term.normalized.chars().count();
                let current_len = current.normalized.chars().count();
                len > current_len || (len == current_len && start < current_start)
            }
        };
        if better {
            best = Some((term, start, end));
        }
    }

    best.map(|(term, start, end)| CandidateDetection {
        dialogue_id: dialogue.dialogue_id.clone(),
        brand: brand.to_string(),
        matched_term: term.display.to_string(),
        matched_text: dialogue.text[start..end]
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
        source: term.source,
    })
}

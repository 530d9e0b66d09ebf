use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lowercase and collapse whitespace runs to a single space
///
/// Lowercasing is done per character so that offsets in [`NormalizedText`]
/// line up with the normalized form of any term.
pub fn normalize_term(term: &str) -> String {
    NormalizedText::new(term).text
}

/// Case/whitespace-normalized text that remembers where each character came from
#[derive(Debug, Clone)]
pub struct NormalizedText {
    text: String,
    /// Per normalized char: (byte offset in `text`, source byte range)
    origin: Vec<(usize, usize, usize)>,
}

impl NormalizedText {
    pub fn new(source: &str) -> Self {
        let mut text = String::with_capacity(source.len());
        let mut origin = Vec::with_capacity(source.len());
        let mut pending_space: Option<(usize, usize)> = None;

        for (start, ch) in source.char_indices() {
            let end = start + ch.len_utf8();
            if ch.is_whitespace() {
                if !text.is_empty() {
                    pending_space.get_or_insert((start, end));
                }
                continue;
            }
            if let Some((space_start, space_end)) = pending_space.take() {
                origin.push((text.len(), space_start, space_end));
                text.push(' ');
            }
            for lower in ch.to_lowercase() {
                origin.push((text.len(), start, end));
                text.push(lower);
            }
        }

        Self { text, origin }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Find the first occurrence of an already-normalized term
    ///
    /// Returns the byte range of the matching span in the source text.
    pub fn find(&self, normalized_term: &str) -> Option<(usize, usize)> {
        if normalized_term.is_empty() {
            return None;
        }
        let at = self.text.find(normalized_term)?;
        let last_byte = at + normalized_term.len() - 1;
        let first = self.origin.binary_search_by_key(&at, |o| o.0).ok()?;
        let last = match self.origin.binary_search_by_key(&last_byte, |o| o.0) {
            Ok(i) => i,
            Err(i) => i.checked_sub(1)?,
        };
        Some((self.origin[first].1, self.origin[last].2))
    }
}

/// Brand → ordered distinct synonyms
///
/// Synonyms keep their first-seen display casing; two synonyms that normalize to
/// the same term (or to the brand's own name) are treated as one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynonymSet {
    entries: BTreeMap<String, Vec<String>>,
}

impl SynonymSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the synonyms of a brand
    pub fn insert<I, S>(&mut self, brand: &str, synonyms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let canonical = normalize_term(brand);
        let mut seen = vec![canonical];
        let mut kept = Vec::new();

        for synonym in synonyms {
            let display = synonym.as_ref().split_whitespace().collect::<Vec<_>>().join(" ");
            let normalized = normalize_term(&display);
            if normalized.is_empty() || seen.contains(&normalized) {
                continue;
            }
            seen.push(normalized);
            kept.push(display);
        }

        self.entries.insert(brand.to_string(), kept);
    }

    pub fn get(&self, brand: &str) -> Option<&[String]> {
        self.entries.get(brand).map(Vec::as_slice)
    }

    pub fn contains(&self, brand: &str) -> bool {
        self.entries.contains_key(brand)
    }

    /// Brands in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(b, s)| (b.as_str(), s.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of synonyms across brands
    pub fn synonym_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

use serde_json::json;

use super::CompletionRequest;
use crate::models::CandidateDetection;

/// System prompt for synonym generation
pub const SYNONYM_SYSTEM_PROMPT: &str = r#"You are an expert on brands and trademarks. Your task is to list every way a brand name may be written in automatically transcribed Russian-language dialogues.

For each brand you are given, return:
- exact_variants: the same name with different casing, spacing or hyphenation
- phonetic_variants: how the name sounds when spoken, including Cyrillic <-> Latin transliteration
- colloquial_variants: spoken abbreviations, nicknames and slang

RULES:
1. Return one item per brand, with "original" set to the brand exactly as given.
2. Do not invent unrelated companies or products.
3. Do not return generic words that would match ordinary speech.
4. Output MUST be valid JSON matching the provided schema."#;

/// System prompt for candidate confirmation
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are an analyst checking automatic brand detections in transcribed dialogues.

A brand name or one of its variants was found in the dialogue text. Decide whether the dialogue actually refers to that brand AS A BRAND: a company, a product maker, a store or a marketplace.

It is NOT a brand mention when the matched text is:
- an ordinary word that happens to coincide with the name
- part of an e-mail address, a person's name or a technology name
- a longer word that merely contains the name

Return "confidence" between 0.0 and 1.0: how sure you are that this is a genuine mention of the given brand. Quote the exact fragment of the dialogue you relied on.
Output MUST be valid JSON matching the provided schema."#;

pub const SYNONYM_TEMPERATURE: f64 = 0.3;
pub const JUDGE_TEMPERATURE: f64 = 0.1;

/// Build the synonym request for one batch of brands
pub fn build_synonym_request(brands: &[&str]) -> CompletionRequest {
    let mut user = String::from("Generate spelling variants for each of these brands:\n");
    for brand in brands {
        user.push_str(&format!("- {}\n", brand));
    }

    CompletionRequest {
        system: SYNONYM_SYSTEM_PROMPT.to_string(),
        user,
        schema_name: "brand_synonyms".to_string(),
        schema: synonym_schema(),
        temperature: SYNONYM_TEMPERATURE,
    }
}

/// Build the confirmation request for one candidate
pub fn build_judge_request(dialogue_text: &str, candidate: &CandidateDetection) -> CompletionRequest {
    let user = format!(
        "DIALOGUE:\n{}\n\nBrand: {}\nMatched as: '{}' (text: '{}')\n\nIs this a genuine mention of the brand?",
        dialogue_text, candidate.brand, candidate.matched_term, candidate.matched_text
    );

    CompletionRequest {
        system: JUDGE_SYSTEM_PROMPT.to_string(),
        user,
        schema_name: "brand_judgment".to_string(),
        schema: judge_schema(),
        temperature: JUDGE_TEMPERATURE,
    }
}

fn synonym_schema() -> serde_json::Value {
    let variants = json!({"type": "array", "items": {"type": "string"}});
    json!({
        "type": "object",
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "original": {"type": "string"},
                        "exact_variants": variants,
                        "phonetic_variants": variants,
                        "colloquial_variants": variants
                    },
                    "required": ["original", "exact_variants", "phonetic_variants", "colloquial_variants"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["items"],
        "additionalProperties": false
    })
}

fn judge_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "confidence": {"type": "number"},
            "quote": {"type": "string"}
        },
        "required": ["confidence", "quote"],
        "additionalProperties": false
    })
}

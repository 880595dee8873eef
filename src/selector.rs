//! AI-backed relevance selection.
//!
//! Asks the cheap model variant to pick catalogue indices, and degrades
//! silently on any failure: entries fall back to the lexical scorer,
//! rated examples fall back to most-recent truncation. Selection is an
//! optimization, never an error source; callers always receive a list.

use tracing::debug;

use crate::config::Config;
use crate::llm::{CompletionRequest, GenerationClient};
use crate::model::{KnowledgeEntry, RatedExample};
use crate::relevance;

/// Why a selector call fell back to the heuristic path.
/// Collapsed to a plain list at the public boundary; kept visible here so
/// tests can assert on the cause without scraping logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradationReason {
    /// Network failure, non-2xx, or missing credentials
    Upstream(String),
    /// Reply contained no bracketed integer list
    Unparseable,
    /// A list was parsed but no index survived validation
    EmptySelection,
}

/// Selected knowledge entries plus the fallback cause, if any
#[derive(Debug, Clone)]
pub struct EntrySelection {
    pub entries: Vec<KnowledgeEntry>,
    pub degraded: Option<DegradationReason>,
}

/// Selected rated examples, bucketed by polarity
#[derive(Debug, Clone)]
pub struct ExampleSelection {
    pub positive: Vec<RatedExample>,
    pub negative: Vec<RatedExample>,
    pub degraded: Option<DegradationReason>,
}

/// Extract the first bracketed integer list from free-form model text.
///
/// Tolerates prose before, between and after bracket groups; the first group
/// that parses as a JSON integer array wins. Returns None when no group
/// parses. Deliberately narrow: this is the only place model prose is
/// pattern-matched, and it must never leak a parse failure to callers.
pub fn extract_index_list(text: &str) -> Option<Vec<i64>> {
    let bytes = text.as_bytes();
    for (start, &b) in bytes.iter().enumerate() {
        if b != b'[' {
            continue;
        }
        if let Some(offset) = bytes[start..].iter().position(|&c| c == b']') {
            let candidate = &text[start..start + offset + 1];
            if let Ok(indices) = serde_json::from_str::<Vec<i64>>(candidate) {
                return Some(indices);
            }
        }
    }
    None
}

/// Keep in-range indices, first occurrence only
fn validate_indices(indices: Vec<i64>, pool_len: usize) -> Vec<usize> {
    let mut seen = Vec::new();
    for index in indices {
        if index < 0 || index as usize >= pool_len {
            continue;
        }
        let index = index as usize;
        if !seen.contains(&index) {
            seen.push(index);
        }
    }
    seen
}

/// One selector call: send the catalogue, parse and validate the reply
async fn ask_indices(
    client: &dyn GenerationClient,
    config: &Config,
    system: &str,
    catalogue: String,
    pool_len: usize,
) -> Result<Vec<usize>, DegradationReason> {
    let request = CompletionRequest {
        model: config.selector_model.clone(),
        max_tokens: config.selector_max_tokens,
        system: system.to_string(),
        user_message: catalogue,
    };

    let completion = client
        .complete(request)
        .await
        .map_err(|e| DegradationReason::Upstream(e.to_string()))?;

    let indices = extract_index_list(&completion.text).ok_or(DegradationReason::Unparseable)?;

    let valid = validate_indices(indices, pool_len);
    if valid.is_empty() {
        return Err(DegradationReason::EmptySelection);
    }
    Ok(valid)
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    text.chars().take(budget).collect()
}

fn entry_catalogue(inquiry: &str, entries: &[KnowledgeEntry], budget: usize, max: usize) -> String {
    let mut catalogue = format!("Customer inquiry:\n{}\n\nKnowledge base entries:\n", inquiry);
    for (i, entry) in entries.iter().enumerate() {
        let tags = entry.tags.join(", ");
        catalogue.push_str(&format!(
            "{}. [{}] {} (tags: {})\n{}\n\n",
            i,
            entry.category,
            entry.title,
            tags,
            truncate_chars(&entry.content, budget),
        ));
    }
    catalogue.push_str(&format!("Select at most {} entries.", max));
    catalogue
}

const ENTRY_SELECTOR_SYSTEM: &str = "You select knowledge base entries relevant \
to a customer inquiry. Reply with only a JSON array of the zero-based indices \
of the relevant entries, most relevant first, e.g. [0, 4, 2]. No other text.";

/// Pick up to `max` entries relevant to the inquiry.
///
/// Passthrough when the pool already fits the cap (no upstream call).
/// Falls back to the lexical scorer on any upstream failure.
pub async fn pick_relevant_entries(
    client: &dyn GenerationClient,
    config: &Config,
    inquiry: &str,
    entries: &[KnowledgeEntry],
    max: usize,
) -> EntrySelection {
    // Pool already within budget: no call, no reordering
    if entries.len() <= max {
        return EntrySelection {
            entries: entries.to_vec(),
            degraded: None,
        };
    }

    let catalogue = entry_catalogue(inquiry, entries, config.catalogue_content_budget, max);
    match ask_indices(client, config, ENTRY_SELECTOR_SYSTEM, catalogue, entries.len()).await {
        Ok(indices) => EntrySelection {
            entries: indices
                .into_iter()
                .take(max)
                .map(|i| entries[i].clone())
                .collect(),
            degraded: None,
        },
        Err(reason) => {
            debug!(?reason, "entry selector degraded to lexical scorer");
            EntrySelection {
                entries: relevance::score_entries(inquiry, entries, max),
                degraded: Some(reason),
            }
        }
    }
}

const EXAMPLE_SELECTOR_SYSTEM: &str = "You select past support exchanges useful \
as context for answering a new customer inquiry. Each candidate is tagged GOOD \
(a well-rated reply to imitate) or BAD (a poorly-rated reply to avoid). Reply \
with only a JSON array of the zero-based indices of the useful candidates, \
e.g. [1, 3]. No other text.";

fn example_catalogue(
    inquiry: &str,
    pool: &[(&'static str, &RatedExample)],
    budget: usize,
) -> String {
    let mut catalogue = format!("Customer inquiry:\n{}\n\nPast exchanges:\n", inquiry);
    for (i, (polarity, example)) in pool.iter().enumerate() {
        catalogue.push_str(&format!(
            "{}. [{}] Q: {}\nA: {}\n\n",
            i,
            polarity,
            truncate_chars(&example.inquiry, budget),
            truncate_chars(&example.response, budget),
        ));
    }
    catalogue
}

/// Pick rated examples relevant to the inquiry, capped per polarity.
///
/// Passthrough when both buckets already fit their caps. Falls back to
/// most-recent truncation per bucket (inputs arrive newest first).
pub async fn pick_relevant_examples(
    client: &dyn GenerationClient,
    config: &Config,
    inquiry: &str,
    positive: &[RatedExample],
    negative: &[RatedExample],
) -> ExampleSelection {
    let max_positive = config.max_positive_examples;
    let max_negative = config.max_negative_examples;

    if positive.len() <= max_positive && negative.len() <= max_negative {
        return ExampleSelection {
            positive: positive.to_vec(),
            negative: negative.to_vec(),
            degraded: None,
        };
    }

    // One interleaved catalogue tagged with polarity
    let pool: Vec<(&'static str, &RatedExample)> = positive
        .iter()
        .map(|e| ("GOOD", e))
        .chain(negative.iter().map(|e| ("BAD", e)))
        .collect();

    let catalogue = example_catalogue(inquiry, &pool, config.catalogue_content_budget);
    match ask_indices(client, config, EXAMPLE_SELECTOR_SYSTEM, catalogue, pool.len()).await {
        Ok(indices) => {
            let mut picked_positive = Vec::new();
            let mut picked_negative = Vec::new();
            for i in indices {
                let (polarity, example) = pool[i];
                if polarity == "GOOD" && picked_positive.len() < max_positive {
                    picked_positive.push(example.clone());
                } else if polarity == "BAD" && picked_negative.len() < max_negative {
                    picked_negative.push(example.clone());
                }
            }
            ExampleSelection {
                positive: picked_positive,
                negative: picked_negative,
                degraded: None,
            }
        }
        Err(reason) => {
            debug!(?reason, "example selector degraded to most-recent truncation");
            ExampleSelection {
                positive: positive.iter().take(max_positive).cloned().collect(),
                negative: negative.iter().take(max_negative).cloned().collect(),
                degraded: Some(reason),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_array() {
        assert_eq!(extract_index_list("[0, 2, 5]"), Some(vec![0, 2, 5]));
    }

    #[test]
    fn test_extract_with_surrounding_prose() {
        let text = "Sure! The relevant entries are [1,3] based on the inquiry.";
        assert_eq!(extract_index_list(text), Some(vec![1, 3]));
    }

    #[test]
    fn test_extract_no_brackets() {
        assert_eq!(extract_index_list("no list here"), None);
    }

    #[test]
    fn test_extract_skips_non_integer_groups() {
        // First bracket group is not an integer list; the second is
        let text = r#"Entries ["a","b"] map to [2, 4]"#;
        assert_eq!(extract_index_list(text), Some(vec![2, 4]));
    }

    #[test]
    fn test_extract_first_of_multiple_valid_groups() {
        assert_eq!(extract_index_list("[1] or maybe [2]"), Some(vec![1]));
    }

    #[test]
    fn test_extract_trailing_prose_after_array() {
        assert_eq!(
            extract_index_list("[7, 0] -- those two look best"),
            Some(vec![7, 0])
        );
    }

    #[test]
    fn test_extract_empty_array() {
        assert_eq!(extract_index_list("[]"), Some(vec![]));
    }

    #[test]
    fn test_validate_drops_out_of_range_and_duplicates() {
        assert_eq!(validate_indices(vec![0, 5, -1, 2, 0], 4), vec![0, 2]);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}

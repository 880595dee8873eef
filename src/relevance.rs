//! Fallback relevance scoring.
//!
//! Pure lexical heuristics used whenever the AI-backed selector is
//! unavailable. Deterministic: same inquiry and entry list always produce the
//! same ranking, ties preserve input order.

use crate::model::KnowledgeEntry;

/// Tag match weight (strongest signal: curated keywords)
const TAG_EXACT_WEIGHT: u32 = 3;
/// Token-overlap weights for tag words and title words
const TOKEN_WEIGHT: u32 = 1;
/// Minimum token length considered meaningful
const MIN_TOKEN_LEN: usize = 3;

/// Lowercase alphanumeric words of the inquiry, length > 2
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_TOKEN_LEN)
        .map(|w| w.to_string())
        .collect()
}

/// Strip an advisory namespace prefix ("keyword:foo" -> "foo")
fn tag_value(tag: &str) -> &str {
    match tag.split_once(':') {
        Some((_, value)) => value,
        None => tag,
    }
}

/// Score one entry against the inquiry.
///
/// +3 per tag whose de-prefixed value appears verbatim in the inquiry;
/// +1 per inquiry token that overlaps a whitespace-split word of a tag value
/// (substring either direction, cheap fuzzy match, not edit distance);
/// +1 per inquiry token found in the title.
fn score_entry(inquiry_lower: &str, tokens: &[String], entry: &KnowledgeEntry) -> u32 {
    let mut score = 0;

    for tag in &entry.tags {
        let value = tag_value(tag).to_lowercase();
        if !value.is_empty() && inquiry_lower.contains(&value) {
            score += TAG_EXACT_WEIGHT;
        }
    }

    for token in tokens {
        let overlaps = entry.tags.iter().any(|tag| {
            tag_value(tag)
                .to_lowercase()
                .split_whitespace()
                .any(|word| word.contains(token.as_str()) || token.contains(word))
        });
        if overlaps {
            score += TOKEN_WEIGHT;
        }
    }

    let title_lower = entry.title.to_lowercase();
    for token in tokens {
        if title_lower.contains(token.as_str()) {
            score += TOKEN_WEIGHT;
        }
    }

    score
}

/// Rank entries against the inquiry and keep the top `max`.
///
/// No score floor: zero-score entries may still be returned when the pool is
/// small. Truncation only, never padding.
pub fn score_entries(
    inquiry: &str,
    entries: &[KnowledgeEntry],
    max: usize,
) -> Vec<KnowledgeEntry> {
    let inquiry_lower = inquiry.to_lowercase();
    let tokens = tokenize(inquiry);

    let mut scored: Vec<(u32, &KnowledgeEntry)> = entries
        .iter()
        .map(|e| (score_entry(&inquiry_lower, &tokens, e), e))
        .collect();

    // Stable sort keeps input order on ties
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .take(max)
        .map(|(_, e)| e.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::KbType;

    fn entry(id: &str, title: &str, tags: &[&str]) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.to_string(),
            org_id: "org-1".to_string(),
            title: title.to_string(),
            content: "content".to_string(),
            category: "general".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            kb_type: KbType::Support,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_tokenize_drops_short_words() {
        let tokens = tokenize("Can I get a refund on my ticket?");
        assert_eq!(tokens, vec!["can", "get", "refund", "ticket"]);
    }

    #[test]
    fn test_tag_match_outranks_title_match() {
        let entries = vec![
            entry("a", "Shipping times", &["keyword:shipping"]),
            entry("b", "Refund policy", &["keyword:refund"]),
        ];
        let ranked = score_entries("I want a refund", &entries, 2);
        assert_eq!(ranked[0].id, "b");
    }

    #[test]
    fn test_truncates_to_max() {
        let entries: Vec<_> = (0..10)
            .map(|i| entry(&format!("e{}", i), "Ticket refund info", &["keyword:refund"]))
            .collect();
        let ranked = score_entries("ticket refund", &entries, 8);
        assert_eq!(ranked.len(), 8);
    }

    #[test]
    fn test_ties_preserve_input_order() {
        let entries = vec![
            entry("first", "Draw schedule", &[]),
            entry("second", "Draw schedule", &[]),
            entry("third", "Draw schedule", &[]),
        ];
        let ranked = score_entries("when is the draw", &entries, 3);
        let ids: Vec<_> = ranked.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_zero_score_entries_still_returned() {
        let entries = vec![
            entry("a", "Unrelated", &[]),
            entry("b", "Also unrelated", &[]),
        ];
        let ranked = score_entries("refund", &entries, 8);
        // Truncation only, never padding: both returned despite zero score
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_refund_scenario_ranks_tagged_entries_first() {
        let mut entries: Vec<_> = (0..8)
            .map(|i| entry(&format!("misc{}", i), "Store opening hours", &["keyword:hours"]))
            .collect();
        entries.push(entry("r1", "Refund policy", &["keyword:refund"]));
        entries.push(entry("r2", "Ticket refunds", &["keyword:refund", "lottery:tickets"]));

        let ranked = score_entries("ticket refund", &entries, 8);
        assert_eq!(ranked.len(), 8);
        assert!(ranked[..2].iter().all(|e| e.id == "r1" || e.id == "r2"));
    }
}

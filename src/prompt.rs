//! Prompt assembly.
//!
//! Renders selected knowledge entries into the instruction string, splicing
//! at the knowledge-base marker when the caller's instructions carry one.

use crate::model::{RatedExample, RelevancePick};

/// Literal insertion marker recognized in base instructions
pub const KNOWLEDGE_MARKER: &str = "Knowledge base:\n";

/// Heading used when the base instructions carry no marker
const FALLBACK_HEADING: &str = "Relevant knowledge base entries:";

/// Appended when citations are enabled
const CITATION_POLICY: &str = "Cite a source inline as [Source N] only when your \
answer directly uses that source; never cite sources for general knowledge.";

/// Render one picked entry.
/// `[Source N] [category] title: content` with citations enabled,
/// `[category] title: content` without.
fn render_pick(pick: &RelevancePick, citations_enabled: bool) -> String {
    let entry = &pick.entry;
    if citations_enabled {
        format!(
            "[Source {}] [{}] {}: {}",
            pick.citation_index, entry.category, entry.title, entry.content
        )
    } else {
        format!("[{}] {}: {}", entry.category, entry.title, entry.content)
    }
}

/// Merge picked entries into the base instructions.
///
/// If the base contains `KNOWLEDGE_MARKER`, the rendered block lands
/// immediately after it and everything already after the marker (e.g.
/// previously injected rated examples) is preserved. Otherwise the block is
/// appended under a generic heading.
pub fn assemble(
    base_instructions: &str,
    picks: &[RelevancePick],
    citations_enabled: bool,
) -> String {
    if picks.is_empty() {
        return base_instructions.to_string();
    }

    let block = picks
        .iter()
        .map(|p| render_pick(p, citations_enabled))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut assembled = if let Some(marker_pos) = base_instructions.find(KNOWLEDGE_MARKER) {
        let insert_at = marker_pos + KNOWLEDGE_MARKER.len();
        let (before, after) = base_instructions.split_at(insert_at);
        format!("{}{}\n\n{}", before, block, after)
    } else {
        format!(
            "{}\n\n{}\n{}",
            base_instructions, FALLBACK_HEADING, block
        )
    };

    if citations_enabled {
        assembled.push_str("\n\n");
        assembled.push_str(CITATION_POLICY);
    }
    assembled
}

/// Render rated examples as a context section for the base instructions.
/// Positive examples are offered as models, negative ones as cautions.
pub fn render_examples(positive: &[RatedExample], negative: &[RatedExample]) -> String {
    if positive.is_empty() && negative.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    if !positive.is_empty() {
        section.push_str("Well-rated past replies to imitate:\n");
        for example in positive {
            section.push_str(&format!("Q: {}\nA: {}\n\n", example.inquiry, example.response));
        }
    }

    if !negative.is_empty() {
        section.push_str("Poorly-rated past replies to avoid repeating:\n");
        for example in negative {
            section.push_str(&format!("Q: {}\nA: {}\n", example.inquiry, example.response));
            if let Some(feedback) = &example.feedback {
                section.push_str(&format!("Reviewer feedback: {}\n", feedback));
            }
            section.push('\n');
        }
    }

    section.trim_end().to_string()
}

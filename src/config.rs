//! Service configuration.
//!
//! Built once in `main` from CLI arguments and environment, then passed into
//! components by value. Business logic never reads the environment directly.

/// Default Anthropic API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// Primary generation model
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
/// Cheaper variant for index-only selector calls
pub const DEFAULT_SELECTOR_MODEL: &str = "claude-3-5-haiku-20241022";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,

    /// Model for primary response generation
    pub model: String,
    /// Cheaper model for relevance selection
    pub selector_model: String,

    /// Token budget for generated responses
    pub max_tokens: u32,
    /// Token budget for selector calls (only an index list is expected)
    pub selector_max_tokens: u32,

    /// Cap on knowledge entries injected per response
    pub max_kb_entries: usize,
    /// Caps on rated examples injected per response
    pub max_positive_examples: usize,
    pub max_negative_examples: usize,

    /// Per-entry content budget in the selector catalogue, in chars
    pub catalogue_content_budget: usize,
}

impl Config {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            selector_model: DEFAULT_SELECTOR_MODEL.to_string(),
            max_tokens: 1024,
            selector_max_tokens: 200,
            max_kb_entries: 8,
            max_positive_examples: 5,
            max_negative_examples: 3,
            catalogue_content_budget: 300,
        }
    }
}

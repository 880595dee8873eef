use serde::{Deserialize, Serialize};

/// Knowledge base entry type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KbType {
    /// Customer-facing support knowledge
    Support,
    /// Internal notes, never injected into customer-facing drafts
    Internal,
}

impl KbType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Internal => "internal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "support" => Some(Self::Support),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

/// Organization-scoped knowledge base entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    /// Unique id within the organization (caller-supplied, opaque)
    pub id: String,

    #[serde(rename = "orgId")]
    pub org_id: String,

    pub title: String,

    /// Free-text body injected into generation prompts
    pub content: String,

    /// Single category tag (e.g. "refunds", "draws")
    pub category: String,

    /// Ordered tag list; namespace prefixes like "keyword:" are advisory
    pub tags: Vec<String>,

    #[serde(rename = "kbType")]
    pub kb_type: KbType,

    /// Unix millis
    #[serde(rename = "createdAt")]
    pub created_at: i64,

    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

/// Human judgment on a past generation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Positive,
    Negative,
}

impl Rating {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }
}

/// Past generation transcript with a rating.
/// Immutable once rated except for the correction link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatedExample {
    pub id: String,

    #[serde(rename = "orgId")]
    pub org_id: String,

    pub inquiry: String,
    pub response: String,
    pub rating: Rating,

    pub feedback: Option<String>,
    pub format: Option<String>,
    pub tone: Option<String>,

    /// Corrective knowledge entry promoted from negative feedback
    #[serde(rename = "correctionEntryId")]
    pub correction_entry_id: Option<String>,

    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// Cluster of near-duplicate entries (ephemeral, recomputed per request)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Members sorted most-recently-updated first
    pub entries: Vec<KnowledgeEntry>,
}

/// One selected entry with its stable citation number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevancePick {
    /// 1-based, stable for the life of one response
    #[serde(rename = "citationIndex")]
    pub citation_index: usize,

    pub entry: KnowledgeEntry,
}

/// Token usage reported by the generation service
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,

    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
}

/// Caller-facing streaming frame.
/// Ordering: `kb` (if present) precedes all `delta`s; exactly one of
/// `done`/`error` terminates the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Kb { entries: Vec<RelevancePick> },
    Delta { text: String },
    Done { usage: Usage },
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kb_type_round_trip() {
        assert_eq!(KbType::parse("support"), Some(KbType::Support));
        assert_eq!(KbType::parse("internal"), Some(KbType::Internal));
        assert_eq!(KbType::parse("other"), None);
        assert_eq!(KbType::Support.as_str(), "support");
    }

    #[test]
    fn test_stream_event_tagging() {
        let event = StreamEvent::Delta {
            text: "Hello".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["text"], "Hello");

        let event = StreamEvent::Done {
            usage: Usage {
                input_tokens: 10,
                output_tokens: 20,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["usage"]["inputTokens"], 10);
    }
}

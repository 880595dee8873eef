//! Generation service client.
//!
//! One trait seam (`GenerationClient`) so the pipeline and tests can swap the
//! upstream out, plus the reqwest-backed implementation speaking the
//! Anthropic-shaped Messages API, single-shot and streaming.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::Usage;

/// Errors from the generation service boundary
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("network error: {message}")]
    Network { message: String },

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed upstream response: {message}")]
    MalformedResponse { message: String },
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Map a non-2xx upstream status to an error
pub fn http_error(status: u16, body: &str) -> LlmError {
    LlmError::Http {
        status,
        body: body.to_string(),
    }
}

/// One request to the generation service
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub user_message: String,
}

/// Completed generation with usage counters
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Seam over the upstream generation service.
///
/// `stream` pushes incremental text deltas into `tx` and resolves with the
/// accumulated text and usage. A send failure on `tx` means the caller went
/// away; the implementation stops pushing but still resolves.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<Completion>;

    async fn stream(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<String>,
    ) -> LlmResult<Completion>;
}

// Upstream SSE payloads. Unknown fields ignored, unknown types skipped.

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    delta: Option<FrameDelta>,
    #[serde(default)]
    message: Option<FrameMessage>,
    #[serde(default)]
    usage: Option<FrameUsage>,
}

#[derive(Debug, Deserialize)]
struct FrameDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameMessage {
    #[serde(default)]
    usage: Option<FrameUsage>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

/// Literal terminator sentinel some upstreams emit as a data line
const STREAM_TERMINATOR: &str = "[DONE]";

/// Incremental SSE frame parser.
///
/// Feed raw byte chunks; complete `data: ` lines are parsed and routed, a
/// trailing partial line is retained across reads. Malformed or unrecognized
/// lines are skipped silently (upstream may interleave keepalive/comment
/// lines). Pure state machine, no I/O.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: String,
    text: String,
    usage: Usage,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk, returning any text deltas it completed
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut deltas = Vec::new();
        // Process only complete lines, keep the trailing partial line
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].to_string();
            self.buffer.drain(..=line_end);
            if let Some(delta) = self.process_line(&line) {
                deltas.push(delta);
            }
        }
        deltas
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        let trimmed = line.trim();
        let payload = trimmed.strip_prefix("data: ")?;
        if payload.is_empty() || payload == STREAM_TERMINATOR {
            return None;
        }

        // Tolerant parser: anything unparseable is skipped
        let frame: StreamFrame = serde_json::from_str(payload).ok()?;

        match frame.frame_type.as_str() {
            "content_block_delta" => {
                let text = frame.delta.and_then(|d| d.text)?;
                if text.is_empty() {
                    return None;
                }
                self.text.push_str(&text);
                Some(text)
            }
            "message_start" => {
                if let Some(input) = frame
                    .message
                    .and_then(|m| m.usage)
                    .and_then(|u| u.input_tokens)
                {
                    self.usage.input_tokens = input;
                }
                None
            }
            "message_delta" => {
                if let Some(output) = frame.usage.and_then(|u| u.output_tokens) {
                    self.usage.output_tokens = output;
                }
                None
            }
            _ => None,
        }
    }

    /// Accumulated text and usage once the byte source ends
    pub fn finish(self) -> Completion {
        Completion {
            text: self.text,
            usage: self.usage,
        }
    }
}

/// Explicitly constructed client configuration. No ambient environment reads
/// happen below this point.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

/// reqwest-backed client for the Anthropic-shaped Messages API
pub struct AnthropicClient {
    config: AnthropicConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: FrameUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    /// Construction never fails; a missing key surfaces per call so the
    /// service can still boot and serve the maintenance endpoints.
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user_message}],
        });
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> LlmResult<reqwest::Response> {
        if self.config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let url = format!("{}/v1/messages", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&Self::request_body(request, stream))
            .send()
            .await
            .map_err(|e| LlmError::Network {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<Completion> {
        let response = self.send(&request, false).await?;

        let parsed: MessagesResponse =
            response.json().await.map_err(|e| LlmError::MalformedResponse {
                message: e.to_string(),
            })?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            text,
            usage: Usage {
                input_tokens: parsed.usage.input_tokens.unwrap_or(0),
                output_tokens: parsed.usage.output_tokens.unwrap_or(0),
            },
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<String>,
    ) -> LlmResult<Completion> {
        let response = self.send(&request, true).await?;

        let mut parser = StreamParser::new();
        let mut byte_stream = response.bytes_stream();
        let mut caller_gone = false;

        while let Some(chunk) = byte_stream.next().await {
            // A dropped upstream connection ends the stream with whatever
            // accumulated; not surfaced as an error
            let Ok(chunk) = chunk else { break };

            for delta in parser.push_chunk(&chunk) {
                if !caller_gone && tx.send(delta).await.is_err() {
                    caller_gone = true;
                }
            }
        }

        Ok(parser.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> String {
        format!("data: {}\n", json)
    }

    #[test]
    fn test_parser_routes_delta_frames() {
        let mut parser = StreamParser::new();
        let deltas = parser.push_chunk(
            frame(r#"{"type":"content_block_delta","delta":{"text":"Hel"}}"#).as_bytes(),
        );
        assert_eq!(deltas, vec!["Hel"]);

        let deltas = parser.push_chunk(
            frame(r#"{"type":"content_block_delta","delta":{"text":"lo"}}"#).as_bytes(),
        );
        assert_eq!(deltas, vec!["lo"]);

        let completion = parser.finish();
        assert_eq!(completion.text, "Hello");
    }

    #[test]
    fn test_parser_retains_partial_line_across_chunks() {
        let mut parser = StreamParser::new();
        let line = frame(r#"{"type":"content_block_delta","delta":{"text":"split"}}"#);
        let (a, b) = line.split_at(20);

        assert!(parser.push_chunk(a.as_bytes()).is_empty());
        let deltas = parser.push_chunk(b.as_bytes());
        assert_eq!(deltas, vec!["split"]);
    }

    #[test]
    fn test_parser_captures_usage() {
        let mut parser = StreamParser::new();
        parser.push_chunk(
            frame(r#"{"type":"message_start","message":{"usage":{"input_tokens":42}}}"#)
                .as_bytes(),
        );
        parser.push_chunk(
            frame(r#"{"type":"content_block_delta","delta":{"text":"hi"}}"#).as_bytes(),
        );
        parser.push_chunk(
            frame(r#"{"type":"message_delta","usage":{"output_tokens":7}}"#).as_bytes(),
        );

        let completion = parser.finish();
        assert_eq!(completion.usage.input_tokens, 42);
        assert_eq!(completion.usage.output_tokens, 7);
        assert_eq!(completion.text, "hi");
    }

    #[test]
    fn test_parser_skips_malformed_and_foreign_lines() {
        let mut parser = StreamParser::new();
        assert!(parser.push_chunk(b": keepalive\n").is_empty());
        assert!(parser.push_chunk(b"event: message_start\n").is_empty());
        assert!(parser.push_chunk(b"data: not json at all\n").is_empty());
        assert!(parser
            .push_chunk(frame(r#"{"type":"mystery_event"}"#).as_bytes())
            .is_empty());
        assert!(parser.push_chunk(b"data: [DONE]\n").is_empty());

        let completion = parser.finish();
        assert_eq!(completion.text, "");
        assert_eq!(completion.usage, Usage::default());
    }

    #[tokio::test]
    async fn test_missing_api_key_rejected_per_call() {
        let client = AnthropicClient::new(AnthropicConfig {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
        });
        let result = client
            .complete(CompletionRequest {
                model: "m".to_string(),
                max_tokens: 16,
                system: String::new(),
                user_message: "hi".to_string(),
            })
            .await;
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }
}

//! Request orchestration.
//!
//! Ties storage, selection, prompt assembly and the generation client
//! together. Ordering guarantees for the streaming path: the `kb` event (if
//! any) precedes the first `delta`, and exactly one of `done`/`error`
//! terminates the stream, including under partial failures.

use std::sync::Arc;
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dedup;
use crate::llm::{CompletionRequest, GenerationClient};
use crate::model::{
    DuplicateGroup, KbType, KnowledgeEntry, Rating, RelevancePick, StreamEvent, Usage,
};
use crate::prompt;
use crate::selector;
use crate::storage::{now_millis, Store};

/// Default base instructions; ends with the knowledge-base marker so selected
/// entries splice in right before any example context.
const DEFAULT_INSTRUCTIONS: &str = "You draft warm, concise support replies for a \
charitable gaming organization. Answer the customer's inquiry using the \
knowledge base below; if it does not cover the question, say what you can and \
suggest contacting the team directly.\n\nKnowledge base:\n";

/// One inbound drafting request
#[derive(Debug, Clone)]
pub struct RespondRequest {
    pub org_id: String,
    pub inquiry: String,
    /// Custom base instructions; the built-in default is used when absent
    pub instructions: Option<String>,
    /// Numbered-answer path with [Source N] markers
    pub citations: bool,
}

/// Completed single-shot draft
#[derive(Debug, Clone)]
pub struct DraftResponse {
    pub text: String,
    pub usage: Usage,
    pub picks: Vec<RelevancePick>,
}

pub struct ResponsePipeline {
    store: Arc<Store>,
    client: Arc<dyn GenerationClient>,
    config: Config,
}

impl ResponsePipeline {
    pub fn new(store: Arc<Store>, client: Arc<dyn GenerationClient>, config: Config) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Select knowledge entries for the inquiry.
    /// A storage failure yields no picks; generation proceeds without them.
    async fn select_knowledge(&self, request: &RespondRequest) -> Vec<RelevancePick> {
        let entries = match self
            .store
            .entries_for_org(&request.org_id, Some(KbType::Support))
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(org = %request.org_id, error = %e, "knowledge fetch failed, drafting without context");
                return Vec::new();
            }
        };

        let selection = selector::pick_relevant_entries(
            self.client.as_ref(),
            &self.config,
            &request.inquiry,
            &entries,
            self.config.max_kb_entries,
        )
        .await;

        if let Some(reason) = &selection.degraded {
            debug!(org = %request.org_id, ?reason, "knowledge selection used fallback scorer");
        }

        selection
            .entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| RelevancePick {
                citation_index: i + 1,
                entry,
            })
            .collect()
    }

    /// Assemble the full system prompt: base instructions, example context,
    /// then the knowledge block spliced at the marker.
    async fn build_system(&self, request: &RespondRequest, picks: &[RelevancePick]) -> String {
        let mut base = request
            .instructions
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string());

        let positive = self
            .store
            .recent_examples(&request.org_id, Rating::Positive, self.config.max_positive_examples * 2)
            .unwrap_or_default();
        let negative = self
            .store
            .recent_examples(&request.org_id, Rating::Negative, self.config.max_negative_examples * 2)
            .unwrap_or_default();

        let selection = selector::pick_relevant_examples(
            self.client.as_ref(),
            &self.config,
            &request.inquiry,
            &positive,
            &negative,
        )
        .await;

        // Examples land after the marker so the knowledge block splices in
        // between the marker and them
        let examples = prompt::render_examples(&selection.positive, &selection.negative);
        if !examples.is_empty() {
            base.push('\n');
            base.push_str(&examples);
            base.push('\n');
        }

        prompt::assemble(&base, picks, request.citations)
    }

    /// Stream a draft to the caller.
    ///
    /// Emits: `kb` (if entries were selected), then `delta`s, then exactly
    /// one of `done`/`error`. Send failures mean the caller disconnected;
    /// the loop stops pushing and lets the upstream read drain.
    pub async fn respond_stream(&self, request: RespondRequest, tx: mpsc::Sender<StreamEvent>) {
        info!(org = %request.org_id, "drafting streamed response");

        let picks = self.select_knowledge(&request).await;
        if !picks.is_empty() {
            let event = StreamEvent::Kb {
                entries: picks.clone(),
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }

        let system = self.build_system(&request, &picks).await;
        let completion_request = CompletionRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system,
            user_message: request.inquiry.clone(),
        };

        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(32);
        let forward_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(text) = delta_rx.recv().await {
                if forward_tx.send(StreamEvent::Delta { text }).await.is_err() {
                    break;
                }
            }
        });

        let outcome = self.client.stream(completion_request, delta_tx).await;

        // All deltas must be flushed before the terminal event
        let _ = forwarder.await;

        let terminal = match outcome {
            Ok(completion) => StreamEvent::Done {
                usage: completion.usage,
            },
            Err(e) => {
                warn!(org = %request.org_id, error = %e, "generation failed");
                StreamEvent::Error {
                    error: e.to_string(),
                }
            }
        };
        let _ = tx.send(terminal).await;
    }

    /// Single-shot draft. Generation failures propagate (no retry); selection
    /// failures degrade silently as on the streaming path.
    pub async fn respond_once(&self, request: RespondRequest) -> Result<DraftResponse> {
        info!(org = %request.org_id, "drafting single-shot response");

        let picks = self.select_knowledge(&request).await;
        let system = self.build_system(&request, &picks).await;

        let completion = self
            .client
            .complete(CompletionRequest {
                model: self.config.model.clone(),
                max_tokens: self.config.max_tokens,
                system,
                user_message: request.inquiry.clone(),
            })
            .await?;

        Ok(DraftResponse {
            text: completion.text,
            usage: completion.usage,
            picks,
        })
    }

    /// Recompute near-duplicate groups for review (on-demand maintenance)
    pub async fn duplicate_groups(
        &self,
        org_id: &str,
        kb_type: KbType,
    ) -> Result<Vec<DuplicateGroup>> {
        let pairs = self.store.duplicate_pairs(org_id, kb_type)?;
        let entries = self.store.entries_for_org(org_id, Some(kb_type))?;
        Ok(dedup::groups_with_entries(
            dedup::cluster_pairs(&pairs),
            &entries,
        ))
    }

    /// Merge one duplicate into another (atomic in storage)
    pub async fn merge_entries(
        &self,
        org_id: &str,
        source_id: &str,
        target_id: &str,
    ) -> Result<KnowledgeEntry> {
        info!(org = %org_id, source = %source_id, target = %target_id, "merging entries");
        self.store.merge_entries(org_id, source_id, target_id)
    }

    /// Promote negative feedback into a corrective knowledge entry and link
    /// it back to the rated example.
    pub async fn promote_correction(
        &self,
        org_id: &str,
        example_id: &str,
        mut entry: KnowledgeEntry,
    ) -> Result<KnowledgeEntry> {
        let now = now_millis();
        entry.org_id = org_id.to_string();
        entry.created_at = now;
        entry.updated_at = now;

        let created = self.store.create_entries(std::slice::from_ref(&entry))?;
        self.store
            .set_correction_link(org_id, example_id, &entry.id)?;

        Ok(created.into_iter().next().unwrap_or(entry))
    }
}

//! HTTP/SSE surface.
//!
//! Thin axum layer over the pipeline: streamed drafting plus the
//! duplicate-review maintenance endpoints. The wider SaaS CRUD lives
//! elsewhere; only the core surface is served here.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use crate::model::{DuplicateGroup, KbType, KnowledgeEntry, StreamEvent};
use crate::pipeline::{RespondRequest, ResponsePipeline};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ResponsePipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/respond", post(respond))
        .route("/api/knowledge/duplicates", get(duplicates))
        .route("/api/knowledge/merge", post(merge))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn run(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct RespondBody {
    #[serde(rename = "orgId")]
    org_id: String,
    inquiry: String,
    instructions: Option<String>,
    #[serde(default)]
    citations: bool,
}

/// Streamed drafting. Frames arrive as SSE data lines carrying the
/// caller-facing StreamEvent union.
async fn respond(
    State(state): State<AppState>,
    Json(body): Json<RespondBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request = RespondRequest {
        org_id: body.org_id,
        inquiry: body.inquiry,
        instructions: body.instructions,
        citations: body.citations,
    };

    let (tx, rx) = mpsc::channel::<StreamEvent>(32);
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.respond_stream(request, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|e| {
            error!(error = %e, "failed to serialize stream event");
            r#"{"type":"error","error":"internal serialization failure"}"#.to_string()
        });
        Ok::<_, Infallible>(Event::default().data(payload))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct DuplicatesQuery {
    #[serde(rename = "orgId")]
    org_id: String,
    #[serde(rename = "kbType")]
    kb_type: Option<String>,
}

async fn duplicates(
    State(state): State<AppState>,
    Query(query): Query<DuplicatesQuery>,
) -> Result<Json<Vec<DuplicateGroup>>, (StatusCode, String)> {
    let kb_type = match query.kb_type.as_deref() {
        None => KbType::Support,
        Some(raw) => KbType::parse(raw).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("unknown kbType '{}'", raw),
            )
        })?,
    };

    let groups = state
        .pipeline
        .duplicate_groups(&query.org_id, kb_type)
        .await
        .map_err(internal_error)?;

    Ok(Json(groups))
}

#[derive(Debug, Deserialize)]
struct MergeBody {
    #[serde(rename = "orgId")]
    org_id: String,
    #[serde(rename = "sourceId")]
    source_id: String,
    #[serde(rename = "targetId")]
    target_id: String,
}

async fn merge(
    State(state): State<AppState>,
    Json(body): Json<MergeBody>,
) -> Result<Json<KnowledgeEntry>, (StatusCode, String)> {
    let merged = state
        .pipeline
        .merge_entries(&body.org_id, &body.source_id, &body.target_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(merged))
}

fn internal_error(e: anyhow::Error) -> (StatusCode, String) {
    error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

//! OpenAI-style chat completions on top of the concierge workflow.
//!
//! With `stream: true` the answer is sent as `chat.completion.chunk` SSE
//! frames: a role frame first, SSE comments while agents take turns, the
//! content split by line, a final frame carrying `finish_reason` and the
//! research metadata, then `[DONE]`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::Stream;
use tokio::sync::broadcast;

use super::routes::AppState;
use super::runs::submit_error;
use super::types::{
    AgentContribution, ChatChoice, ChatChunkChoice, ChatCompletionChunk, ChatCompletionRequest,
    ChatCompletionResponse, ChatDelta, ChatMessage, ResearchMetadata, Usage,
};
use crate::agents::FinalAnswer;
use crate::events::{EventKind, RunEvent};
use crate::session::RunHandle;
use crate::workflow::{RunError, RunRequest, RunStatus};

pub const DEFAULT_MODEL: &str = "healthfinder-concierge";

/// Rough token count: four characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn contributions(status: &RunStatus) -> Vec<AgentContribution> {
    let mut out: Vec<AgentContribution> = Vec::new();
    for record in &status.turn_log {
        match out.iter_mut().find(|c| c.name == record.agent) {
            Some(entry) => {
                entry.turns += 1;
                entry.tool_calls += record.tool_calls;
            }
            None => out.push(AgentContribution {
                name: record.agent.clone(),
                turns: 1,
                tool_calls: record.tool_calls,
            }),
        }
    }
    out
}

fn completion_id(status: &RunStatus) -> String {
    format!("chatcmpl-{}", status.id.as_uuid().simple())
}

fn research_metadata(status: &RunStatus, result: &FinalAnswer) -> ResearchMetadata {
    ResearchMetadata {
        run_id: status.id,
        turns: status.turns,
        synthesis_confidence: result.confidence,
        total_sources: result.sources_analyzed,
        strategy: result.strategy.clone(),
        key_insights: result.key_insights.clone(),
        recommendations: result.recommendations.clone(),
        processing_time_ms: status.duration_ms().unwrap_or(0),
    }
}

/// Build the completion body for a completed run.
pub fn completion_response(
    req: &ChatCompletionRequest,
    status: &RunStatus,
    result: &FinalAnswer,
) -> ChatCompletionResponse {
    let prompt_tokens: u64 = req.messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    let completion_tokens = estimate_tokens(&result.content);

    ChatCompletionResponse {
        id: completion_id(status),
        object: "chat.completion".to_string(),
        created: status.created_at.timestamp(),
        model: req.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage::assistant(result.content.clone()),
            finish_reason: "stop".to_string(),
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
        contributing_agents: contributions(status),
        research_metadata: research_metadata(status, result),
    }
}

fn run_error(err: &RunError) -> (StatusCode, String) {
    let status = if err.is_limit() {
        StatusCode::GATEWAY_TIMEOUT
    } else if *err == RunError::Cancelled {
        StatusCode::CONFLICT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, err.to_string())
}

fn chunk_event(template: &ChatCompletionChunk, delta: ChatDelta, finish_reason: Option<&str>) -> Option<Event> {
    let mut chunk = template.clone();
    chunk.choices = vec![ChatChunkChoice {
        index: 0,
        delta,
        finish_reason: finish_reason.map(str::to_string),
    }];
    json_event(&chunk)
}

fn json_event<T: serde::Serialize>(data: &T) -> Option<Event> {
    match Event::default().json_data(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Failed to encode completion chunk: {}", e);
            None
        }
    }
}

fn progress_comment(kind: &EventKind) -> Option<String> {
    match kind {
        EventKind::TurnStarted { turn, agent } => Some(format!("turn {} {}", turn, agent)),
        EventKind::Handoff { from, to, .. } => Some(format!("handoff {} -> {}", from, to)),
        _ => None,
    }
}

/// Stream the run's answer as completion chunks.
fn stream_completion(
    model: String,
    handle: Arc<RunHandle>,
    mut events: broadcast::Receiver<RunEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial = handle.status();
    let template = ChatCompletionChunk {
        id: completion_id(&initial),
        object: "chat.completion.chunk".to_string(),
        created: initial.created_at.timestamp(),
        model,
        choices: Vec::new(),
        research_metadata: None,
    };

    let stream = async_stream::stream! {
        let role = ChatDelta {
            role: Some("assistant".to_string()),
            content: None,
        };
        if let Some(event) = chunk_event(&template, role, None) {
            yield Ok(event);
        }

        loop {
            match events.recv().await {
                Ok(ev) if ev.kind.is_terminal() => break,
                Ok(ev) => {
                    if let Some(comment) = progress_comment(&ev.kind) {
                        yield Ok(Event::default().comment(comment));
                    }
                }
                // The terminal status is read from the handle below.
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        let status = handle.wait().await;
        match (&status.result, &status.error) {
            (Some(result), _) => {
                for line in result.content.split_inclusive('\n') {
                    let delta = ChatDelta {
                        role: None,
                        content: Some(line.to_string()),
                    };
                    if let Some(event) = chunk_event(&template, delta, None) {
                        yield Ok(event);
                    }
                }
                let mut last = template.clone();
                last.research_metadata = Some(research_metadata(&status, result));
                if let Some(event) = chunk_event(&last, ChatDelta::default(), Some("stop")) {
                    yield Ok(event);
                }
            }
            (None, error) => {
                let message = error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| format!("Run {} ended without a result", status.id));
                tracing::warn!("Streamed chat completion for run {} failed: {}", status.id, message);
                let body = serde_json::json!({
                    "error": { "message": message, "type": "run_failed" }
                });
                if let Some(event) = json_event(&body) {
                    yield Ok(event);
                }
            }
        }

        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// Answer the last user message by running the workflow to completion.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, (StatusCode, String)> {
    let query = req
        .user_query()
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "No user message found".to_string()))?
        .to_string();

    let request = RunRequest {
        query,
        overrides: req.overrides(),
        initial_state: Default::default(),
    };

    if req.stream {
        let (handle, events) = state
            .orchestrator
            .submit_watched(request)
            .await
            .map_err(submit_error)?;
        let model = req.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        return Ok(stream_completion(model, handle, events).into_response());
    }

    let status = state
        .orchestrator
        .submit_and_wait(request)
        .await
        .map_err(submit_error)?;

    match (&status.result, &status.error) {
        (Some(result), _) => Ok(Json(completion_response(&req, &status, result)).into_response()),
        (None, Some(err)) => {
            tracing::warn!("Chat completion for run {} failed: {}", status.id, err);
            Err(run_error(err))
        }
        (None, None) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Run {} ended without a result", status.id),
        )),
    }
}

//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::agents::AgentDescriptor;
use crate::config::{WorkflowConfig, WorkflowOverrides};
use crate::session::CancelOutcome;
use crate::tools::ToolInfo;
use crate::workflow::{RunId, RunPhase};

/// Response after submitting a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRunResponse {
    /// Unique run identifier
    pub id: RunId,

    /// Phase at the time of the response
    pub phase: RunPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub id: RunId,
    pub outcome: CancelOutcome,
    /// True when the run will end as cancelled
    pub accepted: bool,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    pub search_backend: String,
    pub cancel_mode: String,
    pub max_turns_per_run: u32,
    pub uptime_secs: u64,
}

/// Description of the default workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResponse {
    pub config: WorkflowConfig,
    pub root: String,
    pub agents: Vec<AgentDescriptor>,
    pub tools: Vec<ToolInfo>,
    pub limits: WorkflowLimits,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowLimits {
    pub max_turns_per_run: u32,
    pub turn_timeout_secs: u64,
    pub max_concurrent_runs: usize,
    pub tool_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_backoff_base_ms: u64,
    pub run_retention_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresetInfo {
    pub id: String,
    #[serde(flatten)]
    pub config: WorkflowConfig,
}

/// A chat message, OpenAI style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request body of `POST /api/chat/completions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,

    /// Echoed back in the response
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub preset: Option<String>,

    #[serde(default, alias = "enable_deep_research")]
    pub enable_research: Option<bool>,

    #[serde(default)]
    pub enable_web_search: Option<bool>,

    #[serde(default)]
    pub research_depth: Option<u8>,

    #[serde(default)]
    pub max_search_results: Option<usize>,

    #[serde(default)]
    pub synthesis_type: Option<String>,

    /// Answer with `chat.completion.chunk` SSE frames
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Content of the last non-empty user message.
    pub fn user_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == "user")
            .map(|m| m.content.trim())
            .find(|c| !c.is_empty())
    }

    pub fn overrides(&self) -> WorkflowOverrides {
        WorkflowOverrides {
            preset: self.preset.clone(),
            enable_research: self.enable_research,
            enable_web_search: self.enable_web_search,
            research_depth: self.research_depth,
            max_search_results: self.max_search_results,
            synthesis_type: self.synthesis_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// An agent that took part in answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContribution {
    pub name: String,
    pub turns: u32,
    pub tool_calls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchMetadata {
    pub run_id: RunId,
    pub turns: u32,
    pub synthesis_confidence: f64,
    pub total_sources: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub processing_time_ms: u64,
}

/// Response body of `POST /api/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    /// Unix timestamp
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
    pub contributing_agents: Vec<AgentContribution>,
    pub research_metadata: ResearchMetadata,
}

/// Content delta of a streamed choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

/// One SSE frame of a streamed chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
    /// Only on the final frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_metadata: Option<ResearchMetadata>,
}

//! Configuration management for HealthFinder.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `MAX_TURNS_PER_RUN` - Optional. Global turn ceiling per run. Defaults to `12`.
//! - `TURN_TIMEOUT_SECS` - Optional. Wall-clock limit for one agent turn. Defaults to `60`.
//! - `MAX_CONCURRENT_RUNS` - Optional. Admission cap for in-flight runs. Defaults to `16`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Per-attempt tool timeout. Defaults to `5`.
//! - `RETRY_COUNT` - Optional. Tool retries after the first attempt. Defaults to `3`.
//! - `RETRY_BACKOFF_BASE_MS` - Optional. Base of the exponential tool backoff. Defaults to `250`.
//! - `RUN_RETENTION_SECS` - Optional. How long terminal runs stay queryable. Defaults to `600`.
//! - `CANCEL_MODE` - Optional. `abandon` or `wait`. Defaults to `abandon`.
//! - `EVENT_BUFFER` - Optional. Per-run event buffer size. Defaults to `256`.
//! - `TAVILY_API_KEY` - Optional. Enables Tavily as the web search backend.
//! - `WEB_SEARCH_OFFLINE` - Optional. Serve the curated reference directory instead of live search.
//! - `WORKFLOW_CONFIG` - Optional. Path to a YAML file holding a [`WorkflowConfig`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read workflow config {0}: {1}")]
    Io(String, String),
}

/// What happens to the in-flight turn when a run is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Let the current turn finish, then discard its outcome.
    Wait,
    /// Drop the current turn immediately and cancel its tool calls.
    Abandon,
}

impl std::str::FromStr for CancelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wait" => Ok(Self::Wait),
            "abandon" => Ok(Self::Abandon),
            other => Err(format!("expected `wait` or `abandon`, got `{}`", other)),
        }
    }
}

/// Completion thresholds for the research agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchThresholds {
    /// Findings required before handing off.
    pub min_sources: usize,
    /// Research passes allowed per visit.
    pub max_tool_calls: usize,
}

impl Default for ResearchThresholds {
    fn default() -> Self {
        Self {
            min_sources: 1,
            max_tool_calls: 2,
        }
    }
}

/// Completion thresholds for the web search agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchThresholds {
    /// Results required before handing off.
    pub min_results: usize,
    /// Search passes allowed per visit.
    pub max_tool_calls: usize,
    /// Query variants issued concurrently in one pass.
    pub queries_per_turn: usize,
}

impl Default for WebSearchThresholds {
    fn default() -> Self {
        Self {
            min_results: 3,
            max_tool_calls: 2,
            queries_per_turn: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentThresholds {
    pub research: ResearchThresholds,
    pub web_search: WebSearchThresholds,
}

/// Shape of the default research/search/synthesis workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub name: String,
    pub description: String,
    pub enable_research: bool,
    /// 1 (brief) to 5 (exhaustive).
    pub research_depth: u8,
    pub enable_web_search: bool,
    pub max_search_results: usize,
    /// `auto`, `healthcare`, `general`, `comparative` or `analytical`.
    pub synthesis_type: String,
    pub thresholds: AgentThresholds,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: "HealthFinder Concierge".to_string(),
            description: "Research, web search and synthesis for health questions".to_string(),
            enable_research: true,
            research_depth: 3,
            enable_web_search: true,
            max_search_results: 10,
            synthesis_type: "auto".to_string(),
            thresholds: AgentThresholds::default(),
        }
    }
}

pub const SYNTHESIS_TYPES: &[&str] = &["auto", "healthcare", "general", "comparative", "analytical"];

pub const PRESET_NAMES: &[&str] = &["healthcare", "general", "fast", "default"];

impl WorkflowConfig {
    /// Look up a named preset.
    pub fn preset(name: &str) -> Option<Self> {
        let base = Self::default();
        match name {
            "healthcare" => Some(Self {
                name: "Healthcare Research".to_string(),
                description: "Deep medical research with authoritative sources".to_string(),
                research_depth: 4,
                max_search_results: 15,
                synthesis_type: "healthcare".to_string(),
                ..base
            }),
            "general" => Some(Self {
                name: "General Research".to_string(),
                description: "Balanced research for general questions".to_string(),
                research_depth: 3,
                max_search_results: 10,
                synthesis_type: "general".to_string(),
                ..base
            }),
            "fast" => Some(Self {
                name: "Fast Response".to_string(),
                description: "Quick answers without live web search".to_string(),
                research_depth: 2,
                enable_web_search: false,
                max_search_results: 5,
                ..base
            }),
            "default" => Some(base),
            _ => None,
        }
    }

    /// Load a workflow config from a YAML file and validate it.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(display.clone(), e.to_string()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::InvalidValue(display, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=5).contains(&self.research_depth) {
            return Err(ConfigError::InvalidValue(
                "research_depth".to_string(),
                format!("{} is outside 1..=5", self.research_depth),
            ));
        }
        if !(1..=50).contains(&self.max_search_results) {
            return Err(ConfigError::InvalidValue(
                "max_search_results".to_string(),
                format!("{} is outside 1..=50", self.max_search_results),
            ));
        }
        if !SYNTHESIS_TYPES.contains(&self.synthesis_type.as_str()) {
            return Err(ConfigError::InvalidValue(
                "synthesis_type".to_string(),
                format!("unknown synthesis type `{}`", self.synthesis_type),
            ));
        }
        if self.thresholds.research.max_tool_calls == 0 {
            return Err(ConfigError::InvalidValue(
                "thresholds.research.max_tool_calls".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.thresholds.web_search.max_tool_calls == 0
            || self.thresholds.web_search.queries_per_turn == 0
        {
            return Err(ConfigError::InvalidValue(
                "thresholds.web_search".to_string(),
                "max_tool_calls and queries_per_turn must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply per-request overrides on top of this config.
    pub fn with_overrides(&self, overrides: &WorkflowOverrides) -> Result<Self, ConfigError> {
        let mut config = match &overrides.preset {
            Some(name) => Self::preset(name).ok_or_else(|| {
                ConfigError::InvalidValue("preset".to_string(), format!("unknown preset `{}`", name))
            })?,
            None => self.clone(),
        };
        if let Some(v) = overrides.enable_research {
            config.enable_research = v;
        }
        if let Some(v) = overrides.enable_web_search {
            config.enable_web_search = v;
        }
        if let Some(v) = overrides.research_depth {
            config.research_depth = v;
        }
        if let Some(v) = overrides.max_search_results {
            config.max_search_results = v;
        }
        if let Some(v) = &overrides.synthesis_type {
            config.synthesis_type = v.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Per-request workflow hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_research: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_web_search: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_depth: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_search_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_type: Option<String>,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Turns allowed per run before it fails with a budget error
    pub max_turns_per_run: u32,

    /// Wall-clock limit for a single agent turn
    pub turn_timeout: Duration,

    /// Admission cap for non-terminal runs
    pub max_concurrent_runs: usize,

    /// Per-attempt tool timeout
    pub tool_timeout: Duration,

    /// Tool retries after the first attempt
    pub retry_count: u32,

    /// Base delay of the exponential tool backoff
    pub retry_backoff_base: Duration,

    /// How long terminal runs remain queryable
    pub run_retention: Duration,

    pub cancel_mode: CancelMode,

    /// Per-run broadcast buffer for events
    pub event_buffer: usize,

    /// Tavily API key for live web search
    pub tavily_api_key: Option<String>,

    /// Serve curated search results instead of calling out
    pub web_search_offline: bool,

    pub workflow: WorkflowConfig,
}

fn env_parse<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env_parse("PORT", "8000")?;
        let max_turns_per_run = env_parse("MAX_TURNS_PER_RUN", "12")?;
        let turn_timeout = Duration::from_secs(env_parse("TURN_TIMEOUT_SECS", "60")?);
        let max_concurrent_runs = env_parse("MAX_CONCURRENT_RUNS", "16")?;
        let tool_timeout = Duration::from_secs(env_parse("TOOL_TIMEOUT_SECS", "5")?);
        let retry_count = env_parse("RETRY_COUNT", "3")?;
        let retry_backoff_base = Duration::from_millis(env_parse("RETRY_BACKOFF_BASE_MS", "250")?);
        let run_retention = Duration::from_secs(env_parse("RUN_RETENTION_SECS", "600")?);
        let cancel_mode = env_parse("CANCEL_MODE", "abandon")?;
        let event_buffer: usize = env_parse("EVENT_BUFFER", "256")?;

        if max_turns_per_run == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TURNS_PER_RUN".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "EVENT_BUFFER".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let tavily_api_key = std::env::var("TAVILY_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let workflow = match std::env::var("WORKFLOW_CONFIG") {
            Ok(path) if !path.trim().is_empty() => WorkflowConfig::from_yaml_file(Path::new(&path))?,
            _ => WorkflowConfig::default(),
        };

        Ok(Self {
            host,
            port,
            max_turns_per_run,
            turn_timeout,
            max_concurrent_runs,
            tool_timeout,
            retry_count,
            retry_backoff_base,
            run_retention,
            cancel_mode,
            event_buffer,
            tavily_api_key,
            web_search_offline: env_var_bool("WEB_SEARCH_OFFLINE", false),
            workflow,
        })
    }

    /// Create a config with default values (useful for testing).
    pub fn new(workflow: WorkflowConfig) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_turns_per_run: 12,
            turn_timeout: Duration::from_secs(60),
            max_concurrent_runs: 16,
            tool_timeout: Duration::from_secs(5),
            retry_count: 3,
            retry_backoff_base: Duration::from_millis(250),
            run_retention: Duration::from_secs(600),
            cancel_mode: CancelMode::Abandon,
            event_buffer: 256,
            tavily_api_key: None,
            web_search_offline: true,
            workflow,
        }
    }
}

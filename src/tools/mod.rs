//! Tool system for the agents.
//!
//! Tools are the external collaborators an agent calls into: research
//! lookups, web search and answer synthesis. Agents never call a [`Tool`]
//! directly; they go through a [`ToolAdapter`], which applies the per-attempt
//! timeout, retries transient failures and honours run cancellation.
//!
//! ## Error taxonomy
//!
//! Every failure is normalized into a [`ToolError`]. Only `Unavailable` and
//! `Timeout` are retried.

mod adapter;
mod error;
pub mod research;
pub mod synthesis;
pub mod web;

pub use adapter::{ToolAdapter, ToolInvocation, ToolPolicy};
pub use error::{classify_http_status, RetryPolicy, ToolError};
pub use research::{ResearchDomain, ResearchFinding, ResearchTool};
pub use synthesis::{SynthesisReport, SynthesisRequest, SynthesisStrategy, Synthesize};
pub use web::{SearchBackend, SearchHit, SourceType, WebSearch};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;

/// Information about a tool for display purposes.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute one attempt with the given arguments.
    ///
    /// Implementations must not retry on their own; the adapter owns retries.
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a registry with the research, search and synthesis tools.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ResearchTool::new(ResearchDomain::Healthcare)));
        registry.register(Arc::new(ResearchTool::new(ResearchDomain::General)));
        registry.register(Arc::new(WebSearch::new(SearchBackend::from_config(config))));
        registry.register(Arc::new(Synthesize));
        tracing::debug!("Tool registry ready: {:?}", registry.names());
        registry
    }

    /// Create an empty registry (no built-in tools).
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool under its own name, replacing any previous one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Build an adapter for a registered tool.
    pub fn adapter(&self, name: &str, policy: &ToolPolicy) -> Option<ToolAdapter> {
        self.get(name)
            .map(|tool| ToolAdapter::new(tool, policy.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;

    #[test]
    fn test_default_registry_tools() {
        let registry = ToolRegistry::from_config(&Config::new(WorkflowConfig::default()));
        assert_eq!(
            registry.names(),
            vec!["general_research", "healthcare_research", "synthesize", "web_search"]
        );
        assert!(registry.contains("web_search"));
        assert!(registry.adapter("fetch_url", &ToolPolicy::default()).is_none());
        assert_eq!(registry.list().len(), 4);
    }
}

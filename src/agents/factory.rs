//! Building agent graphs for runs.

use std::sync::Arc;

use thiserror::Error;

use super::{
    AgentGraph, AgentRef, GraphError, ResearchAgent, SynthesisAgent, WebSearchAgent, RESEARCH_AGENT,
    SYNTHESIS_AGENT, WEB_SEARCH_AGENT,
};
use crate::config::{ConfigError, WorkflowConfig, WorkflowOverrides};
use crate::tools::ToolRegistry;

#[derive(Debug, Error)]
pub enum WorkflowBuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Produces the agent graph a run executes.
pub trait WorkflowFactory: Send + Sync {
    fn build(&self, overrides: &WorkflowOverrides) -> Result<Arc<AgentGraph>, WorkflowBuildError>;

    /// Workflow shape used when a request carries no overrides.
    fn base_config(&self) -> Option<&WorkflowConfig> {
        None
    }
}

/// The research → web search → synthesis graph for `config`.
///
/// Disabled agents are left out; the root is the first enabled agent.
pub fn concierge_graph(config: &WorkflowConfig, tools: ToolRegistry) -> Result<AgentGraph, GraphError> {
    let mut agents: Vec<AgentRef> = Vec::with_capacity(3);
    if config.enable_research {
        agents.push(Arc::new(ResearchAgent::new(config)));
    }
    if config.enable_web_search {
        agents.push(Arc::new(WebSearchAgent::new(config)));
    }
    agents.push(Arc::new(SynthesisAgent::new(config)));

    let root = if config.enable_research {
        RESEARCH_AGENT
    } else if config.enable_web_search {
        WEB_SEARCH_AGENT
    } else {
        SYNTHESIS_AGENT
    };
    AgentGraph::new(root, agents, tools)
}

/// Builds concierge graphs from a base config plus request overrides.
pub struct ConciergeWorkflow {
    base: WorkflowConfig,
    tools: ToolRegistry,
    default_graph: Arc<AgentGraph>,
}

impl ConciergeWorkflow {
    pub fn new(base: WorkflowConfig, tools: ToolRegistry) -> Result<Self, WorkflowBuildError> {
        base.validate()?;
        let default_graph = Arc::new(concierge_graph(&base, tools.clone())?);
        tracing::info!(
            "Workflow '{}' ready: root={}, agents={}",
            base.name,
            default_graph.root(),
            default_graph.descriptors().len()
        );
        Ok(Self {
            base,
            tools,
            default_graph,
        })
    }
}

impl WorkflowFactory for ConciergeWorkflow {
    fn build(&self, overrides: &WorkflowOverrides) -> Result<Arc<AgentGraph>, WorkflowBuildError> {
        if *overrides == WorkflowOverrides::default() {
            return Ok(Arc::clone(&self.default_graph));
        }
        let config = self.base.with_overrides(overrides)?;
        tracing::debug!("Building workflow with overrides: {:?}", overrides);
        Ok(Arc::new(concierge_graph(&config, self.tools.clone())?))
    }

    fn base_config(&self) -> Option<&WorkflowConfig> {
        Some(&self.base)
    }
}

/// Always hands out the same graph and ignores overrides.
pub struct FixedWorkflow(pub Arc<AgentGraph>);

impl WorkflowFactory for FixedWorkflow {
    fn build(&self, _overrides: &WorkflowOverrides) -> Result<Arc<AgentGraph>, WorkflowBuildError> {
        Ok(Arc::clone(&self.0))
    }
}

#[cfg(test)]
pub(crate) fn offline_graph(config: &WorkflowConfig) -> AgentGraph {
    let tools = ToolRegistry::from_config(&crate::config::Config::new(config.clone()));
    concierge_graph(config, tools).unwrap()
}

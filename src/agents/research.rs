//! Research agent: gathers findings from the research tools.

use async_trait::async_trait;
use serde_json::json;

use super::slots::{RESEARCH_PASSES, RESEARCH_RESULTS, SEARCH_BACKTRACKED};
use super::{Agent, AgentDescriptor, TurnContext, TurnOutcome, RESEARCH_AGENT, SYNTHESIS_AGENT, WEB_SEARCH_AGENT};
use crate::config::WorkflowConfig;
use crate::state::{SlotDecl, StateDelta};
use crate::tools::research::detect_domain;
use crate::tools::ResearchDomain;

/// Depth words, deepest first.
const DEPTH_INDICATORS: &[(u8, &[&str])] = &[
    (5, &["exhaustive", "research paper"]),
    (4, &["in-depth", "in depth", "extensive"]),
    (3, &["comprehensive", "complete", "thorough"]),
    (2, &["detailed", "explain", "describe"]),
    (1, &["simple", "quick", "brief", "summary"]),
];

/// Research depth the wording of a query asks for, if any.
pub fn requested_depth(query: &str) -> Option<u8> {
    let lower = query.to_lowercase();
    DEPTH_INDICATORS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(depth, _)| *depth)
}

/// Runs one research pass per turn until it has enough findings or runs out
/// of passes, then hands off.
///
/// The first pass uses the tool matching the query's domain; later passes
/// alternate to the other domain for a second perspective. A failed pass
/// still counts against the budget. The budget doubles once web search has
/// sent control back for lack of findings.
pub struct ResearchAgent {
    descriptor: AgentDescriptor,
    config: WorkflowConfig,
    next: &'static str,
}

impl ResearchAgent {
    pub fn new(config: &WorkflowConfig) -> Self {
        let next = if config.enable_web_search {
            WEB_SEARCH_AGENT
        } else {
            SYNTHESIS_AGENT
        };
        let descriptor = AgentDescriptor::new(
            RESEARCH_AGENT,
            "Researches medical literature and reference works for the question",
        )
        .with_tools(&[
            ResearchDomain::Healthcare.tool_name(),
            ResearchDomain::General.tool_name(),
        ])
        .with_handoffs(&[next])
        .with_slots(vec![
            SlotDecl::list(RESEARCH_RESULTS),
            SlotDecl::scalar(RESEARCH_PASSES),
        ]);
        Self {
            descriptor,
            config: config.clone(),
            next,
        }
    }

    fn hand_off(&self, delta: StateDelta, findings: usize, passes: usize) -> TurnOutcome {
        TurnOutcome::HandOff {
            target: self.next.to_string(),
            delta,
            note: Some(format!(
                "{} research finding(s) after {} pass(es)",
                findings, passes
            )),
        }
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn take_turn(&self, ctx: &TurnContext) -> TurnOutcome {
        let thresholds = &self.config.thresholds.research;
        let mut findings = ctx.state.list(RESEARCH_RESULTS).len();
        let passes = ctx.state.counter(RESEARCH_PASSES) as usize;
        let budget = if ctx.state.flag(SEARCH_BACKTRACKED) {
            thresholds.max_tool_calls * 2
        } else {
            thresholds.max_tool_calls
        };

        if findings >= thresholds.min_sources || passes >= budget {
            return self.hand_off(StateDelta::new(), findings, passes);
        }

        let primary = detect_domain(&ctx.query);
        let domain = if passes % 2 == 0 { primary } else { primary.other() };
        let depth = requested_depth(&ctx.query).unwrap_or(self.config.research_depth);

        let invocation = ctx
            .invoke(domain.tool_name(), json!({"query": ctx.query, "depth": depth}))
            .await;

        let mut delta = StateDelta::new().set(RESEARCH_PASSES, json!(passes + 1));
        match invocation.outcome {
            Ok(finding) => {
                delta = delta.push(RESEARCH_RESULTS, finding);
                findings += 1;
            }
            Err(err) => {
                tracing::warn!(
                    "Research pass {} via {} failed, continuing without it: {}",
                    passes + 1,
                    domain.tool_name(),
                    err
                );
            }
        }

        if findings >= thresholds.min_sources || passes + 1 >= budget {
            self.hand_off(delta, findings, passes + 1)
        } else {
            TurnOutcome::Continue(delta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::factory::{concierge_graph, offline_graph};
    use crate::config::ResearchThresholds;
    use crate::state::SharedRunState;
    use crate::tools::{Tool, ToolError, ToolRegistry};
    use crate::tools::{SearchBackend, Synthesize, WebSearch};
    use serde_json::Value;
    use std::sync::Arc;

    struct Down(&'static str);

    #[async_trait]
    impl Tool for Down {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "always rejects its arguments"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Err(ToolError::InvalidArguments("rejected".into()))
        }
    }

    fn config(min_sources: usize, max_tool_calls: usize) -> WorkflowConfig {
        let mut config = WorkflowConfig::default();
        config.thresholds.research = ResearchThresholds {
            min_sources,
            max_tool_calls,
        };
        config
    }

    #[test]
    fn test_requested_depth() {
        assert_eq!(requested_depth("Give me a quick summary of flu"), Some(1));
        assert_eq!(requested_depth("An exhaustive review of statins"), Some(5));
        assert_eq!(requested_depth("Explain how vaccines work"), Some(2));
        assert_eq!(requested_depth("flu shot"), None);
    }

    #[tokio::test]
    async fn test_single_pass_hands_off_to_web_search() {
        let config = config(1, 2);
        let graph = offline_graph(&config);
        let state = SharedRunState::new(graph.schema().clone());
        let ctx = TurnContext::for_test(&graph, RESEARCH_AGENT, "migraine treatment", 1, state.snapshot());

        let outcome = graph.agent(RESEARCH_AGENT).unwrap().take_turn(&ctx).await;
        match outcome {
            TurnOutcome::HandOff { target, delta, .. } => {
                assert_eq!(target, WEB_SEARCH_AGENT);
                assert_eq!(delta.ops().len(), 2);
            }
            other => panic!("expected handoff, got {:?}", other),
        }
        assert_eq!(ctx.tool_calls(), 1);
    }

    #[tokio::test]
    async fn test_second_pass_switches_domain() {
        let config = config(2, 3);
        let graph = offline_graph(&config);
        let agent = graph.agent(RESEARCH_AGENT).unwrap();
        let mut state = SharedRunState::new(graph.schema().clone());

        let ctx = TurnContext::for_test(&graph, RESEARCH_AGENT, "asthma therapy", 1, state.snapshot());
        let TurnOutcome::Continue(delta) = agent.take_turn(&ctx).await else {
            panic!("first pass should continue");
        };
        state.apply_delta(1, RESEARCH_AGENT, delta).unwrap();

        let ctx = TurnContext::for_test(&graph, RESEARCH_AGENT, "asthma therapy", 2, state.snapshot());
        let TurnOutcome::HandOff { delta, .. } = agent.take_turn(&ctx).await else {
            panic!("second pass should hand off");
        };
        state.apply_delta(2, RESEARCH_AGENT, delta).unwrap();

        let tools: Vec<String> = state
            .snapshot()
            .list(RESEARCH_RESULTS)
            .iter()
            .map(|f| f["tool"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(tools, vec!["healthcare_research", "general_research"]);
    }

    #[tokio::test]
    async fn test_failed_passes_exhaust_budget_then_hand_off() {
        let config = WorkflowConfig {
            enable_web_search: false,
            ..config(1, 2)
        };
        let mut tools = ToolRegistry::empty();
        tools.register(Arc::new(Down("healthcare_research")));
        tools.register(Arc::new(Down("general_research")));
        tools.register(Arc::new(WebSearch::new(SearchBackend::Offline)));
        tools.register(Arc::new(Synthesize));
        let graph = concierge_graph(&config, tools).unwrap();
        let agent = graph.agent(RESEARCH_AGENT).unwrap();
        let mut state = SharedRunState::new(graph.schema().clone());

        let ctx = TurnContext::for_test(&graph, RESEARCH_AGENT, "gout", 1, state.snapshot());
        let TurnOutcome::Continue(delta) = agent.take_turn(&ctx).await else {
            panic!("failed first pass should continue");
        };
        state.apply_delta(1, RESEARCH_AGENT, delta).unwrap();

        let ctx = TurnContext::for_test(&graph, RESEARCH_AGENT, "gout", 2, state.snapshot());
        match agent.take_turn(&ctx).await {
            TurnOutcome::HandOff { target, .. } => assert_eq!(target, SYNTHESIS_AGENT),
            other => panic!("expected handoff, got {:?}", other),
        }
    }
}

//! Synthesis agent: the terminal step that writes the final answer.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;

use super::slots::{RESEARCH_RESULTS, SEARCH_RESULTS, SYNTHESIS_COMPLETE, SYNTHESIS_RESULT};
use super::{Agent, AgentDescriptor, AgentError, FinalAnswer, TurnContext, TurnOutcome, SYNTHESIS_AGENT};
use crate::config::WorkflowConfig;
use crate::state::{SlotDecl, StateDelta};
use crate::tools::{ResearchFinding, SearchHit, SynthesisReport};

pub struct SynthesisAgent {
    descriptor: AgentDescriptor,
    config: WorkflowConfig,
}

impl SynthesisAgent {
    pub fn new(config: &WorkflowConfig) -> Self {
        let descriptor = AgentDescriptor::new(
            SYNTHESIS_AGENT,
            "Combines research and search results into the final answer",
        )
        .with_tools(&["synthesize"])
        .with_slots(vec![
            SlotDecl::scalar(SYNTHESIS_RESULT),
            SlotDecl::scalar(SYNTHESIS_COMPLETE),
        ])
        .terminal();
        Self {
            descriptor,
            config: config.clone(),
        }
    }
}

/// Append the methodology footer to a synthesis report.
pub fn render_answer(report: &SynthesisReport, research: &[ResearchFinding], search: &[SearchHit]) -> String {
    let mut out = report.content.trim_end().to_string();
    if report.sources_analyzed == 0 {
        return out;
    }

    out.push_str("\n\n---\n\n### Research Methodology\n\n");
    let mut seen = HashSet::new();
    let tools: Vec<&str> = research
        .iter()
        .map(|r| r.tool.as_str())
        .filter(|tool| seen.insert(*tool))
        .collect();
    out.push_str(&format!(
        "{} research pass(es){}, {} web source(s)",
        research.len(),
        if tools.is_empty() {
            String::new()
        } else {
            format!(" ({})", tools.join(", "))
        },
        search.len()
    ));
    if let Some(strategy) = &report.strategy {
        out.push_str(&format!(", {} synthesis", strategy.as_str()));
    }
    out.push_str(".\n");

    if !report.key_insights.is_empty() {
        out.push_str("\n### Key Insights\n\n");
        for insight in &report.key_insights {
            out.push_str(&format!("- {}\n", insight));
        }
    }
    if !report.recommendations.is_empty() {
        out.push_str("\n### Recommendations\n\n");
        for rec in &report.recommendations {
            out.push_str(&format!("- {}\n", rec));
        }
    }
    out.push_str(&format!(
        "\n**Confidence Level:** {:.0}%\n**Sources Analyzed:** {}\n",
        report.confidence * 100.0,
        report.sources_analyzed
    ));
    out
}

#[async_trait]
impl Agent for SynthesisAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn take_turn(&self, ctx: &TurnContext) -> TurnOutcome {
        let research: Vec<ResearchFinding> = match ctx.state.decode_list(RESEARCH_RESULTS) {
            Ok(r) => r,
            Err(e) => {
                return TurnOutcome::Fail(AgentError::InvalidState {
                    slot: RESEARCH_RESULTS.to_string(),
                    message: e.to_string(),
                })
            }
        };
        let search: Vec<SearchHit> = match ctx.state.decode_list(SEARCH_RESULTS) {
            Ok(s) => s,
            Err(e) => {
                return TurnOutcome::Fail(AgentError::InvalidState {
                    slot: SEARCH_RESULTS.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let invocation = ctx
            .invoke(
                "synthesize",
                json!({
                    "query": ctx.query,
                    "synthesis_type": self.config.synthesis_type,
                    "research_results": research,
                    "search_results": search,
                }),
            )
            .await;

        let value = match invocation.outcome {
            Ok(value) => value,
            Err(error) => {
                return TurnOutcome::Fail(AgentError::Tool {
                    tool: invocation.tool,
                    error,
                })
            }
        };
        let report: SynthesisReport = match serde_json::from_value(value.clone()) {
            Ok(report) => report,
            Err(e) => {
                return TurnOutcome::Fail(AgentError::Other(format!(
                    "synthesis returned an unreadable report: {}",
                    e
                )))
            }
        };

        let answer = FinalAnswer {
            content: render_answer(&report, &research, &search),
            confidence: report.confidence,
            key_insights: report.key_insights.clone(),
            recommendations: report.recommendations.clone(),
            sources_analyzed: report.sources_analyzed,
            strategy: report.strategy.map(|s| s.as_str().to_string()),
        };
        let delta = StateDelta::new()
            .set(SYNTHESIS_RESULT, value)
            .set(SYNTHESIS_COMPLETE, json!(true));
        TurnOutcome::complete(delta, answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::factory::offline_graph;
    use crate::state::SharedRunState;
    use crate::tools::{ResearchDomain, ResearchTool, SynthesisStrategy};

    #[tokio::test]
    async fn test_completes_with_footer() {
        let graph = offline_graph(&WorkflowConfig::default());
        let mut state = SharedRunState::new(graph.schema().clone());
        let finding = ResearchTool::new(ResearchDomain::Healthcare).research("flu treatment", 3);
        state
            .apply_delta(
                1,
                "research",
                StateDelta::new().push(RESEARCH_RESULTS, serde_json::to_value(finding).unwrap()),
            )
            .unwrap();

        let ctx = TurnContext::for_test(&graph, SYNTHESIS_AGENT, "flu treatment", 2, state.snapshot());
        let outcome = graph.agent(SYNTHESIS_AGENT).unwrap().take_turn(&ctx).await;

        let TurnOutcome::Complete { delta, result } = outcome else {
            panic!("synthesis should complete");
        };
        assert!(result.content.contains("### Research Methodology"));
        assert!(result.content.contains("healthcare_research"));
        assert!(result.content.contains("**Sources Analyzed:** 1"));
        assert_eq!(result.strategy.as_deref(), Some("healthcare"));
        assert_eq!(result.sources_analyzed, 1);

        state.apply_delta(2, SYNTHESIS_AGENT, delta).unwrap();
        assert!(state.snapshot().flag(SYNTHESIS_COMPLETE));
    }

    #[tokio::test]
    async fn test_no_sources_still_completes() {
        let graph = offline_graph(&WorkflowConfig::default());
        let state = SharedRunState::new(graph.schema().clone());
        let ctx = TurnContext::for_test(&graph, SYNTHESIS_AGENT, "anything", 1, state.snapshot());

        let TurnOutcome::Complete { result, .. } = graph.agent(SYNTHESIS_AGENT).unwrap().take_turn(&ctx).await
        else {
            panic!("synthesis should complete");
        };
        assert_eq!(result.confidence, 0.0);
        assert!(result.content.starts_with("No information sources"));
        assert!(!result.content.contains("---"));
    }

    #[test]
    fn test_footer_lists_each_research_tool_once() {
        let healthcare = ResearchTool::new(ResearchDomain::Healthcare);
        let general = ResearchTool::new(ResearchDomain::General);
        let research = vec![
            healthcare.research("gout", 2),
            general.research("gout", 2),
            healthcare.research("gout", 3),
        ];
        let report = SynthesisReport {
            strategy: Some(SynthesisStrategy::Healthcare),
            content: "Gout answer.".to_string(),
            key_insights: Vec::new(),
            recommendations: Vec::new(),
            confidence: 0.7,
            sources_analyzed: 3,
        };

        let answer = render_answer(&report, &research, &[]);
        assert!(answer.contains(
            "3 research pass(es) (healthcare_research, general_research), 0 web source(s), healthcare synthesis"
        ));
    }
}

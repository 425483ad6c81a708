//! Web search agent: collects scored results for several query variants.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};

use super::slots::{RESEARCH_RESULTS, SEARCH_BACKTRACKED, SEARCH_PASSES, SEARCH_RESULTS};
use super::{
    Agent, AgentDescriptor, AgentError, TurnContext, TurnOutcome, RESEARCH_AGENT, SYNTHESIS_AGENT,
    WEB_SEARCH_AGENT,
};
use crate::config::WorkflowConfig;
use crate::state::{SlotDecl, StateDelta};
use crate::tools::research::detect_domain;
use crate::tools::web::CURRENT_INFO_INDICATORS;
use crate::tools::{ResearchDomain, SearchHit};
use crate::util::contains_any;

/// Query variants in the order they are tried.
pub fn query_variants(query: &str) -> Vec<String> {
    let query = query.trim();
    let mut variants = vec![query.to_string()];
    if detect_domain(query) == ResearchDomain::Healthcare {
        variants.push(format!("{} medical health information", query));
        variants.push(format!("{} clinical guidelines", query));
    } else {
        variants.push(format!("{} overview", query));
        variants.push(format!("{} explained", query));
    }
    if contains_any(query, CURRENT_INFO_INDICATORS) {
        variants.insert(1, format!("{} latest news", query));
    }
    variants
}

/// Searches a few query variants concurrently per turn, keeps the most
/// relevant unique hits, and hands off to synthesis once it has enough.
///
/// When research is part of the workflow but produced nothing, control goes
/// back to research once before any searching happens.
pub struct WebSearchAgent {
    descriptor: AgentDescriptor,
    config: WorkflowConfig,
}

impl WebSearchAgent {
    pub fn new(config: &WorkflowConfig) -> Self {
        let mut handoffs = vec![SYNTHESIS_AGENT];
        if config.enable_research {
            handoffs.push(RESEARCH_AGENT);
        }
        let descriptor = AgentDescriptor::new(
            WEB_SEARCH_AGENT,
            "Finds current, credible web sources for the question",
        )
        .with_tools(&["web_search"])
        .with_handoffs(&handoffs)
        .with_slots(vec![
            SlotDecl::list(SEARCH_RESULTS),
            SlotDecl::scalar(SEARCH_PASSES),
            SlotDecl::scalar(SEARCH_BACKTRACKED),
        ]);
        Self {
            descriptor,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl Agent for WebSearchAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn take_turn(&self, ctx: &TurnContext) -> TurnOutcome {
        let thresholds = &self.config.thresholds.web_search;
        let passes = ctx.state.counter(SEARCH_PASSES) as usize;

        if passes == 0
            && self.descriptor.can_handoff_to(RESEARCH_AGENT)
            && ctx.state.list(RESEARCH_RESULTS).is_empty()
            && !ctx.state.flag(SEARCH_BACKTRACKED)
        {
            return TurnOutcome::HandOff {
                target: RESEARCH_AGENT.to_string(),
                delta: StateDelta::new().set(SEARCH_BACKTRACKED, json!(true)),
                note: Some("no research findings yet, asking for another research pass".to_string()),
            };
        }

        let existing: Vec<SearchHit> = match ctx.state.decode_list(SEARCH_RESULTS) {
            Ok(hits) => hits,
            Err(e) => {
                return TurnOutcome::Fail(AgentError::InvalidState {
                    slot: SEARCH_RESULTS.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let room = self.config.max_search_results.saturating_sub(existing.len());
        let mut accepted: Vec<SearchHit> = Vec::new();
        if room > 0 {
            let variants = query_variants(&ctx.query);
            let batch: Vec<String> = variants
                .iter()
                .cycle()
                .skip(passes * thresholds.queries_per_turn)
                .take(thresholds.queries_per_turn.min(variants.len()))
                .cloned()
                .collect();

            let calls = batch.iter().map(|q| {
                ctx.invoke(
                    "web_search",
                    json!({"query": q, "max_results": self.config.max_search_results}),
                )
            });
            let invocations = join_all(calls).await;

            let mut seen: HashSet<String> = existing.iter().map(|h| h.url.clone()).collect();
            let mut fresh: Vec<SearchHit> = Vec::new();
            for invocation in invocations {
                match invocation.outcome {
                    Ok(value) => match serde_json::from_value::<Vec<SearchHit>>(value["results"].clone()) {
                        Ok(hits) => fresh.extend(hits.into_iter().filter(|h| seen.insert(h.url.clone()))),
                        Err(e) => tracing::warn!(
                            "Search for {:?} returned malformed results: {}",
                            invocation.arguments["query"],
                            e
                        ),
                    },
                    Err(err) => tracing::warn!("Search for {:?} failed: {}", invocation.arguments["query"], err),
                }
            }
            fresh.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
            fresh.truncate(room);
            accepted = fresh;
        }

        let total = existing.len() + accepted.len();
        let values: Vec<Value> = accepted
            .iter()
            .filter_map(|h| serde_json::to_value(h).ok())
            .collect();
        let delta = StateDelta::new()
            .append(SEARCH_RESULTS, values)
            .set(SEARCH_PASSES, json!(passes + 1));

        if total >= thresholds.min_results
            || total >= self.config.max_search_results
            || passes + 1 >= thresholds.max_tool_calls
        {
            TurnOutcome::HandOff {
                target: SYNTHESIS_AGENT.to_string(),
                delta,
                note: Some(format!("{} search result(s) after {} pass(es)", total, passes + 1)),
            }
        } else {
            TurnOutcome::Continue(delta)
        }
    }
}

//! Agent graph: the agents of a workflow and the handoffs between them.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::{Agent, AgentDescriptor};
use crate::state::StateSchema;
use crate::tools::{ToolAdapter, ToolPolicy, ToolRegistry};

/// Reference to an agent in the graph.
pub type AgentRef = Arc<dyn Agent>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph has no agents")]
    Empty,

    #[error("agent {0} is declared more than once")]
    DuplicateAgent(String),

    #[error("root agent {0} is not in the graph")]
    UnknownRoot(String),

    #[error("agent {from} hands off to unknown agent {to}")]
    UnknownHandoffTarget { from: String, to: String },

    #[error("agent {0} lists itself as a handoff target")]
    SelfHandoff(String),

    #[error("no agent in the graph can complete a run")]
    NoTerminalAgent,

    #[error("agent {agent} is bound to unregistered tool {tool}")]
    UnknownTool { agent: String, tool: String },

    #[error("slot {slot} is claimed by both {first} and {second}")]
    SlotOwnedTwice {
        slot: String,
        first: String,
        second: String,
    },
}

/// A validated set of agents.
///
/// # Invariants
/// - Agent names are unique and the root is one of them.
/// - Every handoff target names another agent of the graph.
/// - At least one agent is terminal.
/// - Every bound tool is registered.
/// - Every slot has exactly one owner.
///
/// Handoffs may form cycles; the run's turn ceiling bounds them.
pub struct AgentGraph {
    agents: HashMap<String, AgentRef>,
    /// Declaration order, for stable listings
    order: Vec<String>,
    root: String,
    schema: StateSchema,
    tools: ToolRegistry,
}

impl std::fmt::Debug for AgentGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentGraph")
            .field("root", &self.root)
            .field("agents", &self.order)
            .finish()
    }
}

impl AgentGraph {
    /// Validate and build a graph.
    pub fn new(root: &str, agents: Vec<AgentRef>, tools: ToolRegistry) -> Result<Self, GraphError> {
        if agents.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut by_name: HashMap<String, AgentRef> = HashMap::new();
        let mut order = Vec::with_capacity(agents.len());
        for agent in agents {
            let name = agent.descriptor().name.clone();
            if by_name.contains_key(&name) {
                return Err(GraphError::DuplicateAgent(name));
            }
            order.push(name.clone());
            by_name.insert(name, agent);
        }

        if !by_name.contains_key(root) {
            return Err(GraphError::UnknownRoot(root.to_string()));
        }

        let mut schema = StateSchema::new();
        let mut any_terminal = false;
        for name in &order {
            let descriptor = by_name[name].descriptor();
            any_terminal |= descriptor.terminal;

            for target in &descriptor.can_handoff_to {
                if target == name {
                    return Err(GraphError::SelfHandoff(name.clone()));
                }
                if !by_name.contains_key(target) {
                    return Err(GraphError::UnknownHandoffTarget {
                        from: name.clone(),
                        to: target.clone(),
                    });
                }
            }

            for tool in &descriptor.tools {
                if !tools.contains(tool) {
                    return Err(GraphError::UnknownTool {
                        agent: name.clone(),
                        tool: tool.clone(),
                    });
                }
            }

            for slot in &descriptor.owned_slots {
                if let Some(first) = schema.declare(name, slot) {
                    return Err(GraphError::SlotOwnedTwice {
                        slot: slot.name.clone(),
                        first,
                        second: name.clone(),
                    });
                }
            }
        }

        if !any_terminal {
            return Err(GraphError::NoTerminalAgent);
        }

        Ok(Self {
            agents: by_name,
            order,
            root: root.to_string(),
            schema,
            tools,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn agent(&self, name: &str) -> Option<&AgentRef> {
        self.agents.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Descriptors in declaration order.
    pub fn descriptors(&self) -> Vec<&AgentDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.agents.get(name))
            .map(|agent| agent.descriptor())
            .collect()
    }

    /// Slot layout for a fresh run of this graph.
    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Adapters for the tools bound to `agent`.
    pub fn bind_tools(&self, agent: &str, policy: &ToolPolicy) -> HashMap<String, ToolAdapter> {
        let Some(agent) = self.agents.get(agent) else {
            return HashMap::new();
        };
        agent
            .descriptor()
            .tools
            .iter()
            .filter_map(|name| {
                self.tools
                    .adapter(name, policy)
                    .map(|adapter| (name.clone(), adapter))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{TurnContext, TurnOutcome};
    use crate::state::SlotDecl;
    use crate::tools::{Tool, ToolError};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Stub(AgentDescriptor);

    #[async_trait]
    impl Agent for Stub {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.0
        }

        async fn take_turn(&self, _ctx: &TurnContext) -> TurnOutcome {
            TurnOutcome::Fail(crate::agents::AgentError::Other("stub".into()))
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::new(Echo));
        registry
    }

    fn stub(descriptor: AgentDescriptor) -> AgentRef {
        Arc::new(Stub(descriptor))
    }

    #[test]
    fn test_valid_graph() {
        let graph = AgentGraph::new(
            "a",
            vec![
                stub(AgentDescriptor::new("a", "").with_handoffs(&["b"]).with_tools(&["echo"])),
                stub(AgentDescriptor::new("b", "").with_handoffs(&["a"]).terminal()),
            ],
            registry(),
        )
        .unwrap();

        assert_eq!(graph.root(), "a");
        assert_eq!(graph.descriptors().len(), 2);
        assert_eq!(graph.bind_tools("a", &ToolPolicy::default()).len(), 1);
        assert!(graph.bind_tools("b", &ToolPolicy::default()).is_empty());
    }

    #[test]
    fn test_unknown_handoff_target_rejected() {
        let err = AgentGraph::new(
            "a",
            vec![
                stub(AgentDescriptor::new("a", "").with_handoffs(&["ghost"])),
                stub(AgentDescriptor::new("b", "").terminal()),
            ],
            registry(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownHandoffTarget {
                from: "a".into(),
                to: "ghost".into()
            }
        );
    }

    #[test]
    fn test_structural_errors() {
        let err = AgentGraph::new("a", vec![], registry()).unwrap_err();
        assert_eq!(err, GraphError::Empty);

        let err = AgentGraph::new(
            "a",
            vec![
                stub(AgentDescriptor::new("a", "").terminal()),
                stub(AgentDescriptor::new("a", "")),
            ],
            registry(),
        )
        .unwrap_err();
        assert_eq!(err, GraphError::DuplicateAgent("a".into()));

        let err = AgentGraph::new("z", vec![stub(AgentDescriptor::new("a", "").terminal())], registry())
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownRoot("z".into()));

        let err = AgentGraph::new(
            "a",
            vec![stub(AgentDescriptor::new("a", "").with_handoffs(&["a"]).terminal())],
            registry(),
        )
        .unwrap_err();
        assert_eq!(err, GraphError::SelfHandoff("a".into()));

        let err = AgentGraph::new("a", vec![stub(AgentDescriptor::new("a", ""))], registry()).unwrap_err();
        assert_eq!(err, GraphError::NoTerminalAgent);
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let err = AgentGraph::new(
            "a",
            vec![stub(AgentDescriptor::new("a", "").with_tools(&["web_search"]).terminal())],
            registry(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownTool {
                agent: "a".into(),
                tool: "web_search".into()
            }
        );
    }

    #[test]
    fn test_slot_claimed_twice_rejected() {
        let err = AgentGraph::new(
            "a",
            vec![
                stub(AgentDescriptor::new("a", "").with_slots(vec![SlotDecl::list("results")])),
                stub(
                    AgentDescriptor::new("b", "")
                        .with_slots(vec![SlotDecl::list("results")])
                        .terminal(),
                ),
            ],
            registry(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::SlotOwnedTwice {
                slot: "results".into(),
                first: "a".into(),
                second: "b".into()
            }
        );
    }
}

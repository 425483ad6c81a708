//! # HealthFinder
//!
//! Multi-agent answering service for health questions.
//!
//! This library provides:
//! - A workflow engine that drives cooperating agents over shared run state
//! - Research, web search and synthesis tools behind a retrying adapter
//! - HTTP APIs for runs, chat completions and live run events
//!
//! ## Architecture
//!
//! ```text
//!   POST /api/runs ──► Orchestrator ──► RunRegistry (admission, cancel, status)
//!                           │
//!                           ▼  one task per run
//!                      RunDriver ──► ResearchAgent ─► WebSearchAgent ─► SynthesisAgent
//!                           │              │                │                 │
//!                           │              └────── ToolAdapter (timeout, retry) ─┘
//!                           ▼
//!                      EventSink ──► GET /api/runs/:id/stream (SSE)
//! ```
//!
//! ## Run Flow
//! 1. Validate the request and build the agent graph
//! 2. Admit the run (or reject it when too many are in flight)
//! 3. Drive agent turns until one completes, fails, or the run is cancelled
//! 4. Publish the terminal status and keep it for the retention window
//!
//! ## Modules
//! - `config`: environment and workflow configuration
//! - `tools`: tool trait, adapter, research / web / synthesis tools
//! - `state`: shared run state with ownership checks and an audit log
//! - `agents`: agent trait, agent graph, concrete agents
//! - `workflow`: orchestrator and run driver
//! - `session`: run registry and metrics
//! - `events`: per-run event channels

pub mod agents;
pub mod api;
pub mod config;
pub mod events;
pub mod session;
pub mod state;
pub mod tools;
pub mod util;
pub mod workflow;

pub use config::Config;

//! Round-based agent collectives coordinating through a shared environment.
//!
//! Agents never call each other. Each one declares the trace types it
//! consumes and the single type it produces; the collective runs every agent
//! whose inputs are available and whose output is missing or stale, in
//! synchronous rounds, until nothing is left to do:
//!
//! - **Environment**: per-task store of typed traces with strength and decay
//! - **Resolver**: decides which agents have work each round
//! - **Executor**: runs a round concurrently and commits it atomically
//! - **Detector**: stops on convergence, repeated rounds, or an exhausted budget
//!
//! # Usage
//!
//! ```ignore
//! use stigmergy::{Agent, AgentSpec, Collective, RunOptions};
//! use serde_json::json;
//!
//! let mut collective = Collective::new();
//! collective.add(Agent::from_fn(
//!     AgentSpec::new("analyzer", ["goal"], "analysis"),
//!     |ctx| async move {
//!         let goal = ctx.field("goal", "goal").cloned().unwrap_or_default();
//!         Ok::<_, anyhow::Error>(json!({ "analysis": goal }))
//!     },
//! ))?;
//!
//! let result = collective.run_goal("build_api", "Build an API", RunOptions::default()).await;
//! assert!(result.converged);
//! let analysis = collective.result("build_api", "analysis").await;
//! ```

pub mod agent;
pub mod collective;
pub mod config;
pub mod engine;
pub mod environment;
pub mod trace;
pub mod types;

// Re-export main types for convenience
pub use agent::{Agent, AgentContext, AgentHandler, AgentOutput, AgentRegistry, AgentSpec, Effect};
pub use collective::{Collective, RoundObserver, RoundReport, RunOptions, RunResult};
pub use config::{CollectiveConfig, DecayConfig};
pub use engine::{Outcome, Trigger};
pub use environment::{Environment, TraceFilter, TraceSummary};
pub use trace::{Trace, TraceId};
pub use types::{
    AgentError, AgentName, CollectiveError, Result, Round, SharedData, TaskId, TraceData,
    TraceType, USER_PRODUCER,
};

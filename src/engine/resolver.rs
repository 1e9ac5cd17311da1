//! Dependency resolution: which agents have work to do this round.
//!
//! An agent is eligible when every type it consumes has a live trace, it is
//! not a `run_once` agent that already succeeded, and one of the following
//! holds:
//! - it has never been invoked for the task;
//! - its last invocation succeeded but its output has since been invalidated;
//! - one of its inputs was committed after its last invocation.
//!
//! A failed invocation counts as an invocation, so a failing agent stalls
//! until one of its inputs is refreshed.

use crate::agent::{Agent, AgentRegistry};
use crate::environment::TaskTraces;
use crate::types::Round;
use std::fmt;

/// Why an agent was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    FirstRun,
    OutputInvalidated,
    StaleInputs { newest_input: Round, last_run: Round },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::FirstRun => write!(f, "first run"),
            Trigger::OutputInvalidated => write!(f, "output invalidated"),
            Trigger::StaleInputs {
                newest_input,
                last_run,
            } => write!(
                f,
                "input from round {} newer than run in round {}",
                newest_input, last_run
            ),
        }
    }
}

/// Decide whether a single agent should fire.
pub(crate) fn trigger(agent: &Agent, traces: &TaskTraces) -> Option<Trigger> {
    let spec = agent.spec();

    let mut newest_input: Option<Round> = None;
    for trace_type in spec.consumes() {
        let input = traces.strongest(trace_type)?;
        newest_input = newest_input.max(Some(input.created_round));
    }

    if spec.is_run_once() && traces.has_completed(spec.name()) {
        return None;
    }

    let Some(last) = traces.attempt(spec.name()) else {
        return Some(Trigger::FirstRun);
    };

    if last.succeeded && !traces.has_live_output(spec.name(), spec.produces()) {
        return Some(Trigger::OutputInvalidated);
    }

    match newest_input {
        Some(newest) if newest > last.round => Some(Trigger::StaleInputs {
            newest_input: newest,
            last_run: last.round,
        }),
        _ => None,
    }
}

/// Agents eligible for the next round, sorted by name.
pub(crate) fn eligible<'a>(
    registry: &'a AgentRegistry,
    traces: Option<&TaskTraces>,
) -> Vec<(&'a Agent, Trigger)> {
    let empty = TaskTraces::default();
    let traces = traces.unwrap_or(&empty);

    let mut selected: Vec<_> = registry
        .iter()
        .filter_map(|agent| trigger(agent, traces).map(|t| (agent, t)))
        .collect();
    selected.sort_by(|(a, _), (b, _)| a.name().cmp(b.name()));
    selected
}

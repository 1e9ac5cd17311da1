//! Traces: the facts agents leave in the environment.

use crate::types::{AgentName, Round, SharedData, TaskId, TraceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a trace within an [`Environment`](crate::Environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceId(pub u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace-{}", self.0)
    }
}

/// A single deposited fact.
///
/// The payload never changes after creation. Decay and reinforcement only
/// move `strength`; invalidation only flips `invalidated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,

    pub task: TaskId,

    #[serde(rename = "type")]
    pub trace_type: TraceType,

    pub data: SharedData,

    /// Selection priority; higher is more authoritative
    pub strength: f64,

    /// Round in which the trace was committed
    pub created_round: Round,

    /// Agent that produced the trace
    pub producer: AgentName,

    /// Wall-clock commit time, only used for diagnostics
    pub created_at: DateTime<Utc>,

    pub invalidated: bool,
}

impl Trace {
    pub(crate) fn new(
        id: TraceId,
        task: TaskId,
        trace_type: TraceType,
        data: SharedData,
        producer: AgentName,
        created_round: Round,
        strength: f64,
    ) -> Self {
        Self {
            id,
            task,
            trace_type,
            data,
            strength,
            created_round,
            producer,
            created_at: Utc::now(),
            invalidated: false,
        }
    }

    /// A trace is selectable until it is invalidated. Decay never kills it.
    pub fn is_live(&self) -> bool {
        !self.invalidated
    }

    /// Seconds since the trace was committed.
    pub fn age_secs(&self) -> f64 {
        (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    pub(crate) fn decay(&mut self, factor: f64) {
        self.strength *= factor;
    }

    pub(crate) fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Ordering used by `strongest`: strength, then recency, then identity.
    pub(crate) fn outranks(&self, other: &Trace) -> bool {
        match self.strength.partial_cmp(&other.strength) {
            Some(std::cmp::Ordering::Greater) => true,
            Some(std::cmp::Ordering::Less) => false,
            _ => (self.created_round, self.id) > (other.created_round, other.id),
        }
    }

    /// Ordering used by `freshest`: recency, then identity.
    pub(crate) fn is_fresher_than(&self, other: &Trace) -> bool {
        (self.created_round, self.id) > (other.created_round, other.id)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_live() { "✓" } else { "✗" };
        write!(
            f,
            "{} [{}] {} (str={:.2}, round={}, age={:.1}s)",
            status,
            self.trace_type,
            self.producer,
            self.strength,
            self.created_round,
            self.age_secs()
        )
    }
}

//! The environment: shared trace store agents coordinate through.
//!
//! Each task owns an isolated set of traces, a round clock, an error log and
//! the ledger of agent invocations the resolver consults. Reads may run
//! concurrently; every mutation of a round happens under a single write lock
//! acquisition at the round boundary.

use crate::config::{DecayConfig, DEFAULT_INITIAL_STRENGTH};
use crate::trace::{Trace, TraceId};
use crate::types::{AgentError, AgentName, Round, SharedData, TaskId, TraceData, TraceType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{trace, warn};

/// Selects traces by producer, type, or both. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceFilter {
    pub agent: Option<AgentName>,
    pub trace_type: Option<TraceType>,
}

impl TraceFilter {
    pub fn by_type(trace_type: impl Into<TraceType>) -> Self {
        Self {
            agent: None,
            trace_type: Some(trace_type.into()),
        }
    }

    pub fn by_agent(agent: impl Into<AgentName>) -> Self {
        Self {
            agent: Some(agent.into()),
            trace_type: None,
        }
    }

    pub fn with_type(mut self, trace_type: impl Into<TraceType>) -> Self {
        self.trace_type = Some(trace_type.into());
        self
    }

    fn matches(&self, trace: &Trace) -> bool {
        self.agent.as_deref().map_or(true, |a| trace.producer == a)
            && self
                .trace_type
                .as_deref()
                .map_or(true, |t| trace.trace_type == t)
    }
}

/// Counts over the live traces of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Live trace count per type
    pub types: BTreeMap<TraceType, usize>,

    /// Producers of live traces, sorted
    pub agents: Vec<AgentName>,

    pub total: usize,
}

/// Most recent invocation of an agent for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attempt {
    pub round: Round,
    pub succeeded: bool,
}

/// Per-task state.
#[derive(Debug, Default)]
pub(crate) struct TaskTraces {
    /// Every trace ever committed, in commit order (kept for audit)
    traces: Vec<Trace>,
    clock: Round,
    errors: Vec<AgentError>,
    attempts: HashMap<AgentName, Attempt>,
    completed: BTreeSet<AgentName>,
}

impl TaskTraces {
    pub fn clock(&self) -> Round {
        self.clock
    }

    pub fn advance_clock(&mut self, round: Round) {
        self.clock = self.clock.max(round);
    }

    pub fn live(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter().filter(|t| t.is_live())
    }

    pub fn strongest(&self, trace_type: &str) -> Option<&Trace> {
        self.live()
            .filter(|t| t.trace_type == trace_type)
            .fold(None, |best, t| match best {
                Some(b) if !t.outranks(b) => Some(b),
                _ => Some(t),
            })
    }

    pub fn freshest(&self, trace_type: &str) -> Option<&Trace> {
        self.live()
            .filter(|t| t.trace_type == trace_type)
            .fold(None, |best, t| match best {
                Some(b) if !t.is_fresher_than(b) => Some(b),
                _ => Some(t),
            })
    }

    /// Whether `agent` still has a live trace of `trace_type` it produced.
    pub fn has_live_output(&self, agent: &str, trace_type: &str) -> bool {
        self.live()
            .any(|t| t.trace_type == trace_type && t.producer == agent)
    }

    pub fn attempt(&self, agent: &str) -> Option<Attempt> {
        self.attempts.get(agent).copied()
    }

    pub fn has_completed(&self, agent: &str) -> bool {
        self.completed.contains(agent)
    }

    pub fn record_attempt(&mut self, agent: &str, round: Round, succeeded: bool) {
        self.attempts
            .insert(agent.to_string(), Attempt { round, succeeded });
        if succeeded {
            self.completed.insert(agent.to_string());
        }
    }

    pub fn record_error(&mut self, error: AgentError) {
        self.errors.push(error);
    }

    pub fn invalidate(&mut self, filter: &TraceFilter) -> usize {
        let mut count = 0;
        for t in self.traces.iter_mut().filter(|t| t.is_live()) {
            if filter.matches(t) {
                t.invalidate();
                count += 1;
            }
        }
        count
    }

    pub fn reinforce(&mut self, trace_type: &str, amount: f64) -> Option<f64> {
        let id = self.strongest(trace_type)?.id;
        let target = self.traces.iter_mut().find(|t| t.id == id)?;
        target.strength += amount;
        Some(target.strength)
    }

    /// Multiply the strength of every live trace by its type's factor.
    /// Traces created in `exempt_round` are fresh and left untouched.
    pub fn decay(&mut self, decay: &DecayConfig, exempt_round: Option<Round>) {
        for t in self.traces.iter_mut().filter(|t| t.is_live()) {
            if Some(t.created_round) == exempt_round {
                continue;
            }
            t.decay(decay.rate_for(&t.trace_type));
        }
    }

    fn push(&mut self, trace: Trace) -> TraceId {
        let id = trace.id;
        for existing in self.traces.iter_mut().filter(|t| {
            t.is_live()
                && t.trace_type == trace.trace_type
                && t.producer == trace.producer
                && t.created_round == trace.created_round
        }) {
            warn!(
                "Trace {} superseded by {} for {}/{} in round {}",
                existing.id, id, trace.producer, trace.trace_type, trace.created_round
            );
            existing.invalidate();
        }
        self.advance_clock(trace.created_round);
        self.traces.push(trace);
        id
    }

    fn summary(&self) -> TraceSummary {
        let mut summary = TraceSummary::default();
        let mut agents = BTreeSet::new();
        for t in self.live() {
            *summary.types.entry(t.trace_type.clone()).or_default() += 1;
            agents.insert(t.producer.clone());
            summary.total += 1;
        }
        summary.agents = agents.into_iter().collect();
        summary
    }

    fn observe(&self) -> String {
        if self.traces.is_empty() {
            return "(no traces)".to_string();
        }
        self.traces
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// All tasks, plus the identity counter shared between them.
#[derive(Debug)]
pub(crate) struct TraceTable {
    tasks: HashMap<TaskId, TaskTraces>,
    next_id: u64,
    initial_strength: f64,
}

impl TraceTable {
    pub fn new(initial_strength: f64) -> Self {
        Self {
            tasks: HashMap::new(),
            next_id: 0,
            initial_strength,
        }
    }

    pub fn task(&self, task: &str) -> Option<&TaskTraces> {
        self.tasks.get(task)
    }

    pub fn task_mut(&mut self, task: &str) -> &mut TaskTraces {
        self.tasks.entry(task.to_string()).or_default()
    }

    pub fn deposit(
        &mut self,
        task: &str,
        trace_type: &str,
        data: SharedData,
        producer: &str,
        round: Round,
    ) -> TraceId {
        self.next_id += 1;
        let trace = Trace::new(
            TraceId(self.next_id),
            task.to_string(),
            trace_type.to_string(),
            data,
            producer.to_string(),
            round,
            self.initial_strength,
        );
        trace!(
            "Deposit {} [{}] by {} in round {}",
            trace.id,
            trace_type,
            producer,
            round
        );
        self.task_mut(task).push(trace)
    }
}

/// Shared memory where agents communicate via traces.
#[derive(Debug)]
pub struct Environment {
    table: RwLock<TraceTable>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_STRENGTH)
    }
}

impl Environment {
    /// Create an environment whose new traces start at `initial_strength`.
    pub fn new(initial_strength: f64) -> Self {
        Self {
            table: RwLock::new(TraceTable::new(initial_strength)),
        }
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, TraceTable> {
        self.table.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, TraceTable> {
        self.table.write().await
    }

    /// Leave a trace. Always succeeds and returns the new trace's identity.
    pub async fn deposit(
        &self,
        task: &str,
        trace_type: &str,
        data: TraceData,
        producer: &str,
        round: Round,
    ) -> TraceId {
        self.write()
            .await
            .deposit(task, trace_type, Arc::new(data), producer, round)
    }

    /// Live trace with the highest strength; ties go to the latest round.
    pub async fn strongest(&self, task: &str, trace_type: &str) -> Option<Trace> {
        self.read()
            .await
            .task(task)
            .and_then(|t| t.strongest(trace_type))
            .cloned()
    }

    /// Live trace with the highest round, regardless of strength.
    pub async fn freshest(&self, task: &str, trace_type: &str) -> Option<Trace> {
        self.read()
            .await
            .task(task)
            .and_then(|t| t.freshest(trace_type))
            .cloned()
    }

    pub async fn strongest_data(&self, task: &str, trace_type: &str) -> Option<SharedData> {
        self.read()
            .await
            .task(task)
            .and_then(|t| t.strongest(trace_type))
            .map(|t| t.data.clone())
    }

    pub async fn freshest_data(&self, task: &str, trace_type: &str) -> Option<SharedData> {
        self.read()
            .await
            .task(task)
            .and_then(|t| t.freshest(trace_type))
            .map(|t| t.data.clone())
    }

    /// All live traces of a task in commit order.
    pub async fn traces(&self, task: &str) -> Vec<Trace> {
        self.read()
            .await
            .task(task)
            .map(|t| t.live().cloned().collect())
            .unwrap_or_default()
    }

    /// Mark every trace of `trace_type` invalid, forcing recomputation.
    /// Returns the number of traces affected.
    pub async fn invalidate(&self, task: &str, trace_type: &str) -> usize {
        self.invalidate_where(task, &TraceFilter::by_type(trace_type))
            .await
    }

    /// Mark every live trace matching `filter` invalid.
    pub async fn invalidate_where(&self, task: &str, filter: &TraceFilter) -> usize {
        self.write().await.task_mut(task).invalidate(filter)
    }

    /// Add `amount` to the strength of the current strongest trace.
    /// Returns the new strength, or `None` when no live trace exists.
    pub async fn reinforce(&self, task: &str, trace_type: &str, amount: f64) -> Option<f64> {
        self.write()
            .await
            .task_mut(task)
            .reinforce(trace_type, amount)
    }

    /// Decay every live trace of the task once.
    pub async fn decay_all(&self, task: &str, decay: &DecayConfig) {
        self.write().await.task_mut(task).decay(decay, None);
    }

    pub async fn has_errors(&self, task: &str) -> bool {
        self.read()
            .await
            .task(task)
            .map_or(false, |t| !t.errors.is_empty())
    }

    /// Agent failures recorded for a task across all runs.
    pub async fn errors(&self, task: &str) -> Vec<AgentError> {
        self.read()
            .await
            .task(task)
            .map(|t| t.errors.clone())
            .unwrap_or_default()
    }

    /// Latest round committed for a task (0 when nothing happened yet).
    pub async fn current_round(&self, task: &str) -> Round {
        self.read().await.task(task).map_or(0, |t| t.clock())
    }

    pub async fn summary(&self, task: &str) -> TraceSummary {
        self.read()
            .await
            .task(task)
            .map(|t| t.summary())
            .unwrap_or_default()
    }

    /// Drop every trace, error and invocation record of a task.
    pub async fn clear(&self, task: &str) {
        self.write().await.tasks.remove(task);
    }

    /// Human-readable listing of all traces of a task, including invalidated ones.
    pub async fn observe(&self, task: &str) -> String {
        self.read()
            .await
            .task(task)
            .map(|t| t.observe())
            .unwrap_or_else(|| "(no traces)".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: serde_json::Value) -> TraceData {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_strongest_returns_highest_strength() {
        let env = Environment::default();
        env.deposit("task", "data", data(json!({"version": 1})), "agent1", 1)
            .await;
        env.deposit("task", "data", data(json!({"version": 2})), "agent2", 1)
            .await;
        env.reinforce("task", "data", 0.5).await;

        // Both start equal, so the reinforced one is the later deposit
        let strongest = env.strongest("task", "data").await.unwrap();
        assert_eq!(strongest.data["version"], 2);
        assert_eq!(strongest.strength, 1.5);
    }

    #[tokio::test]
    async fn test_strongest_tie_prefers_latest_round() {
        let env = Environment::default();
        env.deposit("task", "data", data(json!({"v": "late"})), "b", 3)
            .await;
        env.deposit("task", "data", data(json!({"v": "early"})), "a", 2)
            .await;

        let strongest = env.strongest("task", "data").await.unwrap();
        assert_eq!(strongest.data["v"], "late");
    }

    #[tokio::test]
    async fn test_absent_type() {
        let env = Environment::default();
        assert!(env.strongest("task", "missing").await.is_none());
        assert!(env.freshest("task", "missing").await.is_none());
        assert!(env.strongest_data("task", "missing").await.is_none());
        assert_eq!(env.reinforce("task", "missing", 1.0).await, None);
    }

    #[tokio::test]
    async fn test_invalidate_hides_traces() {
        let env = Environment::default();
        env.deposit("task", "output", data(json!({"value": 1})), "agent1", 1)
            .await;
        assert!(env.strongest("task", "output").await.is_some());

        assert_eq!(env.invalidate("task", "output").await, 1);

        assert!(env.strongest("task", "output").await.is_none());
        assert!(env.freshest("task", "output").await.is_none());
        // Retained for audit
        assert!(env.observe("task").await.contains("✗ [output] agent1"));
    }

    #[tokio::test]
    async fn test_invalidate_where_filters_by_agent() {
        let env = Environment::default();
        env.deposit("task", "review", data(json!({})), "strict", 1)
            .await;
        env.deposit("task", "review", data(json!({})), "lenient", 1)
            .await;

        let removed = env
            .invalidate_where("task", &TraceFilter::by_agent("strict"))
            .await;

        assert_eq!(removed, 1);
        let left = env.strongest("task", "review").await.unwrap();
        assert_eq!(left.producer, "lenient");
    }

    #[tokio::test]
    async fn test_decay_weakens_traces() {
        let env = Environment::default();
        env.deposit("task", "data", data(json!({"value": 1})), "agent1", 1)
            .await;

        env.decay_all("task", &DecayConfig::default().with_rate("data", 0.5))
            .await;

        let trace = env.strongest("task", "data").await.unwrap();
        assert!((trace.strength - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_decay_is_monotonic_and_stays_positive() {
        let env = Environment::default();
        env.deposit("task", "data", data(json!({})), "agent1", 1)
            .await;
        let decay = DecayConfig::default();

        let mut previous = env.strongest("task", "data").await.unwrap().strength;
        for _ in 0..50 {
            env.decay_all("task", &decay).await;
            let current = env.strongest("task", "data").await.unwrap().strength;
            assert!(current < previous);
            assert!(current > 0.0);
            previous = current;
        }
    }

    #[tokio::test]
    async fn test_rate_one_disables_decay() {
        let env = Environment::default();
        env.deposit("task", "goal", data(json!({})), "user", 1)
            .await;

        env.decay_all("task", &DecayConfig::default().with_rate("goal", 1.0))
            .await;

        assert_eq!(env.strongest("task", "goal").await.unwrap().strength, 1.0);
    }

    #[tokio::test]
    async fn test_freshest_recovers_demoted_trace() {
        let env = Environment::default();
        env.deposit("task", "plan", data(json!({"v": "old"})), "a", 1)
            .await;
        env.deposit("task", "plan", data(json!({"v": "new"})), "b", 2)
            .await;
        // Penalize the newer writer below zero
        env.reinforce("task", "plan", -2.0).await;

        assert_eq!(env.strongest_data("task", "plan").await.unwrap()["v"], "old");
        assert_eq!(env.freshest_data("task", "plan").await.unwrap()["v"], "new");
    }

    #[tokio::test]
    async fn test_negative_trace_still_selectable_alone() {
        let env = Environment::default();
        env.deposit("task", "plan", data(json!({})), "a", 1).await;
        env.reinforce("task", "plan", -3.0).await;

        let trace = env.strongest("task", "plan").await.unwrap();
        assert_eq!(trace.strength, -2.0);
    }

    #[tokio::test]
    async fn test_same_key_deposit_supersedes() {
        let env = Environment::default();
        env.deposit("task", "plan", data(json!({"v": 1})), "a", 1)
            .await;
        env.deposit("task", "plan", data(json!({"v": 2})), "a", 1)
            .await;

        assert_eq!(env.traces("task").await.len(), 1);
        assert_eq!(env.strongest_data("task", "plan").await.unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn test_tasks_are_isolated() {
        let env = Environment::default();
        env.deposit("a", "data", data(json!({})), "agent", 1).await;

        assert!(env.strongest("b", "data").await.is_none());
        assert_eq!(env.current_round("a").await, 1);
        assert_eq!(env.current_round("b").await, 0);
    }

    #[tokio::test]
    async fn test_summary_and_clear() {
        let env = Environment::default();
        env.deposit("task", "analysis", data(json!({})), "analyzer", 1)
            .await;
        env.deposit("task", "plan", data(json!({})), "planner", 2)
            .await;
        env.deposit("task", "plan", data(json!({})), "critic", 2)
            .await;

        let summary = env.summary("task").await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.types["plan"], 2);
        assert_eq!(summary.agents, vec!["analyzer", "critic", "planner"]);

        env.clear("task").await;
        assert_eq!(env.summary("task").await.total, 0);
        assert_eq!(env.observe("task").await, "(no traces)");
    }

    #[tokio::test]
    async fn test_observe_returns_debug_string() {
        let env = Environment::default();
        env.deposit("task", "analysis", data(json!({"result": "test"})), "analyzer", 1)
            .await;

        let output = env.observe("task").await;
        assert!(output.contains("analyzer"));
        assert!(output.contains("analysis"));
        assert!(output.contains("str="));
    }
}

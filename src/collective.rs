//! The collective: owns agents and the environment, and drives runs.
//!
//! A run seeds the task with initial data, then executes rounds until no
//! agent has work left, a round repeats an earlier one, or the round budget
//! is spent:
//!
//! 1. resolve the eligible agents (stop with `Converged` if none);
//! 2. run them concurrently against a snapshot of their inputs;
//! 3. commit outputs and effects, then decay every older trace;
//! 4. stop with `Converged` if no agent is eligible for the next round,
//!    otherwise with `Cycled` if the round's fingerprint was seen before,
//!    otherwise with `Exhausted` if that was the last round of the budget.

use crate::agent::{Agent, AgentRegistry};
use crate::config::CollectiveConfig;
use crate::engine::detector::{Detector, Outcome};
use crate::engine::executor::RoundExecutor;
use crate::environment::{Environment, TraceSummary};
use crate::types::{
    AgentError, AgentName, Result, Round, SharedData, TaskId, TraceData, TraceType, USER_PRODUCER,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Summary of one executed round, handed to the round observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    pub task: TaskId,

    /// Round within the run, starting at 1
    pub round: usize,

    /// Agents invoked this round, in name order
    pub agents: Vec<AgentName>,

    /// Traces committed
    pub committed: usize,

    /// Agents that failed
    pub failed: usize,
}

/// Callback invoked after every committed round.
///
/// It runs on the run's own task and must not block.
#[derive(Clone)]
pub struct RoundObserver(Arc<dyn Fn(&RoundReport) + Send + Sync>);

impl RoundObserver {
    pub fn new(f: impl Fn(&RoundReport) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn notify(&self, report: &RoundReport) {
        (self.0)(report)
    }
}

impl From<mpsc::UnboundedSender<RoundReport>> for RoundObserver {
    /// Forward reports to a channel. A closed receiver is ignored.
    fn from(tx: mpsc::UnboundedSender<RoundReport>) -> Self {
        Self::new(move |report| {
            let _ = tx.send(report.clone());
        })
    }
}

impl fmt::Debug for RoundObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoundObserver")
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Round budget; `None` uses the configured default
    pub max_rounds: Option<usize>,

    pub on_round: Option<RoundObserver>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    pub fn on_round(mut self, observer: impl Into<RoundObserver>) -> Self {
        self.on_round = Some(observer.into());
        self
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub task: TaskId,

    /// Unique identifier of this run
    pub run_id: String,

    /// No agent had work left when the run stopped
    pub converged: bool,

    /// Rounds counted by the run, including a final idle round
    pub rounds: usize,

    /// The run stopped because a round repeated
    pub cycle_detected: bool,

    pub outcome: Outcome,

    /// Failures recorded during this run
    pub errors: Vec<AgentError>,

    /// Live traces of the task when the run stopped
    pub traces: TraceSummary,
}

impl RunResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A set of agents coordinating through a shared environment.
pub struct Collective {
    registry: AgentRegistry,
    env: Environment,
    config: CollectiveConfig,
    /// One entry per task that has run; dropped by [`Collective::clear`]
    run_locks: Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
}

impl Default for Collective {
    fn default() -> Self {
        Self::new()
    }
}

impl Collective {
    /// Collective with the default configuration.
    pub fn new() -> Self {
        Self::from_parts(CollectiveConfig::default())
    }

    /// Collective with a validated configuration.
    pub fn with_config(config: CollectiveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config))
    }

    fn from_parts(config: CollectiveConfig) -> Self {
        Self {
            registry: AgentRegistry::new(),
            env: Environment::new(config.initial_strength),
            config,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register an agent.
    ///
    /// # Returns
    /// * `Err(RegistrationConflict)` if an agent with the same name exists
    /// * `Err(InvalidAgent)` if the descriptor is malformed
    pub fn add(&mut self, agent: Agent) -> Result<&mut Self> {
        self.registry.register(agent)?;
        Ok(self)
    }

    /// Register several agents, stopping at the first failure.
    pub fn add_all(&mut self, agents: impl IntoIterator<Item = Agent>) -> Result<&mut Self> {
        for agent in agents {
            self.registry.register(agent)?;
        }
        Ok(self)
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CollectiveConfig {
        &self.config
    }

    /// Direct access to the trace store.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Seed `task` with `initial_data` and run rounds until it converges,
    /// cycles, or spends its round budget.
    ///
    /// Agent failures never fail a run; they are reported in
    /// [`RunResult::errors`]. Runs of the same task are serialized.
    pub async fn run(
        &self,
        task: &str,
        initial_data: HashMap<TraceType, TraceData>,
        options: RunOptions,
    ) -> RunResult {
        let lock = self.run_lock(task).await;
        let _guard = lock.lock_owned().await;

        let run_id = Uuid::new_v4().to_string();
        let max_rounds = options
            .max_rounds
            .unwrap_or(self.config.default_max_rounds);
        info!(
            "Starting run {} for task {} ({} agents, up to {} rounds)",
            run_id,
            task,
            self.registry.len(),
            max_rounds
        );

        let base = self.seed(task, initial_data).await;
        let executor = RoundExecutor::new(&self.env, task, &self.config.decay);
        let mut detector = Detector::new(
            max_rounds,
            self.config.max_cycle_history,
            self.config.stop_on_cycle,
        );
        let mut errors = Vec::new();
        let mut rounds = 0;

        let outcome = loop {
            // Later rounds check the budget after committing; this only
            // catches a zero budget.
            if detector.budget_spent(rounds) {
                let pending = executor.pending(&self.registry).await;
                break detector.on_budget_spent(pending.len());
            }

            let round = rounds + 1;
            let clock = base + round as Round;
            let invocations = executor.plan(&self.registry, clock).await;
            rounds = round;
            if let Some(outcome) = detector.on_eligible(invocations.len()) {
                debug!("Round {} of task {}: nothing left to do", round, task);
                break outcome;
            }

            let result = executor.execute(invocations, clock).await;
            debug!(
                "Round {} of task {}: ran {:?}, {} committed, {} failed",
                round,
                task,
                result.executed,
                result.committed.len(),
                result.errors.len()
            );

            if let Some(observer) = &options.on_round {
                observer.notify(&RoundReport {
                    task: task.to_string(),
                    round,
                    agents: result.executed.clone(),
                    committed: result.committed.len(),
                    failed: result.errors.len(),
                });
            }
            tokio::task::yield_now().await;

            let fingerprint = result.fingerprint();
            errors.extend(result.errors);

            let pending = executor.pending(&self.registry).await;
            if let Some(outcome) = detector.after_round(round, pending.len(), fingerprint) {
                if outcome == Outcome::Converged && !detector.budget_spent(round) {
                    // The idle round confirming the fixed point counts.
                    rounds = round + 1;
                    debug!("Round {} of task {}: nothing left to do", rounds, task);
                } else if outcome == Outcome::Exhausted {
                    debug!("Round budget spent with {:?} still pending", pending);
                }
                break outcome;
            }
        };

        info!(
            "Run {} for task {} finished: {:?} after {} round(s), {} error(s)",
            run_id,
            task,
            outcome,
            rounds,
            errors.len()
        );

        RunResult {
            task: task.to_string(),
            run_id,
            converged: outcome == Outcome::Converged,
            rounds,
            cycle_detected: outcome == Outcome::Cycled,
            outcome,
            errors,
            traces: self.env.summary(task).await,
        }
    }

    /// Run with a single seed `{bootstrap_type: {"goal": goal}}`.
    pub async fn run_goal(&self, task: &str, goal: &str, options: RunOptions) -> RunResult {
        let mut seed = TraceData::new();
        seed.insert("goal".to_string(), Value::String(goal.to_string()));

        let mut initial = HashMap::new();
        initial.insert(self.config.bootstrap_type.clone(), seed);
        self.run(task, initial, options).await
    }

    /// Strongest live data of a type.
    pub async fn result(&self, task: &str, trace_type: &str) -> Option<SharedData> {
        self.env.strongest_data(task, trace_type).await
    }

    /// Strongest live data of several types; absent types map to `None`.
    pub async fn results(
        &self,
        task: &str,
        trace_types: &[&str],
    ) -> HashMap<TraceType, Option<SharedData>> {
        let mut results = HashMap::with_capacity(trace_types.len());
        for trace_type in trace_types {
            results.insert(trace_type.to_string(), self.result(task, trace_type).await);
        }
        results
    }

    /// Agents that would fire if a round of `task` started now.
    pub async fn eligible(&self, task: &str) -> Vec<AgentName> {
        RoundExecutor::new(&self.env, task, &self.config.decay)
            .pending(&self.registry)
            .await
    }

    /// Drop every trace, error and invocation record of a task, and the
    /// task's run lock.
    ///
    /// Waits for a run of the task in progress to finish.
    pub async fn clear(&self, task: &str) {
        let lock = self.run_lock(task).await;
        let _guard = lock.lock().await;
        self.env.clear(task).await;

        // Keep the entry while other runs are queued on it.
        let mut locks = self.run_locks.lock().await;
        if locks.get(task).map_or(false, |l| Arc::strong_count(l) <= 2) {
            locks.remove(task);
        }
        debug!("Cleared task {}", task);
    }

    /// Deposit seeds that differ from what the task already holds, and
    /// return the task clock afterwards.
    async fn seed(&self, task: &str, initial_data: HashMap<TraceType, TraceData>) -> Round {
        let mut table = self.env.write().await;
        let round = table.task(task).map_or(0, |t| t.clock()) + 1;

        let mut seeds: Vec<_> = initial_data.into_iter().collect();
        seeds.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (trace_type, data) in seeds {
            let unchanged = table
                .task(task)
                .and_then(|t| t.strongest(&trace_type))
                .map_or(false, |t| *t.data == data);
            if unchanged {
                debug!("Seed [{}] unchanged for task {}, skipping", trace_type, task);
                continue;
            }
            table.deposit(task, &trace_type, Arc::new(data), USER_PRODUCER, round);
        }

        table.task(task).map_or(0, |t| t.clock())
    }

    async fn run_lock(&self, task: &str) -> Arc<Mutex<()>> {
        self.run_locks
            .lock()
            .await
            .entry(task.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl fmt::Debug for Collective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collective")
            .field("agents", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}

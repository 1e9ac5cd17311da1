//! Round execution: snapshot inputs, run eligible agents concurrently, then
//! commit everything they produced in one write.

use crate::agent::{Agent, AgentContext, AgentOutput, AgentRegistry, Effect};
use crate::config::DecayConfig;
use crate::engine::detector::{CommittedTrace, Fingerprint};
use crate::engine::resolver::{self, Trigger};
use crate::environment::{Environment, TraceFilter};
use crate::types::{AgentError, AgentName, Round, SharedData};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// An agent scheduled for a round, with its input snapshot.
#[derive(Debug)]
pub(crate) struct Invocation {
    pub agent: Agent,
    pub ctx: AgentContext,
    pub trigger: Trigger,
}

/// What a round did.
#[derive(Debug, Default)]
pub struct RoundOutcome {
    /// Every agent invoked, in name order, whether it succeeded or not
    pub executed: Vec<AgentName>,
    pub committed: Vec<CommittedTrace>,
    pub errors: Vec<AgentError>,
}

impl RoundOutcome {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.executed, &self.committed)
    }
}

/// Runs rounds of one task against an environment.
pub(crate) struct RoundExecutor<'a> {
    env: &'a Environment,
    task: &'a str,
    decay: &'a DecayConfig,
}

impl<'a> RoundExecutor<'a> {
    pub fn new(env: &'a Environment, task: &'a str, decay: &'a DecayConfig) -> Self {
        Self { env, task, decay }
    }

    /// Names of the agents that would fire if a round started now.
    pub async fn pending(&self, registry: &AgentRegistry) -> Vec<AgentName> {
        let table = self.env.read().await;
        resolver::eligible(registry, table.task(self.task))
            .into_iter()
            .map(|(agent, _)| agent.owned_name())
            .collect()
    }

    /// Resolve the eligible set and snapshot each agent's inputs.
    ///
    /// Everything is read under one lock acquisition, so all agents of the
    /// round see the same state.
    pub async fn plan(&self, registry: &AgentRegistry, round: Round) -> Vec<Invocation> {
        let table = self.env.read().await;
        let traces = table.task(self.task);

        resolver::eligible(registry, traces)
            .into_iter()
            .map(|(agent, trigger)| {
                let inputs: HashMap<_, SharedData> = agent
                    .spec()
                    .consumes()
                    .iter()
                    .filter_map(|ty| {
                        traces
                            .and_then(|t| t.strongest(ty))
                            .map(|t| (ty.clone(), t.data.clone()))
                    })
                    .collect();
                Invocation {
                    agent: agent.clone(),
                    ctx: AgentContext::new(self.task, round, inputs),
                    trigger,
                }
            })
            .collect()
    }

    /// Run every invocation concurrently and commit the results.
    ///
    /// No lock is held while agents run. Deposits, effects, the attempt
    /// ledger and decay are then applied under a single write lock.
    pub async fn execute(&self, invocations: Vec<Invocation>, round: Round) -> RoundOutcome {
        for inv in &invocations {
            debug!(
                "Round {} of {}: invoking {} ({})",
                round,
                self.task,
                inv.agent.name(),
                inv.trigger
            );
        }

        let results = join_all(invocations.into_iter().map(|inv| async move {
            let Invocation { agent, ctx, .. } = inv;
            let result = AssertUnwindSafe(agent.act(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload))));
            (agent, result)
        }))
        .await;

        let mut outcome = RoundOutcome::default();
        let mut effects: Vec<(AgentName, Vec<Effect>)> = Vec::new();
        let mut attempts: Vec<(AgentName, bool)> = Vec::new();

        let mut table = self.env.write().await;

        for (agent, result) in results {
            let name = agent.owned_name();
            outcome.executed.push(name.clone());

            match result {
                Ok(AgentOutput { data, effects: requested }) => {
                    let produces = agent.spec().produces();
                    let data = Arc::new(data);
                    let id = table.deposit(self.task, produces, data.clone(), &name, round);
                    debug!("{} committed {} [{}] in round {}", name, id, produces, round);

                    outcome.committed.push(CommittedTrace {
                        trace_type: produces.to_string(),
                        producer: name.clone(),
                        data,
                    });
                    if !requested.is_empty() {
                        effects.push((name.clone(), requested));
                    }
                    attempts.push((name, true));
                }
                Err(err) => {
                    let message = format!("{:#}", err);
                    warn!("Agent {} failed in round {}: {}", name, round, message);
                    outcome
                        .errors
                        .push(AgentError::new(self.task, name.clone(), message, round));
                    attempts.push((name, false));
                }
            }
        }

        let traces = table.task_mut(self.task);

        // Results arrive in name order, so effects apply in name order too.
        for (agent, requested) in effects {
            for effect in requested {
                match effect {
                    Effect::Invalidate(trace_type) => {
                        let count = traces.invalidate(&TraceFilter::by_type(trace_type.as_str()));
                        debug!("{} invalidated {} trace(s) of [{}]", agent, count, trace_type);
                    }
                    Effect::Reinforce { trace_type, amount } => {
                        match traces.reinforce(&trace_type, amount) {
                            Some(strength) => debug!(
                                "{} reinforced [{}] by {} (now {:.2})",
                                agent, trace_type, amount, strength
                            ),
                            None => debug!(
                                "{} reinforced [{}] but no live trace exists",
                                agent, trace_type
                            ),
                        }
                    }
                }
            }
        }

        for (agent, succeeded) in attempts {
            traces.record_attempt(&agent, round, succeeded);
        }
        for error in &outcome.errors {
            traces.record_error(error.clone());
        }

        traces.decay(self.decay, Some(round));
        trace!("Decayed live traces of {} after round {}", self.task, round);
        traces.advance_clock(round);

        outcome
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("agent panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("agent panicked: {}", msg)
    } else {
        "agent panicked".to_string()
    }
}

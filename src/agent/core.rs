//! Agent behaviour: the context an agent sees, what it returns, and the
//! async trait user code implements.

use crate::agent::spec::AgentSpec;
use crate::types::{AgentName, Round, SharedData, TaskId, TraceData, TraceType};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Inputs of one agent invocation: the strongest data of every consumed
/// type, as of the start of the round.
#[derive(Debug, Clone)]
pub struct AgentContext {
    task: TaskId,
    round: Round,
    inputs: HashMap<TraceType, SharedData>,
}

impl AgentContext {
    pub fn new(
        task: impl Into<TaskId>,
        round: Round,
        inputs: HashMap<TraceType, SharedData>,
    ) -> Self {
        Self {
            task: task.into(),
            round,
            inputs,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Round (task clock) this invocation runs in.
    pub fn round(&self) -> Round {
        self.round
    }

    pub fn get(&self, trace_type: &str) -> Option<&TraceData> {
        self.inputs.get(trace_type).map(|d| d.as_ref())
    }

    /// Single field of a consumed payload.
    pub fn field(&self, trace_type: &str, key: &str) -> Option<&Value> {
        self.get(trace_type).and_then(|d| d.get(key))
    }

    /// Like [`get`](Self::get), but an error for agents that want to bail.
    pub fn require(&self, trace_type: &str) -> Result<&TraceData> {
        self.get(trace_type)
            .ok_or_else(|| anyhow!("missing input trace {:?}", trace_type))
    }

    pub fn inputs(&self) -> &HashMap<TraceType, SharedData> {
        &self.inputs
    }
}

/// Changes an agent asks for, applied when its round commits.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Invalidate every trace of a type
    Invalidate(TraceType),
    /// Add to the strength of the strongest trace of a type
    Reinforce { trace_type: TraceType, amount: f64 },
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub data: TraceData,
    pub effects: Vec<Effect>,
}

impl AgentOutput {
    pub fn new(data: TraceData) -> Self {
        Self {
            data,
            effects: Vec::new(),
        }
    }

    /// Request invalidation of `trace_type` at commit.
    pub fn invalidate(mut self, trace_type: impl Into<TraceType>) -> Self {
        self.effects.push(Effect::Invalidate(trace_type.into()));
        self
    }

    /// Request reinforcement (or, with a negative amount, penalty) at commit.
    pub fn reinforce(mut self, trace_type: impl Into<TraceType>, amount: f64) -> Self {
        self.effects.push(Effect::Reinforce {
            trace_type: trace_type.into(),
            amount,
        });
        self
    }
}

impl From<TraceData> for AgentOutput {
    fn from(data: TraceData) -> Self {
        Self::new(data)
    }
}

impl From<Value> for AgentOutput {
    /// Objects are kept as is; any other value is wrapped as `{"result": value}`.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            other => {
                let mut map = TraceData::new();
                map.insert("result".to_string(), other);
                Self::new(map)
            }
        }
    }
}

/// User-supplied computation behind an agent.
///
/// Implementations must be safe to invoke again: the engine re-fires an
/// agent whenever its inputs are refreshed.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn act(&self, ctx: AgentContext) -> Result<AgentOutput>;
}

/// Adapts an async closure into an [`AgentHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, O> AgentHandler for FnHandler<F>
where
    F: Fn(AgentContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Into<AgentOutput> + 'static,
{
    async fn act(&self, ctx: AgentContext) -> Result<AgentOutput> {
        (self.f)(ctx).await.map(Into::into)
    }
}

/// A registered unit of work: descriptor plus behaviour.
#[derive(Clone)]
pub struct Agent {
    spec: Arc<AgentSpec>,
    handler: Arc<dyn AgentHandler>,
}

impl Agent {
    pub fn new(spec: AgentSpec, handler: impl AgentHandler + 'static) -> Self {
        Self {
            spec: Arc::new(spec),
            handler: Arc::new(handler),
        }
    }

    /// Build an agent from an async closure.
    ///
    /// ```ignore
    /// let analyzer = Agent::from_fn(
    ///     AgentSpec::new("analyzer", ["goal"], "analysis"),
    ///     |ctx| async move {
    ///         let goal = ctx.field("goal", "goal").cloned().unwrap_or_default();
    ///         Ok::<_, anyhow::Error>(json!({ "analysis": format!("Analyzed: {}", goal) }))
    ///     },
    /// );
    /// ```
    pub fn from_fn<F, Fut, O>(spec: AgentSpec, f: F) -> Self
    where
        F: Fn(AgentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Into<AgentOutput> + 'static,
    {
        Self::new(spec, FnHandler { f })
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub(crate) fn owned_name(&self) -> AgentName {
        self.spec.name().to_string()
    }

    pub async fn act(&self, ctx: AgentContext) -> Result<AgentOutput> {
        self.handler.act(ctx).await
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("spec", &self.spec).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> AgentContext {
        let mut inputs = HashMap::new();
        inputs.insert(
            "goal".to_string(),
            Arc::new(json!({"goal": "Build an API"}).as_object().cloned().unwrap()),
        );
        AgentContext::new("task", 1, inputs)
    }

    #[test]
    fn test_context_accessors() {
        let ctx = context();
        assert_eq!(ctx.task(), "task");
        assert_eq!(ctx.round(), 1);
        assert_eq!(ctx.field("goal", "goal"), Some(&json!("Build an API")));
        assert!(ctx.get("plan").is_none());
        assert!(ctx.require("plan").is_err());
    }

    #[test]
    fn test_non_object_output_is_wrapped() {
        let output = AgentOutput::from(json!(42));
        assert_eq!(output.data["result"], 42);

        let output = AgentOutput::from(json!({"plan": "x"}));
        assert_eq!(output.data["plan"], "x");
        assert!(!output.data.contains_key("result"));
    }

    #[test]
    fn test_output_effects() {
        let output = AgentOutput::default()
            .invalidate("code")
            .reinforce("review", -0.5);

        assert_eq!(
            output.effects,
            vec![
                Effect::Invalidate("code".to_string()),
                Effect::Reinforce {
                    trace_type: "review".to_string(),
                    amount: -0.5
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_from_fn_agent() {
        let agent = Agent::from_fn(AgentSpec::new("echo", ["goal"], "echo"), |ctx| async move {
            let goal = ctx.require("goal")?.clone();
            Ok::<_, anyhow::Error>(goal)
        });

        assert_eq!(agent.name(), "echo");
        let output = agent.act(context()).await.unwrap();
        assert_eq!(output.data["goal"], "Build an API");
    }

    #[tokio::test]
    async fn test_failing_agent() {
        let agent = Agent::from_fn(AgentSpec::new("broken", ["goal"], "x"), |_ctx| async move {
            Err::<Value, anyhow::Error>(anyhow!("model unavailable"))
        });

        let err = agent.act(context()).await.unwrap_err();
        assert_eq!(err.to_string(), "model unavailable");
    }
}

//! Agent descriptors.

use crate::types::{AgentName, CollectiveError, Result, TraceType};
use serde::{Deserialize, Serialize};

/// Immutable description of what an agent reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    name: AgentName,
    consumes: Vec<TraceType>,
    produces: TraceType,
    #[serde(default)]
    run_once: bool,
}

impl AgentSpec {
    /// Describe an agent. Duplicate input types are collapsed, keeping the
    /// first occurrence.
    pub fn new<I, S>(
        name: impl Into<AgentName>,
        consumes: I,
        produces: impl Into<TraceType>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TraceType>,
    {
        let mut types: Vec<TraceType> = Vec::new();
        for t in consumes {
            let t = t.into();
            if !types.contains(&t) {
                types.push(t);
            }
        }

        Self {
            name: name.into(),
            consumes: types,
            produces: produces.into(),
            run_once: false,
        }
    }

    /// Fire at most once per task, no matter how often inputs change.
    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn consumes(&self) -> &[TraceType] {
        &self.consumes
    }

    pub fn produces(&self) -> &str {
        &self.produces
    }

    pub fn is_run_once(&self) -> bool {
        self.run_once
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CollectiveError::InvalidAgent(
                "agent name must not be empty".to_string(),
            ));
        }
        if self.produces.trim().is_empty() {
            return Err(CollectiveError::InvalidAgent(format!(
                "agent {} must produce a trace type",
                self.name
            )));
        }
        if let Some(empty) = self.consumes.iter().find(|t| t.trim().is_empty()) {
            return Err(CollectiveError::InvalidAgent(format!(
                "agent {} consumes an empty trace type {:?}",
                self.name, empty
            )));
        }
        Ok(())
    }
}

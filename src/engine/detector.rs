//! Termination detection: convergence, oscillation, or budget exhaustion.

use crate::types::{AgentName, SharedData, TraceType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No agent had work left
    Converged,
    /// A round repeated an earlier round exactly
    Cycled,
    /// The round budget ran out with work still pending
    Exhausted,
}

/// Detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Finished(Outcome),
}

/// A trace committed during a round, as seen by the fingerprint.
#[derive(Debug, Clone)]
pub struct CommittedTrace {
    pub trace_type: TraceType,
    pub producer: AgentName,
    pub data: SharedData,
}

/// Digest of what a round did: which agents ran and what they wrote.
///
/// Strength and round numbers are left out, so two rounds that re-derive the
/// same outputs from the same agents collide.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(agents: &[AgentName], committed: &[CommittedTrace]) -> Self {
        let mut agents: Vec<&str> = agents.iter().map(String::as_str).collect();
        agents.sort_unstable();

        let mut committed: Vec<&CommittedTrace> = committed.iter().collect();
        committed.sort_by(|a, b| {
            (&a.trace_type, &a.producer).cmp(&(&b.trace_type, &b.producer))
        });

        let mut hasher = blake3::Hasher::new();
        for name in agents {
            hasher.update(name.as_bytes());
            hasher.update(&[0u8]);
        }
        hasher.update(&[0xffu8]);
        for trace in committed {
            hasher.update(trace.trace_type.as_bytes());
            hasher.update(&[0u8]);
            hasher.update(trace.producer.as_bytes());
            hasher.update(&[0u8]);
            // Map keys are ordered, so the encoding is canonical. Writing into
            // a hasher cannot fail.
            let _ = serde_json::to_writer(&mut hasher, trace.data.as_ref());
            hasher.update(&[0u8]);
        }

        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// Round-by-round classifier for a single run.
#[derive(Debug)]
pub struct Detector {
    max_rounds: usize,
    history: VecDeque<Fingerprint>,
    max_history: Option<usize>,
    stop_on_cycle: bool,
    state: RunState,
}

impl Detector {
    pub fn new(max_rounds: usize, max_history: Option<usize>, stop_on_cycle: bool) -> Self {
        Self {
            max_rounds,
            history: VecDeque::new(),
            max_history,
            stop_on_cycle,
            state: RunState::Running,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Whether every round of the budget has been used.
    pub fn budget_spent(&self, rounds: usize) -> bool {
        rounds >= self.max_rounds
    }

    /// Called at the start of a round with the size of its eligible set.
    pub fn on_eligible(&mut self, eligible: usize) -> Option<Outcome> {
        if eligible == 0 {
            return Some(self.finish(Outcome::Converged));
        }
        None
    }

    /// Called after round `round` committed, with the size of the eligible
    /// set of the next round.
    ///
    /// An empty eligible set is a fixed point even when the round matches
    /// an earlier one; only then is the fingerprint compared, and only then
    /// the budget.
    pub fn after_round(
        &mut self,
        round: usize,
        pending: usize,
        fingerprint: Fingerprint,
    ) -> Option<Outcome> {
        if pending == 0 {
            return Some(self.finish(Outcome::Converged));
        }
        if let Some(outcome) = self.on_commit(round, fingerprint) {
            return Some(outcome);
        }
        if self.budget_spent(round) {
            return Some(self.finish(Outcome::Exhausted));
        }
        None
    }

    /// Record a round fingerprint; `Cycled` if it was seen before.
    pub fn on_commit(&mut self, round: usize, fingerprint: Fingerprint) -> Option<Outcome> {
        if self.stop_on_cycle && self.history.contains(&fingerprint) {
            warn!("Round {} repeated an earlier round ({:?})", round, fingerprint);
            return Some(self.finish(Outcome::Cycled));
        }

        self.history.push_back(fingerprint);
        if let Some(max) = self.max_history {
            while self.history.len() > max {
                self.history.pop_front();
            }
        }
        None
    }

    /// Called when a run starts with no budget, with the size of the
    /// eligible set.
    pub fn on_budget_spent(&mut self, eligible: usize) -> Outcome {
        if eligible == 0 {
            self.finish(Outcome::Converged)
        } else {
            self.finish(Outcome::Exhausted)
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.state = RunState::Finished(outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn committed(ty: &str, producer: &str, value: serde_json::Value) -> CommittedTrace {
        CommittedTrace {
            trace_type: ty.to_string(),
            producer: producer.to_string(),
            data: Arc::new(value.as_object().cloned().unwrap()),
        }
    }

    fn names(list: &[&str]) -> Vec<AgentName> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        let a = Fingerprint::compute(
            &names(&["a", "b"]),
            &[committed("x", "a", json!({"v": 1})), committed("y", "b", json!({"v": 2}))],
        );
        let b = Fingerprint::compute(
            &names(&["b", "a"]),
            &[committed("y", "b", json!({"v": 2})), committed("x", "a", json!({"v": 1}))],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_sees_content() {
        let a = Fingerprint::compute(&names(&["a"]), &[committed("x", "a", json!({"v": 1}))]);
        let b = Fingerprint::compute(&names(&["a"]), &[committed("x", "a", json!({"v": 2}))]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_sees_agents() {
        let a = Fingerprint::compute(&names(&["a"]), &[]);
        let b = Fingerprint::compute(&names(&["b"]), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_converges_on_empty_eligible_set() {
        let mut detector = Detector::new(5, None, true);
        assert_eq!(detector.on_eligible(2), None);
        assert_eq!(detector.state(), RunState::Running);
        assert_eq!(detector.on_eligible(0), Some(Outcome::Converged));
        assert_eq!(detector.state(), RunState::Finished(Outcome::Converged));
    }

    #[test]
    fn test_repeated_fingerprint_cycles() {
        let mut detector = Detector::new(10, None, true);
        let fp = Fingerprint::compute(&names(&["a"]), &[]);
        let other = Fingerprint::compute(&names(&["b"]), &[]);

        assert_eq!(detector.on_commit(1, fp), None);
        assert_eq!(detector.on_commit(2, other), None);
        assert_eq!(detector.on_commit(3, fp), Some(Outcome::Cycled));
    }

    #[test]
    fn test_cycle_detection_can_be_disabled() {
        let mut detector = Detector::new(10, None, false);
        let fp = Fingerprint::compute(&names(&["a"]), &[]);

        assert_eq!(detector.on_commit(1, fp), None);
        assert_eq!(detector.on_commit(2, fp), None);
    }

    #[test]
    fn test_bounded_history_forgets_old_rounds() {
        let mut detector = Detector::new(10, Some(1), true);
        let fp = Fingerprint::compute(&names(&["a"]), &[]);
        let other = Fingerprint::compute(&names(&["b"]), &[]);

        detector.on_commit(1, fp);
        detector.on_commit(2, other);
        assert_eq!(detector.on_commit(3, fp), None);
    }

    #[test]
    fn test_fixed_point_wins_over_repeated_round() {
        let mut detector = Detector::new(10, None, true);
        let fp = Fingerprint::compute(&names(&["a"]), &[]);
        let other = Fingerprint::compute(&names(&["b"]), &[]);

        assert_eq!(detector.after_round(1, 1, fp), None);
        assert_eq!(detector.after_round(2, 1, other), None);
        assert_eq!(detector.after_round(3, 0, fp), Some(Outcome::Converged));
        assert_eq!(detector.state(), RunState::Finished(Outcome::Converged));
    }

    #[test]
    fn test_after_round_cycles_then_exhausts() {
        let fp = Fingerprint::compute(&names(&["a"]), &[]);
        let other = Fingerprint::compute(&names(&["b"]), &[]);

        let mut detector = Detector::new(10, None, true);
        assert_eq!(detector.after_round(1, 2, fp), None);
        assert_eq!(detector.after_round(2, 2, fp), Some(Outcome::Cycled));

        let mut detector = Detector::new(2, None, true);
        assert_eq!(detector.after_round(1, 1, fp), None);
        assert_eq!(detector.after_round(2, 1, other), Some(Outcome::Exhausted));

        let mut detector = Detector::new(2, None, true);
        detector.after_round(1, 1, fp);
        assert_eq!(detector.after_round(2, 0, other), Some(Outcome::Converged));
    }

    #[test]
    fn test_budget() {
        let mut detector = Detector::new(2, None, true);
        assert!(!detector.budget_spent(1));
        assert!(detector.budget_spent(2));
        assert_eq!(detector.on_budget_spent(1), Outcome::Exhausted);

        let mut detector = Detector::new(2, None, true);
        assert_eq!(detector.on_budget_spent(0), Outcome::Converged);
    }
}

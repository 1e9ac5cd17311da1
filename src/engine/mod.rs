//! The round engine: who runs, how a round is executed, and when to stop.

pub mod detector;
pub mod executor;
pub mod resolver;

pub use detector::{CommittedTrace, Detector, Fingerprint, Outcome, RunState};
pub use executor::RoundOutcome;
pub use resolver::Trigger;

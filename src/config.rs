//! Collective configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! initial_strength = 1.0
//! default_max_rounds = 10
//! bootstrap_type = "goal"
//!
//! [decay]
//! default_rate = 0.9
//!
//! [decay.rates]
//! goal = 1.0        # never decays
//! analysis = 0.5
//! ```

use crate::types::{CollectiveError, Result, TraceType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Strength of a freshly deposited trace.
pub const DEFAULT_INITIAL_STRENGTH: f64 = 1.0;

/// Per-round decay factor for types without an override.
pub const DEFAULT_DECAY_RATE: f64 = 0.9;

/// Default round budget for a run.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Type seeded by [`Collective::run_goal`](crate::Collective::run_goal).
pub const DEFAULT_BOOTSTRAP_TYPE: &str = "goal";

/// Multiplicative decay factors applied to live traces at each round boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Factor in [0, 1] used for types absent from `rates`
    pub default_rate: f64,

    /// Per-type overrides; 1.0 disables decay for that type
    pub rates: HashMap<TraceType, f64>,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            default_rate: DEFAULT_DECAY_RATE,
            rates: HashMap::new(),
        }
    }
}

impl DecayConfig {
    /// Set the override for one type.
    pub fn with_rate(mut self, trace_type: impl Into<TraceType>, rate: f64) -> Self {
        self.rates.insert(trace_type.into(), rate);
        self
    }

    /// Factor applied to traces of `trace_type`.
    pub fn rate_for(&self, trace_type: &str) -> f64 {
        self.rates
            .get(trace_type)
            .copied()
            .unwrap_or(self.default_rate)
    }

    pub fn validate(&self) -> Result<()> {
        check_rate("decay.default_rate", self.default_rate)?;
        for (trace_type, rate) in &self.rates {
            check_rate(&format!("decay.rates.{}", trace_type), *rate)?;
        }
        Ok(())
    }
}

fn check_rate(field: &str, rate: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(CollectiveError::InvalidConfig(format!(
            "{} must be within [0, 1], got {}",
            field, rate
        )));
    }
    Ok(())
}

/// Configuration for a [`Collective`](crate::Collective).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectiveConfig {
    /// Strength assigned to every new trace
    pub initial_strength: f64,

    pub decay: DecayConfig,

    /// Round budget used by `RunOptions::default()`
    pub default_max_rounds: usize,

    /// Trace type seeded by `run_goal`
    pub bootstrap_type: TraceType,

    /// Number of past round fingerprints kept for cycle detection (None = all)
    pub max_cycle_history: Option<usize>,

    /// Terminate a run when a round fingerprint repeats
    pub stop_on_cycle: bool,
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            initial_strength: DEFAULT_INITIAL_STRENGTH,
            decay: DecayConfig::default(),
            default_max_rounds: DEFAULT_MAX_ROUNDS,
            bootstrap_type: DEFAULT_BOOTSTRAP_TYPE.to_string(),
            max_cycle_history: None,
            stop_on_cycle: true,
        }
    }
}

impl CollectiveConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn with_decay(mut self, decay: DecayConfig) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_initial_strength(mut self, strength: f64) -> Self {
        self.initial_strength = strength;
        self
    }

    pub fn with_max_cycle_history(mut self, history: usize) -> Self {
        self.max_cycle_history = Some(history);
        self
    }

    pub fn with_stop_on_cycle(mut self, stop: bool) -> Self {
        self.stop_on_cycle = stop;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_strength.is_finite() || self.initial_strength < 0.0 {
            return Err(CollectiveError::InvalidConfig(format!(
                "initial_strength must be a non-negative number, got {}",
                self.initial_strength
            )));
        }
        if self.bootstrap_type.trim().is_empty() {
            return Err(CollectiveError::InvalidConfig(
                "bootstrap_type must not be empty".to_string(),
            ));
        }
        if self.max_cycle_history == Some(0) {
            return Err(CollectiveError::InvalidConfig(
                "max_cycle_history must be at least 1".to_string(),
            ));
        }
        self.decay.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CollectiveConfig::default();
        assert_eq!(config.initial_strength, 1.0);
        assert_eq!(config.decay.default_rate, 0.9);
        assert_eq!(config.bootstrap_type, "goal");
        assert!(config.stop_on_cycle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = CollectiveConfig::from_toml_str("").unwrap();
        assert_eq!(config, CollectiveConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = CollectiveConfig::from_toml_str(
            r#"
            default_max_rounds = 4
            max_cycle_history = 3

            [decay]
            default_rate = 0.8

            [decay.rates]
            goal = 1.0
            "#,
        )
        .unwrap();

        assert_eq!(config.default_max_rounds, 4);
        assert_eq!(config.max_cycle_history, Some(3));
        assert_eq!(config.decay.rate_for("goal"), 1.0);
        assert_eq!(config.decay.rate_for("analysis"), 0.8);
    }

    #[test]
    fn test_rejects_rate_above_one() {
        let err = CollectiveConfig::from_toml_str("[decay.rates]\nplan = 1.5\n").unwrap_err();
        assert!(matches!(err, CollectiveError::InvalidConfig(_)));
        assert!(err.to_string().contains("decay.rates.plan"));
    }

    #[test]
    fn test_rejects_negative_initial_strength() {
        let config = CollectiveConfig::default().with_initial_strength(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = CollectiveConfig::from_toml_str("decay = [").unwrap_err();
        assert!(matches!(err, CollectiveError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bootstrap_type = \"brief\"").unwrap();

        let config = CollectiveConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bootstrap_type, "brief");
    }
}

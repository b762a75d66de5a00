//! Engine configuration from environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `FABLINE_MAX_TX_RETRIES` | `5` |
//! | `FABLINE_PIECE_ASSEMBLY_FORWARDING` | `unresolved` (or `forward`) |
//! | `FABLINE_LOG_FORMAT` | `json` (or `pretty`, `compact`) |
//!
//! Unparsable values fall back to the default with a warning.

use core::fmt::Display;
use core::str::FromStr;

use tracing::warn;

use fabline_observability::LogFormat;
use fabline_production::{EdgeDecision, WorkflowPolicy};

pub const MAX_TX_RETRIES_VAR: &str = "FABLINE_MAX_TX_RETRIES";
pub const PIECE_ASSEMBLY_FORWARDING_VAR: &str = "FABLINE_PIECE_ASSEMBLY_FORWARDING";
pub const LOG_FORMAT_VAR: &str = "FABLINE_LOG_FORMAT";

const DEFAULT_MAX_TX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Optimistic-concurrency retries per handler body.
    pub max_tx_retries: u32,
    pub policy: WorkflowPolicy,
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tx_retries: DEFAULT_MAX_TX_RETRIES,
            policy: WorkflowPolicy::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_tx_retries: parse_or(&lookup, MAX_TX_RETRIES_VAR, defaults.max_tx_retries),
            policy: WorkflowPolicy {
                piece_assembly_forwarding: parse_or(
                    &lookup,
                    PIECE_ASSEMBLY_FORWARDING_VAR,
                    EdgeDecision::default(),
                ),
            },
            log_format: parse_or(&lookup, LOG_FORMAT_VAR, defaults.log_format),
        }
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_tx_retries(mut self, retries: u32) -> Self {
        self.max_tx_retries = retries;
        self
    }

    /// Install the process-wide subscriber in the configured format.
    pub fn init_logging(&self) {
        fabline_observability::init_with(self.log_format);
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + core::fmt::Debug,
    T::Err: Display,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|err| {
            warn!(variable = name, value = %raw, error = %err, fallback = ?default, "invalid configuration value");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(EngineConfig::from_lookup(lookup(&[])), EngineConfig::default());
        assert_eq!(EngineConfig::default().max_tx_retries, 5);
        assert_eq!(
            EngineConfig::default().policy.piece_assembly_forwarding,
            EdgeDecision::Unresolved
        );
    }

    #[test]
    fn values_are_read_from_the_environment_source() {
        let config = EngineConfig::from_lookup(lookup(&[
            (MAX_TX_RETRIES_VAR, "9"),
            (PIECE_ASSEMBLY_FORWARDING_VAR, "Forward"),
            (LOG_FORMAT_VAR, "pretty"),
        ]));
        assert_eq!(config.max_tx_retries, 9);
        assert_eq!(config.policy.piece_assembly_forwarding, EdgeDecision::Forward);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            (MAX_TX_RETRIES_VAR, "-1"),
            (PIECE_ASSEMBLY_FORWARDING_VAR, "sometimes"),
            (LOG_FORMAT_VAR, "xml"),
        ]));
        assert_eq!(config, EngineConfig::default());
    }
}

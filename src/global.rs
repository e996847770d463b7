use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Environment variable holding the global timeout in milliseconds (0 = unset)
pub const GLOBAL_TIMEOUT_MILLIS_ENV: &str = "DEADLINE_GUARD_GLOBAL_TIMEOUT_MILLIS";

/// Environment variable selecting how the global timeout meets a local one
pub const GLOBAL_TIMEOUT_STRATEGY_ENV: &str = "DEADLINE_GUARD_GLOBAL_TIMEOUT_STRATEGY";

/// How a global timeout is reconciled with a policy's own timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideStrategy {
    /// The global timeout wins whenever it is shorter than the local one
    #[default]
    OverrideIfShorter,

    /// The local timeout always wins
    NeverOverride,
}

impl OverrideStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OverrideIfShorter => "override_if_shorter",
            Self::NeverOverride => "never_override",
        }
    }
}

impl FromStr for OverrideStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "override_if_shorter" => Ok(Self::OverrideIfShorter),
            "never_override" => Ok(Self::NeverOverride),
            _ => Err(ConfigError::InvalidStrategy {
                key: GLOBAL_TIMEOUT_STRATEGY_ENV,
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for OverrideStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide timeout ceiling
///
/// Read once, then passed explicitly to
/// [`resolve_against_global`](crate::resolve_against_global).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlobalOverride {
    /// Global timeout in milliseconds (0 = unset)
    #[serde(default)]
    pub threshold_millis: u64,
    #[serde(default)]
    pub strategy: OverrideStrategy,
}

impl GlobalOverride {
    pub fn new(threshold_millis: u64, strategy: OverrideStrategy) -> Self {
        Self {
            threshold_millis,
            strategy,
        }
    }

    /// Returns true if a global threshold is configured
    pub fn is_set(&self) -> bool {
        self.threshold_millis > 0
    }

    /// Read the override from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the override from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let threshold_millis = match lookup(GLOBAL_TIMEOUT_MILLIS_ENV)
            .filter(|value| !value.trim().is_empty())
        {
            Some(value) => {
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidThreshold {
                        key: GLOBAL_TIMEOUT_MILLIS_ENV,
                        value,
                    })?
            }
            None => 0,
        };

        let strategy = match lookup(GLOBAL_TIMEOUT_STRATEGY_ENV)
            .filter(|value| !value.trim().is_empty())
        {
            Some(value) => value.parse()?,
            None => OverrideStrategy::default(),
        };

        tracing::debug!(
            threshold_millis,
            strategy = %strategy,
            "resolved global timeout override"
        );

        Ok(Self {
            threshold_millis,
            strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_is_unset() {
        let global = GlobalOverride::from_lookup(lookup(&[])).expect("valid config");
        assert_eq!(global, GlobalOverride::default());
        assert!(!global.is_set());
        assert_eq!(global.strategy, OverrideStrategy::OverrideIfShorter);
    }

    #[test]
    fn reads_threshold_and_strategy() {
        let global = GlobalOverride::from_lookup(lookup(&[
            (GLOBAL_TIMEOUT_MILLIS_ENV, " 50 "),
            (GLOBAL_TIMEOUT_STRATEGY_ENV, "NEVER-OVERRIDE"),
        ]))
        .expect("valid config");
        assert_eq!(global, GlobalOverride::new(50, OverrideStrategy::NeverOverride));
    }

    #[test]
    fn rejects_bad_threshold() {
        let err = GlobalOverride::from_lookup(lookup(&[(GLOBAL_TIMEOUT_MILLIS_ENV, "-5")]))
            .expect_err("negative threshold");
        assert_eq!(
            err,
            ConfigError::InvalidThreshold {
                key: GLOBAL_TIMEOUT_MILLIS_ENV,
                value: "-5".to_string(),
            }
        );
    }

    #[test]
    fn rejects_bad_strategy() {
        let err = GlobalOverride::from_lookup(lookup(&[(GLOBAL_TIMEOUT_STRATEGY_ENV, "sometimes")]))
            .expect_err("unknown strategy");
        assert!(err.to_string().contains("sometimes"));
    }

    #[test]
    fn strategy_round_trips_through_display() {
        for strategy in [OverrideStrategy::OverrideIfShorter, OverrideStrategy::NeverOverride] {
            assert_eq!(strategy.to_string().parse::<OverrideStrategy>(), Ok(strategy));
        }
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::comparison::{ComparisonConfig, MatchPolicy};

/// Tunables of a verification run. Every field has a default, so partial configuration files
/// are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub timeouts: TimeoutConfig,
    pub policy: MatchPolicy,
    pub comparison: ComparisonConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub fetch_secs: u64,
    pub compile_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { fetch_secs: 60, compile_secs: 300 }
    }
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn compile(&self) -> Duration {
        Duration::from_secs(self.compile_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let raw = r#"{"timeouts": {"compile_secs": 10}, "policy": {"accept_near_perfect": false}}"#;
        let config: PipelineConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.timeouts.fetch(), Duration::from_secs(60));
        assert_eq!(config.timeouts.compile(), Duration::from_secs(10));
        assert!(!config.policy.accept_near_perfect);
        assert_eq!(config.policy.near_perfect, 99.9);
        assert_eq!(config.comparison, ComparisonConfig::default());
    }
}

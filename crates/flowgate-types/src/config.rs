//! Engine configuration types for Flowgate.
//!
//! `EngineConfig` represents the top-level `config.toml` that bounds the
//! hierarchy walk and subworkflow nesting and carries per-step SLA budgets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
///
/// Loaded from `~/.flowgate/config.toml`. All fields have defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deepest manager level a role token may request.
    #[serde(default = "default_max_manager_depth")]
    pub max_manager_depth: u32,

    /// Deepest subworkflow nesting accepted when loading a definition.
    #[serde(default = "default_max_subworkflow_depth")]
    pub max_subworkflow_depth: u32,

    /// SLA minutes per service and step: `[sla.purchase-order] manager = 1440`.
    #[serde(default)]
    pub sla: HashMap<String, HashMap<String, u32>>,
}

fn default_max_manager_depth() -> u32 {
    10
}

fn default_max_subworkflow_depth() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_manager_depth: default_max_manager_depth(),
            max_subworkflow_depth: default_max_subworkflow_depth(),
            sla: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Configured SLA minutes for a step, if any.
    pub fn sla_minutes(&self, service_key: &str, step_key: &str) -> Option<u32> {
        self.sla.get(service_key)?.get(step_key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_manager_depth, 10);
        assert_eq!(config.max_subworkflow_depth, 5);
        assert!(config.sla.is_empty());
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_manager_depth, 10);
        assert_eq!(config.max_subworkflow_depth, 5);
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
max_manager_depth = 4

[sla.purchase-order]
manager = 1440
finance = 60

[sla.it-access]
security = 30
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_manager_depth, 4);
        assert_eq!(config.max_subworkflow_depth, 5);
        assert_eq!(config.sla_minutes("purchase-order", "manager"), Some(1440));
        assert_eq!(config.sla_minutes("purchase-order", "finance"), Some(60));
        assert_eq!(config.sla_minutes("it-access", "security"), Some(30));
        assert_eq!(config.sla_minutes("it-access", "manager"), None);
        assert_eq!(config.sla_minutes("unknown", "manager"), None);
    }
}

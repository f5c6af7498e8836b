//! Static tool descriptors: which workload and service back each tool.
//!
//! The table is immutable once built and injected into the lifecycle manager.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use super::record::ToolVars;
use crate::types::{Error, Result};

/// Kind of workload object backing a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => f.write_str("deployment"),
            WorkloadKind::StatefulSet => f.write_str("statefulset"),
        }
    }
}

/// How to find a tool on a live cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub tool: String,
    pub workload_name: String,
    pub workload_kind: WorkloadKind,
    /// Service exposing the tool's UI through a node port, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// JSON Schema for the tool-specific settings in [`ToolVars`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_schema: Option<Value>,
}

impl ToolDescriptor {
    pub fn deployment(tool: &str, workload_name: &str) -> Self {
        Self {
            tool: tool.to_string(),
            workload_name: workload_name.to_string(),
            workload_kind: WorkloadKind::Deployment,
            service_name: None,
            settings_schema: None,
        }
    }

    pub fn stateful_set(tool: &str, workload_name: &str) -> Self {
        Self {
            workload_kind: WorkloadKind::StatefulSet,
            ..Self::deployment(tool, workload_name)
        }
    }

    pub fn with_service(mut self, service_name: &str) -> Self {
        self.service_name = Some(service_name.to_string());
        self
    }

    pub fn with_settings_schema(mut self, schema: Value) -> Self {
        self.settings_schema = Some(schema);
        self
    }

    /// Validate the tool-specific settings against the descriptor's schema.
    ///
    /// Tools without a schema accept any settings.
    pub fn validate_settings(&self, vars: &ToolVars) -> Result<()> {
        let Some(schema) = &self.settings_schema else {
            return Ok(());
        };
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            Error::internal(format!("invalid settings schema for {}: {}", self.tool, e))
        })?;

        let instance = Value::Object(vars.settings.clone());
        let errors: Vec<String> = validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "invalid settings for {}: {}",
                self.tool,
                errors.join("; ")
            )))
        }
    }
}

/// Immutable tool name → descriptor lookup.
#[derive(Debug, Clone)]
pub struct ToolDescriptorTable {
    entries: HashMap<String, ToolDescriptor>,
}

impl ToolDescriptorTable {
    /// Build a table from descriptors. Duplicate tool names are rejected.
    pub fn new(descriptors: impl IntoIterator<Item = ToolDescriptor>) -> Result<Self> {
        let mut entries = HashMap::new();
        for descriptor in descriptors {
            if descriptor.tool.is_empty() || descriptor.workload_name.is_empty() {
                return Err(Error::validation(
                    "tool descriptor needs a tool name and a workload name",
                ));
            }
            if entries.contains_key(&descriptor.tool) {
                return Err(Error::validation(format!(
                    "duplicate tool descriptor: {}",
                    descriptor.tool
                )));
            }
            entries.insert(descriptor.tool.clone(), descriptor);
        }
        Ok(Self { entries })
    }

    /// Descriptors for the add-on tools shipped with the platform.
    pub fn builtin() -> Self {
        let descriptors = [
            ToolDescriptor::deployment("registry", "docker-registry"),
            ToolDescriptor::deployment("chartmuseum", "chartmuseum-chartmuseum"),
            ToolDescriptor::deployment("kubepi", "kubepi").with_service("kubepi"),
            ToolDescriptor::deployment("kubeapps", "kubeapps"),
            ToolDescriptor::deployment("grafana", "grafana"),
            ToolDescriptor::deployment("prometheus", "prometheus-server")
                .with_service("prometheus-server"),
            ToolDescriptor::stateful_set("logging", "elasticsearch-master"),
            ToolDescriptor::stateful_set("loki", "loki"),
        ];
        Self {
            entries: descriptors
                .into_iter()
                .map(|d| (d.tool.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, tool: &str) -> Option<&ToolDescriptor> {
        self.entries.get(tool)
    }

    /// List all tool names, sorted.
    pub fn tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ToolDescriptorTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_table() {
        let table = ToolDescriptorTable::builtin();
        assert_eq!(table.len(), 8);

        let logging = table.get("logging").unwrap();
        assert_eq!(logging.workload_kind, WorkloadKind::StatefulSet);
        assert_eq!(logging.workload_name, "elasticsearch-master");

        let prometheus = table.get("prometheus").unwrap();
        assert_eq!(prometheus.service_name.as_deref(), Some("prometheus-server"));
        assert!(table.get("grafana").unwrap().service_name.is_none());
        assert!(table.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_descriptor_rejected() {
        let result = ToolDescriptorTable::new([
            ToolDescriptor::deployment("grafana", "grafana"),
            ToolDescriptor::deployment("grafana", "grafana-v2"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tools_sorted() {
        let table = ToolDescriptorTable::new([
            ToolDescriptor::deployment("zeta", "z"),
            ToolDescriptor::stateful_set("alpha", "a"),
        ])
        .unwrap();
        assert_eq!(table.tools(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_settings_without_schema_accept_anything() {
        let descriptor = ToolDescriptor::deployment("grafana", "grafana");
        let vars: ToolVars = serde_json::from_value(json!({"anything": [1, 2]})).unwrap();
        assert!(descriptor.validate_settings(&vars).is_ok());
    }

    #[test]
    fn test_settings_schema_validation() {
        let descriptor = ToolDescriptor::stateful_set("loki", "loki").with_settings_schema(json!({
            "type": "object",
            "properties": {
                "retention_days": {"type": "integer", "minimum": 1}
            },
            "additionalProperties": false
        }));

        let good: ToolVars =
            serde_json::from_value(json!({"namespace": "logs", "retention_days": 7})).unwrap();
        assert!(descriptor.validate_settings(&good).is_ok());

        let bad: ToolVars = serde_json::from_value(json!({"retention_days": "forever"})).unwrap();
        let err = descriptor.validate_settings(&bad).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("loki"));

        let unknown: ToolVars = serde_json::from_value(json!({"bogus": true})).unwrap();
        assert!(descriptor.validate_settings(&unknown).is_err());
    }
}

//! Status reconciliation: project observed workloads onto tool records.

use crate::cluster::WorkloadSnapshot;
use crate::tools::{ToolDescriptorTable, ToolRecord, ToolStatus};

/// Compute the record a sync should persist, or `None` if nothing changed.
///
/// - workload found and ready → `Running` in the workload's namespace
/// - workload found, no ready replicas → `Waiting` in the workload's namespace
/// - workload missing (or tool unknown to the table) → `Waiting`
pub fn reconcile(
    record: &ToolRecord,
    snapshot: &WorkloadSnapshot,
    descriptors: &ToolDescriptorTable,
) -> Option<ToolRecord> {
    let observed = descriptors
        .get(record.name.as_str())
        .and_then(|d| snapshot.find(d.workload_kind, &d.workload_name));

    let (status, namespace) = match observed {
        Some(workload) if workload.is_ready() => (ToolStatus::Running, Some(&workload.namespace)),
        Some(workload) => (ToolStatus::Waiting, Some(&workload.namespace)),
        None => (ToolStatus::Waiting, None),
    };

    let status_changed = record.status != status;
    let namespace_changed =
        namespace.is_some_and(|ns| record.vars.namespace.as_deref() != Some(ns.as_str()));
    if !status_changed && !namespace_changed {
        return None;
    }

    let mut updated = record.clone();
    if status_changed {
        updated.transition(status);
    }
    if let Some(ns) = namespace {
        updated.vars.namespace = Some(ns.clone());
    }
    updated.updated_at = chrono::Utc::now();
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ObservedWorkload;
    use crate::tools::ToolVars;
    use crate::types::{ClusterName, ToolName};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn record(tool: &str, status: ToolStatus, namespace: Option<&str>) -> ToolRecord {
        let mut r = ToolRecord::new(
            ClusterName::parse("prod").unwrap(),
            ToolName::parse(tool).unwrap(),
            "v1.0.0",
        );
        r.status = status;
        r.vars = ToolVars {
            namespace: namespace.map(str::to_string),
            ..Default::default()
        };
        r
    }

    fn snapshot_with(deployments: Vec<ObservedWorkload>) -> WorkloadSnapshot {
        WorkloadSnapshot {
            deployments,
            stateful_sets: vec![ObservedWorkload::new("loki", "logs", 1)],
        }
    }

    #[test]
    fn test_ready_workload_runs() {
        let r = record("grafana", ToolStatus::Initializing, Some("kube-operator"));
        let snapshot = snapshot_with(vec![ObservedWorkload::new("grafana", "monitoring", 2)]);

        let updated = reconcile(&r, &snapshot, &ToolDescriptorTable::builtin()).unwrap();
        assert_eq!(updated.status, ToolStatus::Running);
        assert_eq!(updated.vars.namespace.as_deref(), Some("monitoring"));
    }

    #[test]
    fn test_running_regresses_to_waiting() {
        let r = record("grafana", ToolStatus::Running, Some("monitoring"));
        let snapshot = snapshot_with(vec![ObservedWorkload::new("grafana", "monitoring", 0)]);

        let updated = reconcile(&r, &snapshot, &ToolDescriptorTable::builtin()).unwrap();
        assert_eq!(updated.status, ToolStatus::Waiting);
    }

    #[test]
    fn test_missing_workload_waits() {
        let r = record("kubeapps", ToolStatus::Running, None);
        let updated =
            reconcile(&r, &snapshot_with(vec![]), &ToolDescriptorTable::builtin()).unwrap();
        assert_eq!(updated.status, ToolStatus::Waiting);
        assert_eq!(updated.vars.namespace, None);
    }

    #[test]
    fn test_missing_workload_already_waiting_is_noop() {
        let r = record("kubeapps", ToolStatus::Waiting, None);
        assert_eq!(
            reconcile(&r, &snapshot_with(vec![]), &ToolDescriptorTable::builtin()),
            None
        );
    }

    #[test]
    fn test_stateful_set_lookup() {
        let r = record("loki", ToolStatus::Failed, Some("kube-operator"));
        let updated =
            reconcile(&r, &snapshot_with(vec![]), &ToolDescriptorTable::builtin()).unwrap();
        assert_eq!(updated.status, ToolStatus::Running);
        assert_eq!(updated.vars.namespace.as_deref(), Some("logs"));
        assert!(updated.message.is_empty());
    }

    #[test]
    fn test_unknown_tool_waits() {
        let r = record("homegrown", ToolStatus::Running, None);
        let updated =
            reconcile(&r, &snapshot_with(vec![]), &ToolDescriptorTable::builtin()).unwrap();
        assert_eq!(updated.status, ToolStatus::Waiting);
    }

    #[test]
    fn test_namespace_discovery_alone_is_a_change() {
        let r = record("grafana", ToolStatus::Running, Some("kube-operator"));
        let snapshot = snapshot_with(vec![ObservedWorkload::new("grafana", "monitoring", 1)]);

        let updated = reconcile(&r, &snapshot, &ToolDescriptorTable::builtin()).unwrap();
        assert_eq!(updated.status, ToolStatus::Running);
        assert_eq!(updated.vars.namespace.as_deref(), Some("monitoring"));
    }

    fn any_status() -> impl Strategy<Value = ToolStatus> {
        prop_oneof![
            Just(ToolStatus::Waiting),
            Just(ToolStatus::Initializing),
            Just(ToolStatus::Running),
            Just(ToolStatus::Upgrading),
            Just(ToolStatus::Terminating),
            Just(ToolStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn prop_status_follows_readiness(
            prior in any_status(),
            ready in 0i32..5,
            present in any::<bool>(),
        ) {
            let r = record("grafana", prior, None);
            let deployments = if present {
                vec![ObservedWorkload::new("grafana", "monitoring", ready)]
            } else {
                vec![]
            };
            let snapshot = snapshot_with(deployments);
            let table = ToolDescriptorTable::builtin();

            let after = reconcile(&r, &snapshot, &table).unwrap_or_else(|| r.clone());
            let expected = if present && ready > 0 {
                ToolStatus::Running
            } else {
                ToolStatus::Waiting
            };
            prop_assert_eq!(after.status, expected);

            // A second pass over the same snapshot never writes again.
            prop_assert!(reconcile(&after, &snapshot, &table).is_none());
        }
    }
}

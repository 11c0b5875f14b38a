use std::collections::BTreeMap;

pub const POD_ROLE_LABEL: &str = "syncplane.io/pod-role";
pub const WORKLOAD_ID_LABEL: &str = "syncplane.io/workload-id";
pub const MUTEX_KEY_LABEL: &str = "syncplane.io/mutex-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodRole {
    Orchestrator,
    Source,
    Destination,
}

impl PodRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodRole::Orchestrator => "orchestrator",
            PodRole::Source => "source",
            PodRole::Destination => "destination",
        }
    }
}

/// Label set for one pod of a replication attempt.
///
/// Caller pass-through labels are merged last: on a key collision they win
/// over the generated labels.
pub fn pod_labels(
    role: PodRole,
    workload_id: &str,
    mutex_key: Option<&str>,
    passthrough: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(POD_ROLE_LABEL.to_string(), role.as_str().to_string());
    labels.insert(WORKLOAD_ID_LABEL.to_string(), workload_id.to_string());
    if let Some(key) = mutex_key {
        labels.insert(MUTEX_KEY_LABEL.to_string(), key.to_string());
    }
    labels.extend(passthrough.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

/// Selector matching every pod of a workload, whatever its role.
pub fn workload_selector(workload_id: &str) -> String {
    format!("{WORKLOAD_ID_LABEL}={workload_id}")
}

pub fn role_selector(workload_id: &str, role: PodRole) -> String {
    format!(
        "{WORKLOAD_ID_LABEL}={workload_id},{POD_ROLE_LABEL}={}",
        role.as_str()
    )
}

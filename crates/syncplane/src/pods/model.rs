use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use uuid::Uuid;

/// Everything the launch engine needs to materialize one replication
/// attempt. Produced by the dataplane from a claimed workload's payload.
#[derive(Debug, Clone)]
pub struct ReplicationInput {
    pub workload_id: String,
    pub job_id: String,
    pub attempt_id: i64,
    pub connection_id: Uuid,
    pub workspace_id: Uuid,

    pub orchestrator_image: String,
    pub source_image: String,
    pub destination_image: String,

    pub uses_custom_connector: bool,
    pub network_security_tokens: Vec<String>,
    pub mutex_key: Option<String>,
    pub passthrough_labels: BTreeMap<String, String>,

    pub resources: PodResources,

    /// Config files staged into the orchestrator pod before the workers
    /// start, keyed by filename.
    pub file_map: BTreeMap<String, String>,
}

/// Quantities are kept as strings ("500m", "2Gi"): they come straight from
/// configuration and Kubernetes parses them server-side.
#[derive(Debug, Clone, Default)]
pub struct PodResources {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

impl PodResources {
    pub fn to_requirements(&self) -> Option<ResourceRequirements> {
        let mut requests = BTreeMap::new();
        if let Some(cpu) = &self.cpu_request {
            requests.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &self.memory_request {
            requests.insert("memory".to_string(), Quantity(memory.clone()));
        }

        let mut limits = BTreeMap::new();
        if let Some(cpu) = &self.cpu_limit {
            limits.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &self.memory_limit {
            limits.insert("memory".to_string(), Quantity(memory.clone()));
        }

        if requests.is_empty() && limits.is_empty() {
            return None;
        }

        Some(ResourceRequirements {
            requests: (!requests.is_empty()).then_some(requests),
            limits: (!limits.is_empty()).then_some(limits),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_resources_produce_no_requirements() {
        assert!(PodResources::default().to_requirements().is_none());
    }

    #[test]
    fn partial_resources_only_fill_what_was_given() {
        let resources = PodResources {
            cpu_request: Some("500m".into()),
            memory_limit: Some("2Gi".into()),
            ..Default::default()
        };

        let req = resources.to_requirements().unwrap();
        let requests = req.requests.unwrap();
        let limits = req.limits.unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("500m".into())));
        assert!(!requests.contains_key("memory"));
        assert_eq!(limits.get("memory"), Some(&Quantity("2Gi".into())));
        assert!(!limits.contains_key("cpu"));
    }
}

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use syncplane::pods::{KubeClient, KubeClientError};

/// In-memory stand-in for the cluster, with failure injection knobs for the
/// retry/metrics paths.
#[derive(Default)]
pub struct FakeKube {
    pods: Mutex<Vec<Pod>>,
    copied: Mutex<Vec<(String, String, BTreeMap<String, String>)>>,

    pub create_transport_failures: AtomicU32,
    pub create_always_fails: AtomicBool,
    pub list_always_transport: AtomicBool,
    pub delete_always_transport: AtomicBool,
    pub allow_node_list: AtomicBool,

    pub create_calls: AtomicU32,
}

impl FakeKube {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.allow_node_list.store(true, Ordering::SeqCst);
        fake
    }

    /// Pre-seed a pod, e.g. a worker the orchestrator "already started".
    pub fn seed_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.pods.lock().unwrap().clone()
    }

    pub fn copied(&self) -> Vec<(String, String, BTreeMap<String, String>)> {
        self.copied.lock().unwrap().clone()
    }

    pub fn pod_named(&self, name: &str) -> Option<Pod> {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.metadata.name.as_deref() == Some(name))
            .cloned()
    }
}

pub fn running_pod(name: &str, labels: &[(&str, &str)]) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
        phase: Some("Running".to_string()),
        ..Default::default()
    });
    pod
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    if selector.is_empty() {
        return true;
    }
    let empty = BTreeMap::new();
    let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
    selector.split(',').all(|pair| match pair.split_once('=') {
        Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
        None => false,
    })
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn create_pod(&self, mut pod: Pod) -> Result<Pod, KubeClientError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if self.create_always_fails.load(Ordering::SeqCst) {
            return Err(KubeClientError::Api {
                code: 422,
                message: "invalid pod spec".to_string(),
            });
        }
        if self
            .create_transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(KubeClientError::Transport("connection reset".to_string()));
        }

        // the fake cluster schedules instantly
        pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        });
        self.pods.lock().unwrap().push(pod.clone());
        Ok(pod)
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, KubeClientError> {
        Ok(self.pod_named(name))
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, KubeClientError> {
        if self.list_always_transport.load(Ordering::SeqCst) {
            return Err(KubeClientError::Transport("stream reset".to_string()));
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| matches_selector(p, label_selector))
            .cloned()
            .collect())
    }

    async fn delete_pods(&self, label_selector: &str) -> Result<u64, KubeClientError> {
        if self.delete_always_transport.load(Ordering::SeqCst) {
            return Err(KubeClientError::Transport("connection reset".to_string()));
        }

        let mut pods = self.pods.lock().unwrap();
        let before = pods.len();
        pods.retain(|p| {
            let terminal = matches!(
                p.status.as_ref().and_then(|s| s.phase.as_deref()),
                Some("Succeeded") | Some("Failed")
            );
            !matches_selector(p, label_selector) || terminal
        });
        Ok((before - pods.len()) as u64)
    }

    async fn copy_files_to_pod(
        &self,
        pod_name: &str,
        container: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<(), KubeClientError> {
        self.copied.lock().unwrap().push((
            pod_name.to_string(),
            container.to_string(),
            files.clone(),
        ));
        Ok(())
    }

    async fn list_network_policies(
        &self,
        _label_selector: &str,
    ) -> Result<Vec<NetworkPolicy>, KubeClientError> {
        Ok(Vec::new())
    }

    async fn can_list_nodes(&self) -> Result<bool, KubeClientError> {
        Ok(self.allow_node_list.load(Ordering::SeqCst))
    }

    async fn list_node_names(&self) -> Result<Vec<String>, KubeClientError> {
        if !self.allow_node_list.load(Ordering::SeqCst) {
            return Err(KubeClientError::PermissionDenied(
                "access review denied listing cluster nodes".to_string(),
            ));
        }
        Ok(vec!["node-a".to_string()])
    }
}

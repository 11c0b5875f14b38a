use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, Pod, PodSpec, Volume, VolumeMount,
};
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::flags::FlagContext;
use crate::metrics::MetricsClient;
use crate::pods::client::KubeClient;
use crate::pods::error::{is_transient, KubeClientError, PodInitError};
use crate::pods::labels::{pod_labels, role_selector, PodRole};
use crate::pods::model::ReplicationInput;
use crate::pods::naming::orchestrator_pod_name;
use crate::pods::network_security::NetworkSecurityLabeler;
use crate::pods::node_selection::NodeSelectorResolver;
use crate::pods::retry::{retry, RetryPolicy};

pub const KUBE_API_ERROR_METRIC: &str = "kube_api_error_total";

/// Directory inside the orchestrator pod where config files are staged.
pub const CONFIG_DIR: &str = "/config";
/// Marker written after the file map; the init container waits on it so the
/// orchestrator never starts against a half-staged config volume.
pub const STAGING_COMPLETE_MARKER: &str = "STAGING_COMPLETE";

const CONFIG_VOLUME: &str = "config";
const INIT_CONTAINER: &str = "init";
const MAIN_CONTAINER: &str = "orchestrator";

/// Low-level pod operations. Each call is wrapped in the retry policy with
/// the transient-transport classifier; a call that ultimately fails bumps
/// the error counter tagged with the operation name before propagating.
pub struct KubePodLauncher {
    kube: Arc<dyn KubeClient>,
    metrics: Arc<dyn MetricsClient>,
    retry_policy: RetryPolicy,
    wait_poll_interval: Duration,
}

impl KubePodLauncher {
    pub fn new(kube: Arc<dyn KubeClient>, metrics: Arc<dyn MetricsClient>) -> Self {
        Self {
            kube,
            metrics,
            retry_policy: RetryPolicy::default(),
            wait_poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_tuning(
        kube: Arc<dyn KubeClient>,
        metrics: Arc<dyn MetricsClient>,
        retry_policy: RetryPolicy,
        wait_poll_interval: Duration,
    ) -> Self {
        Self {
            kube,
            metrics,
            retry_policy,
            wait_poll_interval,
        }
    }

    pub async fn create(&self, pod: &Pod) -> Result<Pod, KubeClientError> {
        let created = retry(&self.retry_policy, is_transient, || {
            self.kube.create_pod(pod.clone())
        })
        .await;
        self.observe("pod_create", created)
    }

    /// Wait until a pod matching the selector has all its init containers
    /// started (or is already past Pending). The timeout is this call's
    /// alone; callers pick it per launch.
    pub async fn wait_for_pod_init(
        &self,
        label_selector: &str,
        timeout: Duration,
    ) -> Result<Pod, KubeClientError> {
        self.wait_for(label_selector, timeout, pod_init_started).await
    }

    pub async fn wait_for_pod_ready_or_terminal(
        &self,
        label_selector: &str,
        timeout: Duration,
    ) -> Result<Pod, KubeClientError> {
        self.wait_for(label_selector, timeout, pod_ready_or_terminal)
            .await
    }

    async fn wait_for(
        &self,
        label_selector: &str,
        timeout: Duration,
        condition: fn(&Pod) -> bool,
    ) -> Result<Pod, KubeClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            let pods = {
                let listed = retry(&self.retry_policy, is_transient, || {
                    self.kube.list_pods(label_selector)
                })
                .await;
                self.observe("wait", listed)?
            };

            if let Some(pod) = pods.iter().find(|p| condition(p)) {
                return Ok(pod.clone());
            }

            if Instant::now() >= deadline {
                return Err(KubeClientError::Timeout(format!(
                    "after {}s waiting for pods matching {label_selector}",
                    timeout.as_secs()
                )));
            }

            tokio::time::sleep(self.wait_poll_interval).await;
        }
    }

    pub async fn pods_exist(&self, label_selector: &str) -> Result<bool, KubeClientError> {
        let listed = retry(&self.retry_policy, is_transient, || {
            self.kube.list_pods(label_selector)
        })
        .await;
        Ok(!self.observe("list", listed)?.is_empty())
    }

    pub async fn delete_active_pods(&self, label_selector: &str) -> Result<u64, KubeClientError> {
        let deleted = retry(&self.retry_policy, is_transient, || {
            self.kube.delete_pods(label_selector)
        })
        .await;
        self.observe("delete", deleted)
    }

    fn observe<T>(
        &self,
        operation: &'static str,
        result: Result<T, KubeClientError>,
    ) -> Result<T, KubeClientError> {
        if result.is_err() {
            self.metrics.count(
                KUBE_API_ERROR_METRIC,
                1,
                &[("operation", operation.to_string())],
            );
        }
        result
    }
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn pod_init_started(pod: &Pod) -> bool {
    if matches!(pod_phase(pod), "Running" | "Succeeded" | "Failed") {
        return true;
    }

    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.init_container_statuses.as_deref())
        .unwrap_or_default();

    !statuses.is_empty()
        && statuses.iter().all(|s| {
            s.state
                .as_ref()
                .map(|st| st.running.is_some() || st.terminated.is_some())
                .unwrap_or(false)
        })
}

fn pod_ready_or_terminal(pod: &Pod) -> bool {
    matches!(pod_phase(pod), "Running" | "Succeeded" | "Failed")
}

/// Drives the launch sequence for one replication workload: orchestrator pod
/// up, config staged, source and destination workers up. Every failure along
/// the way collapses into `PodInitError` and aborts the rest of the
/// sequence.
pub struct KubePodClient {
    kube: Arc<dyn KubeClient>,
    launcher: KubePodLauncher,
    network_security: NetworkSecurityLabeler,
    node_selectors: NodeSelectorResolver,
    namespace: String,
    ready_timeout: Duration,
}

impl KubePodClient {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        launcher: KubePodLauncher,
        network_security: NetworkSecurityLabeler,
        node_selectors: NodeSelectorResolver,
        namespace: String,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            kube,
            launcher,
            network_security,
            node_selectors,
            namespace,
            ready_timeout,
        }
    }

    pub fn launcher(&self) -> &KubePodLauncher {
        &self.launcher
    }

    pub async fn launch_replication(&self, input: &ReplicationInput) -> Result<(), PodInitError> {
        // Map the domain input into Kubernetes terms before touching the
        // cluster: labels per role, node selector, pod name, staged files.
        let network_labels = self
            .network_security
            .labels_for(input.workspace_id, &input.network_security_tokens)
            .await
            .map_err(|e| {
                PodInitError::new(
                    "resolve network security labels",
                    KubeClientError::Other(e.to_string()),
                )
            })?;

        let mut extra_labels = network_labels;
        extra_labels.extend(
            input
                .passthrough_labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let orchestrator_labels = pod_labels(
            PodRole::Orchestrator,
            &input.workload_id,
            input.mutex_key.as_deref(),
            &extra_labels,
        );

        let node_selector = self.node_selectors.resolve(
            &FlagContext::for_connection(input.connection_id),
            input.uses_custom_connector,
        );

        let pod_name = orchestrator_pod_name(&input.job_id, input.attempt_id);
        let pod = self.orchestrator_pod(&pod_name, orchestrator_labels, node_selector, input);

        info!(
            workload_id = %input.workload_id,
            pod_name = %pod_name,
            "launching replication"
        );

        self.launcher
            .create(&pod)
            .await
            .map_err(|e| PodInitError::new("create orchestrator pod", e))?;

        let orchestrator_selector = role_selector(&input.workload_id, PodRole::Orchestrator);
        self.launcher
            .wait_for_pod_init(&orchestrator_selector, self.ready_timeout)
            .await
            .map_err(|e| PodInitError::new("wait for orchestrator pod init", e))?;

        self.stage_files(&pod_name, input)
            .await
            .map_err(|e| PodInitError::new("copy staged files to orchestrator", e))?;

        self.launcher
            .wait_for_pod_ready_or_terminal(
                &role_selector(&input.workload_id, PodRole::Source),
                self.ready_timeout,
            )
            .await
            .map_err(|e| PodInitError::new("wait for source pod", e))?;

        self.launcher
            .wait_for_pod_ready_or_terminal(
                &role_selector(&input.workload_id, PodRole::Destination),
                self.ready_timeout,
            )
            .await
            .map_err(|e| PodInitError::new("wait for destination pod", e))?;

        info!(workload_id = %input.workload_id, "replication pods are up");
        Ok(())
    }

    async fn stage_files(
        &self,
        pod_name: &str,
        input: &ReplicationInput,
    ) -> Result<(), KubeClientError> {
        let staged: BTreeMap<String, String> = input
            .file_map
            .iter()
            .map(|(name, contents)| (format!("{CONFIG_DIR}/{name}"), contents.clone()))
            .collect();

        self.kube
            .copy_files_to_pod(pod_name, INIT_CONTAINER, &staged)
            .await?;

        // marker last: the init container releases only on a complete stage
        let marker = BTreeMap::from([(
            format!("{CONFIG_DIR}/{STAGING_COMPLETE_MARKER}"),
            String::new(),
        )]);
        self.kube
            .copy_files_to_pod(pod_name, INIT_CONTAINER, &marker)
            .await?;

        debug!(pod_name, files = input.file_map.len(), "staged config files");
        Ok(())
    }

    fn orchestrator_pod(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        node_selector: BTreeMap<String, String>,
        input: &ReplicationInput,
    ) -> Pod {
        let config_mount = VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_DIR.to_string(),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                node_selector: (!node_selector.is_empty()).then_some(node_selector),
                init_containers: Some(vec![Container {
                    name: INIT_CONTAINER.to_string(),
                    image: Some(input.orchestrator_image.clone()),
                    command: Some(vec!["sh".to_string(), "-c".to_string()]),
                    args: Some(vec![format!(
                        "while [ ! -f {CONFIG_DIR}/{STAGING_COMPLETE_MARKER} ]; do sleep 0.2; done"
                    )]),
                    volume_mounts: Some(vec![config_mount.clone()]),
                    ..Default::default()
                }]),
                containers: vec![Container {
                    name: MAIN_CONTAINER.to_string(),
                    image: Some(input.orchestrator_image.clone()),
                    env: Some(vec![
                        env_var("WORKLOAD_ID", &input.workload_id),
                        env_var("JOB_ID", &input.job_id),
                        env_var("ATTEMPT_ID", &input.attempt_id.to_string()),
                        env_var("SOURCE_IMAGE", &input.source_image),
                        env_var("DESTINATION_IMAGE", &input.destination_image),
                    ]),
                    resources: input.resources.to_requirements(),
                    volume_mounts: Some(vec![config_mount]),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: CONFIG_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateRunning, ContainerStatus, PodStatus};

    fn pod_with_phase(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pending_pod_with_running_init_counts_as_init_started() {
        let mut pod = pod_with_phase("Pending");
        pod.status.as_mut().unwrap().init_container_statuses = Some(vec![ContainerStatus {
            name: "init".into(),
            state: Some(ContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        assert!(pod_init_started(&pod));
    }

    #[test]
    fn pending_pod_without_init_statuses_is_not_started() {
        assert!(!pod_init_started(&pod_with_phase("Pending")));
    }

    #[test]
    fn terminal_phases_count_as_ready_or_terminal() {
        assert!(pod_ready_or_terminal(&pod_with_phase("Running")));
        assert!(pod_ready_or_terminal(&pod_with_phase("Failed")));
        assert!(!pod_ready_or_terminal(&pod_with_phase("Pending")));
    }
}

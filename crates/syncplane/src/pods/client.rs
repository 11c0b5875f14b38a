use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{AttachParams, DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::pods::error::KubeClientError;

/// The cluster operations the launch engine needs, behind a trait so tests
/// run against an in-memory fake instead of a cluster. Implementations must
/// be safe to share across concurrently running launch sequences.
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn create_pod(&self, pod: Pod) -> Result<Pod, KubeClientError>;

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, KubeClientError>;

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, KubeClientError>;

    /// Delete every non-terminal pod matching the selector; returns how many
    /// deletions were issued.
    async fn delete_pods(&self, label_selector: &str) -> Result<u64, KubeClientError>;

    /// Stage a map of `path -> contents` into a running container's
    /// filesystem.
    async fn copy_files_to_pod(
        &self,
        pod_name: &str,
        container: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<(), KubeClientError>;

    async fn list_network_policies(
        &self,
        label_selector: &str,
    ) -> Result<Vec<NetworkPolicy>, KubeClientError>;

    /// SelfSubjectAccessReview for `list nodes`.
    async fn can_list_nodes(&self) -> Result<bool, KubeClientError>;

    /// Node names, preceded by the access review. Fails closed: a denied
    /// review is `PermissionDenied`, never an empty list.
    async fn list_node_names(&self) -> Result<Vec<String>, KubeClientError>;
}

/// Production implementation over a namespaced cluster client.
pub struct ClusterKubeClient {
    pods: Api<Pod>,
    policies: Api<NetworkPolicy>,
    nodes: Api<Node>,
    access_reviews: Api<SelfSubjectAccessReview>,
    namespace: String,
}

impl ClusterKubeClient {
    pub async fn connect(namespace: &str) -> anyhow::Result<Self> {
        let client = Client::try_default()
            .await
            .context("failed to build default Kubernetes client")?;

        Ok(Self {
            pods: Api::namespaced(client.clone(), namespace),
            policies: Api::namespaced(client.clone(), namespace),
            nodes: Api::all(client.clone()),
            access_reviews: Api::all(client),
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn list_params(label_selector: &str) -> ListParams {
        if label_selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(label_selector)
        }
    }
}

#[async_trait]
impl KubeClient for ClusterKubeClient {
    async fn create_pod(&self, pod: Pod) -> Result<Pod, KubeClientError> {
        self.pods
            .create(&PostParams::default(), &pod)
            .await
            .map_err(map_kube_error)
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, KubeClientError> {
        self.pods.get_opt(name).await.map_err(map_kube_error)
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, KubeClientError> {
        let list = self
            .pods
            .list(&Self::list_params(label_selector))
            .await
            .map_err(map_kube_error)?;
        Ok(list.items)
    }

    async fn delete_pods(&self, label_selector: &str) -> Result<u64, KubeClientError> {
        let pods = self.list_pods(label_selector).await?;

        let mut deleted = 0;
        for pod in pods {
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or("Unknown");
            if matches!(phase, "Succeeded" | "Failed") {
                continue;
            }
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };

            match self.pods.delete(name, &DeleteParams::default()).await {
                Ok(_) => deleted += 1,
                // racing with kubelet cleanup is fine
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(map_kube_error(e)),
            }
        }

        debug!(selector = label_selector, deleted, "deleted active pods");
        Ok(deleted)
    }

    async fn copy_files_to_pod(
        &self,
        pod_name: &str,
        container: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<(), KubeClientError> {
        for (path, contents) in files {
            let dir = path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
            let script = if dir.is_empty() {
                format!("cat > '{path}'")
            } else {
                format!("mkdir -p '{dir}' && cat > '{path}'")
            };

            let mut attached = self
                .pods
                .exec(
                    pod_name,
                    ["sh", "-c", script.as_str()],
                    &AttachParams::default().container(container).stdin(true),
                )
                .await
                .map_err(map_kube_error)?;

            let mut stdin = attached.stdin().ok_or_else(|| {
                KubeClientError::Other(format!("no stdin channel for exec into {pod_name}"))
            })?;
            stdin
                .write_all(contents.as_bytes())
                .await
                .map_err(|e| KubeClientError::Transport(e.to_string()))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| KubeClientError::Transport(e.to_string()))?;
            drop(stdin);

            attached
                .join()
                .await
                .map_err(|e| KubeClientError::Transport(e.to_string()))?;
        }

        Ok(())
    }

    async fn list_network_policies(
        &self,
        label_selector: &str,
    ) -> Result<Vec<NetworkPolicy>, KubeClientError> {
        let list = self
            .policies
            .list(&Self::list_params(label_selector))
            .await
            .map_err(map_kube_error)?;
        Ok(list.items)
    }

    async fn can_list_nodes(&self) -> Result<bool, KubeClientError> {
        let review = SelfSubjectAccessReview {
            metadata: Default::default(),
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    verb: Some("list".to_string()),
                    resource: Some("nodes".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            status: None,
        };

        let answered = self
            .access_reviews
            .create(&PostParams::default(), &review)
            .await
            .map_err(map_kube_error)?;

        Ok(answered.status.map(|s| s.allowed).unwrap_or(false))
    }

    async fn list_node_names(&self) -> Result<Vec<String>, KubeClientError> {
        if !self.can_list_nodes().await? {
            return Err(KubeClientError::PermissionDenied(
                "access review denied listing cluster nodes".to_string(),
            ));
        }

        let nodes = self
            .nodes
            .list(&ListParams::default())
            .await
            .map_err(map_kube_error)?;

        Ok(nodes
            .items
            .into_iter()
            .filter_map(|n| n.metadata.name)
            .collect())
    }
}

/// Collapse the client library's error surface into our taxonomy. Transport
/// failures (connection reset, socket timeout) are the only retryable kind;
/// API responses and everything else pass through as-is.
fn map_kube_error(err: kube::Error) -> KubeClientError {
    match err {
        kube::Error::Api(e) => KubeClientError::Api {
            code: e.code,
            message: e.message,
        },
        kube::Error::HyperError(e) => KubeClientError::Transport(e.to_string()),
        kube::Error::Service(e) => KubeClientError::Transport(e.to_string()),
        other => KubeClientError::Other(other.to_string()),
    }
}

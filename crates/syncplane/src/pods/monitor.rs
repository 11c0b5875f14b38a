use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::metrics::MetricsClient;
use crate::pods::client::KubeClient;

pub const PENDING_PODS_GAUGE: &str = "kube_pods_pending";
pub const OLDEST_PENDING_POD_AGE_GAUGE: &str = "kube_pods_pending_oldest_age_seconds";

/// Periodic sweep of the pending-pod backlog in the managed namespace.
///
/// Always reports how many pods are stuck in Pending; reports the oldest
/// pod's age only once it crosses the threshold, so the age series stays
/// silent in the healthy case.
pub struct KubeResourceMonitor {
    kube: Arc<dyn KubeClient>,
    metrics: Arc<dyn MetricsClient>,
    namespace: String,
    age_threshold: Duration,
}

impl KubeResourceMonitor {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        metrics: Arc<dyn MetricsClient>,
        namespace: String,
        age_threshold: Duration,
    ) -> Self {
        Self {
            kube,
            metrics,
            namespace,
            age_threshold,
        }
    }

    pub async fn sweep(&self) -> anyhow::Result<()> {
        let pods = self.kube.list_pods("").await?;
        let pending: Vec<&Pod> = pods.iter().filter(|p| is_pending(p)).collect();

        let tags = [("namespace", self.namespace.clone())];
        self.metrics
            .gauge(PENDING_PODS_GAUGE, pending.len() as f64, &tags);

        let now = Utc::now();
        let oldest_age_secs = pending
            .iter()
            .filter_map(|p| p.metadata.creation_timestamp.as_ref())
            .map(|t| (now - t.0).num_seconds().max(0))
            .max();

        if let Some(age) = oldest_age_secs {
            if age as u64 > self.age_threshold.as_secs() {
                warn!(
                    namespace = %self.namespace,
                    pending = pending.len(),
                    oldest_age_secs = age,
                    "pending pod backlog is aging past the threshold"
                );
                self.metrics
                    .gauge(OLDEST_PENDING_POD_AGE_GAUGE, age as f64, &tags);
            }
        }

        debug!(namespace = %self.namespace, pending = pending.len(), "pending pod sweep");
        Ok(())
    }

    pub async fn run(&self, interval: Duration) {
        loop {
            if let Err(e) = self.sweep().await {
                warn!("pending pod sweep failed: {e:#}");
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn is_pending(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
        == "Pending"
}

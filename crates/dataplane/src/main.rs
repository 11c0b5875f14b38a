use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use syncplane::config::Config;
use syncplane::db;
use syncplane::flags::EnvFlagClient;
use syncplane::metrics::TelemetryMetrics;
use syncplane::pods::{
    check_image_pull_errors, format_image_pull_errors, ClusterKubeClient, InMemoryPolicyCache,
    KubeClient, KubeClientError, KubeNetworkPolicyFetcher, KubePodClient, KubePodLauncher,
    KubeResourceMonitor, NetworkSecurityLabeler, NodeSelectorResolver, PodResources,
    ReplicationInput,
};
use syncplane::workloads::{TerminationSource, Workload, WorkloadQueueRepo, WorkloadsRepo};

/// Shape of a sync workload's input payload.
#[derive(Debug, Deserialize)]
struct ReplicationPayload {
    job_id: String,
    attempt_id: i64,
    connection_id: Uuid,
    orchestrator_image: String,
    source_image: String,
    destination_image: String,
    #[serde(default)]
    uses_custom_connector: bool,
    #[serde(default)]
    network_security_tokens: Vec<String>,
    #[serde(default)]
    cpu_request: Option<String>,
    #[serde(default)]
    cpu_limit: Option<String>,
    #[serde(default)]
    memory_request: Option<String>,
    #[serde(default)]
    memory_limit: Option<String>,
    #[serde(default)]
    files: BTreeMap<String, String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = Config::from_env()?;

    info!(
        dataplane_id = %cfg.dataplane_id,
        group = %cfg.dataplane_group,
        priority = cfg.priority,
        namespace = %cfg.kube_namespace,
        "dataplane starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let workloads = WorkloadsRepo::new(pool.clone());
    let queue = WorkloadQueueRepo::new(pool.clone());

    let kube: Arc<dyn KubeClient> = Arc::new(ClusterKubeClient::connect(&cfg.kube_namespace).await?);
    let metrics = Arc::new(TelemetryMetrics);
    let flags = Arc::new(EnvFlagClient);

    // Node visibility is optional; the access review fails closed and we
    // simply run without node diagnostics when it is denied.
    match kube.list_node_names().await {
        Ok(nodes) => info!(count = nodes.len(), "cluster nodes visible"),
        Err(KubeClientError::PermissionDenied(reason)) => {
            warn!(%reason, "node listing disabled")
        }
        Err(e) => warn!("node listing probe failed: {e}"),
    }

    let launcher = KubePodLauncher::new(kube.clone(), metrics.clone());
    let network_security = NetworkSecurityLabeler::new(
        Arc::new(KubeNetworkPolicyFetcher::new(kube.clone())),
        Arc::new(InMemoryPolicyCache::new()),
    );
    let node_selectors = NodeSelectorResolver::new(
        flags,
        cfg.node_selectors.clone(),
        cfg.isolated_node_selectors.clone(),
    );
    let pod_client = Arc::new(KubePodClient::new(
        kube.clone(),
        launcher,
        network_security,
        node_selectors,
        cfg.kube_namespace.clone(),
        Duration::from_secs(cfg.pod_ready_timeout_secs),
    ));

    let monitor = KubeResourceMonitor::new(
        kube.clone(),
        metrics.clone(),
        cfg.kube_namespace.clone(),
        Duration::from_secs(cfg.pending_pod_age_threshold_secs),
    );

    // ---- Pending-pod monitor task ----
    let monitor_handle = tokio::spawn(async move {
        monitor.run(Duration::from_secs(60)).await;
        Ok::<(), anyhow::Error>(())
    });

    // ---- Maintenance task: expired leases + acked queue entries ----
    let maintenance_handle = {
        let workloads = workloads.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            loop {
                match workloads.fail_expired(100).await {
                    Ok(expired) if !expired.is_empty() => {
                        warn!(count = expired.len(), "failed workloads with expired leases")
                    }
                    Ok(_) => {}
                    Err(e) => error!("expired-lease sweep failed: {e:#}"),
                }

                match queue.clean_up_acked_entries(500).await {
                    Ok(n) if n > 0 => info!(deleted = n, "cleaned up acked queue entries"),
                    Ok(_) => {}
                    Err(e) => error!("queue cleanup failed: {e:#}"),
                }

                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            #[allow(unreachable_code)]
            Ok::<(), anyhow::Error>(())
        })
    };

    // ---- Poll/claim/launch loop ----
    let poll_handle = {
        let cfg = cfg.clone();
        tokio::spawn(async move {
            loop {
                let batch = queue
                    .poll(
                        &cfg.dataplane_group,
                        cfg.priority,
                        cfg.poll_batch_size,
                        cfg.redelivery_window_secs,
                    )
                    .await?;

                if batch.is_empty() {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }

                let mut join_set = tokio::task::JoinSet::new();
                for workload in batch {
                    let workloads = workloads.clone();
                    let queue = queue.clone();
                    let pod_client = pod_client.clone();
                    let kube = kube.clone();
                    let dataplane_id = cfg.dataplane_id.clone();
                    let lease_seconds = cfg.lease_seconds;

                    join_set.spawn(async move {
                        run_one(
                            &workloads,
                            &queue,
                            pod_client.as_ref(),
                            &kube,
                            &dataplane_id,
                            lease_seconds,
                            workload,
                        )
                        .await
                    });
                }

                while let Some(joined) = join_set.join_next().await {
                    if let Err(e) = joined? {
                        error!("workload execution task failed: {e:#}");
                    }
                }
            }
            #[allow(unreachable_code)]
            Ok::<(), anyhow::Error>(())
        })
    };

    tokio::select! {
        res = poll_handle => res??,
        res = maintenance_handle => res??,
        res = monitor_handle => res??,
    }

    Ok(())
}

/// Drive one delivered workload through claim → launch → running, acking the
/// queue entry once the workload is owned. A lost claim race just acks and
/// moves on; a launch failure fails the workload and tears its pods down.
async fn run_one(
    workloads: &WorkloadsRepo,
    queue: &WorkloadQueueRepo,
    pod_client: &KubePodClient,
    kube: &Arc<dyn KubeClient>,
    dataplane_id: &str,
    lease_seconds: i64,
    workload: Workload,
) -> anyhow::Result<()> {
    let id = workload.id.clone();
    let deadline = Utc::now() + chrono::Duration::seconds(lease_seconds);

    let Some(claimed) = workloads.claim(&id, dataplane_id, deadline).await? else {
        // another dataplane owns it, or it already ran; nothing to do here
        queue.ack(&id).await?;
        return Ok(());
    };
    queue.ack(&id).await?;

    if claimed.workload_type != "sync" {
        warn!(workload_id = %id, workload_type = %claimed.workload_type, "unsupported workload type");
        workloads
            .fail(&id, "unsupported workload type", TerminationSource::Dataplane)
            .await?;
        return Ok(());
    }

    let payload: ReplicationPayload = match serde_json::from_str(&claimed.input_payload) {
        Ok(p) => p,
        Err(e) => {
            workloads
                .fail(
                    &id,
                    &format!("malformed input payload: {e}"),
                    TerminationSource::Dataplane,
                )
                .await?;
            return Ok(());
        }
    };

    let input = ReplicationInput {
        workload_id: id.clone(),
        job_id: payload.job_id,
        attempt_id: payload.attempt_id,
        connection_id: payload.connection_id,
        workspace_id: claimed.workspace_id,
        orchestrator_image: payload.orchestrator_image,
        source_image: payload.source_image,
        destination_image: payload.destination_image,
        uses_custom_connector: payload.uses_custom_connector,
        network_security_tokens: payload.network_security_tokens,
        mutex_key: claimed.mutex_key.clone(),
        passthrough_labels: claimed.labels.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        resources: PodResources {
            cpu_request: payload.cpu_request,
            cpu_limit: payload.cpu_limit,
            memory_request: payload.memory_request,
            memory_limit: payload.memory_limit,
        },
        file_map: payload.files,
    };

    // mutex visibility: surface overlapping in-flight workloads before launch
    if let Some(mutex_key) = &claimed.mutex_key {
        let competing = workloads.list_active_with_mutex_key(mutex_key).await?;
        if competing.iter().any(|w| w.id != id) {
            warn!(workload_id = %id, mutex_key = %mutex_key, "mutexed workloads already in flight");
        }
    }

    let launch_deadline = Utc::now() + chrono::Duration::seconds(lease_seconds);
    if workloads.launch(&id, launch_deadline).await?.is_none() {
        // cancelled between claim and launch
        return Ok(());
    }

    match pod_client.launch_replication(&input).await {
        Ok(()) => {
            let run_deadline = Utc::now() + chrono::Duration::seconds(lease_seconds);
            if workloads.running(&id, run_deadline).await?.is_none() {
                warn!(workload_id = %id, "workload terminated while its pods were starting");
            }
        }
        Err(e) => {
            error!(workload_id = %id, "replication launch failed: {e}");

            // post-hoc pod scan: an actionable image-pull failure beats a
            // bare timeout in the termination reason
            let selector = syncplane::pods::workload_selector(&id);
            let mut reason = e.to_string();
            if let Ok(pods) = kube.list_pods(&selector).await {
                let pull_errors: Vec<_> =
                    pods.iter().flat_map(check_image_pull_errors).collect();
                if !pull_errors.is_empty() {
                    reason = format!("{reason}: {}", format_image_pull_errors(&pull_errors));
                }
            }

            workloads
                .fail(&id, &reason, TerminationSource::Dataplane)
                .await?;
            if let Err(cleanup) = pod_client.launcher().delete_active_pods(&selector).await {
                warn!(workload_id = %id, "cleanup after failed launch did not finish: {cleanup}");
            }
        }
    }

    Ok(())
}

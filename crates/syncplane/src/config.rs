use std::collections::BTreeMap;

/// Runtime configuration for a dataplane process, loaded from the
/// environment. Typed fields instead of raw strings everywhere.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,

    /// Identity this process claims workloads under.
    pub dataplane_id: String,
    /// The (group, priority) partition this process polls.
    pub dataplane_group: String,
    pub priority: i32,

    pub poll_batch_size: i64,
    pub redelivery_window_secs: i64,
    pub lease_seconds: i64,

    pub kube_namespace: String,
    pub pod_ready_timeout_secs: u64,
    pub pending_pod_age_threshold_secs: u64,

    /// Default node selectors, plus the optional isolated set used for
    /// custom-connector workloads.
    pub node_selectors: BTreeMap<String, String>,
    pub isolated_node_selectors: Option<BTreeMap<String, String>>,

    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let dataplane_id = env_nonempty("SYNCPLANE_DATAPLANE_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "dataplane-1".to_string());

        let dataplane_group =
            env_nonempty("SYNCPLANE_DATAPLANE_GROUP").unwrap_or_else(|| "default".to_string());

        let priority = env_nonempty("SYNCPLANE_PRIORITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let poll_batch_size = env_nonempty("SYNCPLANE_POLL_BATCH_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let redelivery_window_secs = env_nonempty("SYNCPLANE_REDELIVERY_WINDOW_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let lease_seconds = env_nonempty("SYNCPLANE_LEASE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let kube_namespace =
            env_nonempty("SYNCPLANE_KUBE_NAMESPACE").unwrap_or_else(|| "jobs".to_string());

        let pod_ready_timeout_secs = env_nonempty("SYNCPLANE_POD_READY_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let pending_pod_age_threshold_secs =
            env_nonempty("SYNCPLANE_PENDING_POD_AGE_THRESHOLD_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(600);

        let node_selectors = env_nonempty("SYNCPLANE_NODE_SELECTORS")
            .map(|s| parse_selector_pairs(&s))
            .unwrap_or_default();

        let isolated_node_selectors =
            env_nonempty("SYNCPLANE_ISOLATED_NODE_SELECTORS").map(|s| parse_selector_pairs(&s));

        let migrate_on_startup = env_bool("SYNCPLANE_MIGRATE_ON_STARTUP").unwrap_or(false);

        Ok(Self {
            database_url,
            dataplane_id,
            dataplane_group,
            priority,
            poll_batch_size,
            redelivery_window_secs,
            lease_seconds,
            kube_namespace,
            pod_ready_timeout_secs,
            pending_pod_age_threshold_secs,
            node_selectors,
            isolated_node_selectors,
            migrate_on_startup,
        })
    }
}

/// Parse "disktype=ssd,pool=jobs" into a selector map. Malformed segments
/// are skipped.
pub fn parse_selector_pairs(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() || v.is_empty() {
                None
            } else {
                Some((k.to_string(), v.to_string()))
            }
        })
        .collect()
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

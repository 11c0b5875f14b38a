use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::pods::client::KubeClient;

pub const NETWORK_SECURITY_TOKEN_LABEL: &str = "syncplane.io/network-security-token";

/// Cache key: one entry per workspace and token combination.
pub type PolicyCacheKey = (Uuid, u64);

/// Resolves workspace network-security tokens into the pod labels that make
/// the cluster's network policies select the launched pods.
pub struct NetworkSecurityLabeler {
    fetcher: Arc<dyn NetworkPolicyFetcher>,
    cache: Arc<dyn PolicyLabelCache>,
}

impl NetworkSecurityLabeler {
    pub fn new(fetcher: Arc<dyn NetworkPolicyFetcher>, cache: Arc<dyn PolicyLabelCache>) -> Self {
        Self { fetcher, cache }
    }

    /// Flattened pod-selector labels of every policy matching the tokens.
    ///
    /// No tokens is the common case and short-circuits before the cache, so
    /// the cache never fills with empty entries.
    pub async fn labels_for(
        &self,
        workspace_id: Uuid,
        tokens: &[String],
    ) -> anyhow::Result<BTreeMap<String, String>> {
        if tokens.is_empty() {
            return Ok(BTreeMap::new());
        }

        let key = (workspace_id, hash_tokens(tokens));
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let selector_sets = self.fetcher.pod_selector_labels(workspace_id, tokens).await?;
        let mut flattened = BTreeMap::new();
        for set in selector_sets {
            flattened.extend(set);
        }

        self.cache.put(key, flattened.clone());
        Ok(flattened)
    }
}

fn hash_tokens(tokens: &[String]) -> u64 {
    let mut sorted: Vec<&String> = tokens.iter().collect();
    sorted.sort();

    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    hasher.finish()
}

/// External collaborator that knows which network policies match a set of
/// tokens.
#[async_trait]
pub trait NetworkPolicyFetcher: Send + Sync {
    /// One label map per matching policy (its pod selector's match labels).
    async fn pod_selector_labels(
        &self,
        workspace_id: Uuid,
        tokens: &[String],
    ) -> anyhow::Result<Vec<BTreeMap<String, String>>>;
}

/// Fetcher backed by the cluster: lists NetworkPolicy objects carrying the
/// token label and collects their pod-selector match labels.
pub struct KubeNetworkPolicyFetcher {
    kube: Arc<dyn KubeClient>,
}

impl KubeNetworkPolicyFetcher {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl NetworkPolicyFetcher for KubeNetworkPolicyFetcher {
    async fn pod_selector_labels(
        &self,
        _workspace_id: Uuid,
        tokens: &[String],
    ) -> anyhow::Result<Vec<BTreeMap<String, String>>> {
        let selector = format!(
            "{NETWORK_SECURITY_TOKEN_LABEL} in ({})",
            tokens.join(",")
        );
        let policies = self.kube.list_network_policies(&selector).await?;

        Ok(policies
            .into_iter()
            .filter_map(|p| p.spec)
            .filter_map(|spec| spec.pod_selector.match_labels)
            .collect())
    }
}

/// Injected get/put cache so tests can substitute a trivial map and so the
/// process decides the eviction policy, not this module.
pub trait PolicyLabelCache: Send + Sync {
    fn get(&self, key: &PolicyCacheKey) -> Option<BTreeMap<String, String>>;
    fn put(&self, key: PolicyCacheKey, labels: BTreeMap<String, String>);
}

#[derive(Default)]
pub struct InMemoryPolicyCache {
    entries: Mutex<HashMap<PolicyCacheKey, BTreeMap<String, String>>>,
}

impl InMemoryPolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PolicyLabelCache for InMemoryPolicyCache {
    fn get(&self, key: &PolicyCacheKey) -> Option<BTreeMap<String, String>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: PolicyCacheKey, labels: BTreeMap<String, String>) {
        self.entries.lock().unwrap().insert(key, labels);
    }
}

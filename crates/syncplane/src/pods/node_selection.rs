use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::parse_selector_pairs;
use crate::flags::{FeatureFlagClient, FlagContext, NODE_SELECTOR_OVERRIDE_FLAG};

/// Computes the node-selector map for a workload's pods.
pub struct NodeSelectorResolver {
    flags: Arc<dyn FeatureFlagClient>,
    defaults: BTreeMap<String, String>,
    isolated: Option<BTreeMap<String, String>>,
}

impl NodeSelectorResolver {
    pub fn new(
        flags: Arc<dyn FeatureFlagClient>,
        defaults: BTreeMap<String, String>,
        isolated: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            flags,
            defaults,
            isolated,
        }
    }

    /// Resolution order: a flag-provided override for this connection wins
    /// outright; otherwise custom-connector workloads land on the isolated
    /// selector set when one is configured, and everything else uses the
    /// defaults.
    pub fn resolve(
        &self,
        ctx: &FlagContext,
        uses_custom_connector: bool,
    ) -> BTreeMap<String, String> {
        if let Some(raw) = self.flags.string_variation(NODE_SELECTOR_OVERRIDE_FLAG, ctx) {
            let parsed = parse_selector_pairs(&raw);
            if parsed.len() != raw.split(',').filter(|s| !s.trim().is_empty()).count() {
                warn!(%raw, "node selector override contains malformed segments");
            }
            return parsed;
        }

        if uses_custom_connector {
            if let Some(isolated) = &self.isolated {
                return isolated.clone();
            }
        }

        self.defaults.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::StaticFlagClient;

    fn selectors(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn resolver(
        flags: StaticFlagClient,
        isolated: Option<BTreeMap<String, String>>,
    ) -> NodeSelectorResolver {
        NodeSelectorResolver::new(
            Arc::new(flags),
            selectors(&[("pool", "jobs")]),
            isolated,
        )
    }

    #[test]
    fn flag_override_is_used_exclusively() {
        let flags = StaticFlagClient::default()
            .with_flag(NODE_SELECTOR_OVERRIDE_FLAG, "disktype=ssd,zone=eu-1");
        let r = resolver(flags, Some(selectors(&[("pool", "isolated")])));

        let resolved = r.resolve(&FlagContext::default(), true);
        assert_eq!(resolved, selectors(&[("disktype", "ssd"), ("zone", "eu-1")]));
    }

    #[test]
    fn custom_connectors_get_the_isolated_set_when_configured() {
        let r = resolver(
            StaticFlagClient::default(),
            Some(selectors(&[("pool", "isolated")])),
        );

        assert_eq!(
            r.resolve(&FlagContext::default(), true),
            selectors(&[("pool", "isolated")])
        );
        assert_eq!(
            r.resolve(&FlagContext::default(), false),
            selectors(&[("pool", "jobs")])
        );
    }

    #[test]
    fn custom_connectors_fall_back_to_defaults_without_an_isolated_set() {
        let r = resolver(StaticFlagClient::default(), None);
        assert_eq!(
            r.resolve(&FlagContext::default(), true),
            selectors(&[("pool", "jobs")])
        );
    }
}

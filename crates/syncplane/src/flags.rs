use std::collections::HashMap;

use uuid::Uuid;

/// Flag key for the per-connection node-selector override consumed by the
/// node-selector resolver.
pub const NODE_SELECTOR_OVERRIDE_FLAG: &str = "platform.node-selector-override";

/// Evaluation context for flag lookups.
#[derive(Debug, Clone, Default)]
pub struct FlagContext {
    pub connection_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
}

impl FlagContext {
    pub fn for_connection(connection_id: Uuid) -> Self {
        Self {
            connection_id: Some(connection_id),
            workspace_id: None,
        }
    }
}

pub trait FeatureFlagClient: Send + Sync {
    /// Returns the string variation for a flag, or None when the flag is
    /// unset for this context.
    fn string_variation(&self, key: &str, ctx: &FlagContext) -> Option<String>;

    fn bool_variation(&self, key: &str, ctx: &FlagContext, default: bool) -> bool;
}

/// Flag source backed by environment variables: flag `a.b-c` is read from
/// `SYNCPLANE_FLAG_A_B_C`. Context-insensitive, which is all a single-tenant
/// dataplane deployment needs.
#[derive(Clone, Default)]
pub struct EnvFlagClient;

impl EnvFlagClient {
    fn env_key(key: &str) -> String {
        let mut out = String::with_capacity(key.len());
        for c in key.chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push('_');
            }
        }
        format!("SYNCPLANE_FLAG_{out}")
    }
}

impl FeatureFlagClient for EnvFlagClient {
    fn string_variation(&self, key: &str, _ctx: &FlagContext) -> Option<String> {
        std::env::var(Self::env_key(key))
            .ok()
            .filter(|s| !s.trim().is_empty())
    }

    fn bool_variation(&self, key: &str, ctx: &FlagContext, default: bool) -> bool {
        match self.string_variation(key, ctx) {
            Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }
}

/// Map-backed flag source for tests and fixed deployments.
#[derive(Clone, Default)]
pub struct StaticFlagClient {
    values: HashMap<String, String>,
}

impl StaticFlagClient {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with_flag(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl FeatureFlagClient for StaticFlagClient {
    fn string_variation(&self, key: &str, _ctx: &FlagContext) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn bool_variation(&self, key: &str, ctx: &FlagContext, default: bool) -> bool {
        match self.string_variation(key, ctx) {
            Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Workload {
    pub id: String,
    pub workload_type: String,
    pub status: String,

    pub dataplane_group: String,
    pub priority: i32,
    pub mutex_key: Option<String>,

    pub input_payload: String,
    pub signal_input: Option<String>,
    pub log_path: String,
    pub workspace_id: Uuid,
    pub organization_id: Uuid,
    pub labels: Json<HashMap<String, String>>,

    pub dataplane_id: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub termination_reason: Option<String>,
    pub termination_source: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWorkload {
    pub id: String,
    pub workload_type: WorkloadType,
    pub dataplane_group: String,
    pub priority: i32,
    pub mutex_key: Option<String>,
    pub input_payload: String,
    pub signal_input: Option<String>,
    pub log_path: String,
    pub workspace_id: Uuid,
    pub organization_id: Uuid,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadType {
    Sync,
    Check,
    Discover,
    Spec,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Sync => "sync",
            WorkloadType::Check => "check",
            WorkloadType::Discover => "discover",
            WorkloadType::Spec => "spec",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadStatus {
    Pending,
    Claimed,
    Launched,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl WorkloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadStatus::Pending => "pending",
            WorkloadStatus::Claimed => "claimed",
            WorkloadStatus::Launched => "launched",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Success => "success",
            WorkloadStatus::Failure => "failure",
            WorkloadStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WorkloadStatus::Pending),
            "claimed" => Some(WorkloadStatus::Claimed),
            "launched" => Some(WorkloadStatus::Launched),
            "running" => Some(WorkloadStatus::Running),
            "success" => Some(WorkloadStatus::Success),
            "failure" => Some(WorkloadStatus::Failure),
            "cancelled" => Some(WorkloadStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkloadStatus::Success | WorkloadStatus::Failure | WorkloadStatus::Cancelled
        )
    }

    /// The full transition table. Every repository mutation encodes a subset
    /// of this as a conditional UPDATE; this is the single in-process source
    /// of truth the SQL conditions mirror.
    pub fn can_transition_to(&self, next: WorkloadStatus) -> bool {
        use WorkloadStatus::*;
        match (self, next) {
            (Pending, Claimed) => true,
            (Claimed, Launched) | (Launched, Launched) => true,
            (Claimed, Running) | (Launched, Running) | (Running, Running) => true,
            (s, Success | Failure | Cancelled) => !s.is_terminal(),
            _ => false,
        }
    }

    /// Statuses a workload can hold while a dataplane still owns it.
    pub fn active() -> [&'static str; 3] {
        ["claimed", "launched", "running"]
    }

    pub fn non_terminal() -> [&'static str; 4] {
        ["pending", "claimed", "launched", "running"]
    }
}

/// Who asked for a workload to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSource {
    Api,
    Dataplane,
    Monitor,
}

impl TerminationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationSource::Api => "api",
            TerminationSource::Dataplane => "dataplane",
            TerminationSource::Monitor => "monitor",
        }
    }
}

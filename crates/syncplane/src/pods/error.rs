use thiserror::Error;

/// Errors surfaced by the Kubernetes client boundary.
///
/// Only `Transport` is retryable. Client-side timeouts get their own variant
/// precisely so they are NOT classified as transient: retrying them would
/// mask genuine resource or permission problems as flaky networking.
#[derive(Debug, Error)]
pub enum KubeClientError {
    #[error("transient transport failure: {0}")]
    Transport(String),

    #[error("kubernetes api error (status {code}): {message}")]
    Api { code: u16, message: String },

    #[error("timed out {0}")]
    Timeout(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Other(String),
}

/// Pure classifier consumed by the launcher's retry policy.
pub fn is_transient(err: &KubeClientError) -> bool {
    matches!(err, KubeClientError::Transport(_))
}

/// Any failure inside the replication launch sequence, whatever the step.
///
/// Callers never need to distinguish the step from the error type; the step
/// name travels in the message. A launch attempt that hits this is dead and
/// the workload must be failed, not silently retried.
#[derive(Debug, Error)]
#[error("pod initialization failed during {step}: {source}")]
pub struct PodInitError {
    pub step: String,
    #[source]
    pub source: KubeClientError,
}

impl PodInitError {
    pub fn new(step: impl Into<String>, source: KubeClientError) -> Self {
        Self {
            step: step.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(is_transient(&KubeClientError::Transport(
            "stream reset".into()
        )));
        assert!(!is_transient(&KubeClientError::Timeout(
            "waiting for pod".into()
        )));
        assert!(!is_transient(&KubeClientError::Api {
            code: 403,
            message: "forbidden".into()
        }));
        assert!(!is_transient(&KubeClientError::PermissionDenied(
            "nodes".into()
        )));
    }

    #[test]
    fn pod_init_error_carries_step_context() {
        let err = PodInitError::new(
            "create orchestrator pod",
            KubeClientError::Api {
                code: 422,
                message: "invalid spec".into(),
            },
        );
        let rendered = err.to_string();
        assert!(rendered.contains("create orchestrator pod"));
    }
}

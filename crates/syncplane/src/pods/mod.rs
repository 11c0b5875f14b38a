pub mod client;
pub mod error;
pub mod labels;
pub mod launcher;
pub mod model;
pub mod monitor;
pub mod naming;
pub mod network_security;
pub mod node_selection;
pub mod retry;
pub mod status;

pub use client::{ClusterKubeClient, KubeClient};
pub use error::{is_transient, KubeClientError, PodInitError};
pub use labels::{pod_labels, role_selector, workload_selector, PodRole};
pub use launcher::{KubePodClient, KubePodLauncher};
pub use model::{PodResources, ReplicationInput};
pub use monitor::KubeResourceMonitor;
pub use network_security::{
    InMemoryPolicyCache, KubeNetworkPolicyFetcher, NetworkPolicyFetcher, NetworkSecurityLabeler,
    PolicyLabelCache,
};
pub use node_selection::NodeSelectorResolver;
pub use retry::{retry, RetryPolicy};
pub use status::{check_image_pull_errors, format_image_pull_errors, ContainerType, ImagePullError};

pub mod model;
pub mod queue;
pub mod repo;

pub use model::{NewWorkload, TerminationSource, Workload, WorkloadStatus, WorkloadType};
pub use queue::WorkloadQueueRepo;
pub use repo::WorkloadsRepo;

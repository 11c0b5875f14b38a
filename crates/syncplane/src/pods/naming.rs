use rand::distributions::Alphanumeric;
use rand::Rng;

/// Kubernetes object-name ceiling.
pub const MAX_POD_NAME_LENGTH: usize = 63;

const RANDOM_SUFFIX_LENGTH: usize = 5;

/// Name for the orchestrator pod of a replication attempt.
///
/// The job/attempt identifiers keep the name deterministic enough to find in
/// `kubectl` output; the random suffix keeps rapid relaunches of the same
/// attempt from colliding with a pod still terminating.
pub fn orchestrator_pod_name(job_id: &str, attempt_id: i64) -> String {
    let base = format!("orchestrator-repl-job-{job_id}-attempt-{attempt_id}");
    with_random_suffix(&base)
}

fn with_random_suffix(base: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LENGTH)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    truncate_middle(&format!("{base}-{suffix}"), MAX_POD_NAME_LENGTH)
}

/// Shorten a name to `max` characters by cutting out the middle, so both the
/// leading identifiers and the trailing suffix survive.
pub fn truncate_middle(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let head = (max - 1) / 2;
    let tail = max - 1 - head;
    format!("{}-{}", &name[..head], &name[name.len() - tail..])
}

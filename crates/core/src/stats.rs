use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};

/// Point-in-time summary of the engine for dashboards and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub rules_total: usize,
    pub rules_enabled: usize,
    pub jobs_total: usize,
    /// Job count keyed by status name.
    pub jobs_by_status: BTreeMap<String, usize>,
    /// Source bytes read by completed jobs.
    pub bytes_backed_up: u64,
    pub running_slots: usize,
    pub max_concurrent_jobs: usize,
    pub active_key_id: String,
    pub uptime_seconds: u64,
}

/// Count jobs per status. Every status appears, with zero when unused.
pub fn count_by_status<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = JobStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_owned(), 0))
        .collect();
    for job in jobs {
        *counts.entry(job.status.as_str().to_owned()).or_default() += 1;
    }
    counts
}

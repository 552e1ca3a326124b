use async_trait::async_trait;
use vaultline_core::{BackupRule, Job};

use crate::error::StateError;

/// Trait for persisting rules and jobs across restarts.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Writes are whole-record upserts keyed by id.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert or replace a rule.
    async fn put_rule(&self, rule: &BackupRule) -> Result<(), StateError>;

    /// Delete a rule. Returns `true` if it existed.
    async fn delete_rule(&self, id: &str) -> Result<bool, StateError>;

    /// All stored rules, ordered by id.
    async fn list_rules(&self) -> Result<Vec<BackupRule>, StateError>;

    /// Insert or replace a job.
    async fn put_job(&self, job: &Job) -> Result<(), StateError>;

    /// All stored jobs, ordered by id.
    async fn list_jobs(&self) -> Result<Vec<Job>, StateError>;
}

use async_trait::async_trait;
use dashmap::DashMap;
use vaultline_core::{BackupRule, Job};

use crate::error::StateError;
use crate::store::StateStore;

/// In-memory state store using `DashMap`. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    rules: DashMap<String, BackupRule>,
    jobs: DashMap<String, Job>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put_rule(&self, rule: &BackupRule) -> Result<(), StateError> {
        self.rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<bool, StateError> {
        Ok(self.rules.remove(id).is_some())
    }

    async fn list_rules(&self) -> Result<Vec<BackupRule>, StateError> {
        let mut rules: Vec<BackupRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn put_job(&self, job: &Job) -> Result<(), StateError> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StateError> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use vaultline_core::{JobStatus, JobTrigger};

    use super::*;

    #[tokio::test]
    async fn rules_upsert_and_delete() {
        let store = MemoryStateStore::new();
        let rule = BackupRule::new("docs", "/a", "/b", "daily").with_id("r1");
        store.put_rule(&rule).await.unwrap();
        store.put_rule(&rule.clone().with_enabled(false)).await.unwrap();

        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].enabled);

        assert!(store.delete_rule("r1").await.unwrap());
        assert!(!store.delete_rule("r1").await.unwrap());
    }

    #[tokio::test]
    async fn jobs_are_replaced_by_id() {
        let store = MemoryStateStore::new();
        let mut job = Job::new("r1", "docs", JobTrigger::Manual);
        store.put_job(&job).await.unwrap();
        job.start(chrono::Utc::now()).unwrap();
        store.put_job(&job).await.unwrap();

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Running);
    }
}

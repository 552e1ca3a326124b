use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;
use vaultline_core::{BackupRule, Job};

use crate::error::StateError;
use crate::store::StateStore;

const RULES_FILE: &str = "rules.json";
const JOBS_FILE: &str = "jobs.json";

/// State store that keeps rules and jobs as JSON documents in a directory.
///
/// Every write replaces the whole document through a temporary file and a
/// rename, so a crash leaves either the old or the new snapshot on disk.
pub struct FileStateStore {
    dir: PathBuf,
    rules: Mutex<BTreeMap<String, BackupRule>>,
    jobs: Mutex<BTreeMap<String, Job>>,
}

impl FileStateStore {
    /// Open the store in `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StateError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let rules: Vec<BackupRule> = load(&dir.join(RULES_FILE)).await?;
        let jobs: Vec<Job> = load(&dir.join(JOBS_FILE)).await?;
        debug!(dir = %dir.display(), rules = rules.len(), jobs = jobs.len(), "loaded state");
        Ok(Self {
            dir,
            rules: Mutex::new(rules.into_iter().map(|r| (r.id.clone(), r)).collect()),
            jobs: Mutex::new(jobs.into_iter().map(|j| (j.id.clone(), j)).collect()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

async fn load<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StateError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

async fn save<'a, T: Serialize + 'a>(path: &Path, items: impl Iterator<Item = &'a T>) -> Result<(), StateError> {
    let items: Vec<&T> = items.collect();
    let bytes = serde_json::to_vec_pretty(&items)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn put_rule(&self, rule: &BackupRule) -> Result<(), StateError> {
        let mut rules = self.rules.lock().await;
        rules.insert(rule.id.clone(), rule.clone());
        save(&self.dir.join(RULES_FILE), rules.values()).await
    }

    async fn delete_rule(&self, id: &str) -> Result<bool, StateError> {
        let mut rules = self.rules.lock().await;
        if rules.remove(id).is_none() {
            return Ok(false);
        }
        save(&self.dir.join(RULES_FILE), rules.values()).await?;
        Ok(true)
    }

    async fn list_rules(&self) -> Result<Vec<BackupRule>, StateError> {
        Ok(self.rules.lock().await.values().cloned().collect())
    }

    async fn put_job(&self, job: &Job) -> Result<(), StateError> {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.id.clone(), job.clone());
        save(&self.dir.join(JOBS_FILE), jobs.values()).await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StateError> {
        Ok(self.jobs.lock().await.values().cloned().collect())
    }
}

pub mod logs;
pub mod rule;
pub mod run;

use std::sync::Arc;

use vaultline_daemon::VaultlineConfig;
use vaultline_daemon::config::Backend;
use vaultline_eventlog::{EventLog, FileEventLog, MemoryEventLog};
use vaultline_state::{FileStateStore, MemoryStateStore, StateStore};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

pub async fn open_state(config: &VaultlineConfig) -> Result<Arc<dyn StateStore>, Box<dyn std::error::Error>> {
    Ok(match config.state.backend {
        Backend::File => Arc::new(FileStateStore::open(&config.state.directory).await?),
        Backend::Memory => Arc::new(MemoryStateStore::new()),
    })
}

pub async fn open_event_log(config: &VaultlineConfig) -> Result<Arc<dyn EventLog>, Box<dyn std::error::Error>> {
    Ok(match config.event_log.backend {
        Backend::File => Arc::new(FileEventLog::open(&config.event_log.path).await?),
        Backend::Memory => Arc::new(MemoryEventLog::new()),
    })
}

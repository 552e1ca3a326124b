use std::sync::Arc;

use tracing::info;
use vaultline_crypto::parse_master_key;
use vaultline_daemon::config::Backend;
use vaultline_daemon::{LocalTransfer, VaultlineConfig, load_keyring};
use vaultline_engine::JobEngine;

use super::{CommandResult, open_event_log, open_state};

pub async fn run(mut config: VaultlineConfig) -> CommandResult {
    let env = &config.encryption.master_key_env;
    let master_key = std::env::var(env)
        .ok()
        .map(|raw| parse_master_key(&raw).map_err(|e| format!("invalid {env}: {e}")))
        .transpose()?;
    let key_dir = match config.state.backend {
        Backend::File => Some(config.state.directory.as_path()),
        Backend::Memory => None,
    };
    let keyring = load_keyring(config.keyring_config(), master_key, key_dir).await?;

    let mut builder = JobEngine::builder()
        .config(config.engine_config())
        .scheduler(config.scheduler_config())
        .transfer(Arc::new(LocalTransfer::new(config.engine.chunk_size)))
        .state(open_state(&config).await?)
        .event_log(open_event_log(&config).await?)
        .keyring(Arc::new(keyring))
        .notification_policy(config.notifications.policy())
        .send_timeout(config.notifications.send_timeout());
    for channel in std::mem::take(&mut config.notifications.channels) {
        builder = builder.channel(channel);
    }
    let engine = builder.build()?;

    engine.start().await?;
    info!(
        rules = engine.list_rules().len(),
        max_concurrent_jobs = config.engine.max_concurrent_jobs,
        "vaultline running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    engine.stop().await;
    Ok(())
}

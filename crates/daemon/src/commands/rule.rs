//! Offline edits of the persisted rule set.
//!
//! These commands write to the state directory directly. A running daemon
//! picks the changes up the next time it starts.

use chrono::Utc;
use clap::{Args, Subcommand};
use vaultline_core::{BackupRule, LogCategory, NewLogEntry};
use vaultline_daemon::VaultlineConfig;
use vaultline_daemon::config::Backend;
use vaultline_engine::{EngineError, RuleStore};
use vaultline_eventlog::EventLog;
use vaultline_state::StateStore;

use super::{CommandResult, open_event_log, open_state};

#[derive(Args, Debug)]
pub struct RuleArgs {
    #[command(subcommand)]
    pub command: RuleCommand,
}

#[derive(Subcommand, Debug)]
pub enum RuleCommand {
    /// Add a rule, or replace the rule with the same id.
    Add(AddArgs),
    /// List stored rules.
    List,
    /// Remove a rule by id.
    Remove {
        /// Rule id.
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Display name.
    #[arg(long)]
    pub name: String,
    /// Directory to back up.
    #[arg(long)]
    pub source: String,
    /// Directory to write the backup into.
    #[arg(long)]
    pub destination: String,
    /// `hourly`, `daily`, `weekly`, `every 15m` or a cron expression.
    #[arg(long)]
    pub schedule: String,
    /// IANA timezone for calendar schedules.
    #[arg(long, default_value = "UTC")]
    pub timezone: String,
    /// Reuse an existing id to replace that rule.
    #[arg(long)]
    pub id: Option<String>,
    /// Glob of files to skip. Repeatable.
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,
    /// Store the rule disabled.
    #[arg(long)]
    pub disabled: bool,
    /// Write plaintext archives.
    #[arg(long)]
    pub no_encrypt: bool,
    /// Skip gzip compression.
    #[arg(long)]
    pub no_compress: bool,
}

impl AddArgs {
    fn to_rule(&self) -> BackupRule {
        let mut rule = BackupRule::new(&self.name, &self.source, &self.destination, &self.schedule)
            .with_timezone(&self.timezone)
            .with_enabled(!self.disabled)
            .with_encryption(!self.no_encrypt)
            .with_compression(!self.no_compress);
        if let Some(id) = &self.id {
            rule = rule.with_id(id);
        }
        for pattern in &self.exclude {
            rule = rule.with_exclude(pattern);
        }
        rule
    }
}

pub async fn run(config: &VaultlineConfig, args: &RuleArgs) -> CommandResult {
    if config.state.backend != Backend::File {
        return Err("rule commands need the file state backend".into());
    }
    let state = open_state(config).await?;
    let log = open_event_log(config).await?;

    match &args.command {
        RuleCommand::Add(add) => {
            let rule = store_rule(state.as_ref(), log.as_ref(), add.to_rule()).await?;
            println!("{}", rule.id);
        }
        RuleCommand::List => {
            let rules = state.list_rules().await?;
            println!("{} rules stored:", rules.len());
            for rule in &rules {
                println!("  {}", describe(rule));
            }
        }
        RuleCommand::Remove { id } => {
            let rule = remove_rule(state.as_ref(), log.as_ref(), id).await?;
            println!("Rule '{}' removed.", rule.name);
        }
    }
    Ok(())
}

/// Validate and persist `rule`, keeping `created_at` when it replaces a
/// stored rule.
pub async fn store_rule(
    state: &dyn StateStore,
    log: &dyn EventLog,
    mut rule: BackupRule,
) -> Result<BackupRule, EngineError> {
    let errors = RuleStore::validate(&rule);
    if !errors.is_empty() {
        return Err(EngineError::InvalidRule(errors));
    }
    let existing = state.list_rules().await?.into_iter().find(|r| r.id == rule.id);
    let replaced = existing.is_some();
    if let Some(existing) = existing {
        rule.created_at = existing.created_at;
        rule.updated_at = Utc::now();
    }
    state.put_rule(&rule).await?;

    let message = if replaced { "rule updated" } else { "rule created" };
    log.append(NewLogEntry::info(LogCategory::System, message).with_details(format!(
        "{} ({}): {} -> {}, {}",
        rule.name, rule.id, rule.source, rule.destination, rule.schedule
    )))
    .await?;
    Ok(rule)
}

pub async fn remove_rule(state: &dyn StateStore, log: &dyn EventLog, id: &str) -> Result<BackupRule, EngineError> {
    let rule = state
        .list_rules()
        .await?
        .into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| EngineError::RuleNotFound(id.to_owned()))?;
    state.delete_rule(id).await?;
    log.append(
        NewLogEntry::info(LogCategory::System, "rule deleted").with_details(format!("{} ({})", rule.name, rule.id)),
    )
    .await?;
    Ok(rule)
}

fn describe(rule: &BackupRule) -> String {
    let status = if rule.enabled { "ON " } else { "OFF" };
    let mut flags = Vec::new();
    if rule.compress {
        flags.push("gzip");
    }
    if rule.encrypted {
        flags.push("encrypted");
    }
    format!(
        "[{status}] {name} ({id}) {source} -> {destination} [{schedule} {tz}] {flags}",
        name = rule.name,
        id = rule.id,
        source = rule.source,
        destination = rule.destination,
        schedule = rule.schedule,
        tz = rule.timezone,
        flags = flags.join(","),
    )
}

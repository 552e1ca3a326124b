use std::io::Write;

use clap::Args;
use vaultline_core::{LogCategory, LogEntry, LogLevel};
use vaultline_daemon::VaultlineConfig;
use vaultline_daemon::config::Backend;
use vaultline_eventlog::{EventLog, LogQuery, export_csv};

use super::{CommandResult, open_event_log};

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Only entries at this level (info, success, warning, error).
    #[arg(long)]
    pub level: Option<LogLevel>,
    /// Only entries in this category (backup, system, network, security, notification).
    #[arg(long)]
    pub category: Option<LogCategory>,
    /// Only entries for this job id.
    #[arg(long)]
    pub job: Option<String>,
    /// Case-insensitive text search.
    #[arg(long)]
    pub search: Option<String>,
    /// Entries per page, newest first. Ignored with `--csv`.
    #[arg(long, default_value_t = 50)]
    pub limit: u32,
    /// Write every matching entry as CSV.
    #[arg(long)]
    pub csv: bool,
}

impl LogsArgs {
    fn query(&self) -> LogQuery {
        let mut query = LogQuery::default().with_limit(self.limit);
        if let Some(level) = self.level {
            query = query.with_level(level);
        }
        if let Some(category) = self.category {
            query = query.with_category(category);
        }
        if let Some(job) = &self.job {
            query = query.with_job(job);
        }
        if let Some(search) = &self.search {
            query = query.with_search(search);
        }
        query
    }
}

pub async fn run(config: &VaultlineConfig, args: &LogsArgs) -> CommandResult {
    if config.event_log.backend != Backend::File {
        return Err("the logs command needs the file event log backend".into());
    }
    let log = open_event_log(config).await?;
    let query = args.query();

    let stdout = std::io::stdout();
    if args.csv {
        export_csv(log.as_ref(), &query, stdout.lock()).await?;
        return Ok(());
    }
    print_page(log.as_ref(), &query, &mut stdout.lock()).await
}

async fn print_page(log: &dyn EventLog, query: &LogQuery, out: &mut impl Write) -> CommandResult {
    let page = log.query(query).await?;
    writeln!(out, "{} of {} matching entries:", page.entries.len(), page.total)?;
    for entry in &page.entries {
        writeln!(out, "{}", format_entry(entry))?;
    }
    Ok(())
}

fn format_entry(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} {:<7} {:<12} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.level.as_str(),
        entry.category.as_str(),
        entry.message
    );
    if let Some(name) = &entry.job_name {
        line.push_str(&format!(" [{name}]"));
    }
    if let Some(details) = &entry.details {
        line.push_str(&format!(": {details}"));
    }
    line
}

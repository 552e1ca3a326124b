use std::io::Write;

use vaultline_core::LogEntry;

use crate::error::LogError;
use crate::query::{LogQuery, MAX_PAGE_SIZE};
use crate::store::EventLog;

const HEADER: [&str; 6] = ["timestamp", "level", "category", "message", "details", "job"];

/// Write `entries` as CSV with a header row.
pub fn write_csv<W: Write>(entries: &[LogEntry], out: W) -> Result<(), LogError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(HEADER)?;
    for entry in entries {
        writer.write_record([
            entry.timestamp.to_rfc3339().as_str(),
            entry.level.as_str(),
            entry.category.as_str(),
            entry.message.as_str(),
            entry.details.as_deref().unwrap_or(""),
            entry.job_name.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Collect every entry matching `query`, ignoring its limit and offset.
pub async fn collect_all(log: &dyn EventLog, query: &LogQuery) -> Result<Vec<LogEntry>, LogError> {
    let mut all = Vec::new();
    let mut page_query = query.clone().with_limit(MAX_PAGE_SIZE);
    let mut offset = 0u32;
    loop {
        page_query.offset = Some(offset);
        let page = log.query(&page_query).await?;
        let fetched = page.entries.len();
        all.extend(page.entries);
        if fetched < MAX_PAGE_SIZE as usize {
            break;
        }
        offset = offset.saturating_add(MAX_PAGE_SIZE);
    }
    Ok(all)
}

/// Export every entry matching `query` as CSV.
pub async fn export_csv<W: Write>(log: &dyn EventLog, query: &LogQuery, out: W) -> Result<usize, LogError> {
    let entries = collect_all(log, query).await?;
    write_csv(&entries, out)?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use vaultline_core::{LogCategory, NewLogEntry};

    use super::*;
    use crate::memory::MemoryEventLog;

    #[test]
    fn csv_has_header_and_escapes() {
        let entries = vec![
            NewLogEntry::error(LogCategory::Backup, "job failed, retrying")
                .with_job("j1", "docs")
                .with_details("said \"no\"")
                .into_entry(1, Utc::now()),
        ];
        let mut out = Vec::new();
        write_csv(&entries, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "timestamp,level,category,message,details,job");
        let row = lines.next().unwrap();
        assert!(row.contains(",error,backup,\"job failed, retrying\",\"said \"\"no\"\"\",docs"));
    }

    #[tokio::test]
    async fn export_pages_through_everything() {
        let log = MemoryEventLog::new();
        for i in 0..1_205 {
            log.append(NewLogEntry::info(LogCategory::System, format!("e{i}")))
                .await
                .unwrap();
        }
        let mut out = Vec::new();
        let n = export_csv(&log, &LogQuery::default().with_limit(5), &mut out)
            .await
            .unwrap();
        assert_eq!(n, 1_205);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1_206);
    }
}

//! Append-only daily event logs
//!
//! One newline-delimited JSON file per UTC day (`YYYY-MM-DD.jsonl`). Existing
//! content is never rewritten. Readers skip lines that fail to parse, which
//! also covers a torn last line of a file that is still being appended to.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

use crate::analytics::models::{date_key, parse_date_key, Event};

const LOG_EXTENSION: &str = "jsonl";

/// Line counts from a single scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub events: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event to the log for `date`
    async fn append(&self, date: NaiveDate, event: &Event) -> Result<()>;

    /// Dates that have a log, most recent first
    async fn list_dates(&self) -> Result<Vec<NaiveDate>>;

    /// Stream every parseable event of `date` in append order
    ///
    /// A missing log yields zero events.
    async fn scan(
        &self,
        date: NaiveDate,
        visit: &mut (dyn FnMut(Event) + Send),
    ) -> Result<ScanStats>;

    /// Newest modification time across all logs
    async fn last_modified(&self) -> Result<Option<SystemTime>>;
}

fn encode_line(event: &Event) -> Result<String> {
    let mut line = serde_json::to_string(event).context("failed to encode event")?;
    line.push('\n');
    Ok(line)
}

fn decode_line(line: &str, stats: &mut ScanStats) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<Event>(line) {
        Ok(event) => {
            stats.events += 1;
            Some(event)
        }
        Err(e) => {
            stats.skipped += 1;
            debug!(error = %e, "skipping malformed event log line");
            None
        }
    }
}

pub struct FileEventLog {
    dir: PathBuf,
    /// Serializes appends so lines never interleave
    append_lock: Mutex<()>,
}

impl FileEventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn log_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.{LOG_EXTENSION}", date_key(date)))
    }

    async fn log_files(&self) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", self.dir.display()))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            if let Some(date) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(parse_date_key)
            {
                files.push((date, path));
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, date: NaiveDate, event: &Event) -> Result<()> {
        let line = encode_line(event)?;
        let path = self.log_path(date);

        let _guard = self.append_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", path.display()))?;
        file.flush().await?;

        Ok(())
    }

    async fn list_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates: Vec<NaiveDate> = self
            .log_files()
            .await?
            .into_iter()
            .map(|(date, _)| date)
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    async fn scan(
        &self,
        date: NaiveDate,
        visit: &mut (dyn FnMut(Event) + Send),
    ) -> Result<ScanStats> {
        let path = self.log_path(date);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ScanStats::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open {}", path.display()))
            }
        };

        let mut stats = ScanStats::default();
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            if read == 0 {
                break;
            }

            match std::str::from_utf8(&buf) {
                Ok(line) => {
                    if let Some(event) = decode_line(line, &mut stats) {
                        visit(event);
                    }
                }
                Err(_) => stats.skipped += 1,
            }
        }

        Ok(stats)
    }

    async fn last_modified(&self) -> Result<Option<SystemTime>> {
        let mut newest: Option<SystemTime> = None;
        for (_, path) in self.log_files().await? {
            let modified = tokio::fs::metadata(&path).await?.modified()?;
            newest = Some(newest.map_or(modified, |n| n.max(modified)));
        }
        Ok(newest)
    }
}

/// Volatile event log for tests and embedded use
#[derive(Default)]
pub struct MemoryEventLog {
    lines: Mutex<BTreeMap<NaiveDate, Vec<String>>>,
    modified: Mutex<Option<SystemTime>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw line verbatim, newline excluded
    pub async fn push_raw_line(&self, date: NaiveDate, line: impl Into<String>) {
        self.lines
            .lock()
            .await
            .entry(date)
            .or_default()
            .push(line.into());
        *self.modified.lock().await = Some(SystemTime::now());
    }

    /// Parsed events of one day, for assertions
    pub async fn events(&self, date: NaiveDate) -> Vec<Event> {
        let mut events = Vec::new();
        let mut stats = ScanStats::default();
        if let Some(lines) = self.lines.lock().await.get(&date) {
            events.extend(lines.iter().filter_map(|l| decode_line(l, &mut stats)));
        }
        events
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, date: NaiveDate, event: &Event) -> Result<()> {
        let mut line = encode_line(event)?;
        line.pop();
        self.push_raw_line(date, line).await;
        Ok(())
    }

    async fn list_dates(&self) -> Result<Vec<NaiveDate>> {
        Ok(self.lines.lock().await.keys().rev().copied().collect())
    }

    async fn scan(
        &self,
        date: NaiveDate,
        visit: &mut (dyn FnMut(Event) + Send),
    ) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        if let Some(lines) = self.lines.lock().await.get(&date) {
            for line in lines {
                if let Some(event) = decode_line(line, &mut stats) {
                    visit(event);
                }
            }
        }
        Ok(stats)
    }

    async fn last_modified(&self) -> Result<Option<SystemTime>> {
        Ok(*self.modified.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    fn event(ts: i64, uid: &str, country: &str) -> Event {
        Event {
            timestamp: ts,
            identifier: uid.to_string(),
            country: country.to_string(),
        }
    }

    async fn collect(log: &dyn EventLog, date: NaiveDate) -> (Vec<Event>, ScanStats) {
        let mut events = Vec::new();
        let stats = log.scan(date, &mut |e| events.push(e)).await.unwrap();
        (events, stats)
    }

    #[tokio::test]
    async fn test_append_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path().join("analytics"));

        log.append(day(25), &event(1, "u1", "NL")).await.unwrap();
        log.append(day(25), &event(2, "u2", "BE")).await.unwrap();

        let contents = std::fs::read_to_string(log.log_path(day(25))).unwrap();
        assert_eq!(
            contents,
            "{\"ts\":1,\"uid\":\"u1\",\"country\":\"NL\"}\n{\"ts\":2,\"uid\":\"u2\",\"country\":\"BE\"}\n"
        );
    }

    #[tokio::test]
    async fn test_list_dates_newest_first_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path());

        log.append(day(3), &event(1, "a", "XX")).await.unwrap();
        log.append(day(10), &event(1, "a", "XX")).await.unwrap();
        log.append(day(7), &event(1, "a", "XX")).await.unwrap();
        std::fs::write(dir.path().join("summary.json"), "{}").unwrap();
        std::fs::write(dir.path().join(".salt_2026-02-03"), "abc").unwrap();
        std::fs::write(dir.path().join("notes.jsonl"), "").unwrap();

        assert_eq!(log.list_dates().await.unwrap(), vec![day(10), day(7), day(3)]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path().join("nope"));

        assert!(log.list_dates().await.unwrap().is_empty());
        assert_eq!(log.last_modified().await.unwrap(), None);
        let (events, stats) = collect(&log, day(1)).await;
        assert!(events.is_empty());
        assert_eq!(stats, ScanStats::default());
    }

    #[tokio::test]
    async fn test_scan_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileEventLog::new(dir.path());
        std::fs::write(
            log.log_path(day(1)),
            "{\"ts\":1,\"uid\":\"u1\",\"country\":\"NL\"}\nnot json\n\n{\"ts\":2,\"uid\":\"u2\"}\n{\"ts\":3,\"ui",
        )
        .unwrap();

        let (events, stats) = collect(&log, day(1)).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].country, "XX");
        assert_eq!(stats, ScanStats { events: 2, skipped: 2 });
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FileEventLog::new(dir.path()));

        let mut handles = vec![];
        for i in 0..50 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                log.append(day(1), &event(i, &format!("user-{i:04}"), "NL"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let (events, stats) = collect(log.as_ref(), day(1)).await;
        assert_eq!(events.len(), 50);
        assert_eq!(stats.skipped, 0);
    }

    #[tokio::test]
    async fn test_memory_log_matches_file_semantics() {
        let log = MemoryEventLog::new();
        log.append(day(2), &event(1, "u1", "NL")).await.unwrap();
        log.push_raw_line(day(2), "garbage").await;
        log.append(day(1), &event(1, "u1", "NL")).await.unwrap();

        assert_eq!(log.list_dates().await.unwrap(), vec![day(2), day(1)]);
        let (events, stats) = collect(&log, day(2)).await;
        assert_eq!(events, vec![event(1, "u1", "NL")]);
        assert_eq!(stats.skipped, 1);
        assert!(log.last_modified().await.unwrap().is_some());
    }
}

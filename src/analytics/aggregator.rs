//! Daily summary aggregation over the event logs
//!
//! Summaries are a pure function of one day's log: the first sighting of an
//! identifier counts one unique user and one increment for the country it was
//! recorded with. Range runs rescan only recent days and merge them over the
//! persisted `summary.json`, keeping older dates untouched.
//!
//! Aggregation only reads logs and writes its own artifact, so it never
//! contends with ingestion.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::analytics::event_log::EventLog;
use crate::analytics::models::{date_key, DailySummary, Event, Summary};

/// State of the persisted summary artifact
enum Persisted {
    Missing,
    Malformed,
    Loaded(Summary),
}

pub struct SummaryAggregator {
    log: Arc<dyn EventLog>,
    summary_path: PathBuf,
    /// Serializes regenerations so two runs never race on the artifact
    run_lock: Mutex<()>,
}

impl SummaryAggregator {
    pub fn new(log: Arc<dyn EventLog>, summary_path: impl Into<PathBuf>) -> Self {
        Self {
            log,
            summary_path: summary_path.into(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    /// Summarize one day's log
    pub async fn summarize(&self, date: NaiveDate) -> Result<DailySummary> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut summary = DailySummary::default();

        let stats = self
            .log
            .scan(date, &mut |event: Event| {
                if event.identifier.is_empty() || seen.contains(&event.identifier) {
                    return;
                }
                seen.insert(event.identifier);
                summary.unique_users += 1;
                *summary.countries.entry(event.country).or_insert(0) += 1;
            })
            .await?;

        // Stable sort keeps first-encountered order among equal counts
        summary.countries.sort_by(|_, a, _, b| b.cmp(a));

        if stats.skipped > 0 {
            warn!(
                date = %date_key(date),
                skipped = stats.skipped,
                "skipped malformed event log lines"
            );
        }

        Ok(summary)
    }

    /// Rescan recent days and merge them into the persisted summary
    ///
    /// With `max_days`, only dates on or after `today - max_days` are
    /// rescanned; zero means every date. A missing or malformed artifact
    /// forces a full rescan. The merged summary is returned even if it cannot
    /// be written back.
    pub async fn summarize_range(&self, max_days: Option<u32>, today: NaiveDate) -> Result<Summary> {
        let _guard = self.run_lock.lock().await;
        let max_days = max_days.filter(|days| *days > 0);

        // Appends landing after this instant must leave the artifact stale
        let scan_started = SystemTime::now();

        let (mut summary, cutoff) = match self.load_persisted().await {
            Persisted::Loaded(summary) => {
                let cutoff = max_days.map(|days| today - ChronoDuration::days(i64::from(days)));
                (summary, cutoff)
            }
            Persisted::Missing => (Summary::new(), None),
            Persisted::Malformed => {
                warn!(
                    path = %self.summary_path.display(),
                    "discarding malformed summary, rebuilding from event logs"
                );
                (Summary::new(), None)
            }
        };

        let dates: Vec<NaiveDate> = self
            .log
            .list_dates()
            .await?
            .into_iter()
            .filter(|date| cutoff.map_or(true, |cutoff| *date >= cutoff))
            .collect();

        if dates.is_empty() {
            debug!("no event logs to summarize");
        }

        for date in &dates {
            let day = self.summarize(*date).await?;
            debug!(
                date = %date_key(*date),
                unique_users = day.unique_users,
                countries = day.countries.len(),
                "summarized day"
            );
            summary.insert(date_key(*date), day);
        }

        summary.sort_by(|a, _, b, _| b.cmp(a));

        if let Err(e) = self.persist(&summary, scan_started).await {
            error!(
                path = %self.summary_path.display(),
                error = %e,
                "failed to write summary, serving it from memory"
            );
        } else {
            info!(
                processed_days = dates.len(),
                total_days = summary.len(),
                "summary updated"
            );
        }

        Ok(summary)
    }

    /// Whether the artifact is absent or older than some event log
    ///
    /// The artifact carries the time its scan started as its mtime, so an
    /// append racing a regeneration is never hidden.
    pub async fn is_stale(&self) -> bool {
        let summary_modified = match tokio::fs::metadata(&self.summary_path).await {
            Ok(meta) => match meta.modified() {
                Ok(modified) => modified,
                Err(_) => return true,
            },
            Err(_) => return true,
        };

        match self.log.last_modified().await {
            Ok(Some(log_modified)) => log_modified >= summary_modified,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "failed to inspect event logs, treating summary as stale");
                true
            }
        }
    }

    /// Current summary, regenerating the recent range if the artifact is stale
    pub async fn current(&self, max_days: Option<u32>, today: NaiveDate) -> Result<Summary> {
        if self.is_stale().await {
            return self.summarize_range(max_days, today).await;
        }

        match self.load_persisted().await {
            Persisted::Loaded(summary) => Ok(summary),
            Persisted::Missing | Persisted::Malformed => self.summarize_range(max_days, today).await,
        }
    }

    async fn load_persisted(&self) -> Persisted {
        let raw = match tokio::fs::read_to_string(&self.summary_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Persisted::Missing,
            Err(e) => {
                warn!(path = %self.summary_path.display(), error = %e, "failed to read summary");
                return Persisted::Malformed;
            }
        };

        match serde_json::from_str::<Summary>(&raw) {
            Ok(summary) => Persisted::Loaded(summary),
            Err(e) => {
                debug!(error = %e, "summary does not parse");
                Persisted::Malformed
            }
        }
    }

    /// Write via a temporary file and rename so readers never see a torn artifact
    async fn persist(&self, summary: &Summary, scan_started: SystemTime) -> Result<()> {
        if let Some(parent) = self.summary_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(summary).context("failed to encode summary")?;
        let tmp_path = self.summary_path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(json.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.flush().await?;
        file.into_std()
            .await
            .set_modified(scan_started)
            .with_context(|| format!("failed to stamp {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.summary_path)
            .await
            .with_context(|| format!("failed to replace {}", self.summary_path.display()))?;

        Ok(())
    }

    /// Start the daily report task
    ///
    /// Runs `summarize_range(max_days)` every day at `hour_utc:00` until the
    /// shutdown channel flips to true.
    pub fn start_report_task(
        self: Arc<Self>,
        hour_utc: u32,
        max_days: u32,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_run_after(now, hour_utc);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(next_run = %next, "scheduled analytics report");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        let today = Utc::now().date_naive();
                        match self.summarize_range(Some(max_days), today).await {
                            Ok(summary) => info!(days = summary.len(), "scheduled analytics report finished"),
                            Err(e) => error!(error = %e, "scheduled analytics report failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Analytics report task shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Next `hour_utc:00:00` strictly after `now`
pub fn next_run_after(now: DateTime<Utc>, hour_utc: u32) -> DateTime<Utc> {
    let hour = hour_utc.min(23);
    let today = now.date_naive();

    [today, today + ChronoDuration::days(1)]
        .into_iter()
        .filter_map(|date| date.and_hms_opt(hour, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .find(|candidate| *candidate > now)
        .unwrap_or_else(|| now + ChronoDuration::days(1))
}

//! Ping ingestion
//!
//! `PingRecorder` owns the dedup window and wires identity resolution, the
//! event log and the durable identity set together. `record_ping` is the
//! request boundary: every failure is logged once with its kind and absorbed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analytics::aggregator::SummaryAggregator;
use crate::analytics::dedup::DedupWindow;
use crate::analytics::error::{IngestError, IngestResult};
use crate::analytics::event_log::{EventLog, FileEventLog};
use crate::analytics::identity::IdentityResolver;
use crate::analytics::models::{Event, PingOutcome, Summary, UNKNOWN_COUNTRY};
use crate::analytics::salt::{FileSaltStore, SaltStore};
use crate::config::AnalyticsConfig;
use crate::storage::{IdentityStore, StorageResult};

/// Accept two ASCII letters (upper-cased), anything else becomes "XX"
fn normalize_country(country: &str) -> String {
    let country = country.trim();
    if country.len() == 2 && country.chars().all(|c| c.is_ascii_alphabetic()) {
        country.to_ascii_uppercase()
    } else {
        UNKNOWN_COUNTRY.to_string()
    }
}

pub struct PingRecorder {
    resolver: IdentityResolver,
    dedup: DedupWindow,
    log: Arc<dyn EventLog>,
    identities: Arc<dyn IdentityStore>,
    aggregator: Arc<SummaryAggregator>,
}

impl PingRecorder {
    pub fn new(
        salts: Arc<dyn SaltStore>,
        log: Arc<dyn EventLog>,
        identities: Arc<dyn IdentityStore>,
        summary_path: impl Into<PathBuf>,
        dedup: DedupWindow,
    ) -> Self {
        let aggregator = Arc::new(SummaryAggregator::new(Arc::clone(&log), summary_path));

        Self {
            resolver: IdentityResolver::new(salts),
            dedup,
            log,
            identities,
            aggregator,
        }
    }

    /// File-backed recorder rooted at the configured analytics directory
    pub fn from_config(config: &AnalyticsConfig, identities: Arc<dyn IdentityStore>) -> Self {
        Self::new(
            Arc::new(FileSaltStore::new(&config.data_dir)),
            Arc::new(FileEventLog::new(&config.data_dir)),
            identities,
            config.summary_path(),
            DedupWindow::new(config.dedup_window_secs, config.dedup_high_water),
        )
    }

    pub fn aggregator(&self) -> Arc<SummaryAggregator> {
        Arc::clone(&self.aggregator)
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    /// Record a ping observed now; never fails
    pub async fn record_ping(&self, raw_address: &str, trusted_device_id: Option<&str>, country: &str) {
        self.record_ping_at(raw_address, trusted_device_id, country, Utc::now())
            .await;
    }

    /// Record a ping observed at `now`; never fails
    pub async fn record_ping_at(
        &self,
        raw_address: &str,
        trusted_device_id: Option<&str>,
        country: &str,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self
            .try_record_ping_at(raw_address, trusted_device_id, country, now)
            .await
        {
            warn!(kind = e.kind(), error = %e, "dropping analytics ping");
        }
    }

    /// Record a ping, surfacing the failure kind
    pub async fn try_record_ping_at(
        &self,
        raw_address: &str,
        trusted_device_id: Option<&str>,
        country: &str,
        now: DateTime<Utc>,
    ) -> IngestResult<PingOutcome> {
        let date = now.date_naive();
        let timestamp = now.timestamp();

        let identity = self
            .resolver
            .resolve(raw_address, trusted_device_id, date)
            .await?;

        if !self.dedup.should_record(&identity.id, timestamp) {
            debug!(trusted = identity.trusted, "suppressed duplicate ping");
            return Ok(PingOutcome::Suppressed);
        }

        let event = Event {
            timestamp,
            identifier: identity.id,
            country: normalize_country(country),
        };

        if let Err(e) = self.log.append(date, &event).await {
            // Let the next ping from this identifier try again
            self.dedup.forget(&event.identifier, timestamp);
            return Err(IngestError::storage(e));
        }

        let new_lifetime_user = if identity.trusted {
            self.identities
                .insert_if_absent(&event.identifier, timestamp)
                .await
                .map_err(IngestError::storage)?
        } else {
            false
        };

        debug!(
            trusted = identity.trusted,
            country = %event.country,
            new_lifetime_user,
            "recorded analytics ping"
        );

        Ok(PingOutcome::Recorded { new_lifetime_user })
    }

    /// Summary of recent days, regenerated when stale
    pub async fn summary(&self, max_days: Option<u32>) -> Result<Summary> {
        self.aggregator
            .current(max_days, Utc::now().date_naive())
            .await
    }

    /// Distinct trusted devices ever seen
    pub async fn lifetime_user_count(&self) -> StorageResult<u64> {
        self.identities.count().await
    }
}

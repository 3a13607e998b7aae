//! Rebuild the durable identity set from existing event logs

use anyhow::Result;
use tracing::{debug, info};

use crate::analytics::event_log::EventLog;
use crate::analytics::identity::ANONYMOUS_ID_LEN;
use crate::analytics::models::{date_key, Event};
use crate::storage::IdentityStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub days: usize,
    pub scanned: usize,
    pub skipped_anonymous: usize,
    pub inserted: usize,
}

/// Whether an identifier has the shape of a salted address hash
pub fn looks_anonymous(identifier: &str) -> bool {
    identifier.len() == ANONYMOUS_ID_LEN && identifier.chars().all(|c| c.is_ascii_hexdigit())
}

/// Insert every trusted identifier found in the logs, oldest day first, using
/// the logged timestamp as its first-seen time.
pub async fn backfill_identities(
    log: &dyn EventLog,
    store: &dyn IdentityStore,
) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();

    let mut dates = log.list_dates().await?;
    dates.reverse();

    for date in dates {
        let mut events: Vec<Event> = Vec::new();
        log.scan(date, &mut |event: Event| events.push(event)).await?;
        report.days += 1;

        for event in events {
            if event.identifier.is_empty() {
                continue;
            }
            report.scanned += 1;

            if looks_anonymous(&event.identifier) {
                report.skipped_anonymous += 1;
                continue;
            }

            if store
                .insert_if_absent(&event.identifier, event.timestamp)
                .await?
            {
                report.inserted += 1;
            }
        }

        debug!(date = %date_key(date), "backfilled day");
    }

    info!(
        days = report.days,
        scanned = report.scanned,
        skipped_anonymous = report.skipped_anonymous,
        inserted = report.inserted,
        "identity backfill finished"
    );

    Ok(report)
}

//! Anonymous usage analytics
//!
//! Pings are turned into a per-day identity, filtered through a dedup window
//! and appended to one JSONL log per day. Trusted device ids also land in the
//! durable identity set. Summaries are derived from the logs on demand or on a
//! daily schedule.

pub mod aggregator;
pub mod backfill;
pub mod dedup;
pub mod error;
pub mod event_log;
pub mod geoip;
pub mod identity;
pub mod ingest;
pub mod ip_extractor;
pub mod models;
pub mod salt;

pub use aggregator::SummaryAggregator;
pub use dedup::DedupWindow;
pub use error::{IngestError, IngestResult};
pub use event_log::{EventLog, FileEventLog, MemoryEventLog};
pub use geoip::{resolve_country, CountryResolver, GeoIpService};
pub use identity::IdentityResolver;
pub use ingest::PingRecorder;
pub use ip_extractor::extract_client_ip;
pub use models::{DailySummary, Event, PingOutcome, Summary};
pub use salt::{FileSaltStore, MemorySaltStore, SaltStore};

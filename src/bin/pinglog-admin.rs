use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pinglog::analytics::backfill::backfill_identities;
use pinglog::analytics::{FileEventLog, SummaryAggregator};
use pinglog::config::Config;
use pinglog::storage::{IdentityStore, SqliteStorage};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pinglog-admin")]
#[command(about = "Pinglog analytics maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate the summary artifact and print recent days
    Report {
        /// Days to reprocess (defaults to REPORT_MAX_DAYS)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Rebuild the lifetime identity set from the event logs
    Backfill,
    /// Print the number of distinct trusted devices ever seen
    TotalUsers,
}

const PRINTED_DAYS: usize = 7;
const PRINTED_COUNTRIES: usize = 3;

async fn open_identities(config: &Config) -> Result<SqliteStorage> {
    let storage = SqliteStorage::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to open identity store")?;
    storage.init().await?;
    Ok(storage)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Report { days } => {
            let log = Arc::new(FileEventLog::new(&config.analytics.data_dir));
            let aggregator = SummaryAggregator::new(log, config.analytics.summary_path());
            let days = days.unwrap_or(config.analytics.report_max_days);
            let summary = aggregator
                .summarize_range(Some(days), Utc::now().date_naive())
                .await?;

            println!(
                "✓ Wrote summary for {} day(s) to {}",
                summary.len(),
                aggregator.summary_path().display()
            );
            for (date, day) in summary.iter().take(PRINTED_DAYS) {
                let top: Vec<String> = day
                    .top_countries(PRINTED_COUNTRIES)
                    .into_iter()
                    .map(|(country, count)| format!("{} {}", country, count))
                    .collect();
                println!("  {}  {:>6} users  {}", date, day.unique_users, top.join(", "));
            }
        }
        Commands::Backfill => {
            let log = FileEventLog::new(&config.analytics.data_dir);
            let storage = open_identities(&config).await?;
            let report = backfill_identities(&log, &storage).await?;

            println!(
                "✓ Scanned {} event(s) across {} day(s): {} inserted, {} anonymous skipped",
                report.scanned, report.days, report.inserted, report.skipped_anonymous
            );
            println!("  Total unique users: {}", storage.count().await?);
        }
        Commands::TotalUsers => {
            let storage = open_identities(&config).await?;
            println!("{}", storage.count().await?);
        }
    }

    Ok(())
}

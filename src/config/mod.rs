use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub payload: PayloadConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Capacity of the in-memory membership cache in front of the identity set
    pub identity_cache_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConfig {
    /// JSON document served by `/data.json`
    pub data_json_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    None,
    /// Trust `X-Forwarded-For` set by a reverse proxy
    Forwarded,
    /// Trust `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Directory holding daily event logs, salts and `summary.json`
    pub data_dir: PathBuf,
    pub geoip_country_db_path: Option<String>,
    pub dedup_window_secs: i64,
    pub dedup_high_water: usize,
    /// Days reprocessed when `/api/summary` finds a stale artifact
    pub summary_max_days: u32,
    pub report_hour_utc: u32,
    pub report_max_days: u32,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub num_trusted_proxies: Option<usize>,
}

impl AnalyticsConfig {
    pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 3500;
    pub const DEFAULT_DEDUP_HIGH_WATER: usize = 1000;

    pub fn summary_path(&self) -> PathBuf {
        self.data_dir.join("summary.json")
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./analytics"),
            geoip_country_db_path: None,
            dedup_window_secs: Self::DEFAULT_DEDUP_WINDOW_SECS,
            dedup_high_water: Self::DEFAULT_DEDUP_HIGH_WATER,
            summary_max_days: 30,
            report_hour_utc: 3,
            report_max_days: 90,
            trusted_proxy_mode: TrustedProxyMode::Forwarded,
            num_trusted_proxies: None,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = AnalyticsConfig::default();

        let database_url = env_or("USERS_DATABASE_URL", "sqlite://./users.db?mode=rwc");
        let max_connections = env_parse("USERS_DB_MAX_CONNECTIONS", 5u32)?;
        let identity_cache_entries = env_parse("IDENTITY_CACHE_ENTRIES", 100_000u64)?;

        let api_host = env_or("API_HOST", "127.0.0.1");
        let api_port = env_parse("API_PORT", 8001u16)?;

        let data_json_path = PathBuf::from(env_or("PINGLOG_DATA_JSON", "./data.json"));

        let data_dir = std::env::var("ANALYTICS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let geoip_country_db_path = std::env::var("GEOIP_COUNTRY_DB_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty());

        let dedup_window_secs = env_parse("DEDUP_WINDOW_SECS", defaults.dedup_window_secs)?;
        if dedup_window_secs <= 0 {
            anyhow::bail!("DEDUP_WINDOW_SECS must be positive, got {dedup_window_secs}");
        }
        let dedup_high_water = env_parse("DEDUP_HIGH_WATER", defaults.dedup_high_water)?;

        let summary_max_days = env_parse("SUMMARY_MAX_DAYS", defaults.summary_max_days)?;
        let report_hour_utc = env_parse("REPORT_HOUR_UTC", defaults.report_hour_utc)?;
        if report_hour_utc > 23 {
            anyhow::bail!("REPORT_HOUR_UTC must be between 0 and 23, got {report_hour_utc}");
        }
        let report_max_days = env_parse("REPORT_MAX_DAYS", defaults.report_max_days)?;

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "forwarded")
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "forwarded" | "standard" => TrustedProxyMode::Forwarded,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'forwarded'. Supported values: none, forwarded, cloudflare"
                );
                TrustedProxyMode::Forwarded
            }
        };

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .map(|v| {
                v.trim()
                    .parse::<usize>()
                    .context("NUM_TRUSTED_PROXIES must be a non-negative integer")
            })
            .transpose()?;

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections,
                identity_cache_entries,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            payload: PayloadConfig { data_json_path },
            analytics: AnalyticsConfig {
                data_dir,
                geoip_country_db_path,
                dedup_window_secs,
                dedup_high_water,
                summary_max_days,
                report_hour_utc,
                report_max_days,
                trusted_proxy_mode,
                num_trusted_proxies,
            },
        })
    }
}

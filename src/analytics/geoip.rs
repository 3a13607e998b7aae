//! Country lookup using a MaxMind GeoLite2/GeoIP2 Country (or City) MMDB
//!
//! Private, loopback and link-local addresses are never looked up and always
//! resolve to the "XX" sentinel, as does any failure.

use anyhow::{Context, Result};
use ipnet::IpNet;
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::analytics::error::IngestError;
use crate::analytics::models::UNKNOWN_COUNTRY;

static NON_ROUTABLE: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect()
});

/// Whether an address can never have a real-world location
pub fn is_non_routable(ip: IpAddr) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    };
    NON_ROUTABLE.iter().any(|net| net.contains(&ip))
}

/// Geography lookup capability
pub trait CountryResolver: Send + Sync {
    /// ISO country code for `ip`, `None` if the database has no answer
    fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>, IngestError>;
}

/// Resolve a raw client address to a country code, degrading to "XX"
pub fn resolve_country(resolver: Option<&dyn CountryResolver>, raw_address: &str) -> String {
    let Ok(ip) = raw_address.trim().parse::<IpAddr>() else {
        debug!(address = %raw_address, "unparseable client address, country unknown");
        return UNKNOWN_COUNTRY.to_string();
    };

    if is_non_routable(ip) {
        debug!(%ip, "private or internal address, country unknown");
        return UNKNOWN_COUNTRY.to_string();
    }

    let Some(resolver) = resolver else {
        debug!(kind = IngestError::GeoUnavailable.kind(), "no geo resolver configured");
        return UNKNOWN_COUNTRY.to_string();
    };

    match resolver.lookup_country(ip) {
        Ok(Some(code)) if code.len() == 2 => code.to_ascii_uppercase(),
        Ok(_) => UNKNOWN_COUNTRY.to_string(),
        Err(e) => {
            warn!(%ip, kind = e.kind(), error = %e, "country lookup failed");
            UNKNOWN_COUNTRY.to_string()
        }
    }
}

/// GeoIP lookup service backed by a memory-mapped database
#[derive(Clone)]
pub struct GeoIpService {
    reader: Arc<Reader<Mmap>>,
}

impl GeoIpService {
    /// Open a Country or City `.mmdb` file
    pub fn new(country_path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(country_path) }
            .with_context(|| format!("Failed to open GeoIP database at {}", country_path))?;

        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Open the database if a path is configured, logging instead of failing
    pub fn open_optional(country_path: Option<&str>) -> Option<Self> {
        let path = country_path?;
        match Self::new(path) {
            Ok(service) => Some(service),
            Err(e) => {
                warn!(error = %e, "GeoIP database unavailable, countries will be recorded as XX");
                None
            }
        }
    }
}

impl CountryResolver for GeoIpService {
    fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>, IngestError> {
        let result = self.reader.lookup(ip).map_err(|e| {
            debug!(%ip, error = %e, "GeoIP lookup error");
            IngestError::GeoUnavailable
        })?;

        // Country fields are a subset of every GeoIP2 database layout
        match result.decode::<geoip2::Country>() {
            Ok(Some(country)) => Ok(country.country.iso_code.map(|s| s.to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(IngestError::MalformedRecord(e.to_string())),
        }
    }
}

//! Client IP extraction from HTTP headers
//!
//! The service normally sits behind a reverse proxy that sets
//! `X-Forwarded-For`. The leftmost entry is the client unless a number of
//! trusted hops is configured, in which case that many entries are skipped
//! from the right. Falls back to the socket address.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Extract the client IP address according to the trust configuration
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &AnalyticsConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Forwarded => {
            extract_from_x_forwarded_for(headers, config.num_trusted_proxies).unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

/// Raw `X-Forwarded-For` header value, for diagnostics
pub fn forwarded_for_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_from_x_forwarded_for(headers: &HeaderMap, num_trusted: Option<usize>) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    match num_trusted {
        Some(num_trusted) if ips.len() > num_trusted => Some(ips[ips.len() - num_trusted - 1]),
        _ => ips.first().copied(),
    }
}

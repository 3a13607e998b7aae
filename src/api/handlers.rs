use axum::{
    extract::{rejection::QueryRejection, ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::analytics::geoip::{resolve_country, CountryResolver};
use crate::analytics::ip_extractor::{extract_client_ip, forwarded_for_header};
use crate::analytics::{PingRecorder, Summary};
use crate::config::{AnalyticsConfig, PayloadConfig};

pub struct AppState {
    pub recorder: Arc<PingRecorder>,
    pub geoip: Option<Arc<dyn CountryResolver>>,
    pub analytics: AnalyticsConfig,
    pub payload: PayloadConfig,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
pub struct SummaryQuery {
    pub days: Option<u32>,
}

#[derive(Serialize)]
pub struct TotalUsersResponse {
    pub total_users: u64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub geoip: bool,
    pub data_json: bool,
    pub users_db: bool,
}

#[derive(Serialize)]
pub struct DebugIpResponse {
    pub raw_ip: String,
    pub country: String,
    pub x_forwarded_for: Option<String>,
    pub remote_addr: String,
    pub geoip_available: bool,
}

fn json_error(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// First `uid` in the query string, if any
///
/// A query string that cannot be decoded is treated as carrying no uid.
fn trusted_uid(query: &Result<Query<Vec<(String, String)>>, QueryRejection>) -> Option<&str> {
    match query {
        Ok(Query(pairs)) => pairs
            .iter()
            .find(|(key, _)| key == "uid")
            .map(|(_, value)| value.as_str()),
        Err(e) => {
            debug!(error = %e, "ignoring undecodable query string");
            None
        }
    }
}

/// Serve the data payload, recording an analytics ping first
///
/// Analytics is best-effort: `record_ping` absorbs every failure and the
/// query string is read leniently, so the payload is served regardless.
pub async fn serve_data(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let client_ip = extract_client_ip(&headers, addr.ip(), &state.analytics).to_string();
    let country = resolve_country(state.geoip.as_deref(), &client_ip);
    state
        .recorder
        .record_ping(&client_ip, trusted_uid(&query), &country)
        .await;

    match tokio::fs::read(&state.payload.data_json_path).await {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response(),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            json_error(StatusCode::NOT_FOUND, "data.json not found")
        }
        Err(e) => {
            tracing::error!(path = %state.payload.data_json_path.display(), error = %e, "failed to read data payload");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read data.json")
        }
    }
}

/// Daily summaries, regenerated if stale
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Summary>, (StatusCode, Json<ErrorResponse>)> {
    let days = query.days.unwrap_or(state.analytics.summary_max_days);

    match state.recorder.summary(Some(days)).await {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => {
            tracing::error!(error = %e, "failed to build analytics summary");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to build summary: {}", e),
                }),
            ))
        }
    }
}

/// Lifetime count of distinct trusted devices
pub async fn get_total_users(State(state): State<Arc<AppState>>) -> Response {
    match state.recorder.lifetime_user_count().await {
        Ok(total_users) => Json(TotalUsersResponse { total_users }).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to count unique users");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TotalUsersResponse { total_users: 0 }),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let data_json = tokio::fs::try_exists(&state.payload.data_json_path)
        .await
        .unwrap_or(false);
    let users_db = state.recorder.lifetime_user_count().await.is_ok();

    Json(HealthResponse {
        status: "ok".to_string(),
        geoip: state.geoip.is_some(),
        data_json,
        users_db,
    })
}

/// Show which client address and country a request resolves to
pub async fn debug_ip(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<DebugIpResponse> {
    let client_ip = extract_client_ip(&headers, addr.ip(), &state.analytics).to_string();
    let country = resolve_country(state.geoip.as_deref(), &client_ip);

    Json(DebugIpResponse {
        raw_ip: client_ip,
        country,
        x_forwarded_for: forwarded_for_header(&headers),
        remote_addr: addr.ip().to_string(),
        geoip_available: state.geoip.is_some(),
    })
}

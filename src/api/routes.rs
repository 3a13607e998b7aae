use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::handlers::{debug_ip, get_summary, get_total_users, health_check, serve_data, AppState};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    let reporting_routes = Router::new()
        .route("/api/summary", get(get_summary))
        .route("/api/total_users", get(get_total_users))
        .layer(cors)
        .with_state(Arc::clone(&state));

    Router::new()
        .route("/data.json", get(serve_data))
        .route("/health", get(health_check))
        .route("/debug/ip", get(debug_ip))
        .with_state(state)
        .merge(reporting_routes)
}

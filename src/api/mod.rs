mod handlers;
mod routes;

pub use handlers::AppState;
pub use routes::create_api_router;

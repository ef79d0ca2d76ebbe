use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod background;
pub mod push;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::jobs::create_router())
        .merge(routes::billing::create_router())
        .merge(routes::health::create_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! REST API module using Axum
//!
//! HTTP surface for the operator UI: device control, energy reports, rule
//! management, and the realtime SSE stream. Authentication happens in an
//! upstream proxy; see `handlers::Caller`.

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::AppContext;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the complete application router.
pub fn create_app(ctx: AppContext) -> Router {
    // CORS configuration (permissive for development)
    let cors = CorsLayer::permissive();

    Router::new()
        .nest("/api", routes::api_routes(ctx))
        .merge(routes::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

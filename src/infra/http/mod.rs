pub mod api;
mod middleware;

pub use api::{ApiState, ClientLimit, build_api_router};
pub use middleware::RequestContext;

use axum::{Router, middleware as axum_middleware, routing::get};

/// The full service: health probe plus the `/api/v1` surface, wrapped in the
/// request-context and response-logging layers.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(api::handlers::health))
        .merge(build_api_router(state))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

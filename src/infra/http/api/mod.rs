pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use state::{ApiState, ClientLimit};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub fn build_api_router(state: ApiState) -> Router {
    let rate_state = state.clone();

    Router::new()
        .route("/api/v1/cache/status", get(handlers::cache_status))
        .route("/api/v1/cache/cleanup", post(handlers::cache_cleanup))
        .route("/api/v1/rate-limits", get(handlers::rate_limits))
        .route("/api/v1/translate", post(handlers::translate))
        .route(
            "/api/v1/articles",
            get(handlers::article_by_url).post(handlers::articles),
        )
        .route("/api/v1/feed", get(handlers::feed))
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            rate_state,
            middleware::api_rate_limit,
        ))
}

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::application::rate_limit::client_ip;

use super::error::ApiError;
use super::state::ApiState;

/// Count the request against the caller's window and reject once it is spent.
pub async fn api_rate_limit(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let limit = &state.client_limit;
    let ip = client_ip(request.headers());

    let current = limit.limiter.count(&ip).await;
    if current >= u64::from(limit.max_requests) {
        warn!(
            target = "newscache::api::ratelimit",
            client_ip = %ip,
            path = %request.uri().path(),
            current,
            limit = limit.max_requests,
            "client rate limit exceeded"
        );
        return ApiError::rate_limited(
            limit.limiter.retry_after().as_secs().max(1),
            current,
            limit.max_requests,
        );
    }

    if let Err(err) = limit.limiter.increment(&ip).await {
        warn!(
            target = "newscache::api::ratelimit",
            client_ip = %ip,
            error = %err,
            "failed to record client request"
        );
    }

    next.run(request).await
}

use crate::application::articles::SourceError;
use crate::application::error::{AppError, ErrorReport};
use crate::application::rate_limit::LimitError;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u32>,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const QUOTA_EXHAUSTED: &str = "quota_exhausted";
    pub const UNKNOWN_FUNCTION: &str = "unknown_function";
    pub const NOT_CONFIGURED: &str = "not_configured";
    pub const UPSTREAM: &str = "upstream_error";
    pub const STORAGE: &str = "storage_unavailable";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    counts: Option<(u64, u32)>,
    retry_after: Option<u64>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            counts: None,
            retry_after: None,
            report: None,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_configured(operation: &'static str) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::NOT_CONFIGURED,
            "Operation not configured",
            Some(format!("no {operation} source is configured")),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Per-client window exhausted.
    pub fn rate_limited(retry_after: u64, current: u64, limit: u32) -> Response {
        let mut error = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMITED,
            "Rate limit exceeded",
            Some(format!("Retry after {retry_after} seconds")),
        );
        error.retry_after = Some(retry_after);
        error.report = Some(ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: current={current} limit={limit} retry_after={retry_after}"),
        ));
        error.into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = err.status_code();
        let code = match &err {
            AppError::Validation(_) => codes::BAD_REQUEST,
            AppError::Source(SourceError::NotFound(_)) => codes::NOT_FOUND,
            AppError::Limit(LimitError::Exceeded { .. }) => codes::QUOTA_EXHAUSTED,
            AppError::Source(_) => codes::UPSTREAM,
            AppError::Cache(_) | AppError::Limit(LimitError::Storage(_)) => codes::STORAGE,
            _ if status.is_server_error() => codes::INTERNAL,
            _ => codes::BAD_REQUEST,
        };
        let hint = match &err {
            AppError::Validation(message) => Some(message.clone()),
            AppError::Source(source) => Some(source.to_string()),
            _ => None,
        };

        let mut api = ApiError::new(status, code, err.presentation_message(), hint);
        if let AppError::Limit(LimitError::Exceeded { current, limit, .. }) = &err {
            api.counts = Some((*current, *limit));
        }
        api.retry_after = err.retry_after_secs();
        api.report = Some(ErrorReport::from_error("infra::http::api", status, &err));
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report.unwrap_or_else(|| {
            ErrorReport::from_message(
                "infra::http::api",
                self.status,
                format!(
                    "{}: {}",
                    self.code,
                    self.hint.as_deref().unwrap_or(self.message)
                ),
            )
        });
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
            current_count: self.counts.map(|(current, _)| current),
            daily_limit: self.counts.map(|(_, limit)| limit),
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn exhausted_quota_body_carries_counts() {
        let err = AppError::from(LimitError::Exceeded {
            subject: "article_scraper".into(),
            current: 50,
            limit: 50,
            retry_after: Duration::from_secs(3600),
        });
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "3600");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "quota_exhausted");
        assert_eq!(json["current_count"], 50);
        assert_eq!(json["daily_limit"], 50);
    }

    #[test]
    fn validation_message_becomes_the_hint() {
        let api = ApiError::from(AppError::validation("article_id and paragraphs required"));
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.code(), codes::BAD_REQUEST);
        assert_eq!(api.hint.as_deref(), Some("article_id and paragraphs required"));
    }

    #[test]
    fn missing_upstream_content_is_not_found() {
        let api = ApiError::from(AppError::from(SourceError::NotFound("feed".into())));
        assert_eq!(api.status(), StatusCode::NOT_FOUND);
        assert_eq!(api.code(), codes::NOT_FOUND);

        let api = ApiError::from(AppError::from(SourceError::Unavailable("timeout".into())));
        assert_eq!(api.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(api.code(), codes::UPSTREAM);
    }
}

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::application::articles::DEFAULT_LANGUAGE;
use crate::application::maintenance::SweepScope;
use crate::application::rate_limit::QuotaUsage;
use crate::application::translation::TranslationRequest;

use super::error::{ApiError, codes};
use super::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default)]
    pub scope: SweepScope,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitQuery {
    pub function_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArticleQuery {
    pub url: Option<String>,
    pub language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArticleBody {
    #[serde(default)]
    pub urls: Vec<String>,
    pub language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub force_reload: bool,
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn cache_status(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let status = state.maintenance.status().await?;
    Ok(Json(status).into_response())
}

pub async fn cache_cleanup(
    State(state): State<ApiState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Response, ApiError> {
    let report = state.maintenance.sweep(query.scope).await?;
    Ok(Json(report).into_response())
}

pub async fn rate_limits(
    State(state): State<ApiState>,
    Query(query): Query<RateLimitQuery>,
) -> Result<Response, ApiError> {
    if let Some(name) = query.function_name {
        let Some(limit) = state.function_quotas.limit_for(&name) else {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::UNKNOWN_FUNCTION,
                "Unknown function",
                Some(format!("unknown function: {name}")),
            ));
        };
        let usage = state.quotas.usage(&name, limit).await;
        return Ok(Json(usage).into_response());
    }

    let mut usages: BTreeMap<&'static str, QuotaUsage> = BTreeMap::new();
    for (name, limit) in state.function_quotas.iter() {
        usages.insert(name, state.quotas.usage(name, limit).await);
    }
    Ok(Json(usages).into_response())
}

pub async fn translate(
    State(state): State<ApiState>,
    Json(request): Json<TranslationRequest>,
) -> Result<Response, ApiError> {
    let service = state
        .translations
        .as_ref()
        .ok_or_else(|| ApiError::not_configured("translation"))?;
    let outcome = service.translate(&request).await?;
    Ok(Json(outcome).into_response())
}

pub async fn article_by_url(
    State(state): State<ApiState>,
    Query(query): Query<ArticleQuery>,
) -> Result<Response, ApiError> {
    let urls: Vec<String> = query.url.into_iter().collect();
    fetch_articles(&state, urls, query.language_code).await
}

pub async fn articles(
    State(state): State<ApiState>,
    Json(body): Json<ArticleBody>,
) -> Result<Response, ApiError> {
    fetch_articles(&state, body.urls, body.language_code).await
}

async fn fetch_articles(
    state: &ApiState,
    urls: Vec<String>,
    language: Option<String>,
) -> Result<Response, ApiError> {
    let service = state
        .articles
        .as_ref()
        .ok_or_else(|| ApiError::not_configured("article"))?;
    if urls.is_empty() {
        return Err(ApiError::bad_request(
            "Request could not be processed",
            Some("url or urls is required".to_string()),
        ));
    }
    let language = language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    let batch = service.fetch(&urls, &language).await?;
    Ok(Json(batch).into_response())
}

pub async fn feed(
    State(state): State<ApiState>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, ApiError> {
    let service = state
        .feed
        .as_ref()
        .ok_or_else(|| ApiError::not_configured("feed"))?;
    let load = service.load(query.force_reload).await?;
    Ok(Json(load).into_response())
}

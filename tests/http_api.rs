//! End-to-end behaviour of the HTTP surface over in-memory stores.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use clap::Parser;
use serde_json::{Value, json};
use time::macros::datetime;
use tower::ServiceExt;

use newscache::application::articles::{ArticleSource, SourceError};
use newscache::application::context::ServiceContext;
use newscache::application::feed::FeedSource;
use newscache::application::translation::{TranslateError, Translator};
use newscache::config::{self, CliArgs, Settings};
use newscache::domain::{ArticleRecord, FeedItem, FeedMetadata, FeedSnapshot};
use newscache::infra::http::{ApiState, build_router};
use newscache::infra::storage::MemoryBlobStore;
use newscache::infra::tables::MemoryTableStore;
use newscache::util::ManualClock;

#[derive(Default)]
struct Shouting {
    calls: AtomicUsize,
}

#[async_trait]
impl Translator for Shouting {
    async fn translate(&self, text: &str, _: &str, _: &str) -> Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.to_uppercase())
    }
}

#[derive(Default)]
struct FixedArticles {
    calls: AtomicUsize,
}

#[async_trait]
impl ArticleSource for FixedArticles {
    async fn fetch(
        &self,
        url: &str,
        shortcode: &str,
        _language: &str,
    ) -> Result<ArticleRecord, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if shortcode == "missing" {
            return Err(SourceError::NotFound(url.to_string()));
        }
        Ok(ArticleRecord {
            url: url.to_string(),
            shortcode: shortcode.to_string(),
            title: format!("Artikkeli {shortcode}"),
            paragraphs: vec!["Ensimmäinen.".to_string(), "Toinen.".to_string()],
            scraped_at: "2024-01-01T00:00:00Z".to_string(),
            scraper_version: Some("test".to_string()),
            ..ArticleRecord::default()
        })
    }
}

#[derive(Default)]
struct FixedFeed {
    calls: AtomicUsize,
}

#[async_trait]
impl FeedSource for FixedFeed {
    async fn fetch(&self) -> Result<FeedSnapshot, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FeedSnapshot {
            feed_metadata: FeedMetadata {
                title: "Yle Uutiset".to_string(),
                fetch_timestamp: "2024-01-01T00:00:00Z".to_string(),
                ..FeedMetadata::default()
            },
            items: vec![FeedItem {
                title: "Uutinen".to_string(),
                link: "https://yle.fi/a/74-1".to_string(),
                shortcode: "74-1".to_string(),
                ..FeedItem::default()
            }],
            ..FeedSnapshot::default()
        })
    }
}

struct Harness {
    app: Router,
    translator: Arc<Shouting>,
    articles: Arc<FixedArticles>,
    feed: Arc<FixedFeed>,
}

fn settings() -> Settings {
    let args = CliArgs::parse_from(["newscache", "status", "--storage-backend", "memory"]);
    config::load(&args).expect("settings load")
}

fn harness_with(settings: Settings) -> Harness {
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
    let context = ServiceContext::new(
        &settings,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemoryTableStore::new()),
        clock,
    )
    .expect("context");

    let translator = Arc::new(Shouting::default());
    let articles = Arc::new(FixedArticles::default());
    let feed = Arc::new(FixedFeed::default());
    let state = ApiState::new(&context)
        .with_translations(context.translation_service(translator.clone()))
        .with_articles(context.article_service(articles.clone()))
        .with_feed(context.feed_service(feed.clone()));

    Harness {
        app: build_router(state),
        translator,
        articles,
        feed,
    }
}

fn harness() -> Harness {
    harness_with(settings())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("json body")
    };
    (status, headers, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

#[tokio::test]
async fn health_answers_no_content() {
    let h = harness();
    let (status, _, body) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn translation_is_cached_after_first_request() {
    let h = harness();
    let request = json!({
        "article_id": "74-1",
        "paragraphs": ["hei maailma", "kiitos"]
    });

    let (status, _, first) = send(&h.app, post_json("/api/v1/translate", request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cache_hit"], false);
    assert_eq!(first["source_lang"], "fi");
    assert_eq!(first["target_lang"], "en");
    assert_eq!(first["translations"], json!(["HEI MAAILMA", "KIITOS"]));

    let (status, _, second) = send(&h.app, post_json("/api/v1/translate", request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["cache_hit"], true);
    assert_eq!(second["cached_at"], "2024-01-01T00:00:00Z");
    assert_eq!(second["translations"], first["translations"]);
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 2);

    let (_, _, usage) = send(
        &h.app,
        get("/api/v1/rate-limits?function_name=translate_article"),
    )
    .await;
    assert_eq!(usage["request_count"], 1);
    assert_eq!(usage["remaining"], 49);
}

#[tokio::test]
async fn changed_paragraphs_are_translated_again() {
    let h = harness();
    send(
        &h.app,
        post_json(
            "/api/v1/translate",
            json!({ "article_id": "74-1", "paragraphs": ["a", "b"] }),
        ),
    )
    .await;
    let (_, _, body) = send(
        &h.app,
        post_json(
            "/api/v1/translate",
            json!({ "article_id": "74-1", "paragraphs": ["a", "c"] }),
        ),
    )
    .await;
    assert_eq!(body["cache_hit"], false);
    assert_eq!(body["translations"], json!(["A", "C"]));
}

#[tokio::test]
async fn translation_requires_paragraphs() {
    let h = harness();
    let (status, _, body) = send(
        &h.app,
        post_json("/api/v1/translate", json!({ "article_id": "74-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(
        body["error"]["hint"],
        "article_id and paragraphs required"
    );
}

#[tokio::test]
async fn exhausted_daily_quota_rejects_with_counts() {
    let mut settings = settings();
    settings.rate_limit.translation_daily_limit = NonZeroU32::MIN;
    let h = harness_with(settings);

    let (status, _, _) = send(
        &h.app,
        post_json(
            "/api/v1/translate",
            json!({ "article_id": "a", "paragraphs": ["x"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, body) = send(
        &h.app,
        post_json(
            "/api/v1/translate",
            json!({ "article_id": "b", "paragraphs": ["y"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "quota_exhausted");
    assert_eq!(body["current_count"], 1);
    assert_eq!(body["daily_limit"], 1);
    assert_eq!(headers[header::RETRY_AFTER], "86400");

    // Cache hits are still served once the quota is spent.
    let (status, _, body) = send(
        &h.app,
        post_json(
            "/api/v1/translate",
            json!({ "article_id": "a", "paragraphs": ["x"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cache_hit"], true);
}

#[tokio::test]
async fn client_window_limits_api_routes_only() {
    let mut settings = settings();
    settings.rate_limit.ip_max_requests = NonZeroU32::new(2).unwrap();
    let h = harness_with(settings);

    let from_client = || {
        Request::builder()
            .uri("/api/v1/rate-limits")
            .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let (status, _, _) = send(&h.app, from_client()).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, body) = send(&h.app, from_client()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");
    assert_eq!(headers[header::RETRY_AFTER], "900");

    // Another client has its own window.
    let other = Request::builder()
        .uri("/api/v1/rate-limits")
        .header("x-real-ip", "203.0.113.1")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&h.app, other).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn rate_limit_report_covers_every_function() {
    let h = harness();
    let (status, _, body) = send(&h.app, get("/api/v1/rate-limits")).await;
    assert_eq!(status, StatusCode::OK);
    for name in ["rss_feed_parser", "article_scraper", "translate_article"] {
        assert_eq!(body[name]["daily_limit"], 50);
        assert_eq!(body[name]["request_count"], 0);
        assert_eq!(body[name]["date"], "2024-01-01");
    }

    let (status, _, body) = send(&h.app, get("/api/v1/rate-limits?function_name=nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unknown_function");
}

#[tokio::test]
async fn articles_are_fetched_once_then_served_from_cache() {
    let h = harness();
    let request = json!({
        "urls": [
            "https://yle.fi/a/74-1?origin=rss",
            "https://yle.fi/uutiset",
            "https://yle.fi/a/missing"
        ]
    });

    let (status, _, first) = send(&h.app, post_json("/api/v1/articles", request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["total"], 3);
    assert_eq!(first["succeeded"], 1);
    assert_eq!(first["results"][0]["cached"], false);
    assert_eq!(first["results"][0]["shortcode"], "74-1");
    assert_eq!(first["results"][0]["paragraphs_count"], 2);
    assert_eq!(
        first["results"][0]["blob_path"],
        "cache/yle/articles/74-1_fi.json"
    );
    assert_eq!(first["results"][1]["success"], false);
    assert_eq!(first["results"][2]["success"], false);

    let (_, _, second) = send(&h.app, get("/api/v1/articles?url=https://yle.fi/a/74-1")).await;
    assert_eq!(second["results"][0]["cached"], true);
    assert_eq!(second["results"][0]["title"], "Artikkeli 74-1");

    // 74-1 and the failing shortcode; the cached read costs nothing.
    assert_eq!(h.articles.calls.load(Ordering::SeqCst), 2);
    let (_, _, usage) = send(
        &h.app,
        get("/api/v1/rate-limits?function_name=article_scraper"),
    )
    .await;
    assert_eq!(usage["request_count"], 1);
}

#[tokio::test]
async fn feed_honours_force_reload() {
    let h = harness();

    let (_, _, first) = send(&h.app, get("/api/v1/feed")).await;
    assert_eq!(first["cached"], false);
    assert_eq!(first["feed_metadata"]["title"], "Yle Uutiset");

    let (_, _, second) = send(&h.app, get("/api/v1/feed")).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["items"][0]["shortcode"], "74-1");

    let (_, _, third) = send(&h.app, get("/api/v1/feed?force_reload=true")).await;
    assert_eq!(third["cached"], false);
    assert_eq!(h.feed.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn status_and_cleanup_report_cache_contents() {
    let h = harness();
    send(&h.app, get("/api/v1/feed")).await;
    send(
        &h.app,
        post_json(
            "/api/v1/translate",
            json!({ "article_id": "74-1", "paragraphs": ["hei"] }),
        ),
    )
    .await;

    let (status, _, body) = send(&h.app, get("/api/v1/cache/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["feed"]["path"], "cache/yle/paauutiset.json");
    assert_eq!(body["feed"]["exists"], true);
    assert_eq!(body["feed"]["items_count"], 1);
    assert_eq!(body["translations"]["count"], 1);
    assert_eq!(body["articles"]["count"], 0);

    let cleanup = Request::builder()
        .method("POST")
        .uri("/api/v1/cache/cleanup?scope=translations")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&h.app, cleanup).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "translations");
    assert_eq!(body["translations"], 0);
    assert_eq!(body["total"], 0);
    assert!(body.get("feeds").is_none());
}

#[tokio::test]
async fn content_routes_need_a_source() {
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
    let context = ServiceContext::new(
        &settings(),
        Arc::new(MemoryBlobStore::new()),
        Arc::new(MemoryTableStore::new()),
        clock,
    )
    .expect("context");
    let app = build_router(ApiState::new(&context));

    let (status, _, body) = send(&app, get("/api/v1/feed")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "not_configured");
}

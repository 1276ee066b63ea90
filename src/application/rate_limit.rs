//! Advisory request quotas stored as windowed counters in a table.
//!
//! Counters are keyed `(subject, window)`: a function name per UTC day, or a
//! client IP per N-minute window aligned to the top of the hour. Reads that
//! fail count as zero so an unavailable table never blocks traffic, and
//! increments are read-modify-write without compare-and-swap, so concurrent
//! increments may undercount.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::{debug, warn};

use crate::cache::expiry::format_timestamp;
use crate::config::RateLimitSettings;
use crate::infra::tables::{TableEntity, TableError, TableStore};
use crate::util::Clock;

pub const RSS_FEED_PARSER: &str = "rss_feed_parser";
pub const ARTICLE_SCRAPER: &str = "article_scraper";
pub const TRANSLATE_ARTICLE: &str = "translate_article";

const FUNCTION_PARTITION: &str = "rate_limits";
const IP_PARTITION: &str = "auth_rate_limits";
const COUNT_FIELD: &str = "request_count";
const UNKNOWN_CLIENT: &str = "unknown";
pub(crate) const METRIC_RATE_LIMITED: &str = "newscache_rate_limited_total";

const DAY_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const MINUTE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]");

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("quota table unavailable: {0}")]
    Storage(#[from] TableError),
    #[error("quota for `{subject}` exhausted: {current}/{limit}")]
    Exceeded {
        subject: String,
        current: u64,
        limit: u32,
        retry_after: Duration,
    },
}

/// Width of a counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBucket {
    /// One UTC calendar day, keyed `YYYY-MM-DD`.
    Daily,
    /// N minutes (1..=60) aligned within the hour, keyed `YYYY-MM-DDTHH:MM` of the window start.
    Minutes(u32),
}

impl WindowBucket {
    pub fn key(self, now: OffsetDateTime) -> String {
        let now = now.to_offset(time::UtcOffset::UTC);
        let formatted = match self {
            Self::Daily => now.format(DAY_FORMAT),
            Self::Minutes(width) => {
                let start = window_start_minute(now.minute(), width);
                now.replace_minute(start)
                    .map_err(|_| time::error::Format::InvalidComponent("minute"))
                    .and_then(|start| start.format(MINUTE_FORMAT))
            }
        };
        formatted.unwrap_or_else(|_| now.unix_timestamp().to_string())
    }

    /// Time left until the window containing `now` closes.
    pub fn remaining(self, now: OffsetDateTime) -> Duration {
        let now = now.to_offset(time::UtcOffset::UTC);
        let (elapsed, width) = match self {
            Self::Daily => {
                let (hour, minute, second) = now.to_hms();
                (
                    u64::from(hour) * 3600 + u64::from(minute) * 60 + u64::from(second),
                    86_400,
                )
            }
            Self::Minutes(width) => {
                let width = width.clamp(1, 60);
                let start = u32::from(window_start_minute(now.minute(), width));
                // The last window of the hour closes early when `width` does not divide 60.
                let end = (start + width).min(60);
                (
                    u64::from(u32::from(now.minute()) - start) * 60 + u64::from(now.second()),
                    u64::from(end - start) * 60,
                )
            }
        };
        Duration::from_secs(width.saturating_sub(elapsed).max(1))
    }
}

fn window_start_minute(minute: u8, width: u32) -> u8 {
    let width = width.clamp(1, 60);
    let start = (u32::from(minute) / width) * width;
    u8::try_from(start).unwrap_or(0)
}

/// Whose requests a limiter counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Function,
    ClientIp,
}

impl SubjectKind {
    fn partition(self) -> &'static str {
        match self {
            Self::Function => FUNCTION_PARTITION,
            Self::ClientIp => IP_PARTITION,
        }
    }

    /// Row property holding the window key; window keys sort chronologically.
    fn window_field(self) -> &'static str {
        match self {
            Self::Function => "date",
            Self::ClientIp => "window",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::ClientIp => "client_ip",
        }
    }
}

/// Usage of one function's daily quota.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaUsage {
    pub date: String,
    pub function_name: String,
    pub request_count: u64,
    pub daily_limit: u32,
    pub remaining: u64,
    pub percentage_used: f64,
}

pub struct QuotaLimiter {
    tables: Arc<dyn TableStore>,
    clock: Arc<dyn Clock>,
    table: String,
    kind: SubjectKind,
    bucket: WindowBucket,
}

impl std::fmt::Debug for QuotaLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLimiter")
            .field("table", &self.table)
            .field("kind", &self.kind)
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl QuotaLimiter {
    /// Per-function counters reset at UTC midnight.
    pub fn daily(tables: Arc<dyn TableStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            tables,
            clock,
            table: table.into(),
            kind: SubjectKind::Function,
            bucket: WindowBucket::Daily,
        }
    }

    /// Per-client counters over `window_minutes`-wide windows.
    pub fn per_ip(
        tables: Arc<dyn TableStore>,
        clock: Arc<dyn Clock>,
        table: impl Into<String>,
        window_minutes: u32,
    ) -> Self {
        Self {
            tables,
            clock,
            table: table.into(),
            kind: SubjectKind::ClientIp,
            bucket: WindowBucket::Minutes(window_minutes.clamp(1, 60)),
        }
    }

    pub fn bucket(&self) -> WindowBucket {
        self.bucket
    }

    pub fn window_key(&self) -> String {
        self.bucket.key(self.clock.now())
    }

    pub fn row_key(&self, subject: &str) -> String {
        format!("{subject}_{}", self.window_key())
    }

    pub fn retry_after(&self) -> Duration {
        self.bucket.remaining(self.clock.now())
    }

    /// Requests counted for `subject` in the current window; unreadable counters read as zero.
    pub async fn count(&self, subject: &str) -> u64 {
        match self.read(subject).await {
            Ok(count) => count,
            Err(err) => {
                warn!(subject, table = %self.table, error = %err, "Quota counter unreadable; assuming zero");
                0
            }
        }
    }

    /// `true` while `subject` is under `limit` in the current window.
    pub async fn check_limit(&self, subject: &str, limit: u32) -> bool {
        let current = self.count(subject).await;
        if current >= u64::from(limit) {
            warn!(
                subject,
                kind = self.kind.as_str(),
                current,
                limit,
                "Rate limit exceeded"
            );
            return false;
        }
        true
    }

    /// Add one request for `subject`, returning the new count.
    pub async fn increment(&self, subject: &str) -> Result<u64, LimitError> {
        let now = self.clock.now();
        let window = self.bucket.key(now);
        let row_key = format!("{subject}_{window}");

        let current = match self
            .tables
            .get_entity(&self.table, self.kind.partition(), &row_key)
            .await
        {
            Ok(entity) => entity.and_then(|entity| entity.get_u64(COUNT_FIELD)).unwrap_or(0),
            Err(err) => {
                debug!(subject, error = %err, "Quota counter unreadable; restarting at zero");
                0
            }
        };
        let next = current + 1;

        let window_field = self.kind.window_field();
        let entity = TableEntity::new(self.kind.partition(), row_key);
        let entity = match self.kind {
            SubjectKind::Function => entity.with("function_name", subject),
            SubjectKind::ClientIp => entity.with("ip_address", subject),
        }
        .with(window_field, window.as_str())
        .with(COUNT_FIELD, next)
        .with("last_updated", format_timestamp(now));

        // Counters from closed windows are never read again.
        let pruned = self
            .tables
            .upsert_pruning(&self.table, entity, window_field, &window)
            .await?;
        debug!(
            subject,
            kind = self.kind.as_str(),
            count = next,
            pruned,
            "Incremented quota counter"
        );
        Ok(next)
    }

    /// Snapshot of a function's daily quota.
    pub async fn usage(&self, function_name: &str, daily_limit: u32) -> QuotaUsage {
        let request_count = self.count(function_name).await;
        let limit = u64::from(daily_limit);
        let percentage_used = if daily_limit > 0 {
            ((request_count as f64 / limit as f64) * 1000.0).round() / 10.0
        } else {
            0.0
        };
        QuotaUsage {
            date: self.window_key(),
            function_name: function_name.to_string(),
            request_count,
            daily_limit,
            remaining: limit.saturating_sub(request_count),
            percentage_used,
        }
    }

    async fn read(&self, subject: &str) -> Result<u64, TableError> {
        let row_key = self.row_key(subject);
        let entity = self
            .tables
            .get_entity(&self.table, self.kind.partition(), &row_key)
            .await?;
        Ok(entity
            .and_then(|entity| entity.get_u64(COUNT_FIELD))
            .unwrap_or(0))
    }
}

/// Configured daily limits by function name, in a stable order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionQuotas {
    entries: Vec<(&'static str, u32)>,
}

impl FunctionQuotas {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            entries: vec![
                (RSS_FEED_PARSER, settings.feed_daily_limit.get()),
                (ARTICLE_SCRAPER, settings.article_daily_limit.get()),
                (TRANSLATE_ARTICLE, settings.translation_daily_limit.get()),
            ],
        }
    }

    pub fn limit_for(&self, function_name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(name, _)| *name == function_name)
            .map(|(_, limit)| *limit)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.entries.iter().copied()
    }
}

/// A daily quota guarding one expensive operation.
#[derive(Debug, Clone)]
pub struct QuotaGate {
    limiter: Arc<QuotaLimiter>,
    function_name: &'static str,
    limit: u32,
}

impl QuotaGate {
    pub fn new(limiter: Arc<QuotaLimiter>, function_name: &'static str, limit: u32) -> Self {
        Self {
            limiter,
            function_name,
            limit,
        }
    }

    pub fn function_name(&self) -> &'static str {
        self.function_name
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Reject when the quota is already spent.
    pub async fn check(&self) -> Result<(), LimitError> {
        let current = self.limiter.count(self.function_name).await;
        if current >= u64::from(self.limit) {
            counter!(METRIC_RATE_LIMITED, "kind" => SubjectKind::Function.as_str()).increment(1);
            warn!(
                function_name = self.function_name,
                current,
                limit = self.limit,
                "Daily quota exhausted"
            );
            return Err(LimitError::Exceeded {
                subject: self.function_name.to_string(),
                current,
                limit: self.limit,
                retry_after: self.limiter.retry_after(),
            });
        }
        Ok(())
    }

    /// Count one performed operation. Failures are logged; the quota is advisory.
    pub async fn record(&self) {
        if let Err(err) = self.limiter.increment(self.function_name).await {
            warn!(function_name = self.function_name, error = %err, "Failed to record quota usage");
        }
    }
}

/// Best-effort client address from proxy headers: the first `X-Forwarded-For`
/// hop, then `X-Real-Ip`, then `X-Client-Ip`, else `unknown`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for")
        && let Some(first) = forwarded.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return first.to_string();
    }
    header("x-real-ip")
        .or_else(|| header("x-client-ip"))
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tables::MemoryTableStore;
    use crate::util::ManualClock;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use time::macros::datetime;

    struct BrokenTables;

    #[async_trait]
    impl TableStore for BrokenTables {
        async fn get_entity(&self, _: &str, _: &str, _: &str) -> Result<Option<TableEntity>, TableError> {
            Err(TableError::Io(std::io::Error::other("table offline")))
        }

        async fn upsert_entity(&self, _: &str, _: TableEntity) -> Result<(), TableError> {
            Err(TableError::Io(std::io::Error::other("table offline")))
        }

        async fn upsert_pruning(
            &self,
            _: &str,
            _: TableEntity,
            _: &str,
            _: &str,
        ) -> Result<usize, TableError> {
            Err(TableError::Io(std::io::Error::other("table offline")))
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(datetime!(2024-03-05 10:37:12 UTC)))
    }

    #[test]
    fn window_keys_round_down_within_the_hour() {
        let now = datetime!(2024-03-05 10:37:12 UTC);
        assert_eq!(WindowBucket::Daily.key(now), "2024-03-05");
        assert_eq!(WindowBucket::Minutes(15).key(now), "2024-03-05T10:30");
        assert_eq!(WindowBucket::Minutes(1).key(now), "2024-03-05T10:37");
        assert_eq!(WindowBucket::Minutes(60).key(now), "2024-03-05T10:00");
    }

    #[test]
    fn remaining_counts_to_the_window_end() {
        let now = datetime!(2024-03-05 10:37:12 UTC);
        assert_eq!(
            WindowBucket::Minutes(15).remaining(now),
            Duration::from_secs(7 * 60 + 48)
        );
        assert_eq!(
            WindowBucket::Daily.remaining(datetime!(2024-03-05 23:59:00 UTC)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn uneven_windows_close_at_the_top_of_the_hour() {
        // 7-minute windows start at :56, which only has four minutes left.
        let now = datetime!(2024-03-05 10:58:30 UTC);
        assert_eq!(WindowBucket::Minutes(7).key(now), "2024-03-05T10:56");
        assert_eq!(WindowBucket::Minutes(7).remaining(now), Duration::from_secs(90));
        assert_eq!(
            WindowBucket::Minutes(7).remaining(datetime!(2024-03-05 10:50:00 UTC)),
            Duration::from_secs(6 * 60)
        );
    }

    #[tokio::test]
    async fn daily_counters_increment_and_enforce_limit() {
        let tables = Arc::new(MemoryTableStore::new());
        let limiter = QuotaLimiter::daily(tables.clone(), clock(), "rateLimits");

        assert!(limiter.check_limit(TRANSLATE_ARTICLE, 2).await);
        assert_eq!(limiter.increment(TRANSLATE_ARTICLE).await.unwrap(), 1);
        assert_eq!(limiter.increment(TRANSLATE_ARTICLE).await.unwrap(), 2);
        assert!(!limiter.check_limit(TRANSLATE_ARTICLE, 2).await);
        assert!(limiter.check_limit(ARTICLE_SCRAPER, 2).await);

        let entity = tables
            .get_entity("rateLimits", "rate_limits", "translate_article_2024-03-05")
            .await
            .unwrap()
            .expect("counter row");
        assert_eq!(entity.properties["function_name"], "translate_article");
        assert_eq!(entity.properties["date"], "2024-03-05");
        assert_eq!(entity.get_u64("request_count"), Some(2));
    }

    #[tokio::test]
    async fn counters_reset_in_a_new_window() {
        let tables = Arc::new(MemoryTableStore::new());
        let clock = clock();
        let limiter = QuotaLimiter::per_ip(tables, clock.clone(), "rateLimits", 15);

        limiter.increment("203.0.113.9").await.unwrap();
        assert_eq!(limiter.count("203.0.113.9").await, 1);
        assert_eq!(limiter.row_key("203.0.113.9"), "203.0.113.9_2024-03-05T10:30");

        clock.set(datetime!(2024-03-05 10:45:00 UTC));
        assert_eq!(limiter.count("203.0.113.9").await, 0);
    }

    #[tokio::test]
    async fn closed_windows_are_evicted_on_increment() {
        let tables = Arc::new(MemoryTableStore::new());
        let clock = clock();
        let limiter = QuotaLimiter::per_ip(tables.clone(), clock.clone(), "rateLimits", 15);

        limiter.increment("203.0.113.9").await.unwrap();
        limiter.increment("198.51.100.4").await.unwrap();

        clock.set(datetime!(2024-03-05 10:52:00 UTC));
        limiter.increment("198.51.100.4").await.unwrap();

        for stale in ["203.0.113.9_2024-03-05T10:30", "198.51.100.4_2024-03-05T10:30"] {
            let row = tables
                .get_entity("rateLimits", IP_PARTITION, stale)
                .await
                .unwrap();
            assert!(row.is_none(), "{stale} should be evicted");
        }
        let current = tables
            .get_entity("rateLimits", IP_PARTITION, "198.51.100.4_2024-03-05T10:45")
            .await
            .unwrap()
            .expect("current window row");
        assert_eq!(current.get_u64(COUNT_FIELD), Some(1));

        let daily = QuotaLimiter::daily(tables.clone(), clock.clone(), "rateLimits");
        daily.increment(TRANSLATE_ARTICLE).await.unwrap();
        clock.set(datetime!(2024-03-06 00:05:00 UTC));
        daily.increment(TRANSLATE_ARTICLE).await.unwrap();
        let yesterday = tables
            .get_entity("rateLimits", FUNCTION_PARTITION, "translate_article_2024-03-05")
            .await
            .unwrap();
        assert!(yesterday.is_none());
    }

    #[tokio::test]
    async fn unreadable_tables_allow_requests() {
        let limiter = QuotaLimiter::daily(Arc::new(BrokenTables), clock(), "rateLimits");
        assert!(limiter.check_limit(RSS_FEED_PARSER, 1).await);
        assert_eq!(limiter.count(RSS_FEED_PARSER).await, 0);
        assert!(matches!(
            limiter.increment(RSS_FEED_PARSER).await,
            Err(LimitError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn usage_reports_remaining_and_percentage() {
        let tables = Arc::new(MemoryTableStore::new());
        let limiter = QuotaLimiter::daily(tables, clock(), "rateLimits");
        for _ in 0..3 {
            limiter.increment(ARTICLE_SCRAPER).await.unwrap();
        }

        let usage = limiter.usage(ARTICLE_SCRAPER, 7).await;
        assert_eq!(usage.date, "2024-03-05");
        assert_eq!(usage.request_count, 3);
        assert_eq!(usage.remaining, 4);
        assert_eq!(usage.percentage_used, 42.9);
    }

    #[tokio::test]
    async fn gate_rejects_with_counts_once_spent() {
        let tables = Arc::new(MemoryTableStore::new());
        let limiter = Arc::new(QuotaLimiter::daily(tables, clock(), "rateLimits"));
        let gate = QuotaGate::new(limiter, TRANSLATE_ARTICLE, 1);

        gate.check().await.expect("fresh quota");
        gate.record().await;
        match gate.check().await {
            Err(LimitError::Exceeded { current, limit, .. }) => {
                assert_eq!((current, limit), (1, 1));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn client_ip_prefers_forwarded_first_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-client-ip", HeaderValue::from_static("10.0.0.3"));
        assert_eq!(client_ip(&headers), "10.0.0.3");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "10.0.0.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 198.51.100.7 , 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "198.51.100.7");
    }
}

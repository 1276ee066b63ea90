//! Freshness rules shared by every cache.
//!
//! An entry carrying `expires_at` is judged by that instant alone. Older writers
//! only stamped when the data was produced, so for those the reader derives the
//! expiry from a fallback timestamp plus the ttl it is asked about. The fallback
//! fields are probed in a fixed order: the feed fetch time first, then the
//! article scrape time.

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};

pub const EXPIRES_AT_FIELD: &str = "expires_at";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const TTL_FIELD: &str = "cache_ttl_hours";

const FEED_METADATA_FIELD: &str = "feed_metadata";
const FEED_FETCH_FIELD: &str = "fetch_timestamp";
const ARTICLE_SCRAPED_FIELD: &str = "scraped_at";

/// Outcome of judging an entry against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    /// No recognizable timestamp, or one that does not parse.
    Undetermined,
}

impl Freshness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Undetermined => "undetermined",
        }
    }
}

/// Where an entry's expiry was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirySource {
    Explicit,
    FeedFetched,
    ArticleScraped,
}

/// Judge a decoded entry at `now`.
pub fn evaluate(entry: &Map<String, Value>, now: OffsetDateTime, ttl_hours: u32) -> Freshness {
    match resolve_expiry(entry, ttl_hours) {
        Some((_, Some(expires_at))) if expires_at > now => Freshness::Fresh,
        Some((_, Some(_))) => Freshness::Stale,
        Some((_, None)) | None => Freshness::Undetermined,
    }
}

/// `true` only for entries that are provably fresh.
pub fn is_valid(entry: &Map<String, Value>, now: OffsetDateTime, ttl_hours: u32) -> bool {
    evaluate(entry, now, ttl_hours) == Freshness::Fresh
}

/// Locate the field that decides expiry and compute the instant.
///
/// Returns `None` when no candidate field exists, and `Some((source, None))` when
/// the deciding field exists but cannot be parsed.
pub fn resolve_expiry(
    entry: &Map<String, Value>,
    ttl_hours: u32,
) -> Option<(ExpirySource, Option<OffsetDateTime>)> {
    if let Some(raw) = entry.get(EXPIRES_AT_FIELD) {
        return Some((ExpirySource::Explicit, timestamp_value(raw)));
    }

    let ttl = Duration::hours(i64::from(ttl_hours));

    let feed_fetched = entry
        .get(FEED_METADATA_FIELD)
        .and_then(Value::as_object)
        .and_then(|metadata| metadata.get(FEED_FETCH_FIELD));
    if let Some(raw) = feed_fetched {
        let expiry = timestamp_value(raw).and_then(|at| at.checked_add(ttl));
        return Some((ExpirySource::FeedFetched, expiry));
    }

    if let Some(raw) = entry.get(ARTICLE_SCRAPED_FIELD) {
        let expiry = timestamp_value(raw).and_then(|at| at.checked_add(ttl));
        return Some((ExpirySource::ArticleScraped, expiry));
    }

    None
}

/// Instant `ttl_hours` after `now`.
pub fn expiry_after(now: OffsetDateTime, ttl_hours: u32) -> OffsetDateTime {
    now.saturating_add(Duration::hours(i64::from(ttl_hours)))
}

/// Parse an RFC 3339 timestamp into UTC. Both `Z` and numeric offsets are accepted.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339)
        .ok()
        .map(|at| at.to_offset(time::UtcOffset::UTC))
}

/// Format an instant the way entries are stamped.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

fn timestamp_value(raw: &Value) -> Option<OffsetDateTime> {
    raw.as_str().and_then(parse_timestamp)
}

//! Expiry-aware blob caches.
//!
//! Three caches share one policy:
//!
//! - **Feed**: the parsed RSS snapshot, `cache/<source>/<feed-name>.json`
//! - **Article**: scraped article text, `cache/<source>/articles/<shortcode>_<lang>.json`
//! - **Translation**: translated paragraphs, `cache/translations/<article_id>/<src>_<tgt>.json`
//!
//! Every write stamps `expires_at`; reads validate freshness and fail closed;
//! sweeps lazily delete expired entries under a prefix. The translation cache
//! additionally requires the stored input fingerprint to match.

mod articles;
mod codec;
mod config;
pub mod expiry;
mod feeds;
pub mod fingerprint;
mod flight;
pub mod keys;
pub(crate) mod lock;
mod manager;
mod translations;

pub use articles::ArticleCache;
pub use codec::{CodecError, EntryStamp, decode_entry, encode_entry};
pub use config::CacheConfig;
pub use expiry::{Freshness, evaluate, is_valid};
pub use feeds::FeedCache;
pub use fingerprint::hash_paragraphs;
pub use flight::{Flight, SingleFlight};
pub use keys::KeyError;
pub use manager::{CacheError, CacheManager};
pub use translations::TranslationCache;

//! Payload shapes persisted by the caches.

pub mod articles;
pub mod feeds;
pub mod translations;

pub use articles::ArticleRecord;
pub use feeds::{FeedItem, FeedMetadata, FeedSnapshot};
pub use translations::TranslationRecord;

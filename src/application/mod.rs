//! Application services: cache-aware operations, quotas and maintenance.

pub mod articles;
pub mod context;
pub mod error;
pub mod feed;
pub mod maintenance;
pub mod rate_limit;
pub mod retry;
pub mod translation;

//! Per-key de-duplication of concurrent expensive work.
//!
//! Concurrent callers asking for the same key share one execution of the work
//! and all receive a clone of its result. The slot is released once the value
//! exists, so later callers start a fresh flight and consult the cache first.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::OnceCell;
use tracing::debug;

pub(crate) const METRIC_COALESCED: &str = "newscache_flight_coalesced_total";

/// Result of [`SingleFlight::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flight<V> {
    pub value: V,
    /// `true` for the caller whose closure actually ran.
    pub leader: bool,
}

pub struct SingleFlight<V> {
    calls: Arc<DashMap<String, Arc<OnceCell<V>>>>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
        }
    }
}

impl<V> Clone for SingleFlight<V> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a flight currently registered.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    /// Run `work` for `key` unless another caller is already running it.
    ///
    /// If the leading caller is cancelled before finishing, one of the waiters
    /// takes over and runs its own closure.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Flight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = self
            .calls
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let _release = Release {
            key,
            cell: &cell,
            calls: &self.calls,
        };

        let mut leader = false;
        let value = cell
            .get_or_init(|| {
                leader = true;
                work()
            })
            .await
            .clone();

        if !leader {
            counter!(METRIC_COALESCED).increment(1);
            debug!(key, "Joined in-flight work");
        }
        Flight { value, leader }
    }
}

struct Release<'a, V> {
    key: &'a str,
    cell: &'a Arc<OnceCell<V>>,
    calls: &'a DashMap<String, Arc<OnceCell<V>>>,
}

impl<V> Drop for Release<'_, V> {
    fn drop(&mut self) {
        // Only a finished flight is released; an abandoned one stays for the next caller to finish.
        self.calls.remove_if(self.key, |_, registered| {
            Arc::ptr_eq(registered, self.cell) && registered.initialized()
        });
    }
}

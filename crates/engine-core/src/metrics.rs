use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    rows_processed: AtomicU64,
    rows_succeeded: AtomicU64,
    rows_skipped: AtomicU64,
    rows_failed: AtomicU64,
    enrich_calls: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    backoffs: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rows_processed: u64,
    pub rows_succeeded: u64,
    pub rows_skipped: u64,
    pub rows_failed: u64,
    pub enrich_calls: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub backoffs: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn record_success(&self) {
        self.inner.rows_processed.fetch_add(1, Ordering::Relaxed);
        self.inner.rows_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.inner.rows_processed.fetch_add(1, Ordering::Relaxed);
        self.inner.rows_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.rows_processed.fetch_add(1, Ordering::Relaxed);
        self.inner.rows_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_enrich_calls(&self, count: u64) {
        self.inner.enrich_calls.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_backoffs(&self) {
        self.inner.backoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_processed: self.inner.rows_processed.load(Ordering::Relaxed),
            rows_succeeded: self.inner.rows_succeeded.load(Ordering::Relaxed),
            rows_skipped: self.inner.rows_skipped.load(Ordering::Relaxed),
            rows_failed: self.inner.rows_failed.load(Ordering::Relaxed),
            enrich_calls: self.inner.enrich_calls.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            backoffs: self.inner.backoffs.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    /// Counter increase between an earlier snapshot and this one.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_processed: self.rows_processed.saturating_sub(earlier.rows_processed),
            rows_succeeded: self.rows_succeeded.saturating_sub(earlier.rows_succeeded),
            rows_skipped: self.rows_skipped.saturating_sub(earlier.rows_skipped),
            rows_failed: self.rows_failed.saturating_sub(earlier.rows_failed),
            enrich_calls: self.enrich_calls.saturating_sub(earlier.enrich_calls),
            retries: self.retries.saturating_sub(earlier.retries),
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            backoffs: self.backoffs.saturating_sub(earlier.backoffs),
        }
    }
}

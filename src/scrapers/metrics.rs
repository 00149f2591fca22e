//! Run-level metrics
//!
//! Counters for request pacing/backoff tuning and per-tier extraction hit
//! rates. Updated from concurrent tasks without locking.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::models::Tier;

/// Atomic counter for thread-safe incrementing
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct RunMetrics {
    pub requests_issued: Counter,
    pub retried: Counter,
    /// Backoff sleeps caused by 429/403 responses
    pub backed_off: Counter,
    pub fallback_escalated: Counter,
    pub failed: Counter,
    pub abandoned: Counter,
    pub usable_responses: Counter,
    pub structured_hits: Counter,
    pub table_hits: Counter,
    pub pattern_hits: Counter,
    /// Records completed or built from search-result card data
    pub card_hits: Counter,
    pub incomplete: Counter,
    pub nulled_fields: Counter,
    pub duplicates: Counter,
    pub filtered: Counter,
    pub accepted: Counter,
}

impl RunMetrics {
    /// Count a page on which `tier` supplied at least one field
    pub fn record_tier_hit(&self, tier: Tier) {
        match tier {
            Tier::Structured => self.structured_hits.inc(),
            Tier::Table => self.table_hits.inc(),
            Tier::Pattern => self.pattern_hits.inc(),
            Tier::Card => self.card_hits.inc(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_issued: self.requests_issued.get(),
            retried: self.retried.get(),
            backed_off: self.backed_off.get(),
            fallback_escalated: self.fallback_escalated.get(),
            failed: self.failed.get(),
            abandoned: self.abandoned.get(),
            usable_responses: self.usable_responses.get(),
            structured_hits: self.structured_hits.get(),
            table_hits: self.table_hits.get(),
            pattern_hits: self.pattern_hits.get(),
            card_hits: self.card_hits.get(),
            incomplete: self.incomplete.get(),
            nulled_fields: self.nulled_fields.get(),
            duplicates: self.duplicates.get(),
            filtered: self.filtered.get(),
            accepted: self.accepted.get(),
        }
    }
}

/// Point-in-time copy of the run metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_issued: u64,
    pub retried: u64,
    pub backed_off: u64,
    pub fallback_escalated: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub usable_responses: u64,
    pub structured_hits: u64,
    pub table_hits: u64,
    pub pattern_hits: u64,
    pub card_hits: u64,
    pub incomplete: u64,
    pub nulled_fields: u64,
    pub duplicates: u64,
    pub filtered: u64,
    pub accepted: u64,
}

impl MetricsSnapshot {
    pub fn log_summary(&self) {
        info!(
            issued = self.requests_issued,
            retried = self.retried,
            backed_off = self.backed_off,
            fallback = self.fallback_escalated,
            failed = self.failed,
            abandoned = self.abandoned,
            "Request summary"
        );
        info!(
            structured = self.structured_hits,
            table = self.table_hits,
            pattern = self.pattern_hits,
            card = self.card_hits,
            incomplete = self.incomplete,
            nulled = self.nulled_fields,
            "Extraction summary"
        );
        info!(
            accepted = self.accepted,
            duplicates = self.duplicates,
            filtered = self.filtered,
            "Aggregation summary"
        );

        let rate_limited_ratio = if self.requests_issued == 0 {
            0.0
        } else {
            self.backed_off as f64 / self.requests_issued as f64
        };
        if rate_limited_ratio >= 0.05 {
            info!(
                "{:.1}% of requests were rate limited; lower the concurrency or raise the base delay",
                rate_limited_ratio * 100.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = RunMetrics::default();
        metrics.requests_issued.add(3);
        metrics.retried.inc();
        metrics.record_tier_hit(Tier::Structured);
        metrics.record_tier_hit(Tier::Pattern);
        metrics.record_tier_hit(Tier::Pattern);
        metrics.record_tier_hit(Tier::Card);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_issued, 3);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.structured_hits, 1);
        assert_eq!(snapshot.table_hits, 0);
        assert_eq!(snapshot.pattern_hits, 2);
        assert_eq!(snapshot.card_hits, 1);
    }
}

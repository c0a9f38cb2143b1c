// Performance Metrics for the discount rules engine
//
// Tracks evaluation counts, timings, exclusion cache hit rates, and rules
// skipped because of errors, so slow or misconfigured rule sets show up.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Performance threshold for slow operations (50ms)
const SLOW_OPERATION_THRESHOLD_MS: u64 = 50;

/// Performance metrics for the discount engine
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    exclusion_cache_hits: AtomicU64,
    exclusion_cache_misses: AtomicU64,

    price_calculations: AtomicU64,
    cart_passes: AtomicU64,
    reentrant_calls: AtomicU64,
    skipped_rules: AtomicU64,

    // Timing metrics (in microseconds)
    total_price_time_us: AtomicU64,
    total_cart_time_us: AtomicU64,

    slow_price_calculations: AtomicU64,
    slow_cart_passes: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.inner.exclusion_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.exclusion_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A price read short-circuited by the re-entrancy guard
    pub fn record_reentrant_call(&self) {
        self.inner.reentrant_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// A rule that contributed nothing because it failed to evaluate
    pub fn record_skipped_rule(&self) {
        self.inner.skipped_rules.fetch_add(1, Ordering::Relaxed);
    }

    /// Get exclusion cache hit rate (0.0 to 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.inner.exclusion_cache_hits.load(Ordering::Relaxed);
        let misses = self.inner.exclusion_cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn start_price_calculation(&self) -> OperationTimer {
        OperationTimer::new(OperationType::Price, self.clone())
    }

    pub fn start_cart_pass(&self) -> OperationTimer {
        OperationTimer::new(OperationType::Cart, self.clone())
    }

    fn record_price_calculation(&self, duration: Duration) {
        self.inner.price_calculations.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_price_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if duration.as_millis() as u64 > SLOW_OPERATION_THRESHOLD_MS {
            self.inner.slow_price_calculations.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Slow price calculation: {}ms", duration.as_millis());
        }
    }

    fn record_cart_pass(&self, duration: Duration) {
        self.inner.cart_passes.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_cart_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if duration.as_millis() as u64 > SLOW_OPERATION_THRESHOLD_MS {
            self.inner.slow_cart_passes.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Slow cart recalculation: {}ms", duration.as_millis());
        }
    }

    fn average_ms(count: &AtomicU64, total_us: &AtomicU64) -> f64 {
        let count = count.load(Ordering::Relaxed);
        let total_us = total_us.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            (total_us as f64 / count as f64) / 1000.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = &self.inner;
        MetricsSummary {
            cache_hit_rate: self.cache_hit_rate(),
            cache_hits: inner.exclusion_cache_hits.load(Ordering::Relaxed),
            cache_misses: inner.exclusion_cache_misses.load(Ordering::Relaxed),
            price_calculations: inner.price_calculations.load(Ordering::Relaxed),
            avg_price_time_ms: Self::average_ms(&inner.price_calculations, &inner.total_price_time_us),
            slow_price_calculations: inner.slow_price_calculations.load(Ordering::Relaxed),
            cart_passes: inner.cart_passes.load(Ordering::Relaxed),
            avg_cart_time_ms: Self::average_ms(&inner.cart_passes, &inner.total_cart_time_us),
            slow_cart_passes: inner.slow_cart_passes.load(Ordering::Relaxed),
            reentrant_calls: inner.reentrant_calls.load(Ordering::Relaxed),
            skipped_rules: inner.skipped_rules.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            "Discount engine metrics:\n\
             Exclusion cache: {:.1}% hit rate ({} hits, {} misses)\n\
             Pricing: {} calculations, avg {:.2}ms, {} slow\n\
             Cart: {} passes, avg {:.2}ms, {} slow\n\
             Re-entrant price reads: {}, skipped rules: {}",
            summary.cache_hit_rate * 100.0,
            summary.cache_hits,
            summary.cache_misses,
            summary.price_calculations,
            summary.avg_price_time_ms,
            summary.slow_price_calculations,
            summary.cart_passes,
            summary.avg_cart_time_ms,
            summary.slow_cart_passes,
            summary.reentrant_calls,
            summary.skipped_rules,
        );
    }
}

/// Snapshot of engine metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub price_calculations: u64,
    pub avg_price_time_ms: f64,
    pub slow_price_calculations: u64,
    pub cart_passes: u64,
    pub avg_cart_time_ms: f64,
    pub slow_cart_passes: u64,
    pub reentrant_calls: u64,
    pub skipped_rules: u64,
}

#[derive(Debug, Clone, Copy)]
enum OperationType {
    Price,
    Cart,
}

/// Records the elapsed time of one operation when dropped
pub struct OperationTimer {
    operation: OperationType,
    metrics: EngineMetrics,
    start: Instant,
}

impl OperationTimer {
    fn new(operation: OperationType, metrics: EngineMetrics) -> Self {
        Self {
            operation,
            metrics,
            start: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        match self.operation {
            OperationType::Price => self.metrics.record_price_calculation(duration),
            OperationType::Cart => self.metrics.record_cart_pass(duration),
        }
    }
}

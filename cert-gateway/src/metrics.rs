//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `gateway_calls_total{class, operation}` - Calls issued, by evaluate/submit
//! - `gateway_failures_total{class, kind}` - Failed calls, by error kind
//! - `gateway_call_duration_seconds{class}` - End-to-end call latency
//! - `orderer_blocks_total` - Blocks cut by the development orderer
//! - `orderer_block_size` - Transactions per block
//! - `orderer_transactions_total{code}` - Ordered transactions, by validation code
//!
//! Each collector lives in its own [`Registry`], so several sessions or
//! networks can coexist in one process.

use crate::error::ErrorKind;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::fmt;
use std::sync::Arc;

/// Call class label
pub const EVALUATE: &str = "evaluate";
/// Call class label
pub const SUBMIT: &str = "submit";

/// Gateway session metrics
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Calls issued
    pub calls_total: IntCounterVec,

    /// Failed calls
    pub failures_total: IntCounterVec,

    /// Call duration histogram
    pub call_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl GatewayMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let calls_total = IntCounterVec::new(
            Opts::new("gateway_calls_total", "Total number of gateway calls"),
            &["class", "operation"],
        )?;
        registry.register(Box::new(calls_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new("gateway_failures_total", "Total number of failed gateway calls"),
            &["class", "kind"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let call_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_call_duration_seconds",
                "Histogram of gateway call latencies",
            )
            .buckets(vec![0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 15.0]),
            &["class"],
        )?;
        registry.register(Box::new(call_duration.clone()))?;

        Ok(Self {
            calls_total,
            failures_total,
            call_duration,
            registry,
        })
    }

    /// Record a call
    pub fn record_call(&self, class: &str, operation: &str) {
        self.calls_total.with_label_values(&[class, operation]).inc();
    }

    /// Record a failure
    pub fn record_failure(&self, class: &str, kind: ErrorKind) {
        self.failures_total
            .with_label_values(&[class, kind.as_str()])
            .inc();
    }

    /// Record call duration
    pub fn record_duration(&self, class: &str, duration_seconds: f64) {
        self.call_duration
            .with_label_values(&[class])
            .observe(duration_seconds);
    }

    /// Text exposition of every collector
    pub fn render(&self) -> prometheus::Result<String> {
        render(&self.registry)
    }
}

/// Development orderer metrics
#[derive(Clone)]
pub struct OrdererMetrics {
    /// Blocks cut
    pub blocks_total: IntCounter,

    /// Transactions per block
    pub block_size: Histogram,

    /// Ordered transactions by validation code
    pub transactions_total: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl OrdererMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let blocks_total = IntCounter::new("orderer_blocks_total", "Total number of blocks cut")?;
        registry.register(Box::new(blocks_total.clone()))?;

        let block_size = Histogram::with_opts(
            HistogramOpts::new("orderer_block_size", "Histogram of transactions per block")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        )?;
        registry.register(Box::new(block_size.clone()))?;

        let transactions_total = IntCounterVec::new(
            Opts::new(
                "orderer_transactions_total",
                "Total number of ordered transactions",
            ),
            &["code"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        Ok(Self {
            blocks_total,
            block_size,
            transactions_total,
            registry,
        })
    }

    /// Record a block cut
    pub fn record_block(&self, size: usize) {
        self.blocks_total.inc();
        self.block_size.observe(size as f64);
    }

    /// Record a transaction outcome
    pub fn record_transaction(&self, code: &str) {
        self.transactions_total.with_label_values(&[code]).inc();
    }

    /// Text exposition of every collector
    pub fn render(&self) -> prometheus::Result<String> {
        render(&self.registry)
    }
}

impl fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayMetrics").finish_non_exhaustive()
    }
}

impl fmt::Debug for OrdererMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrdererMetrics")
            .field("blocks_total", &self.blocks_total.get())
            .finish_non_exhaustive()
    }
}

fn render(registry: &Registry) -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayErrorKind;

    #[test]
    fn test_independent_registries() {
        let first = GatewayMetrics::new().unwrap();
        let second = GatewayMetrics::new().unwrap();

        first.record_call(EVALUATE, "ReadAsset");
        first.record_failure(
            EVALUATE,
            ErrorKind::Gateway(GatewayErrorKind::DeadlineExceeded),
        );

        assert_eq!(
            first
                .calls_total
                .with_label_values(&[EVALUATE, "ReadAsset"])
                .get(),
            1
        );
        assert_eq!(
            second
                .calls_total
                .with_label_values(&[EVALUATE, "ReadAsset"])
                .get(),
            0
        );

        let text = first.render().unwrap();
        assert!(text.contains("gateway_failures_total{class=\"evaluate\",kind=\"deadline_exceeded\"} 1"));
    }

    #[test]
    fn test_orderer_metrics() {
        let metrics = OrdererMetrics::new().unwrap();
        metrics.record_block(3);
        metrics.record_transaction("VALID");

        assert_eq!(metrics.blocks_total.get(), 1);
        assert_eq!(metrics.block_size.get_sample_count(), 1);
        assert!(metrics.render().unwrap().contains("orderer_blocks_total 1"));
    }
}

/*!
Logging and metrics for spool buffers.

- Structured logging through `tracing`, installed by [`init_observability`]
- Prometheus counters for flushes, recoveries and appended bytes (behind the
  `metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, SpoolError};

/// Default filter directive when `RUST_LOG` does not say otherwise
pub const DEFAULT_LOG_DIRECTIVE: &str = "spool=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<SpoolMetrics> = OnceLock::new();

/// Process-wide counters for buffer persistence
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct SpoolMetrics {
    pub flushes_total: Counter,
    pub flush_errors_total: Counter,
    pub skipped_flushes_total: Counter,
    pub bytes_appended_total: Counter,
    pub flush_latency_seconds: Histogram,
    pub recoveries_total: Counter,
    pub recovery_failures_total: Counter,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| SpoolError::validation(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| SpoolError::validation(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
impl SpoolMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let flush_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "spool_flush_latency_seconds",
            "Duration of buffer flushes in seconds",
        ))
        .map_err(|e| {
            SpoolError::validation(format!("Failed to create spool_flush_latency_seconds metric: {e}"))
        })?;
        registry
            .register(Box::new(flush_latency_seconds.clone()))
            .map_err(|e| {
                SpoolError::validation(format!("Failed to register spool_flush_latency_seconds: {e}"))
            })?;

        Ok(Self {
            flushes_total: counter(&registry, "spool_flushes_total", "Completed buffer flushes")?,
            flush_errors_total: counter(
                &registry,
                "spool_flush_errors_total",
                "Buffer flushes that returned an error",
            )?,
            skipped_flushes_total: counter(
                &registry,
                "spool_skipped_flushes_total",
                "Periodic flushes skipped because persistence was off or a flush was running",
            )?,
            bytes_appended_total: counter(
                &registry,
                "spool_bytes_appended_total",
                "Bytes appended to backing files",
            )?,
            flush_latency_seconds,
            recoveries_total: counter(
                &registry,
                "spool_recoveries_total",
                "Buffers rebuilt from their backing file",
            )?,
            recovery_failures_total: counter(
                &registry,
                "spool_recovery_failures_total",
                "Recovery attempts that failed",
            )?,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> &'static SpoolMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize spool metrics"))
    }

    pub fn record_flush(&self, bytes: u64, duration: std::time::Duration) {
        self.flushes_total.inc();
        self.bytes_appended_total.inc_by(bytes as f64);
        self.flush_latency_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_flush_error(&self, duration: std::time::Duration) {
        self.flush_errors_total.inc();
        self.flush_latency_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_skipped_flush(&self) {
        self.skipped_flushes_total.inc();
    }

    pub fn record_recovery(&self) {
        self.recoveries_total.inc();
    }

    pub fn record_recovery_failure(&self) {
        self.recovery_failures_total.inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SpoolError::validation(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| SpoolError::validation(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Measures one flush and records its outcome
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    pub fn start_flush() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Complete the timer for a flush that appended `bytes`
    pub fn finish(self, bytes: u64) {
        SpoolMetrics::global().record_flush(bytes, self.start.elapsed());
    }

    pub fn finish_with_error(self) {
        SpoolMetrics::global().record_flush_error(self.start.elapsed());
    }
}

/// Install the global tracing subscriber
///
/// The filter comes from `RUST_LOG` with [`DEFAULT_LOG_DIRECTIVE`] added.
/// With `json` set, events are written as one JSON object per line.
///
/// # Errors
/// * `SpoolError::Validation` - If a subscriber is already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    SpoolMetrics::global();

    let directive = DEFAULT_LOG_DIRECTIVE
        .parse()
        .map_err(|e| SpoolError::validation(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };
    result.map_err(|e| {
        SpoolError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("spool observability initialized");
    Ok(())
}

/// Plain-text logging with the default filter
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}

//! Logging and metrics (spec §6 control plane, out of scope for the core domain logic but
//! carried as ambient stack). Tracing exporter wiring beyond `stdout` lives in the
//! `confirmation-service-otlp` sidecar crate; this module only owns the local
//! `tracing-subscriber` init and the in-process `prometheus::Registry` scraped by `/metrics`.

use crate::config::LoggingConfig;

/// Initializes the global `tracing` subscriber from `config.logging.{level,format}`.
/// Call once at startup, before anything else logs.
pub fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.clone()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// In-process metrics registry, scraped by the `/metrics` endpoint (spec §6). Counters follow
/// the teacher's `IntCounterVec` policy-event registration pattern.
pub mod metrics {
    use prometheus::{Encoder, IntCounterVec, Registry, TextEncoder};
    use std::sync::OnceLock;

    struct Metrics {
        registry: Registry,
        messages_processed: IntCounterVec,
        messages_failed: IntCounterVec,
    }

    static METRICS: OnceLock<Metrics> = OnceLock::new();

    fn metrics() -> &'static Metrics {
        METRICS.get_or_init(|| {
            let registry = Registry::new();
            let messages_processed = IntCounterVec::new(
                prometheus::Opts::new("confirmation_service_messages_processed_total", "Fill events processed"),
                &["outcome"],
            )
            .expect("metric options are valid");
            let messages_failed = IntCounterVec::new(
                prometheus::Opts::new("confirmation_service_messages_failed_total", "Fill events that failed terminally"),
                &["reason"],
            )
            .expect("metric options are valid");
            registry
                .register(Box::new(messages_processed.clone()))
                .expect("metric name is unique");
            registry
                .register(Box::new(messages_failed.clone()))
                .expect("metric name is unique");
            Metrics { registry, messages_processed, messages_failed }
        })
    }

    /// Counted outcomes: `"processed"`, `"correction"`, `"duplicate"`.
    pub fn record_processed(outcome: &str) {
        metrics().messages_processed.with_label_values(&[outcome]).inc();
    }

    /// Counted reasons: `"validation"`, `"downstream"`, `"decode"`.
    pub fn record_failed(reason: &str) {
        metrics().messages_failed.with_label_values(&[reason]).inc();
    }

    /// The shared registry, for sidecar crates (e.g. `confirmation-service-prometheus`'s
    /// breaker gauges) that want their samples scraped alongside these counters.
    pub fn registry() -> &'static Registry {
        &metrics().registry
    }

    /// Renders the registry in Prometheus text exposition format for the `/metrics` handler.
    pub fn render() -> String {
        let families = metrics().registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .expect("prometheus text encoding does not fail");
        String::from_utf8(buffer).expect("prometheus output is valid utf-8")
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn counters_show_up_in_rendered_output() {
            record_processed("processed");
            record_failed("validation");
            let rendered = render();
            assert!(rendered.contains("confirmation_service_messages_processed_total"));
            assert!(rendered.contains("confirmation_service_messages_failed_total"));
        }
    }
}

//! Tracing exporter wiring (spec §6, `tracing.exporter`): installs a global OTLP tracer
//! provider when `tracing.enabled` and `exporter` is `"jaeger"` or `"otlp"` (Jaeger's modern
//! collector ingests OTLP directly, so both share one pipeline). `"stdout"` and
//! `tracing.enabled = false` are no-ops — spans still flow through `tracing` locally, just
//! without an exporter.

use confirmation_service::config::TracingConfig;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::TracerProvider;

/// Holds the installed provider so the caller can flush/shutdown it on drop.
pub struct TracerGuard {
    provider: TracerProvider,
}

impl Drop for TracerGuard {
    fn drop(&mut self) {
        if let Err(error) = self.provider.shutdown() {
            tracing::warn!(error = %error, "failed to shut down tracer provider");
        }
    }
}

/// Installs a global OTLP tracer provider per `config`, or returns `None` for a no-op
/// configuration.
pub fn init(config: &TracingConfig) -> Option<TracerGuard> {
    if !config.enabled {
        return None;
    }
    match config.exporter.as_str() {
        "jaeger" | "otlp" => {
            let exporter = opentelemetry_otlp::new_exporter().http().with_endpoint("http://localhost:4318/v1/traces");
            let provider = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(opentelemetry_sdk::trace::Config::default().with_resource(
                    opentelemetry_sdk::Resource::new(vec![
                        opentelemetry::KeyValue::new("service.name", config.service_name.clone()),
                        opentelemetry::KeyValue::new("service.version", config.service_version.clone()),
                    ]),
                ))
                .install_batch(opentelemetry_sdk::runtime::Tokio)
                .ok()?;
            opentelemetry::global::set_tracer_provider(provider.clone());
            Some(TracerGuard { provider })
        }
        _ => None,
    }
}

use confirmation_service::config::AppConfig;
use confirmation_service::lifecycle::{Application, Bootstrap};
use confirmation_service_kafka::KafkaSource;
use confirmation_service_prometheus::BreakerGaugeSink;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    confirmation_service::telemetry::init_logging(&config.logging);
    let _tracer_guard = confirmation_service_otlp::init(&config.tracing);

    let Bootstrap { application, processor, facade, health } = Application::bootstrap(config);

    if let Ok(gauges) = BreakerGaugeSink::new(confirmation_service::telemetry::metrics::registry().clone()) {
        let breakers = facade.circuit_breakers().clone();
        let cancellation = application.cancellation.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            loop {
                tokio::select! {
                    _ = interval.tick() => gauges.sample(&breakers),
                    _ = cancellation.cancelled() => break,
                }
            }
        });
    } else {
        tracing::warn!("breaker gauge registration failed, circuit breaker state will not be exported");
    }

    let source = KafkaSource::new(
        &application.config.bus.brokers,
        &application.config.bus.consumer_group,
        &application.config.bus.topic,
        application.config.bus.connection_timeout,
    )?;

    application.run(source, processor, health).await
}

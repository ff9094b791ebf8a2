//! Configuration surface (spec §6): file then environment (environment wins), duration
//! fields accept human units (`"5s"`), invalid values terminate startup with a descriptive
//! error. Layered with the `config` crate's builder rather than `envy`: nested sections
//! (`execution_service.circuit_breaker.failure_threshold`) need the `__`-separator nesting
//! `config::Environment` gives for free.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub consumer_group: String,
    #[serde(with = "humantime_serde")]
    pub consumer_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    pub max_retries: usize,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "fill-events".to_string(),
            consumer_group: "confirmation-service".to_string(),
            consumer_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: usize,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionServiceConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_retries: usize,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for ExecutionServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationServiceConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AllocationServiceConfig {
    fn default() -> Self {
        Self { base_url: "http://localhost:8082".to_string(), timeout: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "json".to_string(), output: "stdout".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, path: "/metrics".to_string(), namespace: "confirmation_service".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub service_name: String,
    pub service_version: String,
    pub exporter: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "confirmation-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            exporter: "stdout".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_requests: usize,
    pub message_buffer_size: usize,
    pub worker_pool_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { max_concurrent_requests: 100, message_buffer_size: 1000, worker_pool_size: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "humantime_serde")]
    pub startup_grace_period: Duration,
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { startup_grace_period: Duration::from_secs(10), check_interval: Duration::from_secs(5) }
    }
}

/// Open Question 1 decision: Allocation failure vs. commit is a configurable knob, defaulting
/// to the observed behaviour of not blocking the commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfigSection {
    pub block_commit_on_allocation_failure: bool,
    pub idempotency_max_entries: usize,
    #[serde(with = "humantime_serde")]
    pub idempotency_retention_period: Duration,
}

impl Default for ProcessorConfigSection {
    fn default() -> Self {
        Self {
            block_commit_on_allocation_failure: false,
            idempotency_max_entries: 100_000,
            idempotency_retention_period: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub bus: BusConfig,
    pub execution_service: ExecutionServiceConfig,
    pub allocation_service: AllocationServiceConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub tracing: TracingConfig,
    pub performance: PerformanceConfig,
    pub health: HealthConfig,
    pub processor: ProcessorConfigSection,
}

impl AppConfig {
    /// Loads from `confirmation-service.toml` (if present) in the current directory, then
    /// applies `CONFIRMATION_SERVICE__`-prefixed environment overrides (double underscore
    /// nests into sections, e.g. `CONFIRMATION_SERVICE__HTTP__PORT`), then validates.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("confirmation-service.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);
        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CONFIRMATION_SERVICE")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder.build()?;
        let parsed: AppConfig = raw.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of: {}",
                valid_levels.join(", ")
            )));
        }
        let valid_formats = ["json", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.format must be one of: {}",
                valid_formats.join(", ")
            )));
        }
        let valid_exporters = ["stdout", "jaeger", "otlp"];
        if !valid_exporters.contains(&self.tracing.exporter.as_str()) {
            return Err(ConfigError::Validation(format!(
                "tracing.exporter must be one of: {}",
                valid_exporters.join(", ")
            )));
        }
        if self.bus.brokers.is_empty() {
            return Err(ConfigError::Validation("bus.brokers must not be empty".to_string()));
        }
        if self.execution_service.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "executionService.circuitBreaker.failureThreshold must be at least 1".to_string(),
            ));
        }
        if self.performance.worker_pool_size == 0 {
            return Err(ConfigError::Validation("performance.workerPoolSize must be at least 1".to_string()));
        }
        Ok(())
    }
}

#![forbid(unsafe_code)]

//! Confirmation service: a stateless consumer that reconciles trade fills against an
//! Execution Service and forwards completed trades to an Allocation Service, wrapped in a
//! retry / circuit-breaker / timeout / dead-letter resilience fabric.
//!
//! The crate splits into two layers:
//!
//! - A broker- and domain-agnostic **resilience fabric**: [`RetryPolicy`],
//!   [`CircuitBreakerPolicy`], [`TimeoutPolicy`], [`dlq::DeadLetterStore`], and the
//!   [`ResilienceFacade`] that composes all four plus per-downstream breaker selection.
//! - A **domain pipeline** built on the fabric: [`domain`] types, [`clients`], the
//!   [`idempotency`] index, the [`validator`], the [`processor`] state machine, and the
//!   [`consumer`] loop, which is generic over [`consumer::MessageSource`] so broker bindings
//!   live in separate sidecar crates (`confirmation-service-kafka` and friends).
//!
//! ```no_run
//! use confirmation_service::facade::{OperationKind, ResilienceFacade, ResilienceFacadeConfig};
//! use confirmation_service::AppError;
//!
//! # async fn run() -> Result<(), AppError> {
//! let facade = ResilienceFacade::new(ResilienceFacadeConfig::default());
//! facade
//!     .call("execution-service", OperationKind::ExecutionService, || async {
//!         Ok::<_, AppError>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod circuit_breaker;
mod circuit_breaker_registry;
pub mod clients;
mod clock;
pub mod config;
pub mod consumer;
pub mod dlq;
pub mod domain;
mod error;
pub mod facade;
pub mod http;
pub mod idempotency;
mod jitter;
pub mod lifecycle;
pub mod processor;
mod retry;
mod sleeper;
pub mod telemetry;
mod timeout;
pub mod validator;

// Re-exports: the resilience fabric's public surface.
pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerSnapshot, CircuitState};
pub use circuit_breaker_registry::CircuitBreakerRegistry;
pub use clock::{Clock, MonotonicClock};
pub use error::{classify_http_status, flatten_resilience_error, AppError, ErrorKind, ResilienceError, MAX_RETRY_FAILURES};
pub use facade::{OperationKind, ResilienceFacade, ResilienceFacadeConfig};
pub use jitter::Jitter;
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{sleep_cancellable, InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT};

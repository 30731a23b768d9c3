//! Observability: structured logging and health endpoints

pub mod health;
pub mod logging;

pub use health::{health_routes, HealthState};
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{dispatch_span, http_span, invocation_span, worker_span};

//! hookfan - webhook fan-out to remote worker agents
//!
//! Accepts webhook deliveries, asks a planner to split the content into one
//! instruction per configured worker, dispatches those instructions over the
//! worker streaming protocol, and records the aggregated outcome.
//!
//! # Overview
//!
//! - Duplicate delivery suppression with separate live and test namespaces
//! - Immediate acknowledgment with supervised background processing
//! - Parallel fan-out or strict sequential dispatch per webhook
//! - Tolerant aggregation of inconsistently shaped worker results
//! - A persisted invocation ledger with per-worker counters
//!
//! # Quick Start
//!
//! ```rust
//! use hookfan::webhook::{DispatchMode, WebhookConfig, WorkerTarget};
//!
//! let config = WebhookConfig::new("meeting", "Meeting notes")
//!     .with_worker(WorkerTarget::new("slack", "http://localhost:4001"))
//!     .with_worker(WorkerTarget::new("github", "http://localhost:4002"))
//!     .with_dispatch_mode(DispatchMode::Sequential);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.workers.len(), 2);
//! ```

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod observability;
pub mod pipeline;
pub mod planner;
pub mod server;
pub mod testing;
pub mod webhook;
pub mod worker;

pub use config::{ConfigError, ServiceConfig};
pub use error::{ServiceError, ServiceResult};
pub use ledger::{Invocation, InvocationStatus, Ledger, Outcome};
pub use server::AppContext;
pub use webhook::{DispatchMode, WebhookConfig, WorkerTarget};

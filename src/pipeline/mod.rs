//! Invocation processing pipeline

pub mod orchestrator;

pub use orchestrator::{InvocationJob, Orchestrator};

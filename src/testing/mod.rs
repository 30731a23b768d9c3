//! Testing utilities and mock implementations
//!
//! Mocks for the worker and planner seams, so the pipeline can run without
//! remote agents or a planner service.

pub mod mocks;

pub use mocks::*;

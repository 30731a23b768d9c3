//! Webhook intake: config registry, duplicate suppression, payload
//! extraction and the ingress entry point.

pub mod dedup;
pub mod extract;
pub mod ingress;
pub mod registry;

pub use dedup::DedupGuard;
pub use extract::{extract_content, ExtractedContent};
pub use ingress::{Acceptance, WebhookIngress};
pub use registry::{DispatchMode, WebhookConfig, WebhookRegistry, WorkerTarget};

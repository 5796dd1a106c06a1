//! Request pipeline
//!
//! # Overview
//!
//! - `RequestPipeline` - runs one logical request through rate limiting,
//!   circuit breaking, auth, transport, retry and validation
//! - `TargetRegistry` - per-target breakers and rate limiters plus per-tenant
//!   credentials, built once and shared
//! - `RequestContext` - correlation id, attempt counter and deadline

mod context;
mod executor;
mod registry;

pub use context::RequestContext;
pub use executor::{PipelineConfig, RequestPipeline};
pub use registry::{TargetGuard, TargetRegistry, TargetRegistryBuilder, TargetSnapshot};

#[cfg(test)]
mod tests;

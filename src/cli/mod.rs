//! CLI module
//!
//! Command-line interface for the request pipeline.
//!
//! # Commands
//!
//! - `validate` - Load a connector config and print its targets
//! - `request` - Execute one request with retries, breaker and rate limiting
//! - `serve` - Start HTTP server mode

mod commands;
mod runner;
mod server;

pub use commands::{Cli, Commands, OutputFormat, RequestArgs};
pub use runner::Runner;
pub use server::{router, serve};

//! CLI commands and argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Resilient connector CLI
#[derive(Parser, Debug)]
#[command(name = "resilient-connector")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Connector configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate connector configuration
    Validate,

    /// Execute one request through the resilience pipeline
    Request(RequestArgs),

    /// Start HTTP server mode
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

/// Arguments for a single request
#[derive(Args, Debug, Clone, Default)]
pub struct RequestArgs {
    /// Request path (relative to base_url) or absolute URL
    pub path: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Query parameter as KEY=VALUE (repeatable)
    #[arg(short, long = "query", value_name = "KEY=VALUE")]
    pub query: Vec<String>,

    /// Header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// JSON request body
    #[arg(short, long)]
    pub data: Option<String>,

    /// Target key (defaults to the base_url host)
    #[arg(long)]
    pub target: Option<String>,

    /// Tenant whose credentials are used
    #[arg(long)]
    pub tenant: Option<String>,

    /// Request deadline in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// JSON schema file the response must match
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Include breaker and rate limiter state in the output
    #[arg(long)]
    pub stats: bool,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Compact JSON on one line
    Json,
    /// Indented JSON
    Pretty,
}

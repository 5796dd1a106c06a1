//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat, RequestArgs};
use crate::config::{load_config, ConnectorConfig};
use crate::error::{Error, Result, ResultExt};
use crate::http::ApiRequest;
use crate::schema::{AnyJson, JsonSchema};
use crate::types::Method;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Validate => self.validate(),
            Commands::Request(args) => self.request(args).await,
            Commands::Serve { port } => {
                let config = self.load_config()?;
                let pipeline = Arc::new(config.build_pipeline()?);
                crate::cli::serve(config.name.clone(), pipeline, *port).await
            }
        }
    }

    /// Load connector config
    fn load_config(&self) -> Result<ConnectorConfig> {
        let path = self
            .cli
            .config
            .as_ref()
            .ok_or_else(|| Error::config("Config file not specified (use -c flag)"))?;
        load_config(path)
    }

    /// Validate config and print the resolved targets
    fn validate(&self) -> Result<()> {
        let config = self.load_config()?;
        let default_target = config.default_target()?;
        let mut targets = vec![default_target.clone()];
        targets.extend(config.targets.keys().filter(|t| **t != default_target).cloned());

        self.output_message(&json!({
            "type": "VALIDATION",
            "valid": true,
            "name": config.name,
            "default_target": default_target,
            "targets": targets,
            "tenants": config.tenants.keys().collect::<Vec<_>>(),
            "auth": config.auth.credential_kind(),
        }));

        Ok(())
    }

    /// Execute one request through the pipeline
    async fn request(&self, args: &RequestArgs) -> Result<()> {
        let config = self.load_config()?;
        let pipeline = config.build_pipeline()?;
        let request = build_request(args)?;

        let data = match &args.schema {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read schema '{}'", path.display()))?;
                let schema = JsonSchema::from_json_str(&text)?;
                pipeline.execute(request, &schema).await
            }
            None => pipeline.execute(request, &AnyJson).await,
        };

        let mut message = match data {
            Ok(data) => json!({ "type": "RECORD", "data": data }),
            Err(e) => {
                tracing::debug!(kind = %e.kind(), "Request failed");
                if args.stats {
                    self.output_message(&json!({ "type": "STATS", "targets": pipeline.snapshot() }));
                }
                return Err(e);
            }
        };

        if args.stats {
            message["targets"] = json!(pipeline.snapshot());
        }
        self.output_message(&message);

        Ok(())
    }

    /// Output a message
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// Turn command-line arguments into an [`ApiRequest`]
pub(crate) fn build_request(args: &RequestArgs) -> Result<ApiRequest> {
    let method: Method = args.method.parse()?;
    let mut request = ApiRequest::new(method, args.path.clone());

    for pair in &args.query {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::invalid_value("query", format!("expected KEY=VALUE, got '{pair}'")))?;
        request = request.query(key, value);
    }

    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| Error::invalid_value("header", format!("expected 'Name: value', got '{header}'")))?;
        request = request.header(name.trim(), value.trim());
    }

    if let Some(data) = &args.data {
        let body: Value = serde_json::from_str(data)?;
        request = request.json(body);
    }
    if let Some(target) = &args.target {
        request = request.target(target);
    }
    if let Some(tenant) = &args.tenant {
        request = request.tenant(tenant);
    }
    if let Some(ms) = args.timeout_ms {
        request = request.timeout(Duration::from_millis(ms));
    }

    Ok(request)
}

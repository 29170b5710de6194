//! # Structured Logging
//!
//! Hosts that do not install their own `tracing` subscriber can call
//! [`init_logging`] before running migrations. The migration crates only emit
//! events; they never install a subscriber themselves.

use serde_json::json;
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TIDEMARK_DIRECTIVE: &str = "tidemark=info,tidemark_core=info,tidemark_migrate=info";

/// Logging configuration for migration hosts
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level reported in the initialization event
    pub level: String,
    /// Emit one JSON object per event, for deploy pipelines that ship logs
    pub json_format: bool,
    /// Include file and line number information
    pub include_location: bool,
    /// Filter directive used when `RUST_LOG` is not set
    pub env_filter: Option<String>,
    /// Environment label (e.g. "staging") attached to the initialization event
    pub deployment: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
            env_filter: Some(TIDEMARK_DIRECTIVE.to_string()),
            deployment: None,
        }
    }
}

impl LoggingConfig {
    /// Machine-readable output for migrations run from CI or a deploy hook
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Self::default()
        }
    }

    /// Per-session and per-write debug events, for investigating a blocked namespace
    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            include_location: true,
            env_filter: Some("tidemark_migrate=debug,tidemark_core=debug,tidemark=debug".to_string()),
            ..Self::default()
        }
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    pub fn directive(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.directive()))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stdout)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .json(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stdout)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()?;
    }

    let mut init_msg = json!({
        "message": "Structured logging initialized",
        "level": config.level,
        "json_format": config.json_format,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    if let Some(deployment) = &config.deployment {
        init_msg["deployment"] = json!(deployment);
    }

    tracing::info!(target: "tidemark::logging", "{}", init_msg);

    Ok(())
}

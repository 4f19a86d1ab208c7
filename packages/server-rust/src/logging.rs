//! Global `tracing` subscriber setup.

use anyhow::Context as _;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Builds the event filter. A non-empty `RUST_LOG` value replaces the
/// configured directive.
///
/// # Errors
///
/// Returns an error naming the directive when it does not parse.
pub fn env_filter(config: &LoggingConfig, rust_log: Option<&str>) -> anyhow::Result<EnvFilter> {
    let directive = rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(&config.filter);
    EnvFilter::try_new(directive).with_context(|| format!("invalid log filter `{directive}`"))
}

/// Builds the subscriber described by `config` without installing it.
///
/// # Errors
///
/// Returns an error if the effective filter directive is invalid.
pub fn build_subscriber(
    config: &LoggingConfig,
    rust_log: Option<&str>,
) -> anyhow::Result<impl Subscriber + Send + Sync> {
    let filter = env_filter(config, rust_log)?;
    let layer = if config.json {
        fmt::layer().json().with_current_span(false).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };
    Ok(tracing_subscriber::registry().with(layer.with_filter(filter)))
}

/// Installs the process-wide subscriber, honoring `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    build_subscriber(config, rust_log.as_deref())?
        .try_init()
        .context("global tracing subscriber already installed")
}

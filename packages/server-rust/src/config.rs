//! Configuration types for the session layer.
//!
//! Every section has a `Default` describing a local, open deployment: no
//! remote authorization endpoint, no trace collector, no metrics listener.
//! [`ConfigArgs`] maps command-line flags and `Q_*` environment variables
//! onto [`QConfig`] for embedding binaries.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use serde::Deserialize;

/// Top-level configuration shared by every request context.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QConfig {
    /// Remote authorization service.
    pub authorization: AuthorizationConfig,
    /// Distributed tracing.
    pub jaeger: JaegerConfig,
    /// Metrics sink.
    pub stats: StatsConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Remote authorization service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthorizationConfig {
    /// JSON-RPC endpoint URL. Empty means open mode: every credential is granted.
    pub endpoint: String,
    /// Credentials accepted by the management (`mam`) endpoint.
    pub mam_access_keys: HashSet<String>,
    /// Upper bound for a single call to the authorization service.
    pub request_timeout_ms: u64,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            mam_access_keys: HashSet::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl AuthorizationConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Trace reporting settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JaegerConfig {
    /// Collector URL (`http://...`) or agent `host:port`. Empty disables tracing.
    pub endpoint: String,
    /// Service name reported with every span.
    pub service: String,
    /// Static tags attached to every request span.
    pub tags: BTreeMap<String, String>,
    /// Interval between span exporter flushes in milliseconds.
    pub flush_interval_ms: u64,
    /// Maximum number of spans sent in one batch.
    pub max_batch_size: usize,
}

impl Default for JaegerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            service: "Q Server".to_string(),
            tags: BTreeMap::new(),
            flush_interval_ms: 1_000,
            max_batch_size: 100,
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatsConfig {
    /// Address for the Prometheus scrape listener. `None` keeps metrics as no-ops.
    pub prometheus_listen: Option<SocketAddr>,
    /// Prefix prepended to every metric name.
    pub prefix: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            prometheus_listen: None,
            prefix: "qserver.".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Command-line and environment overrides.
#[derive(Debug, Clone, Parser)]
#[command(about = "Q-Server session layer settings")]
pub struct ConfigArgs {
    /// Authorization service JSON-RPC endpoint.
    #[arg(long, env = "Q_AUTH_ENDPOINT", default_value = "")]
    pub auth_endpoint: String,

    /// Comma separated management access keys.
    #[arg(long, env = "Q_MAM_ACCESS_KEYS", value_delimiter = ',')]
    pub mam_access_keys: Vec<String>,

    /// Authorization call timeout in milliseconds.
    #[arg(long, env = "Q_AUTH_TIMEOUT_MS", default_value_t = 10_000)]
    pub auth_timeout_ms: u64,

    /// Jaeger collector URL or agent host:port.
    #[arg(long, env = "Q_JAEGER_ENDPOINT", default_value = "")]
    pub jaeger_endpoint: String,

    /// Service name reported to Jaeger.
    #[arg(long, env = "Q_JAEGER_SERVICE", default_value = "Q Server")]
    pub jaeger_service: String,

    /// Comma separated `name=value` tags attached to request spans.
    #[arg(long, env = "Q_JAEGER_TAGS", value_delimiter = ',')]
    pub jaeger_tags: Vec<String>,

    /// Prometheus listener address.
    #[arg(long, env = "Q_STATS_LISTEN")]
    pub stats_listen: Option<SocketAddr>,

    /// Log filter directive.
    #[arg(long, env = "Q_LOG", default_value = "info")]
    pub log_filter: String,

    /// Emit JSON logs.
    #[arg(long, env = "Q_LOG_JSON")]
    pub log_json: bool,
}

impl ConfigArgs {
    /// Builds the configuration, starting from defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a tag is not in `name=value` form.
    pub fn into_config(self) -> anyhow::Result<QConfig> {
        let tags = parse_tags(&self.jaeger_tags)?;
        Ok(QConfig {
            authorization: AuthorizationConfig {
                endpoint: self.auth_endpoint,
                mam_access_keys: self
                    .mam_access_keys
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect(),
                request_timeout_ms: self.auth_timeout_ms,
            },
            jaeger: JaegerConfig {
                endpoint: self.jaeger_endpoint,
                service: self.jaeger_service,
                tags,
                ..JaegerConfig::default()
            },
            stats: StatsConfig {
                prometheus_listen: self.stats_listen,
                ..StatsConfig::default()
            },
            logging: LoggingConfig {
                filter: self.log_filter,
                json: self.log_json,
            },
        })
    }
}

fn parse_tags(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();
    for tag in raw.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        let Some((name, value)) = tag.split_once('=') else {
            bail!("invalid tag {tag:?}: expected name=value");
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("invalid tag {tag:?}: empty name");
        }
        tags.insert(name.to_string(), value.trim().to_string());
    }
    Ok(tags)
}

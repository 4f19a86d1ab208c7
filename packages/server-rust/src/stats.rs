//! Counters, gauges and timings over the `metrics` facade.
//!
//! Without an installed recorder every call is a no-op. Tags use the
//! `name:value` form; a tag without a colon becomes `name="true"`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::Mutex;
use tracing::info;

use crate::config::StatsConfig;

fn labels(tags: &[&str]) -> Vec<Label> {
    tags.iter()
        .filter(|t| !t.is_empty())
        .map(|tag| match tag.split_once(':') {
            Some((name, value)) => Label::new(name.to_string(), value.to_string()),
            None => Label::new((*tag).to_string(), "true"),
        })
        .collect()
}

/// Factory for named metrics sharing one prefix.
#[derive(Debug, Clone)]
pub struct QStats {
    prefix: Arc<str>,
}

impl Default for QStats {
    fn default() -> Self {
        Self::new(&StatsConfig::default())
    }
}

impl QStats {
    #[must_use]
    pub fn new(config: &StatsConfig) -> Self {
        Self {
            prefix: config.prefix.as_str().into(),
        }
    }

    /// Installs the Prometheus exporter when a listen address is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be installed, e.g. because a
    /// recorder is already set or the address cannot be bound.
    pub fn install(config: &StatsConfig) -> anyhow::Result<Self> {
        if let Some(addr) = config.prometheus_listen {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("failed to install prometheus exporter")?;
            info!(%addr, "prometheus exporter listening");
        }
        Ok(Self::new(config))
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    #[must_use]
    pub fn counter(&self, name: &str, tags: &[&str]) -> StatsCounter {
        StatsCounter {
            name: self.full_name(name),
            labels: labels(tags),
        }
    }

    #[must_use]
    pub fn gauge(&self, name: &str, tags: &[&str]) -> StatsGauge {
        StatsGauge {
            name: self.full_name(name),
            labels: labels(tags),
            value: Arc::new(Mutex::new(0.0)),
        }
    }

    #[must_use]
    pub fn timing(&self, name: &str, tags: &[&str]) -> StatsTiming {
        StatsTiming {
            name: self.full_name(name),
            labels: labels(tags),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsCounter {
    name: String,
    labels: Vec<Label>,
}

impl StatsCounter {
    pub fn increment(&self) {
        metrics::counter!(self.name.clone(), self.labels.clone()).increment(1);
    }
}

/// A gauge remembering its last value, so relative updates work without
/// reading back from the recorder.
#[derive(Debug, Clone)]
pub struct StatsGauge {
    name: String,
    labels: Vec<Label>,
    value: Arc<Mutex<f64>>,
}

impl StatsGauge {
    pub fn set(&self, value: f64) {
        *self.value.lock() = value;
        metrics::gauge!(self.name.clone(), self.labels.clone()).set(value);
    }

    pub fn increment(&self, delta: f64) {
        let mut current = self.value.lock();
        *current += delta;
        metrics::gauge!(self.name.clone(), self.labels.clone()).set(*current);
    }

    pub fn decrement(&self, delta: f64) {
        self.increment(-delta);
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        *self.value.lock()
    }
}

#[derive(Debug, Clone)]
pub struct StatsTiming {
    name: String,
    labels: Vec<Label>,
}

impl StatsTiming {
    /// Records a duration in milliseconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn report(&self, millis: u64) {
        metrics::histogram!(self.name.clone(), self.labels.clone()).record(millis as f64);
    }

    /// Starts a measurement; calling the returned closure reports it.
    #[must_use]
    pub fn start(&self) -> impl FnOnce() + Send + 'static {
        let timing = self.clone();
        let started = Instant::now();
        move || {
            let millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            timing.report(millis);
        }
    }
}

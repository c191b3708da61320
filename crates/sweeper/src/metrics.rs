//! Outcome counters and their export
//!
//! Counters are accumulated in an owned [`OutcomeCounters`] during the pass and
//! handed to a [`MetricsSink`] once at the end of the run.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::Resource;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::kinds::ResourceKind;

const SERVICE_NAME: &str = "sweeper";
const OBJECTS_METRIC: &str = "sweeper_cleanup_objects_total";
const RUNTIME_METRIC: &str = "sweeper_run_duration_seconds";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to build metrics exporter: {0}")]
    Exporter(String),

    #[error("failed to flush metrics: {0}")]
    Flush(String),
}

/// Outcome recorded for an object that passed the readiness gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Deleted,
    Kept,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Deleted => "deleted",
            Outcome::Kept => "kept",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterKey {
    pub namespace: String,
    pub component: String,
    pub kind: ResourceKind,
    pub outcome: Outcome,
}

/// Deleted/kept counts keyed by namespace, component and kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeCounters {
    counts: BTreeMap<CounterKey, u64>,
}

impl OutcomeCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(
        &mut self,
        namespace: &str,
        component: &str,
        kind: ResourceKind,
        outcome: Outcome,
    ) {
        let key = CounterKey {
            namespace: namespace.to_string(),
            component: component.to_string(),
            kind,
            outcome,
        };
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CounterKey, u64)> {
        self.counts.iter().map(|(key, count)| (key, *count))
    }

    /// Sum over all namespaces and components for one kind and outcome
    #[must_use]
    pub fn total(&self, kind: ResourceKind, outcome: Outcome) -> u64 {
        self.iter()
            .filter(|(key, _)| key.kind == kind && key.outcome == outcome)
            .map(|(_, count)| count)
            .sum()
    }
}

/// Destination for the counters of a finished pass
pub trait MetricsSink: Send + Sync {
    fn flush(
        &self,
        namespace: &str,
        counters: &OutcomeCounters,
        runtime: Duration,
    ) -> Result<(), MetricsError>;
}

/// Exports counters to an OTLP/HTTP collector.
pub struct OtlpMetricsSink {
    provider: SdkMeterProvider,
}

impl OtlpMetricsSink {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, MetricsError> {
        let exporter = MetricExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .with_timeout(timeout)
            .build()
            .map_err(|e| MetricsError::Exporter(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter).build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .build();

        debug!(endpoint = %endpoint, "Configured OTLP metrics exporter");
        Ok(Self { provider })
    }
}

impl MetricsSink for OtlpMetricsSink {
    fn flush(
        &self,
        namespace: &str,
        counters: &OutcomeCounters,
        runtime: Duration,
    ) -> Result<(), MetricsError> {
        let meter = self.provider.meter(SERVICE_NAME);

        let objects = meter
            .u64_counter(OBJECTS_METRIC)
            .with_description("Objects evaluated by the sweeper, by outcome")
            .build();
        let run_duration = meter
            .f64_gauge(RUNTIME_METRIC)
            .with_description("Wall-clock duration of the cleanup pass")
            .with_unit("s")
            .build();

        for (key, count) in counters.iter() {
            objects.add(
                count,
                &[
                    KeyValue::new("namespace", key.namespace.clone()),
                    KeyValue::new("component", key.component.clone()),
                    KeyValue::new("resource", key.kind.as_str()),
                    KeyValue::new("outcome", key.outcome.as_str()),
                ],
            );
        }
        run_duration.record(
            runtime.as_secs_f64(),
            &[KeyValue::new("namespace", namespace.to_string())],
        );

        self.provider
            .force_flush()
            .map_err(|e| MetricsError::Flush(e.to_string()))?;
        self.provider
            .shutdown()
            .map_err(|e| MetricsError::Flush(e.to_string()))?;

        info!(
            series = counters.iter().count(),
            "Pushed cleanup metrics to collector"
        );
        Ok(())
    }
}

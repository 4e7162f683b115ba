//! Prometheus-backed metric sink.
//!
//! | Metric | Type | Description | Labels |
//! |--------|------|-------------|--------|
//! | `ibm_cd_processes_hold_total` | Gauge | Processes in HOLD | |
//! | `ibm_cd_processes_wait_total` | Gauge | Processes in WAIT | |
//! | `ibm_cd_processes_timer_total` | Gauge | Processes in TIMER | |
//! | `ibm_cd_processes_exec_total` | Gauge | Processes in EXEC | |
//! | `ibm_cd_process_count` | Gauge | HOLD/WAIT processes per name | `process_name` |
//! | `ibm_cd_scrape_errors_total` | Counter | Failed collection cycles | |
//!
//! In delta mode the four process metrics only receive signed increments;
//! an integer gauge is the up-down counter of the Prometheus data model.

use std::collections::BTreeMap;
use std::fmt;

use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::classify::QueueCategory;

/// Error type for a rejected metric update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The value does not fit the metric's representation.
    OutOfRange { metric: String, value: u64 },
    /// The metrics library refused the update.
    Rejected { metric: String, reason: String },
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::OutOfRange { metric, value } => {
                write!(f, "value {} out of range for {}", value, metric)
            }
            PublishError::Rejected { metric, reason } => {
                write!(f, "failed to update {}: {}", metric, reason)
            }
        }
    }
}

impl std::error::Error for PublishError {}

/// Error type for registry setup and exposition.
#[derive(Debug)]
pub enum MetricsError {
    Registration(prometheus::Error),
    Encoding(String),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::Registration(e) => write!(f, "failed to register metric: {}", e),
            MetricsError::Encoding(msg) => write!(f, "failed to encode metrics: {}", msg),
        }
    }
}

impl std::error::Error for MetricsError {}

impl From<prometheus::Error> for MetricsError {
    fn from(e: prometheus::Error) -> Self {
        MetricsError::Registration(e)
    }
}

/// Where the projector and poll loop publish to.
pub trait MetricSink {
    /// Sets a category metric to an absolute value.
    fn set_processes(&self, category: QueueCategory, value: u64) -> Result<(), PublishError>;

    /// Applies a signed increment to a category metric.
    fn add_processes(&self, category: QueueCategory, delta: i64) -> Result<(), PublishError>;

    /// Replaces the per-process-name counts wholesale.
    fn set_process_counts(&self, counts: &BTreeMap<String, u64>) -> Result<(), PublishError>;

    /// Counts one failed collection cycle.
    fn record_scrape_error(&self);
}

/// Exposed metric name for a category.
pub fn process_metric_name(category: QueueCategory) -> &'static str {
    match category {
        QueueCategory::Hold => "ibm_cd_processes_hold_total",
        QueueCategory::Wait => "ibm_cd_processes_wait_total",
        QueueCategory::Timer => "ibm_cd_processes_timer_total",
        QueueCategory::Exec => "ibm_cd_processes_exec_total",
    }
}

pub const PROCESS_COUNT_METRIC: &str = "ibm_cd_process_count";
pub const SCRAPE_ERRORS_METRIC: &str = "ibm_cd_scrape_errors_total";

/// The exporter's metrics, registered with one registry.
///
/// All metrics use interior mutability; the struct is cheap to clone and
/// safe to share with the scrape endpoint.
#[derive(Clone)]
pub struct ExporterMetrics {
    processes: [IntGauge; 4],
    process_count: IntGaugeVec,
    scrape_errors: IntCounter,
}

impl ExporterMetrics {
    /// Creates the metrics and registers them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, MetricsError> {
        let gauge = |category: QueueCategory| -> Result<IntGauge, MetricsError> {
            let g = IntGauge::new(
                process_metric_name(category),
                format!("Total processes in {} state", category.label()),
            )?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };
        let processes = [
            gauge(QueueCategory::Hold)?,
            gauge(QueueCategory::Wait)?,
            gauge(QueueCategory::Timer)?,
            gauge(QueueCategory::Exec)?,
        ];

        let process_count = IntGaugeVec::new(
            Opts::new(
                PROCESS_COUNT_METRIC,
                "Count of specific processes in HOLD or WAIT",
            ),
            &["process_name"],
        )?;
        registry.register(Box::new(process_count.clone()))?;

        let scrape_errors = IntCounter::new(
            SCRAPE_ERRORS_METRIC,
            "Total errors when collecting IBM Connect:Direct metrics",
        )?;
        registry.register(Box::new(scrape_errors.clone()))?;

        Ok(Self {
            processes,
            process_count,
            scrape_errors,
        })
    }

    fn gauge(&self, category: QueueCategory) -> &IntGauge {
        &self.processes[category as usize]
    }

    /// Current exposed value of a category metric.
    pub fn process_value(&self, category: QueueCategory) -> i64 {
        self.gauge(category).get()
    }

    pub fn scrape_errors(&self) -> u64 {
        self.scrape_errors.get()
    }
}

impl MetricSink for ExporterMetrics {
    fn set_processes(&self, category: QueueCategory, value: u64) -> Result<(), PublishError> {
        let value = i64::try_from(value).map_err(|_| PublishError::OutOfRange {
            metric: process_metric_name(category).to_string(),
            value,
        })?;
        self.gauge(category).set(value);
        Ok(())
    }

    fn add_processes(&self, category: QueueCategory, delta: i64) -> Result<(), PublishError> {
        self.gauge(category).add(delta);
        Ok(())
    }

    fn set_process_counts(&self, counts: &BTreeMap<String, u64>) -> Result<(), PublishError> {
        self.process_count.reset();
        for (name, count) in counts {
            let value = i64::try_from(*count).map_err(|_| PublishError::OutOfRange {
                metric: PROCESS_COUNT_METRIC.to_string(),
                value: *count,
            })?;
            self.process_count
                .get_metric_with_label_values(&[name.as_str()])
                .map_err(|e| PublishError::Rejected {
                    metric: PROCESS_COUNT_METRIC.to_string(),
                    reason: e.to_string(),
                })?
                .set(value);
        }
        Ok(())
    }

    fn record_scrape_error(&self) {
        self.scrape_errors.inc();
    }
}

/// Renders the registry in the Prometheus text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String, MetricsError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| MetricsError::Encoding(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
}

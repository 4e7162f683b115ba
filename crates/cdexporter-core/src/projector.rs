//! Projection of category counts onto exposed metrics.
//!
//! In gauge mode each metric is set to the fresh count. In delta mode each
//! metric receives `count - baseline[category]`, and the baseline entry
//! advances only after its delta was accepted by the sink. A rejected update
//! leaves that category's baseline at the last value actually published, so
//! the next successful cycle emits the full outstanding difference.

use tracing::debug;

use crate::classify::{CategoryCounts, Classification};
use crate::config::PublishMode;
use crate::metrics::{MetricSink, PublishError};

/// Last successfully published count per category.
///
/// Zero at startup, never reset while the process runs.
pub type MetricBaseline = CategoryCounts;

#[derive(Debug, Clone)]
pub struct MetricProjector {
    mode: PublishMode,
    baseline: MetricBaseline,
}

impl MetricProjector {
    pub fn new(mode: PublishMode) -> Self {
        Self {
            mode,
            baseline: MetricBaseline::default(),
        }
    }

    pub fn baseline(&self) -> &MetricBaseline {
        &self.baseline
    }

    /// Publishes one cycle's classification.
    ///
    /// Stops at the first rejected update and returns its error.
    pub fn project<S: MetricSink + ?Sized>(
        &mut self,
        sink: &S,
        classification: &Classification,
    ) -> Result<(), PublishError> {
        match self.mode {
            PublishMode::Gauge => {
                for (category, count) in classification.counts.iter() {
                    sink.set_processes(category, count)?;
                }
            }
            PublishMode::Delta => {
                for (category, count) in classification.counts.iter() {
                    let delta = count as i64 - self.baseline.get(category) as i64;
                    if delta != 0 {
                        sink.add_processes(category, delta)?;
                        debug!(%category, delta, count, "delta applied");
                    }
                    self.baseline.set(category, count);
                }
            }
        }

        sink.set_process_counts(&classification.process_counts)
    }
}

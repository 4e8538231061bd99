use sems_model::domain::Measurement;

use super::influxdb::encode_line;
use crate::pipeline::{PointSink, WriteError};

/// Logs the line that would have been written instead of writing it.
pub struct DryRunSink {
    measurement: String,
}

impl DryRunSink {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
        }
    }

    /// The line-protocol text a real write would send, without the newline.
    pub fn line(&self, measurement: &Measurement) -> String {
        let mut line = String::new();
        encode_line(&self.measurement, measurement, &mut line);
        line
    }
}

#[async_trait::async_trait]
impl PointSink for DryRunSink {
    async fn write(&self, measurement: &Measurement) -> Result<(), WriteError> {
        let line = self.line(measurement);
        tracing::info!(%line, "dry run, not writing");
        Ok(())
    }
}

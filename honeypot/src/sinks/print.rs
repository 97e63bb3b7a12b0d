use async_trait::async_trait;
use metrics::counter;
use tracing::info;

use crate::api::WriteError;
use crate::sinks::{PointSink, TelemetryPoint};

/// Dev/test sink: logs the encoded point instead of persisting it.
pub struct PrintSink;

#[async_trait]
impl PointSink for PrintSink {
    async fn send(&self, point: TelemetryPoint) -> Result<(), WriteError> {
        info!("point: {}", point.to_line_protocol());
        counter!("honeypot_points_written_total", "sink" => "print").increment(1);

        Ok(())
    }
}

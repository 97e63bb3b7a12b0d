use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::api::WriteError;
use crate::config::Config;
use crate::sinks::{PointSink, TelemetryPoint};

/// Shared HTTP write path for both sink modes: posts line protocol to the
/// InfluxDB v2 write endpoint.
#[derive(Clone)]
pub struct InfluxClient {
    client: reqwest::Client,
    write_url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxClient {
    pub fn new(client: reqwest::Client, config: &Config) -> InfluxClient {
        InfluxClient::with_url(
            client,
            &config.influxdb_url,
            &config.influxdb_token,
            &config.influxdb_org,
            &config.influxdb_bucket,
        )
    }

    pub fn with_url(
        client: reqwest::Client,
        url: &str,
        token: &str,
        org: &str,
        bucket: &str,
    ) -> InfluxClient {
        InfluxClient {
            client,
            write_url: format!("{}/api/v2/write", url.trim_end_matches('/')),
            token: token.to_string(),
            org: org.to_string(),
            bucket: bucket.to_string(),
        }
    }

    async fn write_line(&self, line: String) -> Result<(), WriteError> {
        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .body(line)
            .send()
            .await
            .map_err(|e| WriteError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            counter!("honeypot_points_written_total", "sink" => "influxdb").increment(1);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        counter!("honeypot_write_errors_total", "sink" => "influxdb").increment(1);
        if status.is_client_error() {
            Err(WriteError::Rejected(format!("{status}: {body}")))
        } else {
            Err(WriteError::Transport(format!("{status}: {body}")))
        }
    }
}

/// Blocking mode: the caller awaits the sink's answer and sees its error.
pub struct InfluxSink {
    inner: InfluxClient,
}

impl InfluxSink {
    pub fn new(inner: InfluxClient) -> InfluxSink {
        InfluxSink { inner }
    }
}

#[async_trait]
impl PointSink for InfluxSink {
    async fn send(&self, point: TelemetryPoint) -> Result<(), WriteError> {
        debug!("writing to InfluxDB in blocking mode");
        self.inner.write_line(point.to_line_protocol()).await
    }
}

/// Non-blocking mode: `send` enqueues and returns immediately; a dedicated
/// drain task performs the writes and logs failures the caller never sees.
/// The queue is bounded: when it is full `send` returns `QueueFull` so the
/// retry controller backs off instead of the queue growing without limit.
pub struct BufferedInfluxSink {
    queue: mpsc::Sender<TelemetryPoint>,
}

impl BufferedInfluxSink {
    pub fn new(inner: InfluxClient, depth: usize) -> BufferedInfluxSink {
        let (tx, mut rx) = mpsc::channel::<TelemetryPoint>(depth);

        tokio::spawn(async move {
            info!("InfluxDB drain task started");
            while let Some(point) = rx.recv().await {
                if let Err(err) = inner.write_line(point.to_line_protocol()).await {
                    error!("asynchronous write failed: {err}");
                }
            }
        });

        BufferedInfluxSink { queue: tx }
    }
}

#[async_trait]
impl PointSink for BufferedInfluxSink {
    async fn send(&self, point: TelemetryPoint) -> Result<(), WriteError> {
        debug!("writing to InfluxDB in non-blocking mode");
        gauge!("honeypot_write_queue_free").set(self.queue.capacity() as f64);

        self.queue.try_send(point).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                counter!("honeypot_write_queue_full_total").increment(1);
                WriteError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => {
                WriteError::Transport("drain task gone".to_string())
            }
        })
    }
}

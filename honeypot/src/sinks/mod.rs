use async_trait::async_trait;
use time::OffsetDateTime;

use crate::api::WriteError;
use crate::attempt::AttemptRecord;
use crate::geoip::GeoRecord;

pub mod influx;
pub mod print;

/// The unit persisted to the telemetry store: one measurement per attempt,
/// attacker metadata and credentials as tags, coordinates as fields,
/// timestamped with the attempt time. Carries no dedup key; the sink orders
/// by the embedded timestamp, not by write order.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryPoint {
    tags: Vec<(&'static str, String)>,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: OffsetDateTime,
}

pub const MEASUREMENT: &str = "request";

// Tag values may contain anything the attacker typed; commas, equals signs,
// spaces and backslashes are significant in line protocol, and control
// characters (newlines above all) have no escape at all: a raw newline splits
// the point into a second, forged record.
fn escape_tag_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ',' | '=' | ' ' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            c if c.is_control() => escaped.push_str("\\ "),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl TelemetryPoint {
    /// Deterministic composition of one attempt and its enrichment result.
    pub fn from_attempt(record: &AttemptRecord, geo: &GeoRecord) -> TelemetryPoint {
        let tags = vec![
            ("ip", geo.ip.clone()),
            ("country", geo.country.clone()),
            ("city", geo.city.clone()),
            ("region", geo.region.clone()),
            ("org", geo.org.clone()),
            ("timezone", geo.timezone.clone()),
            ("user", record.user.clone()),
            ("remote_host", record.remote_host.clone()),
            ("remote_port", record.remote_port.clone()),
            ("local_host", record.local_host.clone()),
            ("local_port", record.local_port.clone()),
            ("client_version", record.client_version.clone()),
            ("function", record.function().to_string()),
            ("password", record.password().unwrap_or_default().to_string()),
            ("key", record.public_key().unwrap_or_default().to_string()),
        ];

        TelemetryPoint {
            tags,
            latitude: geo.latitude,
            longitude: geo.longitude,
            timestamp: record.timestamp,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// InfluxDB line protocol, nanosecond precision. Tags with empty values
    /// are omitted (line protocol forbids them).
    pub fn to_line_protocol(&self) -> String {
        let mut line = String::from(MEASUREMENT);

        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(&escape_tag_value(value));
        }

        line.push_str(&format!(
            " latitude={},longitude={} {}",
            self.latitude,
            self.longitude,
            self.timestamp.unix_timestamp_nanos()
        ));
        line
    }
}

/// The telemetry store's write surface. Implementations must be safe for
/// concurrent use by every pipeline task.
#[async_trait]
pub trait PointSink {
    async fn send(&self, point: TelemetryPoint) -> Result<(), WriteError>;
}

use std::net::IpAddr;
use std::sync::Arc;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::PipelineError;
use crate::attempt::AttemptRecord;
use crate::geoip::service::EnrichmentService;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::sinks::{PointSink, TelemetryPoint};

/// Terminal state of one attempt's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Point written to the sink.
    Written,
    /// Private/loopback source filtered out before enrichment. Deliberate,
    /// not a failure.
    Suppressed,
    /// Retry budget exhausted or connection gone; attempt dropped loudly.
    Failed,
}

/// Binds capture -> private-address filter -> retry-wrapped enrich+write.
/// One independent run per protocol callback; runs share only the rate-limit
/// cache (inside the enrichment service) and the sink client.
pub struct Pipeline {
    enrichment: EnrichmentService,
    sink: Arc<dyn PointSink + Send + Sync>,
    policy: RetryPolicy,
    write_private_ips: bool,
}

fn is_private_or_loopback(host: &str) -> bool {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => {
            // Unique-local fc00::/7 and link-local fe80::/10.
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

impl Pipeline {
    pub fn new(
        enrichment: EnrichmentService,
        sink: Arc<dyn PointSink + Send + Sync>,
        policy: RetryPolicy,
        write_private_ips: bool,
    ) -> Pipeline {
        Pipeline {
            enrichment,
            sink,
            policy,
            write_private_ips,
        }
    }

    /// Launch one independent task for this attempt. The token ties its
    /// retry loop to the originating connection.
    pub fn spawn(self: &Arc<Self>, record: AttemptRecord, cancel: CancellationToken) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.process(record, cancel).await;
        });
    }

    #[instrument(
        skip_all,
        fields(remote = %record.remote_host, function = record.function())
    )]
    pub async fn process(&self, record: AttemptRecord, cancel: CancellationToken) -> Outcome {
        counter!("honeypot_attempts_total", "function" => record.function()).increment(1);

        if is_private_or_loopback(&record.remote_host) && !self.write_private_ips {
            debug!(
                "suppressing attempt from private or loopback address '{}'",
                record.remote_host
            );
            counter!("honeypot_attempts_suppressed_total").increment(1);
            return Outcome::Suppressed;
        }

        let function = record.function();
        let remote_host = record.remote_host.clone();

        let enrichment = self.enrichment.clone();
        let sink = Arc::clone(&self.sink);
        let result = retry_with_backoff(self.policy, &cancel, move || {
            let enrichment = enrichment.clone();
            let sink = Arc::clone(&sink);
            let record = record.clone();
            async move {
                // Enrichment strictly precedes the write; the pair retries
                // as one unit. No point is ever written without geo data.
                let geo = enrichment.enrich(&record.remote_host).await?;
                let point = TelemetryPoint::from_attempt(&record, &geo);
                sink.send(point).await.map_err(PipelineError::from)
            }
        })
        .await;

        match result {
            Ok(()) => {
                info!("recorded '{}' attempt from '{}'", function, remote_host);
                Outcome::Written
            }
            Err(err) => {
                warn!(
                    "dropping '{}' attempt from '{}': {}",
                    function, remote_host, err
                );
                counter!("honeypot_attempts_dropped_total").increment(1);
                Outcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_ranges_are_filtered() {
        assert!(is_private_or_loopback("127.0.0.1"));
        assert!(is_private_or_loopback("10.1.2.3"));
        assert!(is_private_or_loopback("172.16.0.9"));
        assert!(is_private_or_loopback("192.168.1.1"));
        assert!(is_private_or_loopback("169.254.0.1"));
        assert!(is_private_or_loopback("::1"));
        assert!(is_private_or_loopback("fc00::1"));
        assert!(is_private_or_loopback("fd12:3456::1"));
        assert!(is_private_or_loopback("fe80::1"));
    }

    #[test]
    fn public_addresses_pass() {
        assert!(!is_private_or_loopback("8.8.8.8"));
        assert!(!is_private_or_loopback("203.0.113.7"));
        assert!(!is_private_or_loopback("2001:4860:4860::8888"));
    }

    #[test]
    fn unparseable_hosts_are_not_suppressed() {
        assert!(!is_private_or_loopback(""));
        assert!(!is_private_or_loopback("not-an-ip"));
    }
}

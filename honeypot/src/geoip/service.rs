use std::sync::Arc;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{instrument, warn};

use crate::api::EnrichError;
use crate::config::Config;
use crate::geoip::ipapi::IpApiProvider;
use crate::geoip::ipinfo::IpInfoProvider;
use crate::geoip::ratelimit::RateLimitCache;
use crate::geoip::{GeoProvider, GeoRecord};

/// Enrichment front door: consults the rate-limit cache before calling the
/// provider and records any new cooldown the provider reports. Never waits;
/// a limited provider fails fast and the caller's retry policy owns the
/// delay.
#[derive(Clone)]
pub struct EnrichmentService {
    provider: Arc<dyn GeoProvider + Send + Sync>,
    limits: RateLimitCache,
}

impl EnrichmentService {
    pub fn new(
        provider: Arc<dyn GeoProvider + Send + Sync>,
        limits: RateLimitCache,
    ) -> EnrichmentService {
        EnrichmentService { provider, limits }
    }

    /// Pick the provider once for the process lifetime: ipinfo.io when a
    /// token is configured, the free ip-api.com otherwise.
    pub fn from_config(config: &Config, client: reqwest::Client) -> EnrichmentService {
        let provider: Arc<dyn GeoProvider + Send + Sync> = match &config.ipinfo_token {
            Some(token) => Arc::new(IpInfoProvider::new(client, token.clone())),
            None => Arc::new(IpApiProvider::new(client)),
        };
        let limits = RateLimitCache::new(std::time::Duration::from_secs(
            config.rate_limit_ttl_secs,
        ));
        EnrichmentService::new(provider, limits)
    }

    #[instrument(skip(self))]
    pub async fn enrich(&self, host: &str) -> Result<GeoRecord, EnrichError> {
        let provider_id = self.provider.id();

        if let Some(resume_at) = self.limits.get(provider_id) {
            if resume_at > OffsetDateTime::now_utc() {
                counter!("honeypot_rate_limit_skips_total", "provider" => provider_id)
                    .increment(1);
                return Err(EnrichError::RateLimited(resume_at));
            }
        }

        match self.provider.resolve(host).await {
            Ok(record) => Ok(record),
            Err(EnrichError::RateLimited(resume_at)) => {
                counter!("honeypot_rate_limited_total", "provider" => provider_id).increment(1);
                self.limits.set(provider_id, resume_at);
                Err(EnrichError::RateLimited(resume_at))
            }
            Err(EnrichError::Malformed(message)) => {
                warn!("malformed response from {}: {}", provider_id, message);
                counter!("honeypot_malformed_responses_total", "provider" => provider_id)
                    .increment(1);
                Err(EnrichError::Malformed(message))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::Duration;

    use super::*;

    struct FakeProvider {
        calls: AtomicUsize,
        result: Result<GeoRecord, EnrichError>,
    }

    impl FakeProvider {
        fn returning(result: Result<GeoRecord, EnrichError>) -> Arc<FakeProvider> {
            Arc::new(FakeProvider {
                calls: AtomicUsize::new(0),
                result,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeoProvider for FakeProvider {
        fn id(&self) -> &'static str {
            "fake"
        }

        async fn resolve(&self, _host: &str) -> Result<GeoRecord, EnrichError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn cache() -> RateLimitCache {
        RateLimitCache::new(std::time::Duration::from_secs(300))
    }

    #[tokio::test]
    async fn success_passes_through() {
        let record = GeoRecord {
            ip: "8.8.8.8".into(),
            country: "US".into(),
            ..GeoRecord::default()
        };
        let provider = FakeProvider::returning(Ok(record.clone()));
        let service = EnrichmentService::new(provider.clone(), cache());

        assert_eq!(service.enrich("8.8.8.8").await.unwrap(), record);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn active_cooldown_fails_fast_without_a_call() {
        let provider = FakeProvider::returning(Ok(GeoRecord::default()));
        let limits = cache();
        let resume_at = OffsetDateTime::now_utc() + Duration::minutes(5);
        limits.set("fake", resume_at);

        let service = EnrichmentService::new(provider.clone(), limits);
        let err = service.enrich("8.8.8.8").await.unwrap_err();

        assert_eq!(err, EnrichError::RateLimited(resume_at));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn expired_cooldown_calls_the_provider() {
        let provider = FakeProvider::returning(Ok(GeoRecord::default()));
        let limits = cache();
        limits.set("fake", OffsetDateTime::now_utc() - Duration::seconds(1));

        let service = EnrichmentService::new(provider.clone(), limits);
        assert!(service.enrich("8.8.8.8").await.is_ok());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn reported_limit_is_recorded_for_later_callers() {
        let resume_at = OffsetDateTime::now_utc() + Duration::seconds(60);
        let provider = FakeProvider::returning(Err(EnrichError::RateLimited(resume_at)));
        let service = EnrichmentService::new(provider.clone(), cache());

        // First call reaches the provider and learns about the limit.
        assert!(service.enrich("8.8.8.8").await.is_err());
        assert_eq!(provider.calls(), 1);

        // Later callers fail fast off the cache, regardless of task.
        let err = service.enrich("9.9.9.9").await.unwrap_err();
        assert_eq!(err, EnrichError::RateLimited(resume_at));
        assert_eq!(provider.calls(), 1);
    }
}

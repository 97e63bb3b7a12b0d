use async_trait::async_trait;

use crate::api::EnrichError;

pub mod ipapi;
pub mod ipinfo;
pub mod ratelimit;
pub mod service;

/// Best-effort geolocation data for one address. Fields the provider omits
/// stay empty; the record has no identity of its own.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeoRecord {
    pub ip: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub org: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// An external address-to-metadata lookup service.
#[async_trait]
pub trait GeoProvider {
    /// Stable identifier, used as the rate-limit cache key.
    fn id(&self) -> &'static str;

    async fn resolve(&self, host: &str) -> Result<GeoRecord, EnrichError>;
}

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::api::EnrichError;
use crate::geoip::{GeoProvider, GeoRecord};

const IPINFO_BASE_URL: &str = "https://ipinfo.io";

/// Token-authenticated ipinfo.io lookup. No request quota to track, so this
/// provider never reports a rate limit.
pub struct IpInfoProvider {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    city: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
    /// Combined "lat,long" pair.
    #[serde(default)]
    loc: String,
    #[serde(default)]
    org: String,
    #[serde(default)]
    timezone: String,
}

/// Split an ipinfo.io "lat,long" string into the two floats.
fn parse_loc(loc: &str) -> Result<(f64, f64), EnrichError> {
    let mut parts = loc.splitn(2, ',');
    let lat = parts.next().unwrap_or_default().trim();
    let long = parts.next().unwrap_or_default().trim();

    match (lat.parse::<f64>(), long.parse::<f64>()) {
        (Ok(lat), Ok(long)) => Ok((lat, long)),
        _ => Err(EnrichError::Malformed(format!("unparseable loc field: {loc:?}"))),
    }
}

impl IpInfoProvider {
    pub fn new(client: reqwest::Client, token: String) -> IpInfoProvider {
        Self::with_base_url(client, token, IPINFO_BASE_URL.to_string())
    }

    pub fn with_base_url(client: reqwest::Client, token: String, base_url: String) -> IpInfoProvider {
        IpInfoProvider {
            client,
            base_url,
            token,
        }
    }
}

#[async_trait]
impl GeoProvider for IpInfoProvider {
    fn id(&self) -> &'static str {
        "ipinfo.io"
    }

    async fn resolve(&self, host: &str) -> Result<GeoRecord, EnrichError> {
        debug!("looking up '{}' on ipinfo.io", host);

        let response = self
            .client
            .get(format!("{}/{}", self.base_url, host))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| EnrichError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Transient(format!(
                "ipinfo.io returned {status}"
            )));
        }

        let body: IpInfoResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Malformed(e.to_string()))?;

        let (latitude, longitude) = parse_loc(&body.loc)?;

        Ok(GeoRecord {
            ip: host.to_string(),
            city: body.city,
            region: body.region,
            country: body.country,
            org: body.org,
            timezone: body.timezone,
            latitude,
            longitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(server: &mockito::ServerGuard) -> IpInfoProvider {
        IpInfoProvider::with_base_url(
            reqwest::Client::new(),
            "test-token".to_string(),
            server.url(),
        )
    }

    #[test]
    fn parse_loc_splits_the_pair() {
        assert_eq!(parse_loc("37.4056,-122.0775").unwrap(), (37.4056, -122.0775));
    }

    #[test]
    fn parse_loc_rejects_garbage() {
        assert!(matches!(parse_loc(""), Err(EnrichError::Malformed(_))));
        assert!(matches!(parse_loc("north,south"), Err(EnrichError::Malformed(_))));
    }

    #[tokio::test]
    async fn resolves_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/8.8.8.8")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(
                r#"{"ip":"8.8.8.8","city":"Mountain View","region":"California",
                    "country":"US","loc":"37.4056,-122.0775","org":"AS15169 Google LLC",
                    "timezone":"America/Los_Angeles"}"#,
            )
            .create_async()
            .await;

        let record = provider(&server).resolve("8.8.8.8").await.unwrap();
        mock.assert_async().await;

        assert_eq!(record.ip, "8.8.8.8");
        assert_eq!(record.city, "Mountain View");
        assert_eq!(record.country, "US");
        assert_eq!(record.latitude, 37.4056);
        assert_eq!(record.longitude, -122.0775);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/8.8.8.8")
            .with_status(502)
            .create_async()
            .await;

        let err = provider(&server).resolve("8.8.8.8").await.unwrap_err();
        assert!(matches!(err, EnrichError::Transient(_)));
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/8.8.8.8")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = provider(&server).resolve("8.8.8.8").await.unwrap_err();
        assert!(matches!(err, EnrichError::Malformed(_)));
    }
}

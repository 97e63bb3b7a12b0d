use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, warn};

use crate::api::EnrichError;
use crate::geoip::{GeoProvider, GeoRecord};

const IPAPI_BASE_URL: &str = "http://ip-api.com";

/// ip-api.com stops answering well before the advertised quota runs out, so
/// back off while a few requests are still left.
const QUOTA_FLOOR: i64 = 16;

/// Everything ip-api.com can return for a single lookup. `status` and
/// `message` are included so failed lookups carry a reason in the body.
const FIELDS: &str = "status,message,continent,continentCode,country,countryCode,\
region,regionName,city,district,zip,lat,lon,timezone,offset,currency,isp,org,\
as,asname,reverse,mobile,proxy,hosting,query";

/// Unauthenticated ip-api.com lookup. Free, but rate limited: the response
/// headers carry the remaining quota (`X-Rl`) and the reset window (`X-Ttl`).
/// When the quota is exhausted this provider reports `RateLimited` with a
/// resume time instead of sleeping inline.
pub struct IpApiProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    country: String,
    #[serde(default, rename = "regionName")]
    region_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    #[serde(default)]
    timezone: String,
    #[serde(default)]
    org: String,
}

// HTTP dates without the leading weekday, e.g. "06 Nov 1994 08:49:37 GMT".
const HTTP_DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

/// The `X-Ttl` header is either a relative number of seconds or an HTTP date.
fn parse_reset(value: &str, now: OffsetDateTime) -> Result<Duration, EnrichError> {
    if let Ok(seconds) = value.trim().parse::<i64>() {
        return Ok(Duration::seconds(seconds));
    }

    // Strip the optional "Sun, " prefix rather than parsing the weekday.
    let date_part = match value.split_once(", ") {
        Some((_, rest)) => rest,
        None => value,
    };

    let date = PrimitiveDateTime::parse(date_part.trim(), HTTP_DATE)
        .map_err(|e| EnrichError::Malformed(format!("unparseable X-Ttl header {value:?}: {e}")))?;

    Ok(date.assume_utc() - now)
}

fn header_value<'r>(response: &'r reqwest::Response, name: &str) -> Option<&'r str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

impl IpApiProvider {
    pub fn new(client: reqwest::Client) -> IpApiProvider {
        Self::with_base_url(client, IPAPI_BASE_URL.to_string())
    }

    pub fn with_base_url(client: reqwest::Client, base_url: String) -> IpApiProvider {
        IpApiProvider { client, base_url }
    }

    /// Resume time for an exhausted quota: the reset window plus a little
    /// randomized jitter so concurrent tasks don't all retry on the same
    /// instant.
    fn resume_time(reset: Duration, remaining: i64, now: OffsetDateTime) -> OffsetDateTime {
        let jitter = rand::thread_rng().gen_range(1..=remaining.max(0) + 1);
        now + reset + Duration::seconds(jitter)
    }
}

#[async_trait]
impl GeoProvider for IpApiProvider {
    fn id(&self) -> &'static str {
        "ip-api.com"
    }

    async fn resolve(&self, host: &str) -> Result<GeoRecord, EnrichError> {
        debug!("looking up '{}' on ip-api.com", host);

        let response = self
            .client
            .get(format!("{}/json/{}", self.base_url, host))
            .query(&[("fields", FIELDS)])
            .send()
            .await
            .map_err(|e| EnrichError::Transient(e.to_string()))?;

        let now = OffsetDateTime::now_utc();

        let remaining = header_value(&response, "X-Rl")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                EnrichError::Transient("missing or unparseable X-Rl header".to_string())
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS || remaining <= QUOTA_FLOOR {
            let reset = header_value(&response, "X-Ttl")
                .ok_or_else(|| EnrichError::Transient("missing X-Ttl header".to_string()))
                .and_then(|v| parse_reset(v, now))?;

            let resume_at = Self::resume_time(reset, remaining, now);
            warn!(
                "ip-api.com quota low (remaining {}), backing off until {}",
                remaining, resume_at
            );
            return Err(EnrichError::RateLimited(resume_at));
        }

        if !response.status().is_success() {
            return Err(EnrichError::Transient(format!(
                "ip-api.com returned {}",
                response.status()
            )));
        }

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Malformed(e.to_string()))?;

        if body.status != "success" {
            return Err(EnrichError::Malformed(format!(
                "lookup failed for {host:?}: {}",
                body.message
            )));
        }

        Ok(GeoRecord {
            ip: host.to_string(),
            city: body.city,
            region: body.region_name,
            country: body.country,
            org: body.org,
            timezone: body.timezone,
            latitude: body.lat,
            longitude: body.lon,
        })
    }
}

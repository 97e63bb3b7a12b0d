use std::time::Duration;

use moka::sync::Cache;
use time::OffsetDateTime;

/// Process-wide record of when each enrichment provider may next be called.
///
/// One entry per provider id, holding the resume time observed in the
/// provider's most recent rate-limit response. Writes overwrite, never
/// merge, and entries expire a fixed TTL after the last write regardless of
/// the resume time they carry. Reads and writes to the same key are atomic,
/// so two tasks can never both observe "not limited" while a limit is being
/// recorded; any waiting happens in the retry controller, never here.
#[derive(Clone)]
pub struct RateLimitCache {
    entries: Cache<&'static str, OffsetDateTime>,
}

impl RateLimitCache {
    pub fn new(ttl: Duration) -> RateLimitCache {
        RateLimitCache {
            entries: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// The resume time last recorded for this provider, if it has not
    /// expired.
    pub fn get(&self, provider: &'static str) -> Option<OffsetDateTime> {
        self.entries.get(provider)
    }

    pub fn set(&self, provider: &'static str, resume_at: OffsetDateTime) {
        self.entries.insert(provider, resume_at);
    }
}

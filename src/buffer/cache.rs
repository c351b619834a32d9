//! Generic result cache.
//!
//! Memoises expensive lookups (world settings, character info, memory
//! access, formatting, calculations) by the checksum of their query.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use super::checksum::{Checksum, checksum, fingerprint};
use super::clock::deadline;
use super::diagnostics::AccessStats;
use super::error::BufferError;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "buffer::cache";

const METRIC_HIT: &str = "quillbuf_buffer_hit_total";
const METRIC_MISS: &str = "quillbuf_buffer_miss_total";
const METRIC_EXPIRED: &str = "quillbuf_buffer_expired_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheCategory {
    WorldSettings,
    CharacterInfo,
    MemoryAccess,
    FormatResult,
    CalculationResult,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 5] = [
        CacheCategory::WorldSettings,
        CacheCategory::CharacterInfo,
        CacheCategory::MemoryAccess,
        CacheCategory::FormatResult,
        CacheCategory::CalculationResult,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::WorldSettings => "world-settings",
            CacheCategory::CharacterInfo => "character-info",
            CacheCategory::MemoryAccess => "memory-access",
            CacheCategory::FormatResult => "format-result",
            CacheCategory::CalculationResult => "calculation-result",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub category: CacheCategory,
    pub fingerprint: Checksum,
    pub value: Value,
    pub hit_count: u64,
    pub size_bytes: u64,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl CachedResult {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

type CacheKey = (CacheCategory, Checksum);

pub struct ResultCache {
    default_ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CachedResult>>,
    stats: Arc<AccessStats>,
}

impl ResultCache {
    pub fn new(default_ttl: Duration, stats: Arc<AccessStats>) -> Self {
        Self {
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            stats,
        }
    }

    /// Look up the cached result for `query`, counting the hit.
    pub fn get<Q: Serialize + ?Sized>(
        &self,
        category: CacheCategory,
        query: &Q,
        now: OffsetDateTime,
    ) -> Result<Option<Value>, BufferError> {
        let key = (category, checksum(query)?);
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let Some(entry) = entries.get_mut(&key) else {
            self.record_miss(category);
            return Ok(None);
        };

        if entry.is_expired(now) {
            entries.remove(&key);
            self.stats.record_expired();
            counter!(METRIC_EXPIRED, "kind" => category.as_str()).increment(1);
            self.record_miss(category);
            return Ok(None);
        }

        entry.hit_count += 1;
        self.stats.record_hit();
        counter!(METRIC_HIT, "kind" => category.as_str()).increment(1);
        Ok(Some(entry.value.clone()))
    }

    /// Cache `value` as the result of `query`, replacing any previous entry.
    pub fn put<Q: Serialize + ?Sized>(
        &self,
        category: CacheCategory,
        query: &Q,
        value: Value,
        ttl: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<Checksum, BufferError> {
        let key = checksum(query)?;
        let size_bytes = fingerprint(&value)?.size_bytes;
        let ttl = ttl.unwrap_or(self.default_ttl);

        debug!(
            category = %category,
            fingerprint = %key,
            size_bytes,
            "Result cached"
        );

        let entry = CachedResult {
            category,
            fingerprint: key.clone(),
            value,
            hit_count: 0,
            size_bytes,
            created_at: now,
            expires_at: deadline(now, ttl),
        };
        rw_write(&self.entries, SOURCE, "put").insert((category, key.clone()), entry);
        Ok(key)
    }

    pub fn invalidate<Q: Serialize + ?Sized>(
        &self,
        category: CacheCategory,
        query: &Q,
    ) -> Result<bool, BufferError> {
        let key = (category, checksum(query)?);
        Ok(rw_write(&self.entries, SOURCE, "invalidate")
            .remove(&key)
            .is_some())
    }

    /// Drop every entry of one category; returns how many were removed.
    pub fn invalidate_category(&self, category: CacheCategory) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_category");
        let before = entries.len();
        entries.retain(|(entry_category, _), _| *entry_category != category);
        before - entries.len()
    }

    pub fn sweep_expired(&self, now: OffsetDateTime) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "sweep_expired");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_size_bytes(&self) -> u64 {
        rw_read(&self.entries, SOURCE, "total_size_bytes")
            .values()
            .map(|entry| entry.size_bytes)
            .sum()
    }

    pub fn snapshot(&self) -> Vec<CachedResult> {
        rw_read(&self.entries, SOURCE, "snapshot")
            .values()
            .cloned()
            .collect()
    }

    /// Replace contents from a snapshot, skipping expired entries.
    pub fn restore(&self, loaded: impl IntoIterator<Item = CachedResult>, now: OffsetDateTime) -> usize {
        let restored: HashMap<CacheKey, CachedResult> = loaded
            .into_iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| ((entry.category, entry.fingerprint.clone()), entry))
            .collect();
        let count = restored.len();
        *rw_write(&self.entries, SOURCE, "restore") = restored;
        count
    }

    fn record_miss(&self, category: CacheCategory) {
        self.stats.record_miss();
        counter!(METRIC_MISS, "kind" => category.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn cache() -> ResultCache {
        ResultCache::new(Duration::from_secs(3600), Arc::new(AccessStats::new()))
    }

    #[test]
    fn hits_are_counted_per_fingerprint() {
        let now = datetime!(2024-07-07 7:00 UTC);
        let cache = cache();
        let query = json!({"character": "Ada", "fields": ["mood", "goal"]});

        assert_eq!(
            cache
                .get(CacheCategory::CharacterInfo, &query, now)
                .expect("get"),
            None
        );
        cache
            .put(CacheCategory::CharacterInfo, &query, json!({"mood": "wary"}), None, now)
            .expect("put");

        for _ in 0..3 {
            assert_eq!(
                cache
                    .get(CacheCategory::CharacterInfo, &query, now)
                    .expect("get"),
                Some(json!({"mood": "wary"}))
            );
        }
        assert_eq!(cache.snapshot()[0].hit_count, 3);
    }

    #[test]
    fn categories_do_not_collide() {
        let now = datetime!(2024-07-07 7:00 UTC);
        let cache = cache();
        cache
            .put(CacheCategory::FormatResult, "q", json!(1), None, now)
            .expect("put");
        assert_eq!(
            cache
                .get(CacheCategory::CalculationResult, "q", now)
                .expect("get"),
            None
        );
    }

    #[test]
    fn expired_results_are_dropped() {
        let now = datetime!(2024-07-07 7:00 UTC);
        let cache = cache();
        cache
            .put(
                CacheCategory::WorldSettings,
                "realm",
                json!("Eldoria"),
                Some(Duration::from_secs(10)),
                now,
            )
            .expect("put");

        let later = now + Duration::from_secs(10);
        assert_eq!(
            cache.get(CacheCategory::WorldSettings, "realm", later).expect("get"),
            None
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn huge_ttl_never_expires() {
        let now = datetime!(2024-07-07 7:00 UTC);
        let cache = cache();
        cache
            .put(
                CacheCategory::FormatResult,
                "q",
                json!(1),
                Some(Duration::from_secs(u64::MAX / 2)),
                now,
            )
            .expect("put");

        let much_later = now + Duration::from_secs(100 * 365 * 24 * 60 * 60);
        assert_eq!(
            cache.get(CacheCategory::FormatResult, "q", much_later).expect("get"),
            Some(json!(1))
        );
        assert_eq!(cache.sweep_expired(much_later), 0);
    }

    #[test]
    fn category_invalidation_is_scoped() {
        let now = datetime!(2024-07-07 7:00 UTC);
        let cache = cache();
        cache
            .put(CacheCategory::MemoryAccess, "a", json!(1), None, now)
            .expect("put");
        cache
            .put(CacheCategory::MemoryAccess, "b", json!(2), None, now)
            .expect("put");
        cache
            .put(CacheCategory::WorldSettings, "a", json!(3), None, now)
            .expect("put");

        assert_eq!(cache.invalidate_category(CacheCategory::MemoryAccess), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(CacheCategory::WorldSettings, "a").expect("invalidate"));
    }
}

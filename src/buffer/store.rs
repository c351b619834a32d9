//! Typed, TTL-aware buffer storage.
//!
//! One `BufferStore<T>` exists per payload kind. Reads hand out clones;
//! nothing outside the store ever holds a reference into its map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::checksum::{Checksum, fingerprint};
use super::diagnostics::AccessStats;
use super::entry::{BufferEntry, BufferId, BufferKind, BufferMetadata, BufferOptions, MAX_PRIORITY};
use super::error::BufferError;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "buffer::store";

const METRIC_HIT: &str = "quillbuf_buffer_hit_total";
const METRIC_MISS: &str = "quillbuf_buffer_miss_total";
const METRIC_EXPIRED: &str = "quillbuf_buffer_expired_total";
const METRIC_INTEGRITY: &str = "quillbuf_buffer_integrity_mismatch_total";

/// Bound satisfied by every storable payload.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Outcome of repopulating a store from a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub expired: usize,
    pub corrupted: usize,
}

pub struct BufferStore<T> {
    kind: BufferKind,
    default_ttl: Duration,
    entries: RwLock<HashMap<BufferId, BufferEntry<T>>>,
    stats: Arc<AccessStats>,
}

impl<T: Payload> BufferStore<T> {
    pub fn new(kind: BufferKind, default_ttl: Duration, stats: Arc<AccessStats>) -> Self {
        Self {
            kind,
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            stats,
        }
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store a new payload and return its id.
    pub fn create(
        &self,
        payload: T,
        options: BufferOptions,
        now: OffsetDateTime,
    ) -> Result<BufferId, BufferError> {
        let print = fingerprint(&payload)?;
        let id = BufferId::new();
        let ttl = options.ttl.unwrap_or(self.default_ttl);

        let entry = BufferEntry {
            id,
            kind: self.kind,
            payload,
            metadata: BufferMetadata {
                size_bytes: print.size_bytes,
                created_at: now,
                ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
                access_count: 0,
                last_accessed: now,
                priority: options.priority.min(MAX_PRIORITY),
            },
            dependencies: options.dependencies,
            checksum: print.checksum,
        };

        debug!(
            buffer_id = %id,
            kind = %self.kind,
            size_bytes = entry.metadata.size_bytes,
            ttl_ms = entry.metadata.ttl_ms,
            "Buffer created"
        );

        rw_write(&self.entries, SOURCE, "create").insert(id, entry);
        Ok(id)
    }

    /// Read a payload copy, evicting it lazily if its TTL has elapsed.
    ///
    /// With `verify` set, the stored checksum is recomputed first and a
    /// disagreement is reported as [`BufferError::IntegrityMismatch`].
    pub fn get(
        &self,
        id: BufferId,
        now: OffsetDateTime,
        verify: bool,
    ) -> Result<Option<T>, BufferError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let Some(entry) = entries.get_mut(&id) else {
            self.record_miss();
            return Ok(None);
        };

        if entry.metadata.is_expired(now) {
            entries.remove(&id);
            self.stats.record_expired();
            counter!(METRIC_EXPIRED, "kind" => self.kind.as_str()).increment(1);
            self.record_miss();
            return Ok(None);
        }

        if verify {
            let actual = fingerprint(&entry.payload)?.checksum;
            if actual != entry.checksum {
                self.stats.record_integrity_mismatch();
                counter!(METRIC_INTEGRITY, "kind" => self.kind.as_str()).increment(1);
                warn!(
                    buffer_id = %id,
                    kind = %self.kind,
                    expected = %entry.checksum,
                    actual = %actual,
                    "Buffer integrity mismatch on read"
                );
                return Err(BufferError::IntegrityMismatch {
                    id,
                    expected: entry.checksum.clone(),
                    actual,
                });
            }
        }

        entry.metadata.access_count += 1;
        entry.metadata.last_accessed = now;
        self.stats.record_hit();
        counter!(METRIC_HIT, "kind" => self.kind.as_str()).increment(1);

        Ok(Some(entry.payload.clone()))
    }

    /// Copy of the full entry without touching access bookkeeping.
    pub fn peek(&self, id: BufferId) -> Option<BufferEntry<T>> {
        rw_read(&self.entries, SOURCE, "peek").get(&id).cloned()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains_key(&id)
    }

    /// Apply `mutator` to the payload and recompute its checksum.
    ///
    /// The mutation runs against a copy; the entry is only replaced once
    /// the new fingerprint is known, so a failed update leaves it intact.
    pub fn update<R>(
        &self,
        id: BufferId,
        now: OffsetDateTime,
        mutator: impl FnOnce(&mut T) -> R,
    ) -> Result<R, BufferError> {
        self.replace(id, now, |payload| {
            let mut next = payload.clone();
            let output = mutator(&mut next);
            Ok((next, output))
        })
    }

    /// Merge a JSON merge-patch (RFC 7396) into the payload.
    ///
    /// The patched document must still deserialize into `T`.
    pub fn apply_patch(
        &self,
        id: BufferId,
        now: OffsetDateTime,
        patch: &Value,
    ) -> Result<(), BufferError> {
        self.replace(id, now, |payload| {
            let mut document = serde_json::to_value(payload)?;
            merge_patch(&mut document, patch);
            let next = serde_json::from_value(document).map_err(|err| {
                BufferError::InvalidPatch {
                    id,
                    reason: err.to_string(),
                }
            })?;
            Ok((next, ()))
        })
    }

    fn replace<R>(
        &self,
        id: BufferId,
        now: OffsetDateTime,
        build: impl FnOnce(&T) -> Result<(T, R), BufferError>,
    ) -> Result<R, BufferError> {
        let mut entries = rw_write(&self.entries, SOURCE, "update");

        let Some(entry) = entries.get_mut(&id) else {
            return Err(BufferError::NotFound(id));
        };

        if entry.metadata.is_expired(now) {
            entries.remove(&id);
            self.stats.record_expired();
            counter!(METRIC_EXPIRED, "kind" => self.kind.as_str()).increment(1);
            return Err(BufferError::NotFound(id));
        }

        let (next, output) = build(&entry.payload)?;
        let print = fingerprint(&next)?;

        entry.payload = next;
        entry.checksum = print.checksum;
        entry.metadata.size_bytes = print.size_bytes;
        entry.metadata.last_accessed = now;

        Ok(output)
    }

    /// Remove an entry. Returns whether anything was removed.
    pub fn delete(&self, id: BufferId) -> bool {
        rw_write(&self.entries, SOURCE, "delete")
            .remove(&id)
            .is_some()
    }

    /// Drop every entry whose TTL has elapsed and return how many were removed.
    pub fn sweep_expired(&self, now: OffsetDateTime) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "sweep_expired");
        let before = entries.len();
        entries.retain(|_, entry| !entry.metadata.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            counter!(METRIC_EXPIRED, "kind" => self.kind.as_str()).increment(removed as u64);
        }
        removed
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of recorded payload sizes.
    pub fn total_size_bytes(&self) -> u64 {
        rw_read(&self.entries, SOURCE, "total_size_bytes")
            .values()
            .map(|entry| entry.metadata.size_bytes)
            .sum()
    }

    /// Copies of all entries, for persistence.
    pub fn snapshot(&self) -> Vec<BufferEntry<T>> {
        rw_read(&self.entries, SOURCE, "snapshot")
            .values()
            .cloned()
            .collect()
    }

    /// Replace the store contents with entries loaded from a snapshot.
    ///
    /// Expired entries are skipped; entries whose checksum no longer matches
    /// their payload are dropped.
    pub fn restore(
        &self,
        loaded: impl IntoIterator<Item = BufferEntry<T>>,
        now: OffsetDateTime,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut restored = HashMap::new();

        for entry in loaded {
            if entry.metadata.is_expired(now) {
                report.expired += 1;
                continue;
            }
            if !checksum_matches(&entry.payload, &entry.checksum) {
                warn!(
                    buffer_id = %entry.id,
                    kind = %self.kind,
                    "Dropping snapshot buffer with mismatching checksum"
                );
                self.stats.record_integrity_mismatch();
                counter!(METRIC_INTEGRITY, "kind" => self.kind.as_str()).increment(1);
                report.corrupted += 1;
                continue;
            }
            restored.insert(entry.id, BufferEntry {
                kind: self.kind,
                ..entry
            });
        }

        report.restored = restored.len();
        *rw_write(&self.entries, SOURCE, "restore") = restored;
        report
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    fn record_miss(&self) {
        self.stats.record_miss();
        counter!(METRIC_MISS, "kind" => self.kind.as_str()).increment(1);
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, id: BufferId, mutator: impl FnOnce(&mut T)) {
        if let Some(entry) = rw_write(&self.entries, SOURCE, "tamper").get_mut(&id) {
            mutator(&mut entry.payload);
        }
    }
}

fn checksum_matches<T: Serialize>(payload: &T, expected: &Checksum) -> bool {
    fingerprint(payload)
        .map(|print| &print.checksum == expected)
        .unwrap_or(false)
}

/// RFC 7396 JSON merge-patch.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

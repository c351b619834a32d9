//! The typed stores and result cache, grouped.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use time::OffsetDateTime;

use super::cache::ResultCache;
use super::config::ProcessingConfig;
use super::diagnostics::{AccessCounts, AccessStats};
use super::entry::{BufferId, BufferKind, BufferMetadata, BufferOptions};
use super::error::BufferError;
use super::payloads::{
    AiProcessingState, BufferPayload, ChapterProcessingState, MemoryIntegrationState,
};
use super::store::BufferStore;

const METRIC_MISS: &str = "quillbuf_buffer_miss_total";

/// Per-kind removal counts from one expiry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryCounts {
    pub ai_processing: usize,
    pub memory_integration: usize,
    pub chapter_processing: usize,
    pub generic: usize,
    pub cached_results: usize,
}

impl ExpiryCounts {
    pub fn total(&self) -> usize {
        self.ai_processing
            + self.memory_integration
            + self.chapter_processing
            + self.generic
            + self.cached_results
    }
}

/// One store per payload kind plus the generic result cache, sharing one set
/// of access counters.
pub struct BufferRegistry {
    pub ai: BufferStore<AiProcessingState>,
    pub memory: BufferStore<MemoryIntegrationState>,
    pub chapter: BufferStore<ChapterProcessingState>,
    pub generic: BufferStore<Value>,
    pub results: ResultCache,
    stats: Arc<AccessStats>,
}

impl BufferRegistry {
    pub fn new(config: &ProcessingConfig) -> Self {
        let stats = Arc::new(AccessStats::new());
        let ttl = |kind| config.ttl_for(kind);
        Self {
            ai: BufferStore::new(
                BufferKind::AiProcessing,
                ttl(BufferKind::AiProcessing),
                Arc::clone(&stats),
            ),
            memory: BufferStore::new(
                BufferKind::MemoryIntegration,
                ttl(BufferKind::MemoryIntegration),
                Arc::clone(&stats),
            ),
            chapter: BufferStore::new(
                BufferKind::ChapterProcessing,
                ttl(BufferKind::ChapterProcessing),
                Arc::clone(&stats),
            ),
            generic: BufferStore::new(
                BufferKind::Generic,
                ttl(BufferKind::Generic),
                Arc::clone(&stats),
            ),
            results: ResultCache::new(ttl(BufferKind::Generic), Arc::clone(&stats)),
            stats,
        }
    }

    pub fn stats(&self) -> &AccessStats {
        &self.stats
    }

    pub fn access_counts(&self) -> AccessCounts {
        self.stats.snapshot()
    }

    /// Kind of the store currently holding `id`.
    pub fn kind_of(&self, id: BufferId) -> Option<BufferKind> {
        if self.ai.contains(id) {
            Some(BufferKind::AiProcessing)
        } else if self.memory.contains(id) {
            Some(BufferKind::MemoryIntegration)
        } else if self.chapter.contains(id) {
            Some(BufferKind::ChapterProcessing)
        } else if self.generic.contains(id) {
            Some(BufferKind::Generic)
        } else {
            None
        }
    }

    /// Store a payload in the store matching its kind.
    pub fn create(
        &self,
        payload: BufferPayload,
        options: BufferOptions,
        now: OffsetDateTime,
    ) -> Result<BufferId, BufferError> {
        match payload {
            BufferPayload::AiProcessing(state) => self.ai.create(state, options, now),
            BufferPayload::MemoryIntegration(state) => self.memory.create(state, options, now),
            BufferPayload::ChapterProcessing(state) => self.chapter.create(state, options, now),
            BufferPayload::Generic(value) => self.generic.create(value, options, now),
        }
    }

    /// Read a payload copy from whichever store holds `id`.
    pub fn read(
        &self,
        id: BufferId,
        now: OffsetDateTime,
        verify: bool,
    ) -> Result<Option<BufferPayload>, BufferError> {
        let payload = match self.kind_of(id) {
            Some(BufferKind::AiProcessing) => self
                .ai
                .get(id, now, verify)?
                .map(BufferPayload::AiProcessing),
            Some(BufferKind::MemoryIntegration) => self
                .memory
                .get(id, now, verify)?
                .map(BufferPayload::MemoryIntegration),
            Some(BufferKind::ChapterProcessing) => self
                .chapter
                .get(id, now, verify)?
                .map(BufferPayload::ChapterProcessing),
            Some(BufferKind::Generic) => self
                .generic
                .get(id, now, verify)?
                .map(BufferPayload::Generic),
            None => {
                self.stats.record_miss();
                counter!(METRIC_MISS, "kind" => "unknown").increment(1);
                None
            }
        };
        Ok(payload)
    }

    /// Merge-patch the payload of `id`. Returns `false` when no live buffer has that id.
    pub fn apply_patch(
        &self,
        id: BufferId,
        now: OffsetDateTime,
        patch: &Value,
    ) -> Result<bool, BufferError> {
        let result = match self.kind_of(id) {
            Some(BufferKind::AiProcessing) => self.ai.apply_patch(id, now, patch),
            Some(BufferKind::MemoryIntegration) => self.memory.apply_patch(id, now, patch),
            Some(BufferKind::ChapterProcessing) => self.chapter.apply_patch(id, now, patch),
            Some(BufferKind::Generic) => self.generic.apply_patch(id, now, patch),
            None => return Ok(false),
        };
        match result {
            Ok(()) => Ok(true),
            Err(BufferError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn delete(&self, id: BufferId) -> bool {
        self.ai.delete(id)
            || self.memory.delete(id)
            || self.chapter.delete(id)
            || self.generic.delete(id)
    }

    /// Metadata of a buffer without counting an access.
    pub fn metadata(&self, id: BufferId) -> Option<BufferMetadata> {
        match self.kind_of(id)? {
            BufferKind::AiProcessing => self.ai.peek(id).map(|entry| entry.metadata),
            BufferKind::MemoryIntegration => self.memory.peek(id).map(|entry| entry.metadata),
            BufferKind::ChapterProcessing => self.chapter.peek(id).map(|entry| entry.metadata),
            BufferKind::Generic => self.generic.peek(id).map(|entry| entry.metadata),
        }
    }

    pub fn default_ttl(&self, kind: BufferKind) -> Duration {
        match kind {
            BufferKind::AiProcessing => self.ai.default_ttl(),
            BufferKind::MemoryIntegration => self.memory.default_ttl(),
            BufferKind::ChapterProcessing => self.chapter.default_ttl(),
            BufferKind::Generic => self.generic.default_ttl(),
        }
    }

    /// Live buffers across all kinds, excluding cached results.
    pub fn buffer_count(&self) -> usize {
        self.ai.len() + self.memory.len() + self.chapter.len() + self.generic.len()
    }

    /// Recorded payload bytes across all stores and the result cache.
    pub fn total_size_bytes(&self) -> u64 {
        self.ai.total_size_bytes()
            + self.memory.total_size_bytes()
            + self.chapter.total_size_bytes()
            + self.generic.total_size_bytes()
            + self.results.total_size_bytes()
    }

    pub fn sweep_expired(&self, now: OffsetDateTime) -> ExpiryCounts {
        ExpiryCounts {
            ai_processing: self.ai.sweep_expired(now),
            memory_integration: self.memory.sweep_expired(now),
            chapter_processing: self.chapter.sweep_expired(now),
            generic: self.generic.sweep_expired(now),
            cached_results: self.results.sweep_expired(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn kind_lookup_spans_stores() {
        let now = datetime!(2024-10-10 10:00 UTC);
        let registry = BufferRegistry::new(&ProcessingConfig::default());

        let chapter = registry
            .chapter
            .create(ChapterProcessingState::new(4), BufferOptions::default(), now)
            .expect("create chapter");
        let generic = registry
            .generic
            .create(json!({"x": 1}), BufferOptions::default(), now)
            .expect("create generic");

        assert_eq!(registry.kind_of(chapter), Some(BufferKind::ChapterProcessing));
        assert_eq!(registry.kind_of(generic), Some(BufferKind::Generic));
        assert_eq!(registry.kind_of(BufferId::new()), None);
        assert_eq!(registry.buffer_count(), 2);
    }

    #[test]
    fn tagged_payloads_route_to_their_store() {
        let now = datetime!(2024-10-10 10:00 UTC);
        let registry = BufferRegistry::new(&ProcessingConfig::default());

        let id = registry
            .create(
                BufferPayload::from(ChapterProcessingState::new(9)),
                BufferOptions::default(),
                now,
            )
            .expect("create");
        assert_eq!(registry.chapter.len(), 1);

        match registry.read(id, now, false).expect("read") {
            Some(BufferPayload::ChapterProcessing(state)) => assert_eq!(state.chapter_number, 9),
            other => panic!("unexpected payload: {other:?}"),
        }

        assert!(registry.delete(id));
        assert!(!registry.delete(id));
        assert_eq!(registry.read(id, now, false).expect("read"), None);
        assert_eq!(registry.access_counts().misses, 1);
    }

    #[test]
    fn patching_unknown_ids_reports_false() {
        let now = datetime!(2024-10-10 10:00 UTC);
        let registry = BufferRegistry::new(&ProcessingConfig::default());
        assert!(!registry
            .apply_patch(BufferId::new(), now, &json!({"x": 2}))
            .expect("patch"));
    }

    #[test]
    fn sweep_counts_each_kind() {
        let now = datetime!(2024-10-10 10:00 UTC);
        let registry = BufferRegistry::new(&ProcessingConfig::default());
        registry
            .generic
            .create(json!(1), BufferOptions::with_ttl(Duration::from_secs(1)), now)
            .expect("create");
        registry
            .generic
            .create(json!(2), BufferOptions::default(), now)
            .expect("create");

        let counts = registry.sweep_expired(now + Duration::from_secs(2));
        assert_eq!(counts.generic, 1);
        assert_eq!(counts.total(), 1);
        assert_eq!(registry.generic.len(), 1);
    }
}

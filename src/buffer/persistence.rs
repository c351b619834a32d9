//! Best-effort snapshotting of buffers, cached results, jobs and statistics.
//!
//! Each logical collection is one JSON document under the configured
//! namespace:
//!
//! ```text
//! <namespace>/buffers/ai-processing.json       id -> entry
//! <namespace>/buffers/memory-integration.json  id -> entry
//! <namespace>/buffers/chapter-processing.json  id -> entry
//! <namespace>/buffers/generic.json             id -> entry
//! <namespace>/cache/results.json               cached results
//! <namespace>/jobs.json                        queue, in-flight, archive
//! <namespace>/statistics.json                  access counters
//! ```
//!
//! Saving overwrites every document. Loading tolerates missing or corrupt
//! documents: the affected collection starts empty. Inside a readable
//! document each entry is decoded on its own, so one bad entry only drops
//! itself.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::cache::CachedResult;
use super::diagnostics::AccessCounts;
use super::entry::{BufferEntry, BufferId, BufferKind};
use super::jobs::{JobQueue, JobStatistics, JobsSnapshot, ProcessingJob};
use super::registry::BufferRegistry;
use super::store::{BufferStore, Payload, RestoreReport};
use crate::infra::storage::{DocumentStorage, StorageError};

const METRIC_SAVE_MS: &str = "quillbuf_snapshot_save_ms";
const METRIC_FAILURE: &str = "quillbuf_snapshot_failure_total";

const RESULTS_COLLECTION: &str = "cache/results";
const JOBS_COLLECTION: &str = "jobs";
const STATISTICS_COLLECTION: &str = "statistics";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode `{collection}` snapshot")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsDocument {
    saved_at: OffsetDateTime,
    access: AccessCounts,
}

/// What a snapshot load brought back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub buffers: RestoreReport,
    pub cached_results: usize,
    pub jobs: usize,
    /// Collections with no stored document.
    pub missing: usize,
    /// Collections whose document could not be read or decoded.
    pub unreadable: usize,
    /// Entries skipped inside otherwise readable documents.
    pub undecodable: usize,
}

impl LoadReport {
    fn absorb(&mut self, report: RestoreReport) {
        self.buffers.restored += report.restored;
        self.buffers.expired += report.expired;
        self.buffers.corrupted += report.corrupted;
    }
}

/// `jobs.json` with every job left undecoded.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJobsDocument {
    pending: Vec<Value>,
    active: Vec<Value>,
    suspended: Vec<Value>,
    archive: Vec<Value>,
    statistics: Option<Value>,
}

pub struct PersistenceAdapter {
    storage: Arc<dyn DocumentStorage>,
    namespace: String,
    dirty: AtomicBool,
    /// Serialises saves so an older snapshot never lands after a newer one.
    save_lock: Mutex<()>,
}

impl PersistenceAdapter {
    pub fn new(storage: Arc<dyn DocumentStorage>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into().trim_matches('/').to_string();
        Self {
            storage,
            namespace,
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Record that in-memory state diverged from the last snapshot.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Save only if something changed since the last save.
    pub async fn flush_if_dirty(
        &self,
        registry: &BufferRegistry,
        jobs: &JobQueue,
        now: OffsetDateTime,
    ) -> Result<bool, PersistenceError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save_snapshot(registry, jobs, now).await?;
        Ok(true)
    }

    /// Overwrite every collection document with the current state.
    ///
    /// Failures are logged and counted here; callers may ignore the result.
    pub async fn save_snapshot(
        &self,
        registry: &BufferRegistry,
        jobs: &JobQueue,
        now: OffsetDateTime,
    ) -> Result<(), PersistenceError> {
        let _guard = self.save_lock.lock().await;
        self.dirty.store(false, Ordering::Release);
        let started_at = Instant::now();

        let result = self.write_all(registry, jobs, now).await;
        match &result {
            Ok(()) => {
                let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
                histogram!(METRIC_SAVE_MS).record(elapsed_ms);
                debug!(namespace = %self.namespace, elapsed_ms, "Snapshot saved");
            }
            Err(err) => {
                self.dirty.store(true, Ordering::Release);
                counter!(METRIC_FAILURE).increment(1);
                error!(
                    namespace = %self.namespace,
                    error = %err,
                    "Snapshot save failed; continuing in memory"
                );
            }
        }
        result
    }

    async fn write_all(
        &self,
        registry: &BufferRegistry,
        jobs: &JobQueue,
        now: OffsetDateTime,
    ) -> Result<(), PersistenceError> {
        // Capture everything before the first await so the documents agree.
        let ai = keyed(registry.ai.snapshot());
        let memory = keyed(registry.memory.snapshot());
        let chapter = keyed(registry.chapter.snapshot());
        let generic = keyed(registry.generic.snapshot());
        let results = registry.results.snapshot();
        let queue = jobs.snapshot();
        let statistics = StatisticsDocument {
            saved_at: now,
            access: registry.access_counts(),
        };

        self.write(&buffers_collection(BufferKind::AiProcessing), &ai)
            .await?;
        self.write(&buffers_collection(BufferKind::MemoryIntegration), &memory)
            .await?;
        self.write(&buffers_collection(BufferKind::ChapterProcessing), &chapter)
            .await?;
        self.write(&buffers_collection(BufferKind::Generic), &generic)
            .await?;
        self.write(RESULTS_COLLECTION, &results).await?;
        self.write(JOBS_COLLECTION, &queue).await?;
        self.write(STATISTICS_COLLECTION, &statistics).await?;
        Ok(())
    }

    /// Repopulate `registry` and `jobs` from the stored documents.
    pub async fn load_snapshot(
        &self,
        registry: &BufferRegistry,
        jobs: &JobQueue,
        now: OffsetDateTime,
    ) -> LoadReport {
        let mut report = LoadReport::default();

        // Counters first; restoring buffers adds to them.
        if let Some(statistics) = self
            .load::<StatisticsDocument>(STATISTICS_COLLECTION, &mut report)
            .await
        {
            registry.stats().restore(&statistics.access);
        }

        let restored = self.load_store(&registry.ai, now, &mut report).await;
        report.absorb(restored);
        let restored = self.load_store(&registry.memory, now, &mut report).await;
        report.absorb(restored);
        let restored = self.load_store(&registry.chapter, now, &mut report).await;
        report.absorb(restored);
        let restored = self.load_store(&registry.generic, now, &mut report).await;
        report.absorb(restored);

        if let Some(results) = self
            .load::<Vec<Value>>(RESULTS_COLLECTION, &mut report)
            .await
        {
            let results: Vec<CachedResult> =
                self.decode_each(RESULTS_COLLECTION, results, &mut report);
            report.cached_results = registry.results.restore(results, now);
        }

        if let Some(raw) = self.load::<RawJobsDocument>(JOBS_COLLECTION, &mut report).await {
            let queue = self.decode_jobs(raw, &mut report);
            report.jobs =
                queue.pending.len() + queue.active.len() + queue.suspended.len() + queue.archive.len();
            jobs.restore(queue, now);
        }

        if report.missing == collection_count() {
            info!(namespace = %self.namespace, "No snapshot found; starting empty");
        } else {
            info!(
                namespace = %self.namespace,
                buffers = report.buffers.restored,
                expired = report.buffers.expired,
                corrupted = report.buffers.corrupted,
                cached_results = report.cached_results,
                jobs = report.jobs,
                unreadable = report.unreadable,
                undecodable = report.undecodable,
                "Snapshot loaded"
            );
        }
        report
    }

    async fn load_store<T: Payload>(
        &self,
        store: &BufferStore<T>,
        now: OffsetDateTime,
        report: &mut LoadReport,
    ) -> RestoreReport {
        let collection = buffers_collection(store.kind());
        match self
            .load::<BTreeMap<BufferId, Value>>(&collection, report)
            .await
        {
            Some(entries) => {
                let entries: Vec<BufferEntry<T>> =
                    self.decode_each(&collection, entries.into_values(), report);
                store.restore(entries, now)
            }
            None => RestoreReport::default(),
        }
    }

    fn decode_jobs(&self, raw: RawJobsDocument, report: &mut LoadReport) -> JobsSnapshot {
        let statistics = match raw.statistics {
            Some(value) => serde_json::from_value::<JobStatistics>(value).unwrap_or_else(|err| {
                report.undecodable += 1;
                warn!(
                    namespace = %self.namespace,
                    error = %err,
                    "Ignoring undecodable job statistics"
                );
                JobStatistics::default()
            }),
            None => JobStatistics::default(),
        };

        JobsSnapshot {
            pending: self.decode_each::<ProcessingJob>(JOBS_COLLECTION, raw.pending, report),
            active: self.decode_each(JOBS_COLLECTION, raw.active, report),
            suspended: self.decode_each(JOBS_COLLECTION, raw.suspended, report),
            archive: self.decode_each(JOBS_COLLECTION, raw.archive, report),
            statistics,
        }
    }

    fn decode_each<T: DeserializeOwned>(
        &self,
        collection: &str,
        values: impl IntoIterator<Item = Value>,
        report: &mut LoadReport,
    ) -> Vec<T> {
        values
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    report.undecodable += 1;
                    warn!(
                        namespace = %self.namespace,
                        collection,
                        error = %err,
                        "Skipping undecodable snapshot entry"
                    );
                    None
                }
            })
            .collect()
    }

    async fn load<T: DeserializeOwned>(
        &self,
        collection: &str,
        report: &mut LoadReport,
    ) -> Option<T> {
        match self.read(collection).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                report.missing += 1;
                None
            }
            Err(err) => {
                report.unreadable += 1;
                warn!(
                    namespace = %self.namespace,
                    collection,
                    error = %err,
                    "Ignoring unreadable snapshot document"
                );
                None
            }
        }
    }

    async fn read<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Option<T>, PersistenceError> {
        let path = self.path(collection);
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let content = self.storage.read(&path).await?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| PersistenceError::Decode {
                collection: collection.to_string(),
                source,
            })
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        collection: &str,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let content = serde_json::to_string(value).map_err(PersistenceError::Encode)?;
        self.storage.write(&self.path(collection), &content).await?;
        Ok(())
    }

    fn path(&self, collection: &str) -> String {
        if self.namespace.is_empty() {
            format!("{collection}.json")
        } else {
            format!("{}/{collection}.json", self.namespace)
        }
    }
}

fn buffers_collection(kind: BufferKind) -> String {
    format!("buffers/{}", kind.as_str())
}

fn collection_count() -> usize {
    BufferKind::ALL.len() + 3
}

fn keyed<T>(entries: Vec<BufferEntry<T>>) -> BTreeMap<BufferId, BufferEntry<T>> {
    entries.into_iter().map(|entry| (entry.id, entry)).collect()
}

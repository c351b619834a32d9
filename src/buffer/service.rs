//! Process-wide facade over the stores, job queue, sweeper and persistence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::cache::CacheCategory;
use super::checksum::Checksum;
use super::clock::{Clock, SystemClock};
use super::config::ProcessingConfig;
use super::diagnostics::{BufferStatus, StatusInputs};
use super::entry::{BufferId, BufferMetadata, BufferOptions};
use super::error::BufferError;
use super::jobs::{
    JobFailure, JobId, JobQueue, JobStatus, NewJob, ProcessingJob, ResourceUsage,
};
use super::lock::mutex_lock;
use super::payloads::{
    AiProcessingKind, AiProcessingState, BufferPayload, ChapterProcessingState, InputDescriptor,
    IntegrationKind, MemoryIntegrationState, SourceDescriptor,
};
use super::persistence::{LoadReport, PersistenceAdapter, PersistenceError};
use super::registry::BufferRegistry;
use super::scheduler::PeriodicTask;
use super::store::{BufferStore, Payload};
use super::sweeper::{SweepReport, Sweeper};
use crate::infra::storage::{DocumentStorage, MemoryDocumentStorage};

const SOURCE: &str = "buffer::service";

struct Shared {
    clock: Arc<dyn Clock>,
    registry: Arc<BufferRegistry>,
    jobs: Arc<JobQueue>,
    sweeper: Sweeper,
    persistence: Option<PersistenceAdapter>,
    write_through: bool,
}

impl Shared {
    fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Save now, or mark dirty for the flusher when debouncing.
    async fn persist(&self) {
        let Some(adapter) = &self.persistence else {
            return;
        };
        if self.write_through {
            // Failures are logged by the adapter.
            let _ = adapter
                .save_snapshot(&self.registry, &self.jobs, self.now())
                .await;
        } else {
            adapter.mark_dirty();
        }
    }

    async fn flush(&self) -> Result<(), PersistenceError> {
        match &self.persistence {
            Some(adapter) => {
                adapter
                    .save_snapshot(&self.registry, &self.jobs, self.now())
                    .await
            }
            None => Ok(()),
        }
    }
}

/// Typed, TTL-aware buffers plus a priority job queue.
///
/// Construct one per process and share it; every read hands back a copy.
pub struct ProcessingBuffer {
    config: ProcessingConfig,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl ProcessingBuffer {
    pub fn new(config: ProcessingConfig, storage: Arc<dyn DocumentStorage>) -> Self {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    /// Buffer backed by process memory only.
    pub fn in_memory(config: ProcessingConfig) -> Self {
        Self::new(config, Arc::new(MemoryDocumentStorage::new()))
    }

    pub fn with_clock(
        config: ProcessingConfig,
        storage: Arc<dyn DocumentStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(BufferRegistry::new(&config));
        let jobs = Arc::new(JobQueue::new(config.job_queue()));
        let sweeper = Sweeper::new(Arc::clone(&registry), Arc::clone(&jobs), Arc::clone(&clock));
        let persistence = config
            .persistence_enabled
            .then(|| PersistenceAdapter::new(storage, config.namespace.clone()));

        let shared = Shared {
            clock,
            registry,
            jobs,
            sweeper,
            persistence,
            write_through: config.flush_debounce().is_none(),
        };

        Self {
            config,
            shared: Arc::new(shared),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn now(&self) -> OffsetDateTime {
        self.shared.now()
    }

    /// Load the last snapshot and start the dispatcher, sweeper and flusher.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> LoadReport {
        let report = self.load_snapshot().await;
        self.start_background_tasks();
        info!(
            max_concurrent = self.config.max_concurrent,
            dispatch_interval_ms = self.config.dispatch_interval_ms,
            sweep_interval_secs = self.config.sweep_interval_secs,
            write_through = self.shared.write_through,
            "Processing buffer initialized"
        );
        report
    }

    /// Repopulate from the stored snapshot without starting background work.
    pub async fn load_snapshot(&self) -> LoadReport {
        match &self.shared.persistence {
            Some(adapter) => {
                adapter
                    .load_snapshot(&self.shared.registry, &self.shared.jobs, self.now())
                    .await
            }
            None => LoadReport::default(),
        }
    }

    fn start_background_tasks(&self) {
        let mut tasks = mutex_lock(&self.tasks, SOURCE, "start_background_tasks");
        if !tasks.is_empty() {
            warn!("Background tasks already running; ignoring repeated initialize");
            return;
        }

        let shared = Arc::clone(&self.shared);
        tasks.push(PeriodicTask::spawn(
            "dispatcher",
            self.config.dispatch_interval(),
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    let promoted = shared.jobs.dispatch(shared.now());
                    if !promoted.is_empty() {
                        shared.persist().await;
                    }
                }
            },
        ));

        let shared = Arc::clone(&self.shared);
        tasks.push(PeriodicTask::spawn(
            "sweeper",
            self.config.sweep_interval(),
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    shared.sweeper.sweep();
                }
            },
        ));

        let flush_window = self
            .config
            .flush_debounce()
            .filter(|_| self.shared.persistence.is_some());
        if let Some(window) = flush_window {
            let shared = Arc::clone(&self.shared);
            tasks.push(PeriodicTask::spawn("flusher", window, move || {
                let shared = Arc::clone(&shared);
                async move {
                    if let Some(adapter) = &shared.persistence {
                        // Failures are logged by the adapter.
                        let _ = adapter
                            .flush_if_dirty(&shared.registry, &shared.jobs, shared.now())
                            .await;
                    }
                }
            }));
        }
    }

    /// Stop background tasks and write a final snapshot.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *mutex_lock(&self.tasks, SOURCE, "shutdown"));
        for task in tasks {
            task.cancel().await;
        }
        // Failures are logged by the adapter.
        let _ = self.shared.flush().await;
        info!("Processing buffer shut down");
    }

    /// Force a snapshot regardless of the flush policy.
    #[instrument(skip(self))]
    pub async fn checkpoint(&self) -> Result<(), PersistenceError> {
        self.shared.flush().await
    }

    // Buffers

    pub async fn create_buffer(
        &self,
        payload: impl Into<BufferPayload>,
        options: BufferOptions,
    ) -> Result<BufferId, BufferError> {
        let id = self
            .shared
            .registry
            .create(payload.into(), options, self.now())?;
        self.shared.persist().await;
        Ok(id)
    }

    pub async fn create_ai_processing_buffer(
        &self,
        processing_kind: AiProcessingKind,
        input: InputDescriptor,
        steps: &[&str],
        options: BufferOptions,
    ) -> Result<BufferId, BufferError> {
        let mut state = AiProcessingState::new(processing_kind, input);
        for step in steps {
            state.add_step(*step);
        }
        self.create_buffer(state, options).await
    }

    pub async fn create_memory_integration_buffer(
        &self,
        integration_kind: IntegrationKind,
        source: SourceDescriptor,
        options: BufferOptions,
    ) -> Result<BufferId, BufferError> {
        self.create_buffer(MemoryIntegrationState::new(integration_kind, source), options)
            .await
    }

    pub async fn create_chapter_processing_buffer(
        &self,
        chapter_number: u32,
        options: BufferOptions,
    ) -> Result<BufferId, BufferError> {
        self.create_buffer(ChapterProcessingState::new(chapter_number), options)
            .await
    }

    /// Copy of a live payload, or `None` for unknown and expired ids.
    ///
    /// With `verify_on_read` set, a checksum disagreement is returned as
    /// [`BufferError::IntegrityMismatch`].
    pub fn read_buffer(&self, id: BufferId) -> Result<Option<BufferPayload>, BufferError> {
        self.shared
            .registry
            .read(id, self.now(), self.config.verify_on_read)
    }

    pub fn read_ai_processing(
        &self,
        id: BufferId,
    ) -> Result<Option<AiProcessingState>, BufferError> {
        self.read_typed(&self.shared.registry.ai, id)
    }

    pub fn read_memory_integration(
        &self,
        id: BufferId,
    ) -> Result<Option<MemoryIntegrationState>, BufferError> {
        self.read_typed(&self.shared.registry.memory, id)
    }

    pub fn read_chapter_processing(
        &self,
        id: BufferId,
    ) -> Result<Option<ChapterProcessingState>, BufferError> {
        self.read_typed(&self.shared.registry.chapter, id)
    }

    /// Metadata without counting an access.
    pub fn buffer_metadata(&self, id: BufferId) -> Option<BufferMetadata> {
        self.shared.registry.metadata(id)
    }

    /// Apply a JSON merge-patch. Returns `false` when the id is unknown or expired.
    pub async fn mutate_buffer(&self, id: BufferId, patch: &Value) -> Result<bool, BufferError> {
        let applied = self.shared.registry.apply_patch(id, self.now(), patch)?;
        if applied {
            self.shared.persist().await;
        }
        Ok(applied)
    }

    pub async fn update_ai_processing<R>(
        &self,
        id: BufferId,
        mutator: impl FnOnce(&mut AiProcessingState, OffsetDateTime) -> R,
    ) -> Result<R, BufferError> {
        self.update_typed(&self.shared.registry.ai, id, mutator).await
    }

    pub async fn update_memory_integration<R>(
        &self,
        id: BufferId,
        mutator: impl FnOnce(&mut MemoryIntegrationState, OffsetDateTime) -> R,
    ) -> Result<R, BufferError> {
        self.update_typed(&self.shared.registry.memory, id, mutator)
            .await
    }

    pub async fn update_chapter_processing<R>(
        &self,
        id: BufferId,
        mutator: impl FnOnce(&mut ChapterProcessingState, OffsetDateTime) -> R,
    ) -> Result<R, BufferError> {
        self.update_typed(&self.shared.registry.chapter, id, mutator)
            .await
    }

    pub async fn update_generic<R>(
        &self,
        id: BufferId,
        mutator: impl FnOnce(&mut Value, OffsetDateTime) -> R,
    ) -> Result<R, BufferError> {
        self.update_typed(&self.shared.registry.generic, id, mutator)
            .await
    }

    /// Remove a buffer. Idempotent.
    pub async fn delete_buffer(&self, id: BufferId) -> bool {
        let removed = self.shared.registry.delete(id);
        if removed {
            self.shared.persist().await;
        }
        removed
    }

    fn read_typed<T: Payload>(
        &self,
        store: &BufferStore<T>,
        id: BufferId,
    ) -> Result<Option<T>, BufferError> {
        if let Some(actual) = self.shared.registry.kind_of(id)
            && actual != store.kind()
        {
            return Err(BufferError::KindMismatch {
                id,
                expected: store.kind(),
                actual,
            });
        }
        store.get(id, self.now(), self.config.verify_on_read)
    }

    async fn update_typed<T: Payload, R>(
        &self,
        store: &BufferStore<T>,
        id: BufferId,
        mutator: impl FnOnce(&mut T, OffsetDateTime) -> R,
    ) -> Result<R, BufferError> {
        let now = self.now();
        let output = match store.update(id, now, |payload| mutator(payload, now)) {
            Err(BufferError::NotFound(_)) => {
                return Err(match self.shared.registry.kind_of(id) {
                    Some(actual) if actual != store.kind() => BufferError::KindMismatch {
                        id,
                        expected: store.kind(),
                        actual,
                    },
                    _ => BufferError::NotFound(id),
                });
            }
            other => other?,
        };
        self.shared.persist().await;
        Ok(output)
    }

    // Result cache

    pub fn cache_get<Q: Serialize + ?Sized>(
        &self,
        category: CacheCategory,
        query: &Q,
    ) -> Result<Option<Value>, BufferError> {
        self.shared.registry.results.get(category, query, self.now())
    }

    pub async fn cache_put<Q: Serialize + ?Sized>(
        &self,
        category: CacheCategory,
        query: &Q,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<Checksum, BufferError> {
        let fingerprint = self
            .shared
            .registry
            .results
            .put(category, query, value, ttl, self.now())?;
        self.shared.persist().await;
        Ok(fingerprint)
    }

    pub async fn cache_invalidate<Q: Serialize + ?Sized>(
        &self,
        category: CacheCategory,
        query: &Q,
    ) -> Result<bool, BufferError> {
        let removed = self.shared.registry.results.invalidate(category, query)?;
        if removed {
            self.shared.persist().await;
        }
        Ok(removed)
    }

    // Jobs

    /// Queue a job. The returned id may already be unknown if the queue was
    /// full and this job landed at the tail.
    pub async fn create_job(&self, job: NewJob) -> JobId {
        let id = self.shared.jobs.create(job, self.now());
        self.shared.persist().await;
        id
    }

    pub async fn update_job_progress(
        &self,
        id: JobId,
        percent: f64,
        usage: Option<ResourceUsage>,
    ) -> bool {
        let updated = self
            .shared
            .jobs
            .update_progress(id, percent, usage, self.now());
        if updated {
            self.shared.persist().await;
        }
        updated
    }

    pub async fn complete_job(&self, id: JobId) -> bool {
        let completed = self.shared.jobs.complete(id, self.now());
        if completed {
            self.shared.persist().await;
        }
        completed
    }

    /// Report a failure; returns the job's new status, `None` for unknown ids.
    pub async fn fail_job(&self, id: JobId, failure: JobFailure) -> Option<JobStatus> {
        let status = self.shared.jobs.fail(id, failure, self.now());
        if status.is_some() {
            self.shared.persist().await;
        }
        status
    }

    pub async fn suspend_job(&self, id: JobId) -> bool {
        let suspended = self.shared.jobs.suspend(id, self.now());
        if suspended {
            self.shared.persist().await;
        }
        suspended
    }

    pub async fn resume_job(&self, id: JobId) -> bool {
        let resumed = self.shared.jobs.resume(id, self.now());
        if resumed {
            self.shared.persist().await;
        }
        resumed
    }

    /// Copy of a job in any state.
    pub fn job(&self, id: JobId) -> Option<ProcessingJob> {
        self.shared.jobs.get(id)
    }

    /// Run one dispatch pass immediately.
    pub async fn dispatch_now(&self) -> Vec<JobId> {
        let promoted = self.shared.jobs.dispatch(self.now());
        if !promoted.is_empty() {
            self.shared.persist().await;
        }
        promoted
    }

    // Maintenance

    /// Run one sweep immediately. Does not persist.
    pub fn sweep_now(&self) -> SweepReport {
        self.shared.sweeper.sweep()
    }

    pub fn status(&self) -> BufferStatus {
        let registry = &self.shared.registry;
        let counts = self.shared.jobs.counts();
        let statistics = self.shared.jobs.statistics();

        BufferStatus::from_inputs(StatusInputs {
            active_jobs: counts.active,
            queued_jobs: counts.queued,
            suspended_jobs: counts.suspended,
            completed_jobs: statistics.total_completed,
            failed_jobs: statistics.total_failed,
            buffer_count: registry.buffer_count(),
            memory_usage_bytes: registry.total_size_bytes(),
            avg_processing_ms: statistics.avg_processing_ms,
            access: registry.access_counts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::buffer::clock::ManualClock;

    fn buffer() -> (ProcessingBuffer, Arc<ManualClock>, Arc<MemoryDocumentStorage>) {
        let clock = Arc::new(ManualClock::new(datetime!(2025-01-01 0:00 UTC)));
        let storage = Arc::new(MemoryDocumentStorage::new());
        let buffer =
            ProcessingBuffer::with_clock(ProcessingConfig::default(), storage.clone(), clock.clone());
        (buffer, clock, storage)
    }

    #[tokio::test]
    async fn typed_updates_reject_other_kinds() {
        let (buffer, _, _) = buffer();
        let id = buffer
            .create_chapter_processing_buffer(3, BufferOptions::default())
            .await
            .expect("create");

        let err = buffer
            .update_ai_processing(id, |state, _| state.add_step("x"))
            .await
            .expect_err("kind mismatch");
        assert!(matches!(err, BufferError::KindMismatch { .. }));

        let err = buffer
            .update_generic(BufferId::new(), |_, _| ())
            .await
            .expect_err("not found");
        assert!(matches!(err, BufferError::NotFound(_)));
    }

    #[tokio::test]
    async fn mutations_write_through_by_default() {
        let (buffer, _, storage) = buffer();
        assert!(storage.paths().is_empty());

        buffer
            .create_buffer(json!({"x": 1}), BufferOptions::default())
            .await
            .expect("create");

        assert!(
            storage
                .paths()
                .contains(&"short-term/processing-buffer/buffers/generic.json".to_string())
        );
    }

    #[tokio::test]
    async fn status_reflects_jobs_and_buffers() {
        let (buffer, clock, _) = buffer();
        buffer
            .create_buffer(json!({"x": 1}), BufferOptions::default())
            .await
            .expect("create");
        let first = buffer.create_job(NewJob::new("analysis", 1)).await;
        buffer.create_job(NewJob::new("analysis", 1)).await;
        buffer.dispatch_now().await;

        clock.advance(Duration::from_millis(400));
        assert!(buffer.complete_job(first).await);

        let status = buffer.status();
        assert_eq!(status.completed_jobs, 1);
        assert_eq!(status.active_jobs, 1);
        assert_eq!(status.total_buffer_size, 1);
        assert!(status.memory_usage_bytes > 0);
        assert!((status.avg_processing_time - 400.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn disabled_persistence_writes_nothing() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let config = ProcessingConfig {
            persistence_enabled: false,
            ..Default::default()
        };
        let buffer = ProcessingBuffer::new(config, storage.clone());
        buffer.create_job(NewJob::new("x", 0)).await;
        buffer.checkpoint().await.expect("checkpoint");
        assert!(storage.paths().is_empty());
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::model::{
    DEFAULT_MAX_RETRIES, JobErrorInfo, JobFailure, JobId, JobStatus, NewJob, ProcessingJob,
    ResourceUsage,
};
use crate::buffer::clock::elapsed_between;
use crate::buffer::lock::mutex_lock;

const SOURCE: &str = "buffer::jobs";

pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 100;

const METRIC_CREATED: &str = "quillbuf_job_created_total";
const METRIC_DROPPED: &str = "quillbuf_job_dropped_total";
const METRIC_RETRY: &str = "quillbuf_job_retry_total";
const METRIC_FAILED: &str = "quillbuf_job_failed_total";
const METRIC_COMPLETED: &str = "quillbuf_job_completed_total";
const METRIC_QUEUE_LEN: &str = "quillbuf_job_queue_len";
const METRIC_DURATION_MS: &str = "quillbuf_job_duration_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobQueueConfig {
    pub max_concurrent: usize,
    pub queue_capacity: usize,
    pub archive_capacity: usize,
    pub max_retries: u32,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Lifetime counters of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobStatistics {
    pub total_created: u64,
    pub total_completed: u64,
    /// Jobs that exhausted their retries.
    pub total_failed: u64,
    pub total_retries: u64,
    pub total_dropped: u64,
    pub avg_processing_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: usize,
    pub active: usize,
    pub suspended: usize,
    pub archived: usize,
}

/// Serializable copy of every job collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsSnapshot {
    pub pending: Vec<ProcessingJob>,
    pub active: Vec<ProcessingJob>,
    pub suspended: Vec<ProcessingJob>,
    pub archive: Vec<ProcessingJob>,
    pub statistics: JobStatistics,
}

#[derive(Default)]
struct QueueState {
    /// Descending priority, FIFO within a priority.
    pending: VecDeque<ProcessingJob>,
    active: HashMap<JobId, ProcessingJob>,
    suspended: HashMap<JobId, ProcessingJob>,
    /// Completed and terminally failed jobs, oldest first.
    archive: VecDeque<ProcessingJob>,
    stats: JobStatistics,
}

impl QueueState {
    fn enqueue(&mut self, job: ProcessingJob, capacity: usize) -> Option<ProcessingJob> {
        let position = self
            .pending
            .iter()
            .position(|queued| queued.priority < job.priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(position, job);

        if self.pending.len() > capacity {
            let dropped = self.pending.pop_back();
            if dropped.is_some() {
                self.stats.total_dropped += 1;
            }
            return dropped;
        }
        None
    }

    /// True when enqueueing `job` would push it straight off the tail.
    fn would_drop(&self, job: &ProcessingJob, capacity: usize) -> bool {
        self.pending.len() >= capacity
            && !self.pending.iter().any(|queued| queued.priority < job.priority)
    }

    fn take_live(&mut self, id: JobId) -> Option<ProcessingJob> {
        if let Some(job) = self.active.remove(&id) {
            return Some(job);
        }
        if let Some(job) = self.suspended.remove(&id) {
            return Some(job);
        }
        let position = self.pending.iter().position(|job| job.id == id)?;
        self.pending.remove(position)
    }

    fn archive(&mut self, job: ProcessingJob) {
        self.archive.push_back(job);
    }
}

/// Pending queue, in-flight map and archive behind a single lock.
pub struct JobQueue {
    config: JobQueueConfig,
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new(config: JobQueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    /// Queue a job by priority.
    ///
    /// When the pending queue is over capacity the lowest-priority, newest
    /// job is dropped, which may be the job just created.
    pub fn create(&self, request: NewJob, now: OffsetDateTime) -> JobId {
        let job = ProcessingJob::new(request, self.config.max_retries, now);
        let id = job.id;

        debug!(
            job_id = %id,
            job_type = %job.job_type,
            priority = job.priority,
            chapter = ?job.chapter_number,
            "Job queued"
        );

        let mut state = mutex_lock(&self.state, SOURCE, "create");
        state.stats.total_created += 1;
        counter!(METRIC_CREATED).increment(1);

        if let Some(dropped) = state.enqueue(job, self.config.queue_capacity) {
            counter!(METRIC_DROPPED).increment(1);
            warn!(
                job_id = %dropped.id,
                job_type = %dropped.job_type,
                priority = dropped.priority,
                capacity = self.config.queue_capacity,
                "Job queue over capacity; dropped tail job"
            );
        }
        gauge!(METRIC_QUEUE_LEN).set(state.pending.len() as f64);

        id
    }

    /// Promote head-of-queue jobs into free concurrency slots.
    pub fn dispatch(&self, now: OffsetDateTime) -> Vec<JobId> {
        let mut state = mutex_lock(&self.state, SOURCE, "dispatch");
        let available = self.config.max_concurrent.saturating_sub(state.active.len());

        let mut promoted = Vec::new();
        for _ in 0..available {
            let Some(mut job) = state.pending.pop_front() else {
                break;
            };
            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            job.last_update = now;
            promoted.push(job.id);
            state.active.insert(job.id, job);
        }

        if !promoted.is_empty() {
            debug!(
                promoted = promoted.len(),
                active = state.active.len(),
                queued = state.pending.len(),
                "Jobs dispatched"
            );
            gauge!(METRIC_QUEUE_LEN).set(state.pending.len() as f64);
        }
        promoted
    }

    /// Record progress for an in-flight or suspended job. Percent is clamped to `[0, 100]`.
    pub fn update_progress(
        &self,
        id: JobId,
        percent: f64,
        usage: Option<ResourceUsage>,
        now: OffsetDateTime,
    ) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "update_progress");
        let QueueState {
            active, suspended, ..
        } = &mut *state;

        let Some(job) = active.get_mut(&id).or_else(|| suspended.get_mut(&id)) else {
            warn!(job_id = %id, "Progress update for unknown job ignored");
            return false;
        };

        job.progress = if percent.is_nan() {
            job.progress
        } else {
            percent.clamp(0.0, 100.0)
        };
        match usage {
            Some(usage) if !usage.cpu_percent.is_finite() => {
                warn!(job_id = %id, "Resource usage with non-finite cpu ignored");
            }
            Some(usage) => job.resource_usage = Some(usage),
            None => {}
        }
        job.last_update = now;
        true
    }

    /// Archive a live job as completed.
    pub fn complete(&self, id: JobId, now: OffsetDateTime) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "complete");
        let Some(mut job) = state.take_live(id) else {
            warn!(job_id = %id, "Completion for unknown job ignored");
            return false;
        };

        let duration_ms = elapsed_between(job.started_at.unwrap_or(job.created_at), now)
            .as_secs_f64()
            * 1000.0;

        job.status = JobStatus::Completed;
        job.progress = 100.0;
        job.last_update = now;
        job.finished_at = Some(now);

        state.stats.total_completed += 1;
        let completed = state.stats.total_completed as f64;
        state.stats.avg_processing_ms += (duration_ms - state.stats.avg_processing_ms) / completed;

        counter!(METRIC_COMPLETED).increment(1);
        histogram!(METRIC_DURATION_MS).record(duration_ms);
        debug!(job_id = %id, duration_ms, "Job completed");

        state.archive(job);
        gauge!(METRIC_QUEUE_LEN).set(state.pending.len() as f64);
        true
    }

    /// Record a failure. Returns the job's new status, or `None` for an unknown id.
    ///
    /// The job is re-queued while its retry count stays below its limit and
    /// archived as terminally failed otherwise. A retry that would fall off
    /// the tail of a full queue also ends the job as failed.
    pub fn fail(&self, id: JobId, failure: JobFailure, now: OffsetDateTime) -> Option<JobStatus> {
        let mut state = mutex_lock(&self.state, SOURCE, "fail");
        let Some(mut job) = state.take_live(id) else {
            warn!(job_id = %id, "Failure report for unknown job ignored");
            return None;
        };

        let retry_count = (job.retry_count() + 1).min(job.max_retries);
        job.error = Some(JobErrorInfo {
            kind: failure.kind,
            message: failure.message,
            stack: failure.stack,
            retry_count,
            max_retries: job.max_retries,
        });
        job.last_update = now;

        let queue_full = state.would_drop(&job, self.config.queue_capacity);
        if retry_count < job.max_retries && queue_full {
            state.stats.total_dropped += 1;
            counter!(METRIC_DROPPED).increment(1);
            warn!(
                job_id = %id,
                retry_count,
                capacity = self.config.queue_capacity,
                "Job queue full; retry abandoned"
            );
        } else if retry_count < job.max_retries {
            job.status = JobStatus::Queued;
            job.progress = 0.0;
            job.started_at = None;
            state.stats.total_retries += 1;
            counter!(METRIC_RETRY).increment(1);
            info!(
                job_id = %id,
                retry_count,
                max_retries = job.max_retries,
                "Job failed; re-queued for retry"
            );
            if let Some(dropped) = state.enqueue(job, self.config.queue_capacity) {
                counter!(METRIC_DROPPED).increment(1);
                warn!(
                    job_id = %dropped.id,
                    priority = dropped.priority,
                    "Job queue over capacity; dropped tail job"
                );
            }
            gauge!(METRIC_QUEUE_LEN).set(state.pending.len() as f64);
            return Some(JobStatus::Queued);
        }

        job.status = JobStatus::Failed;
        job.finished_at = Some(now);
        state.stats.total_failed += 1;
        counter!(METRIC_FAILED).increment(1);
        warn!(
            job_id = %id,
            job_type = %job.job_type,
            retry_count,
            error_kind = job.error.as_ref().map(|e| e.kind.as_str()).unwrap_or_default(),
            "Job failed permanently"
        );
        state.archive(job);
        gauge!(METRIC_QUEUE_LEN).set(state.pending.len() as f64);
        Some(JobStatus::Failed)
    }

    /// Park an in-flight job, freeing its concurrency slot.
    pub fn suspend(&self, id: JobId, now: OffsetDateTime) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "suspend");
        let Some(mut job) = state.active.remove(&id) else {
            warn!(job_id = %id, "Suspend requested for job that is not processing");
            return false;
        };
        job.status = JobStatus::Suspended;
        job.last_update = now;
        debug!(job_id = %id, progress = job.progress, "Job suspended");
        state.suspended.insert(id, job);
        true
    }

    /// Re-queue a suspended job by priority, keeping its progress.
    ///
    /// Refused while the queue is full and the job would land on its tail;
    /// the job then stays suspended.
    pub fn resume(&self, id: JobId, now: OffsetDateTime) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "resume");
        let Some(job) = state.suspended.get(&id) else {
            warn!(job_id = %id, "Resume requested for job that is not suspended");
            return false;
        };
        if state.would_drop(job, self.config.queue_capacity) {
            warn!(
                job_id = %id,
                capacity = self.config.queue_capacity,
                "Job queue full; job stays suspended"
            );
            return false;
        }
        let Some(mut job) = state.suspended.remove(&id) else {
            return false;
        };
        job.status = JobStatus::Queued;
        job.last_update = now;
        debug!(job_id = %id, "Job resumed");
        if let Some(dropped) = state.enqueue(job, self.config.queue_capacity) {
            counter!(METRIC_DROPPED).increment(1);
            warn!(job_id = %dropped.id, "Job queue over capacity; dropped tail job");
        }
        gauge!(METRIC_QUEUE_LEN).set(state.pending.len() as f64);
        true
    }

    /// Copy of a job from whichever collection holds it.
    pub fn get(&self, id: JobId) -> Option<ProcessingJob> {
        let state = mutex_lock(&self.state, SOURCE, "get");
        state
            .active
            .get(&id)
            .or_else(|| state.suspended.get(&id))
            .or_else(|| state.pending.iter().find(|job| job.id == id))
            .or_else(|| state.archive.iter().rev().find(|job| job.id == id))
            .cloned()
    }

    /// Ids of pending jobs in dispatch order.
    pub fn pending_ids(&self) -> Vec<JobId> {
        mutex_lock(&self.state, SOURCE, "pending_ids")
            .pending
            .iter()
            .map(|job| job.id)
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        let state = mutex_lock(&self.state, SOURCE, "counts");
        JobCounts {
            queued: state.pending.len(),
            active: state.active.len(),
            suspended: state.suspended.len(),
            archived: state.archive.len(),
        }
    }

    pub fn statistics(&self) -> JobStatistics {
        mutex_lock(&self.state, SOURCE, "statistics").stats.clone()
    }

    /// Drop the oldest archived jobs beyond the archive capacity.
    pub fn trim_archive(&self) -> usize {
        let mut state = mutex_lock(&self.state, SOURCE, "trim_archive");
        let excess = state
            .archive
            .len()
            .saturating_sub(self.config.archive_capacity);
        state.archive.drain(..excess);
        excess
    }

    pub fn snapshot(&self) -> JobsSnapshot {
        let state = mutex_lock(&self.state, SOURCE, "snapshot");
        JobsSnapshot {
            pending: state.pending.iter().cloned().collect(),
            active: state.active.values().cloned().collect(),
            suspended: state.suspended.values().cloned().collect(),
            archive: state.archive.iter().cloned().collect(),
            statistics: state.stats.clone(),
        }
    }

    /// Replace queue contents from a snapshot.
    ///
    /// Jobs that were processing when the snapshot was taken lost their
    /// worker with the process, so they go back into the pending queue.
    pub fn restore(&self, snapshot: JobsSnapshot, now: OffsetDateTime) {
        let JobsSnapshot {
            pending,
            active,
            suspended,
            archive,
            statistics,
        } = snapshot;

        let mut restored = QueueState {
            stats: statistics,
            ..QueueState::default()
        };

        let mut interrupted = active;
        interrupted.sort_by_key(|job| job.started_at.unwrap_or(job.created_at));

        for job in pending {
            restored.enqueue(job, usize::MAX);
        }
        let requeued = interrupted.len();
        for mut job in interrupted {
            job.status = JobStatus::Queued;
            job.started_at = None;
            job.progress = 0.0;
            job.last_update = now;
            restored.enqueue(job, usize::MAX);
        }
        while restored.pending.len() > self.config.queue_capacity {
            restored.pending.pop_back();
            restored.stats.total_dropped += 1;
        }

        restored.suspended = suspended.into_iter().map(|job| (job.id, job)).collect();
        restored.archive = archive.into();

        info!(
            queued = restored.pending.len(),
            requeued,
            suspended = restored.suspended.len(),
            archived = restored.archive.len(),
            "Job queue restored from snapshot"
        );

        let mut state = mutex_lock(&self.state, SOURCE, "restore");
        *state = restored;
        gauge!(METRIC_QUEUE_LEN).set(state.pending.len() as f64);
    }
}

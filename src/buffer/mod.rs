//! Ephemeral processing buffers and job lifecycle.
//!
//! Two cooperating halves behind [`ProcessingBuffer`]:
//!
//! - **Buffers**: typed, TTL-bound payloads (AI processing, memory
//!   integration, chapter processing, generic JSON) plus a result cache keyed
//!   by query fingerprint. Every payload carries a checksum recomputed on
//!   each mutation.
//! - **Jobs**: a priority queue feeding a fixed number of in-flight slots,
//!   with bounded retries and cooperative suspend/resume.
//!
//! A dispatcher, a sweeper and (when debouncing) a flusher run as
//! [`PeriodicTask`]s. State is snapshotted through a [`DocumentStorage`]
//! backend and restored on [`ProcessingBuffer::initialize`].
//!
//! ## Configuration
//!
//! ```toml
//! [buffers]
//! ai_processing_ttl_secs = 7200
//! verify_on_read = false
//!
//! [jobs]
//! max_concurrent = 10
//! queue_capacity = 200
//!
//! [persistence]
//! flush_debounce_ms = 0
//! # ... see config.rs for all options
//! ```
//!
//! [`DocumentStorage`]: crate::infra::storage::DocumentStorage

mod cache;
mod checksum;
mod clock;
mod config;
mod diagnostics;
mod entry;
mod error;
pub mod jobs;
pub(crate) mod lock;
pub mod payloads;
mod persistence;
mod registry;
mod scheduler;
mod service;
mod store;
mod sweeper;

pub use cache::{CacheCategory, CachedResult, ResultCache};
pub use checksum::{Checksum, Fingerprint, checksum, fingerprint};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ProcessingConfig;
pub use diagnostics::{AccessCounts, AccessStats, BufferStatus};
pub use entry::{BufferEntry, BufferId, BufferKind, BufferMetadata, BufferOptions, MAX_PRIORITY};
pub use error::{BufferError, UnknownBufferKind};
pub use jobs::{
    JobCounts, JobErrorInfo, JobFailure, JobId, JobQueue, JobQueueConfig, JobStatistics,
    JobStatus, JobsSnapshot, NewJob, ProcessingJob, ResourceUsage,
};
pub use payloads::{BufferPayload, StepStatus};
pub use persistence::{LoadReport, PersistenceAdapter, PersistenceError};
pub use registry::{BufferRegistry, ExpiryCounts};
pub use scheduler::PeriodicTask;
pub use service::ProcessingBuffer;
pub use store::{BufferStore, Payload, RestoreReport};
pub use sweeper::{SweepReport, Sweeper};

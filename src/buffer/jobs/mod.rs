//! Priority job queue with bounded retries.
//!
//! ```text
//! queued ──dispatch──▶ processing ──complete──▶ completed
//!   ▲                    │   │
//!   │◀──fail (retries)───┘   └──fail (exhausted)──▶ failed
//!   │◀──resume── suspended ◀──suspend──┘
//! ```

mod model;
mod queue;

pub use model::{
    DEFAULT_MAX_RETRIES, JobErrorInfo, JobFailure, JobId, JobStatus, NewJob, ProcessingJob,
    ResourceUsage,
};
pub use queue::{
    DEFAULT_ARCHIVE_CAPACITY, DEFAULT_MAX_CONCURRENT, DEFAULT_QUEUE_CAPACITY, JobCounts, JobQueue,
    JobQueueConfig, JobStatistics, JobsSnapshot,
};

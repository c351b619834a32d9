use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Suspended,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Suspended => "suspended",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory resource snapshot reported by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub tokens_used: u64,
}

/// Failure reported by a caller through `fail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Last failure of a job together with its retry accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorInfo {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Parameters for a new job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub job_type: String,
    pub priority: i32,
    pub chapter_number: Option<u32>,
    /// Overrides the queue-wide retry limit.
    pub max_retries: Option<u32>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, priority: i32) -> Self {
        Self {
            job_type: job_type.into(),
            priority,
            chapter_number: None,
            max_retries: None,
        }
    }

    pub fn chapter(mut self, chapter_number: u32) -> Self {
        self.chapter_number = Some(chapter_number);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: JobId,
    pub job_type: String,
    pub priority: i32,
    #[serde(default)]
    pub chapter_number: Option<u32>,
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub started_at: Option<OffsetDateTime>,
    pub last_update: OffsetDateTime,
    #[serde(default)]
    pub finished_at: Option<OffsetDateTime>,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(default)]
    pub resource_usage: Option<ResourceUsage>,
    pub max_retries: u32,
    #[serde(default)]
    pub error: Option<JobErrorInfo>,
}

impl ProcessingJob {
    pub(crate) fn new(request: NewJob, default_max_retries: u32, now: OffsetDateTime) -> Self {
        Self {
            id: JobId::new(),
            job_type: request.job_type,
            priority: request.priority,
            chapter_number: request.chapter_number,
            created_at: now,
            started_at: None,
            last_update: now,
            finished_at: None,
            status: JobStatus::Queued,
            progress: 0.0,
            resource_usage: None,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            error: None,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.error.as_ref().map_or(0, |error| error.retry_count)
    }
}

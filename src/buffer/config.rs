//! Processing-buffer configuration.
//!
//! Resolved from the `[buffers]`, `[jobs]`, `[sweeper]` and `[persistence]`
//! sections of `quillbuf.toml`.

use std::time::Duration;

use serde::Deserialize;

use super::entry::BufferKind;
use super::jobs::{
    DEFAULT_ARCHIVE_CAPACITY, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_CAPACITY,
    JobQueueConfig,
};

// Default values for processing configuration
const DEFAULT_AI_PROCESSING_TTL_SECS: u64 = 2 * 60 * 60;
const DEFAULT_MEMORY_INTEGRATION_TTL_SECS: u64 = 4 * 60 * 60;
const DEFAULT_CHAPTER_PROCESSING_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_GENERIC_TTL_SECS: u64 = 60 * 60;
const DEFAULT_DISPATCH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30 * 60;
pub(crate) const DEFAULT_NAMESPACE: &str = "short-term/processing-buffer";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Default TTL of AI-processing buffers.
    pub ai_processing_ttl_secs: u64,
    /// Default TTL of memory-integration buffers.
    pub memory_integration_ttl_secs: u64,
    /// Default TTL of chapter-processing buffers.
    pub chapter_processing_ttl_secs: u64,
    /// Default TTL of generic buffers and cached results.
    pub generic_ttl_secs: u64,
    /// Recompute checksums on every read.
    pub verify_on_read: bool,
    /// In-flight job slots.
    pub max_concurrent: usize,
    /// Pending queue cap; insertions past it drop the tail.
    pub queue_capacity: usize,
    /// Completed/failed jobs retained after a sweep.
    pub archive_capacity: usize,
    pub max_retries: u32,
    pub dispatch_interval_ms: u64,
    pub sweep_interval_secs: u64,
    /// Save snapshots at all.
    pub persistence_enabled: bool,
    /// Document path prefix within the storage backend.
    pub namespace: String,
    /// Zero saves on every mutation.
    pub flush_debounce_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            ai_processing_ttl_secs: DEFAULT_AI_PROCESSING_TTL_SECS,
            memory_integration_ttl_secs: DEFAULT_MEMORY_INTEGRATION_TTL_SECS,
            chapter_processing_ttl_secs: DEFAULT_CHAPTER_PROCESSING_TTL_SECS,
            generic_ttl_secs: DEFAULT_GENERIC_TTL_SECS,
            verify_on_read: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
            dispatch_interval_ms: DEFAULT_DISPATCH_INTERVAL_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            persistence_enabled: true,
            namespace: DEFAULT_NAMESPACE.to_string(),
            flush_debounce_ms: 0,
        }
    }
}

impl From<&crate::config::Settings> for ProcessingConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let buffers = &settings.buffers;
        let jobs = &settings.jobs;
        let persistence = &settings.persistence;
        Self {
            ai_processing_ttl_secs: buffers.ai_processing_ttl.as_secs(),
            memory_integration_ttl_secs: buffers.memory_integration_ttl.as_secs(),
            chapter_processing_ttl_secs: buffers.chapter_processing_ttl.as_secs(),
            generic_ttl_secs: buffers.generic_ttl.as_secs(),
            verify_on_read: buffers.verify_on_read,
            max_concurrent: jobs.max_concurrent.get(),
            queue_capacity: jobs.queue_capacity.get(),
            archive_capacity: jobs.archive_capacity,
            max_retries: jobs.max_retries,
            dispatch_interval_ms: millis(jobs.dispatch_interval),
            sweep_interval_secs: settings.sweeper.interval.as_secs(),
            persistence_enabled: persistence.enabled,
            namespace: persistence.namespace.clone(),
            flush_debounce_ms: millis(persistence.flush_debounce),
        }
    }
}

impl ProcessingConfig {
    /// Default TTL for buffers of `kind`.
    pub fn ttl_for(&self, kind: BufferKind) -> Duration {
        let secs = match kind {
            BufferKind::AiProcessing => self.ai_processing_ttl_secs,
            BufferKind::MemoryIntegration => self.memory_integration_ttl_secs,
            BufferKind::ChapterProcessing => self.chapter_processing_ttl_secs,
            BufferKind::Generic => self.generic_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn job_queue(&self) -> JobQueueConfig {
        JobQueueConfig {
            max_concurrent: self.max_concurrent,
            queue_capacity: self.queue_capacity,
            archive_capacity: self.archive_capacity,
            max_retries: self.max_retries,
        }
    }

    /// Dispatch cadence, never shorter than one millisecond.
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms.max(1))
    }

    /// Sweep cadence, never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Flush window, or `None` for write-through persistence.
    pub fn flush_debounce(&self) -> Option<Duration> {
        (self.flush_debounce_ms > 0).then(|| Duration::from_millis(self.flush_debounce_ms))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ProcessingConfig::default();
        assert_eq!(config.ttl_for(BufferKind::AiProcessing), Duration::from_secs(7_200));
        assert_eq!(
            config.ttl_for(BufferKind::MemoryIntegration),
            Duration::from_secs(14_400)
        );
        assert_eq!(
            config.ttl_for(BufferKind::ChapterProcessing),
            Duration::from_secs(86_400)
        );
        assert_eq!(config.ttl_for(BufferKind::Generic), Duration::from_secs(3_600));
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.queue_capacity, 200);
        assert_eq!(config.archive_capacity, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.dispatch_interval(), Duration::from_secs(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1_800));
        assert_eq!(config.namespace, "short-term/processing-buffer");
        assert!(!config.verify_on_read);
    }

    #[test]
    fn zero_debounce_means_write_through() {
        let mut config = ProcessingConfig::default();
        assert_eq!(config.flush_debounce(), None);
        config.flush_debounce_ms = 250;
        assert_eq!(config.flush_debounce(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = ProcessingConfig {
            dispatch_interval_ms: 0,
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.dispatch_interval(), Duration::from_millis(1));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn job_queue_config_mirrors_fields() {
        let config = ProcessingConfig {
            max_concurrent: 2,
            queue_capacity: 5,
            archive_capacity: 7,
            max_retries: 1,
            ..Default::default()
        };
        let queue = config.job_queue();
        assert_eq!(queue.max_concurrent, 2);
        assert_eq!(queue.queue_capacity, 5);
        assert_eq!(queue.archive_capacity, 7);
        assert_eq!(queue.max_retries, 1);
    }
}

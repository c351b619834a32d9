//! Point-in-time status of the processing buffer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Read-path counters shared by every typed store.
#[derive(Debug, Default)]
pub struct AccessStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    integrity_mismatches: AtomicU64,
}

impl AccessStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_integrity_mismatch(&self) {
        self.integrity_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AccessCounts {
        AccessCounts {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            integrity_mismatches: self.integrity_mismatches.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn restore(&self, counts: &AccessCounts) {
        self.hits.store(counts.hits, Ordering::Relaxed);
        self.misses.store(counts.misses, Ordering::Relaxed);
        self.expired.store(counts.expired, Ordering::Relaxed);
        self.integrity_mismatches
            .store(counts.integrity_mismatches, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCounts {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub integrity_mismatches: u64,
}

impl AccessCounts {
    pub fn reads(&self) -> u64 {
        self.hits + self.misses + self.integrity_mismatches
    }

    /// Fraction of reads served from a live buffer.
    pub fn efficiency(&self) -> f64 {
        ratio(self.hits, self.reads())
    }
}

/// Snapshot returned by `ProcessingBuffer::status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStatus {
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub suspended_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub total_buffer_size: usize,
    pub memory_usage_bytes: u64,
    #[serde(rename = "memoryUsageMB")]
    pub memory_usage_mb: f64,
    /// Average processing time of completed jobs, in milliseconds.
    pub avg_processing_time: f64,
    pub buffer_efficiency: f64,
    pub error_rate: f64,
}

/// Inputs gathered from the store and job queue.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatusInputs {
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub suspended_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub buffer_count: usize,
    pub memory_usage_bytes: u64,
    pub avg_processing_ms: f64,
    pub access: AccessCounts,
}

impl BufferStatus {
    pub(crate) fn from_inputs(inputs: StatusInputs) -> Self {
        let errors = inputs.failed_jobs + inputs.access.integrity_mismatches;
        let operations = inputs.completed_jobs + inputs.failed_jobs + inputs.access.reads();

        Self {
            active_jobs: inputs.active_jobs,
            queued_jobs: inputs.queued_jobs,
            suspended_jobs: inputs.suspended_jobs,
            completed_jobs: inputs.completed_jobs,
            failed_jobs: inputs.failed_jobs,
            total_buffer_size: inputs.buffer_count,
            memory_usage_bytes: inputs.memory_usage_bytes,
            memory_usage_mb: inputs.memory_usage_bytes as f64 / BYTES_PER_MB,
            avg_processing_time: inputs.avg_processing_ms,
            buffer_efficiency: inputs.access.efficiency(),
            error_rate: ratio(errors, operations),
        }
    }
}

impl fmt::Display for BufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "jobs[active={} queued={} suspended={} completed={} failed={}] \
             buffers[count={} memory={:.2}MB efficiency={:.1}%] \
             avg_ms={:.1} error_rate={:.1}%",
            self.active_jobs,
            self.queued_jobs,
            self.suspended_jobs,
            self.completed_jobs,
            self.failed_jobs,
            self.total_buffer_size,
            self.memory_usage_mb,
            self.buffer_efficiency * 100.0,
            self.avg_processing_time,
            self.error_rate * 100.0,
        )
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_report_zero_rates() {
        let status = BufferStatus::from_inputs(StatusInputs::default());
        assert_eq!(status.buffer_efficiency, 0.0);
        assert_eq!(status.error_rate, 0.0);
        assert_eq!(status.memory_usage_mb, 0.0);
    }

    #[test]
    fn rates_follow_counters() {
        let status = BufferStatus::from_inputs(StatusInputs {
            completed_jobs: 3,
            failed_jobs: 1,
            memory_usage_bytes: 2 * 1024 * 1024,
            access: AccessCounts {
                hits: 3,
                misses: 1,
                expired: 1,
                integrity_mismatches: 0,
            },
            ..Default::default()
        });

        assert_eq!(status.buffer_efficiency, 0.75);
        assert_eq!(status.error_rate, 1.0 / 8.0);
        assert_eq!(status.memory_usage_mb, 2.0);
    }

    #[test]
    fn status_serializes_with_external_field_names() {
        let status = BufferStatus::from_inputs(StatusInputs::default());
        let json = serde_json::to_value(&status).expect("serialize status");
        for key in [
            "activeJobs",
            "queuedJobs",
            "completedJobs",
            "failedJobs",
            "totalBufferSize",
            "memoryUsageMB",
            "avgProcessingTime",
            "bufferEfficiency",
            "errorRate",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}

//! Periodic eviction of expired buffers and archived job history.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info};

use super::clock::Clock;
use super::jobs::JobQueue;
use super::registry::BufferRegistry;

const METRIC_SWEEP_REMOVED: &str = "quillbuf_sweep_removed_total";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub ai_processing: usize,
    pub memory_integration: usize,
    pub chapter_processing: usize,
    pub generic: usize,
    pub cached_results: usize,
    pub archived_jobs: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.ai_processing
            + self.memory_integration
            + self.chapter_processing
            + self.generic
            + self.cached_results
            + self.archived_jobs
    }
}

/// Removes expired entries from every TTL-bearing collection and trims the
/// job archive. Pending, active and suspended jobs are never touched.
pub struct Sweeper {
    registry: Arc<BufferRegistry>,
    jobs: Arc<JobQueue>,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    pub fn new(registry: Arc<BufferRegistry>, jobs: Arc<JobQueue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            jobs,
            clock,
        }
    }

    pub fn sweep(&self) -> SweepReport {
        let started_at = Instant::now();
        let expired = self.registry.sweep_expired(self.clock.now());
        let archived_jobs = self.jobs.trim_archive();

        let report = SweepReport {
            ai_processing: expired.ai_processing,
            memory_integration: expired.memory_integration,
            chapter_processing: expired.chapter_processing,
            generic: expired.generic,
            cached_results: expired.cached_results,
            archived_jobs,
        };

        let removed = report.total();
        if removed > 0 {
            counter!(METRIC_SWEEP_REMOVED).increment(removed as u64);
            info!(
                removed,
                ai_processing = report.ai_processing,
                memory_integration = report.memory_integration,
                chapter_processing = report.chapter_processing,
                generic = report.generic,
                cached_results = report.cached_results,
                archived_jobs = report.archived_jobs,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Sweep removed expired entries"
            );
        } else {
            debug!("Sweep found nothing to remove");
        }

        report
    }
}

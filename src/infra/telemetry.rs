use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber for the quillbuf binary.
///
/// `RUST_LOG` directives take precedence over the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter(logging))
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))?;

    tracing::debug!(level = %logging.level, format = ?logging.format, "Telemetry initialized");
    Ok(())
}

fn filter(logging: &LoggingSettings) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy()
}

/// Register descriptions for every metric the buffer emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quillbuf_buffer_hit_total",
            Unit::Count,
            "Reads served from a live buffer or cached result."
        );
        describe_counter!(
            "quillbuf_buffer_miss_total",
            Unit::Count,
            "Reads for unknown or expired ids."
        );
        describe_counter!(
            "quillbuf_buffer_expired_total",
            Unit::Count,
            "Buffers and cached results evicted after their TTL."
        );
        describe_counter!(
            "quillbuf_buffer_integrity_mismatch_total",
            Unit::Count,
            "Payloads whose stored checksum disagreed with their content."
        );
        describe_counter!(
            "quillbuf_job_created_total",
            Unit::Count,
            "Jobs submitted to the queue."
        );
        describe_counter!(
            "quillbuf_job_dropped_total",
            Unit::Count,
            "Jobs dropped from the tail of a full queue."
        );
        describe_counter!(
            "quillbuf_job_retry_total",
            Unit::Count,
            "Failed jobs re-queued for another attempt."
        );
        describe_counter!(
            "quillbuf_job_failed_total",
            Unit::Count,
            "Jobs archived after exhausting their retries."
        );
        describe_counter!(
            "quillbuf_job_completed_total",
            Unit::Count,
            "Jobs completed successfully."
        );
        describe_gauge!(
            "quillbuf_job_queue_len",
            Unit::Count,
            "Current number of pending jobs."
        );
        describe_histogram!(
            "quillbuf_job_duration_ms",
            Unit::Milliseconds,
            "Processing time of completed jobs in milliseconds."
        );
        describe_counter!(
            "quillbuf_sweep_removed_total",
            Unit::Count,
            "Entries removed by periodic sweeps."
        );
        describe_histogram!(
            "quillbuf_snapshot_save_ms",
            Unit::Milliseconds,
            "Snapshot save latency in milliseconds."
        );
        describe_counter!(
            "quillbuf_snapshot_failure_total",
            Unit::Count,
            "Snapshot saves that failed."
        );
    });
}

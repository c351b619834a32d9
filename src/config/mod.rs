//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::buffer::ProcessingConfig;

mod cli;

pub use cli::{CliArgs, Command, DataDirArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quillbuf";
const DEFAULT_DATA_DIR: &str = "data";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub buffers: BufferSettings,
    pub jobs: JobsSettings,
    pub sweeper: SweeperSettings,
    pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub ai_processing_ttl: Duration,
    pub memory_integration_ttl: Duration,
    pub chapter_processing_ttl: Duration,
    pub generic_ttl: Duration,
    pub verify_on_read: bool,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub max_concurrent: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
    pub archive_capacity: usize,
    pub max_retries: u32,
    pub dispatch_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SweeperSettings {
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    pub namespace: String,
    pub flush_debounce: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("QUILLBUF").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Status(args)) | Some(Command::Sweep(args)) => {
            raw.apply_data_dir_override(args)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    buffers: RawBufferSettings,
    jobs: RawJobsSettings,
    sweeper: RawSweeperSettings,
    persistence: RawPersistenceSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(directory) = overrides.data_dir.as_ref() {
            self.persistence.directory = Some(directory.clone());
        }
        if let Some(max) = overrides.max_concurrent {
            self.jobs.max_concurrent = Some(max);
        }
        if let Some(capacity) = overrides.queue_capacity {
            self.jobs.queue_capacity = Some(capacity);
        }
    }

    fn apply_data_dir_override(&mut self, args: &DataDirArgs) {
        if let Some(directory) = args.data_dir.as_ref() {
            self.persistence.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            buffers,
            jobs,
            sweeper,
            persistence,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            buffers: build_buffer_settings(buffers)?,
            jobs: build_jobs_settings(jobs)?,
            sweeper: build_sweeper_settings(sweeper)?,
            persistence: build_persistence_settings(persistence)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_buffer_settings(buffers: RawBufferSettings) -> Result<BufferSettings, LoadError> {
    let defaults = ProcessingConfig::default();
    Ok(BufferSettings {
        ai_processing_ttl: positive_secs(
            buffers
                .ai_processing_ttl_secs
                .unwrap_or(defaults.ai_processing_ttl_secs),
            "buffers.ai_processing_ttl_secs",
        )?,
        memory_integration_ttl: positive_secs(
            buffers
                .memory_integration_ttl_secs
                .unwrap_or(defaults.memory_integration_ttl_secs),
            "buffers.memory_integration_ttl_secs",
        )?,
        chapter_processing_ttl: positive_secs(
            buffers
                .chapter_processing_ttl_secs
                .unwrap_or(defaults.chapter_processing_ttl_secs),
            "buffers.chapter_processing_ttl_secs",
        )?,
        generic_ttl: positive_secs(
            buffers.generic_ttl_secs.unwrap_or(defaults.generic_ttl_secs),
            "buffers.generic_ttl_secs",
        )?,
        verify_on_read: buffers.verify_on_read.unwrap_or(defaults.verify_on_read),
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let defaults = ProcessingConfig::default();
    let archive_capacity = match jobs.archive_capacity {
        Some(value) => usize::try_from(value).map_err(|_| {
            LoadError::invalid(
                "jobs.archive_capacity",
                "value exceeds supported range for usize",
            )
        })?,
        None => defaults.archive_capacity,
    };

    let dispatch_interval_ms = jobs
        .dispatch_interval_ms
        .unwrap_or(defaults.dispatch_interval_ms);
    if dispatch_interval_ms == 0 {
        return Err(LoadError::invalid(
            "jobs.dispatch_interval_ms",
            "must be greater than zero",
        ));
    }

    Ok(JobsSettings {
        max_concurrent: non_zero_usize(
            jobs.max_concurrent.unwrap_or(defaults.max_concurrent as u64),
            "jobs.max_concurrent",
        )?,
        queue_capacity: non_zero_usize(
            jobs.queue_capacity.unwrap_or(defaults.queue_capacity as u64),
            "jobs.queue_capacity",
        )?,
        archive_capacity,
        max_retries: jobs.max_retries.unwrap_or(defaults.max_retries),
        dispatch_interval: Duration::from_millis(dispatch_interval_ms),
    })
}

fn build_sweeper_settings(sweeper: RawSweeperSettings) -> Result<SweeperSettings, LoadError> {
    Ok(SweeperSettings {
        interval: positive_secs(
            sweeper
                .interval_secs
                .unwrap_or(ProcessingConfig::default().sweep_interval_secs),
            "sweeper.interval_secs",
        )?,
    })
}

fn build_persistence_settings(
    persistence: RawPersistenceSettings,
) -> Result<PersistenceSettings, LoadError> {
    let defaults = ProcessingConfig::default();
    let directory = persistence
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "persistence.directory",
            "must not be empty",
        ));
    }

    let namespace = match persistence.namespace {
        Some(value) => {
            let trimmed = value.trim().trim_matches('/');
            if trimmed.is_empty() {
                return Err(LoadError::invalid(
                    "persistence.namespace",
                    "must not be empty",
                ));
            }
            trimmed.to_string()
        }
        None => defaults.namespace,
    };

    Ok(PersistenceSettings {
        enabled: persistence.enabled.unwrap_or(defaults.persistence_enabled),
        directory,
        namespace,
        flush_debounce: Duration::from_millis(
            persistence
                .flush_debounce_ms
                .unwrap_or(defaults.flush_debounce_ms),
        ),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBufferSettings {
    ai_processing_ttl_secs: Option<u64>,
    memory_integration_ttl_secs: Option<u64>,
    chapter_processing_ttl_secs: Option<u64>,
    generic_ttl_secs: Option<u64>,
    verify_on_read: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    max_concurrent: Option<u64>,
    queue_capacity: Option<u64>,
    archive_capacity: Option<u64>,
    max_retries: Option<u32>,
    dispatch_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSweeperSettings {
    interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPersistenceSettings {
    enabled: Option<bool>,
    directory: Option<PathBuf>,
    namespace: Option<String>,
    flush_debounce_ms: Option<u64>,
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;

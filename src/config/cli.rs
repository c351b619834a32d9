use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the quillbuf binary.
#[derive(Debug, Parser)]
#[command(
    name = "quillbuf",
    version,
    about = "Ephemeral processing buffers and job queue"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUILLBUF_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the dispatcher, sweeper and flusher until interrupted.
    Serve(Box<ServeArgs>),
    /// Print the diagnostics snapshot of the persisted state as JSON.
    Status(DataDirArgs),
    /// Run one sweep over the persisted state and save the result.
    Sweep(DataDirArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DataDirArgs {
    /// Override the snapshot directory.
    #[arg(long = "data-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the snapshot directory.
    #[arg(long = "data-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    /// Override the number of jobs processed at once.
    #[arg(long = "max-concurrent", value_name = "COUNT")]
    pub max_concurrent: Option<u64>,

    /// Override the pending queue capacity.
    #[arg(long = "queue-capacity", value_name = "COUNT")]
    pub queue_capacity: Option<u64>,
}

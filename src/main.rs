use std::{process, sync::Arc};

use quillbuf::{
    buffer::{LoadReport, ProcessingBuffer, ProcessingConfig},
    config,
    infra::{error::InfraError, storage::FsDocumentStorage, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    let buffer = build_buffer(&settings)?;

    match command {
        config::Command::Serve(_) => run_serve(buffer).await,
        config::Command::Status(_) => run_status(buffer).await,
        config::Command::Sweep(_) => run_sweep(buffer).await,
    }
}

fn build_buffer(settings: &config::Settings) -> Result<ProcessingBuffer, InfraError> {
    let storage = FsDocumentStorage::new(settings.persistence.directory.clone())?;
    info!(
        target = "quillbuf::startup",
        directory = %storage.root().display(),
        namespace = %settings.persistence.namespace,
        enabled = settings.persistence.enabled,
        "Using snapshot storage"
    );
    Ok(ProcessingBuffer::new(
        ProcessingConfig::from(settings),
        Arc::new(storage),
    ))
}

async fn run_serve(buffer: ProcessingBuffer) -> Result<(), InfraError> {
    let report = buffer.initialize().await;
    log_load_report(&report);

    let signal = tokio::signal::ctrl_c().await;
    if let Err(err) = &signal {
        warn!(error = %err, "Failed to listen for shutdown signal; shutting down");
    } else {
        info!("Shutdown signal received");
    }

    buffer.shutdown().await;
    signal.map_err(InfraError::from)
}

async fn run_status(buffer: ProcessingBuffer) -> Result<(), InfraError> {
    let report = buffer.load_snapshot().await;
    log_load_report(&report);

    let status = buffer.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_sweep(buffer: ProcessingBuffer) -> Result<(), InfraError> {
    let report = buffer.load_snapshot().await;
    log_load_report(&report);

    let swept = buffer.sweep_now();
    buffer.checkpoint().await?;
    println!("{}", serde_json::to_string_pretty(&swept)?);
    Ok(())
}

fn log_load_report(report: &LoadReport) {
    info!(
        target = "quillbuf::startup",
        restored = report.buffers.restored,
        expired = report.buffers.expired,
        corrupted = report.buffers.corrupted,
        cached_results = report.cached_results,
        jobs = report.jobs,
        missing = report.missing,
        unreadable = report.unreadable,
        undecodable = report.undecodable,
        "Snapshot loaded"
    );
}

use super::*;

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.buffers.ai_processing_ttl, Duration::from_secs(7_200));
    assert_eq!(
        settings.buffers.memory_integration_ttl,
        Duration::from_secs(14_400)
    );
    assert_eq!(
        settings.buffers.chapter_processing_ttl,
        Duration::from_secs(86_400)
    );
    assert_eq!(settings.buffers.generic_ttl, Duration::from_secs(3_600));
    assert!(!settings.buffers.verify_on_read);
    assert_eq!(settings.jobs.max_concurrent.get(), 10);
    assert_eq!(settings.jobs.queue_capacity.get(), 200);
    assert_eq!(settings.jobs.archive_capacity, 100);
    assert_eq!(settings.jobs.max_retries, 3);
    assert_eq!(settings.jobs.dispatch_interval, Duration::from_secs(5));
    assert_eq!(settings.sweeper.interval, Duration::from_secs(1_800));
    assert!(settings.persistence.enabled);
    assert_eq!(settings.persistence.directory, PathBuf::from("data"));
    assert_eq!(
        settings.persistence.namespace,
        "short-term/processing-buffer"
    );
    assert_eq!(settings.persistence.flush_debounce, Duration::ZERO);
}

#[test]
fn unset_settings_resolve_to_processing_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(ProcessingConfig::from(&settings), ProcessingConfig::default());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.jobs.max_concurrent = Some(4);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        max_concurrent: Some(2),
        log_level: Some("debug".to_string()),
        data_dir: Some(PathBuf::from("/var/lib/quillbuf")),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.jobs.max_concurrent.get(), 2);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(
        settings.persistence.directory,
        PathBuf::from("/var/lib/quillbuf")
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_capacities_are_rejected() {
    let mut raw = RawSettings::default();
    raw.jobs.queue_capacity = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "jobs.queue_capacity",
            ..
        }
    ));
}

#[test]
fn zero_ttls_are_rejected() {
    let mut raw = RawSettings::default();
    raw.buffers.generic_ttl_secs = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero ttl");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "buffers.generic_ttl_secs",
            ..
        }
    ));
}

#[test]
fn invalid_log_level_is_reported() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    let err = Settings::from_raw(raw).expect_err("bad level");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn namespace_is_trimmed_of_slashes() {
    let mut raw = RawSettings::default();
    raw.persistence.namespace = Some("/tenant-a/buffers/".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.persistence.namespace, "tenant-a/buffers");

    let mut raw = RawSettings::default();
    raw.persistence.namespace = Some(" / ".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["quillbuf"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "quillbuf",
        "serve",
        "--log-level",
        "warn",
        "--log-json",
        "yes",
        "--queue-capacity",
        "50",
    ]);

    match args.command {
        Some(Command::Serve(serve)) => {
            assert_eq!(serve.overrides.log_level.as_deref(), Some("warn"));
            assert_eq!(serve.overrides.log_json, Some(true));
            assert_eq!(serve.overrides.queue_capacity, Some(50));
            assert_eq!(serve.overrides.max_concurrent, None);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_status_and_sweep_arguments() {
    let args = CliArgs::parse_from(["quillbuf", "status", "--data-dir", "/tmp/qb"]);
    match args.command {
        Some(Command::Status(status)) => {
            assert_eq!(status.data_dir, Some(PathBuf::from("/tmp/qb")));
        }
        other => panic!("unexpected command: {other:?}"),
    }

    let args = CliArgs::parse_from(["quillbuf", "sweep"]);
    match args.command {
        Some(Command::Sweep(sweep)) => assert_eq!(sweep.data_dir, None),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn data_dir_override_applies_to_maintenance_commands() {
    let mut raw = RawSettings::default();
    raw.apply_data_dir_override(&DataDirArgs {
        data_dir: Some(PathBuf::from("snapshots")),
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.persistence.directory, PathBuf::from("snapshots"));
}

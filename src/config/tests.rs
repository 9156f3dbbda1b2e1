use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.supervisor.workers = Some(2);

    let overrides = ServeOverrides {
        log_level: Some("debug".to_string()),
        workers: Some(6),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.supervisor.workers.get(), 6);
}

#[test]
fn defaults_follow_forum_conventions() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.general, GeneralSettings::default());
    assert_eq!(
        settings.supervisor.min_worker_uptime,
        Duration::from_millis(1000)
    );
    assert_eq!(settings.cache.max_concurrent_rebuilds.get(), 4);
    assert_eq!(
        settings.paths.template_settings,
        PathBuf::from("fe").join("templateSettings.json")
    );
    assert_eq!(
        settings.paths.spool_dir,
        PathBuf::from("data").join("spool")
    );
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn path_overrides_move_derived_locations() {
    let mut raw = RawSettings::default();
    raw.apply_path_overrides(&PathOverrides {
        data_dir: Some(PathBuf::from("/srv/forum")),
        fe_path: Some(PathBuf::from("/srv/fe")),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.paths.spool_dir, PathBuf::from("/srv/forum/spool"));
    assert_eq!(
        settings.paths.template_settings,
        PathBuf::from("/srv/fe/templateSettings.json")
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
fn zero_workers_is_rejected() {
    let mut raw = RawSettings::default();
    raw.supervisor.workers = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero workers must fail");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "supervisor.workers",
            ..
        }
    ));
}

#[test]
fn clearance_above_staff_range_is_rejected() {
    let mut raw = RawSettings::default();
    raw.general.clear_ip_min_role = Some(5);
    raw.general.max_staff_role = Some(3);

    let err = Settings::from_raw(raw).expect_err("clearance out of range");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "general.clear_ip_min_role",
            ..
        }
    ));
}

#[test]
fn blank_overboard_names_are_disabled() {
    let mut raw = RawSettings::default();
    raw.general.overboard = Some("  ".to_string());
    raw.general.sfw_overboard = Some("sfw".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.general.overboard, None);
    assert_eq!(settings.general.sfw_overboard.as_deref(), Some("sfw"));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["boardcache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_boot_flags() {
    let args = CliArgs::parse_from([
        "boardcache",
        "-d",
        "serve",
        "--reload",
        "--no-daemon",
        "--workers",
        "3",
        "--cache-root",
        "/tmp/cache",
    ]);

    assert!(args.debug);
    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert!(serve.reload);
            assert!(serve.no_daemon);
            assert_eq!(serve.overrides.workers, Some(3));
            assert_eq!(
                serve.overrides.paths.cache_root.as_deref(),
                Some(std::path::Path::new("/tmp/cache"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_worker_arguments() {
    let args = CliArgs::parse_from(["boardcache", "worker", "--id", "4", "--data-dir", "/d"]);

    match args.command.expect("worker command") {
        Command::Worker(worker) => {
            assert_eq!(worker.id, 4);
            assert_eq!(
                worker.paths.data_dir.as_deref(),
                Some(std::path::Path::new("/d"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn submit_requires_a_payload() {
    let result = CliArgs::try_parse_from(["boardcache", "submit"]);
    assert!(result.is_err());

    let args = CliArgs::parse_from(["boardcache", "submit", "--rebuild", r#"{"frontPage":true}"#]);
    match args.command.expect("submit command") {
        Command::Submit(submit) => {
            assert_eq!(submit.rebuild.as_deref(), Some(r#"{"frontPage":true}"#));
            assert!(submit.file.is_none());
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn path_overrides_round_trip_through_worker_arguments() {
    let overrides = PathOverrides {
        data_dir: Some("/srv/data".into()),
        spool_dir: Some("/srv/spool".into()),
        ..Default::default()
    };

    let mut argv: Vec<std::ffi::OsString> = vec!["boardcache".into(), "worker".into()];
    argv.extend(["--id".into(), "1".into()]);
    argv.extend(overrides.to_args());

    match CliArgs::parse_from(argv).command.expect("worker command") {
        Command::Worker(worker) => {
            assert_eq!(worker.paths.data_dir, overrides.data_dir);
            assert_eq!(worker.paths.spool_dir, overrides.spool_dir);
            assert!(worker.paths.fe_path.is_none());
        }
        _ => panic!("wrong command parsed"),
    }
}

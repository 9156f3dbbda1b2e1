use std::ffi::OsString;
use std::process;
use std::sync::Arc;

use boardcache::{
    application::error::AppError,
    application::rebuild::{
        ArtifactGenerator, GenericThumbSource, RebuildRequest, RegenerationQueue,
    },
    application::settings::SettingsHandle,
    cache::FsCacheStore,
    config::{self, CliArgs, Command, PathArgs, ServeArgs, Settings, SubmitArgs},
    infra::{
        error::InfraError,
        forum::FsForum,
        spool::Spool,
        telemetry,
        templates::{TemplateSettings, check_templates},
    },
    supervisor::{
        ProcessLauncher, Supervisor, SupervisorConfig,
        boot::{self, BootContext, BootOptions, BootOutcome},
    },
    worker,
};
use boardcache_wire::{RebuildMessage, SpoolEnvelope, WorkerCommand};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    let command = cli_args
        .command
        .clone()
        .unwrap_or_else(|| Command::Serve(Box::<ServeArgs>::default()));

    match command {
        Command::Serve(args) => run_serve(&cli_args, settings, *args).await,
        Command::Worker(args) => worker::run(args.id, settings).await.map_err(AppError::from),
        Command::RebuildAll(args) => run_rebuild_all(settings, args).await,
        Command::CheckTemplates(args) => run_check_templates(settings, args).await,
        Command::Submit(args) => run_submit(settings, args).await,
    }
}

fn shared_settings(settings: &Settings) -> Arc<SettingsHandle> {
    Arc::new(SettingsHandle::new(settings.general.clone()))
}

async fn run_serve(cli: &CliArgs, settings: Settings, args: ServeArgs) -> Result<(), AppError> {
    let store = Arc::new(FsCacheStore::open(&settings.cache.root).await?);
    let forum = Arc::new(FsForum::new(&settings.paths.data_dir));
    let handle = shared_settings(&settings);

    let context = BootContext {
        fe_path: settings.paths.fe_path.clone(),
        template_settings: settings.paths.template_settings.clone(),
        forum,
        store,
        settings: Arc::clone(&handle),
        max_concurrent_rebuilds: settings.cache.max_concurrent_rebuilds,
    };
    let options = BootOptions {
        debug: cli.debug,
        reload: args.reload,
        no_daemon: args.no_daemon,
    };

    let queue = match boot::boot(context, options).await? {
        BootOutcome::Ready { queue, defaults } => {
            info!(?defaults, "Boot complete");
            queue
        }
        BootOutcome::Finished { .. } | BootOutcome::Halted => return Ok(()),
    };
    spawn_reload_listener(cli.clone(), handle);

    let mut global_args: Vec<OsString> = Vec::new();
    if let Some(path) = cli.config_file.as_ref() {
        global_args.push("--config-file".into());
        global_args.push(path.clone().into_os_string());
    }
    if cli.debug {
        global_args.push("--debug".into());
    }
    let launcher = ProcessLauncher::current_exe(global_args, args.overrides.paths.to_args())
        .map_err(InfraError::from)?;

    let supervisor = Supervisor::new(
        launcher,
        queue,
        SupervisorConfig {
            workers: settings.supervisor.workers,
            min_worker_uptime: settings.supervisor.min_worker_uptime,
        },
    );
    let report = supervisor.run(shutdown_signal()).await?;

    if !report.abandoned.is_empty() {
        warn!(
            abandoned = ?report.abandoned,
            "Some workers crashed right after start and were not respawned"
        );
    }
    Ok(())
}

/// Re-read the configuration on SIGHUP; later rebuilds see the new values.
#[cfg(unix)]
fn spawn_reload_listener(cli: CliArgs, handle: Arc<SettingsHandle>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "Failed to listen for SIGHUP; settings reload disabled");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            if let Err(err) = handle.reload_from(&cli) {
                warn!(error = %err, "Settings reload failed; keeping the current settings");
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_listener(_cli: CliArgs, _handle: Arc<SettingsHandle>) {}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run_rebuild_all(settings: Settings, _args: PathArgs) -> Result<(), AppError> {
    let templates = TemplateSettings::load(&settings.paths.template_settings).await?;
    let store = Arc::new(FsCacheStore::open(&settings.cache.root).await?);
    let forum = Arc::new(FsForum::new(&settings.paths.data_dir));
    let generator = ArtifactGenerator::new(
        forum,
        store,
        shared_settings(&settings),
        GenericThumbSource::from_template(&settings.paths.fe_path, &templates.thumb),
    );
    let queue = RegenerationQueue::new(
        Arc::new(generator),
        settings.cache.max_concurrent_rebuilds,
        settings.general.verbose,
    );

    let report = queue.rebuild_everything().await?;
    for failure in &report.failures {
        error!(
            target = "boardcache::rebuild_all",
            key = ?failure.key(),
            error = %failure,
            "Rebuild failed"
        );
    }
    info!(
        target = "boardcache::rebuild_all",
        succeeded = report.succeeded,
        failed = report.failures.len(),
        written = report.outcome.written,
        deleted = report.outcome.deleted,
        "Rebuild finished"
    );

    if report.is_success() {
        Ok(())
    } else {
        Err(AppError::unexpected(format!(
            "{} of {} rebuild(s) failed",
            report.failures.len(),
            report.failures.len() + report.succeeded
        )))
    }
}

async fn run_check_templates(settings: Settings, _args: PathArgs) -> Result<(), AppError> {
    let templates = TemplateSettings::load(&settings.paths.template_settings).await?;
    let report = check_templates(&settings.paths.fe_path, &templates).await;

    for issue in &report.errors {
        error!(%issue, "Template error");
    }
    for issue in &report.warnings {
        warn!(%issue, "Template warning");
    }
    info!(
        checked = report.checked,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "Template check finished"
    );

    if report.is_clean() {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "{} template error(s) found",
            report.errors.len()
        )))
    }
}

async fn run_submit(settings: Settings, args: SubmitArgs) -> Result<(), AppError> {
    let command = match (args.file.as_ref(), args.rebuild.as_deref()) {
        (_, Some(raw)) => {
            let message = RebuildMessage::from_line(raw)
                .map_err(|err| AppError::validation(format!("invalid rebuild message: {err}")))?;
            RebuildRequest::from_message(&message)
                .map_err(|err| AppError::validation(format!("invalid rebuild message: {err}")))?;
            WorkerCommand::Rebuild { message }
        }
        (Some(path), None) => {
            let raw = tokio::fs::read(path).await.map_err(InfraError::from)?;
            serde_json::from_slice(&raw).map_err(|err| {
                AppError::validation(format!("invalid command in {}: {err}", path.display()))
            })?
        }
        (None, None) => return Err(AppError::validation("nothing to submit")),
    };

    let spool = Spool::open(&settings.paths.spool_dir).await?;
    let envelope = SpoolEnvelope::new(command);
    let path = spool.submit(&envelope).await?;
    info!(command = %envelope.id, path = %path.display(), "Command submitted");
    Ok(())
}

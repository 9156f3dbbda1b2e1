use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the boardcache binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "boardcache",
    version,
    about = "Imageboard artifact cache: supervisor, rebuild queue and workers"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BOARDCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Fail loudly: boot problems become errors and a non-zero exit.
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Check the cache, then supervise worker processes.
    Serve(Box<ServeArgs>),
    /// Worker process entry point; started by `serve`.
    #[command(hide = true)]
    Worker(WorkerArgs),
    /// Rebuild every artifact once and report failures.
    #[command(name = "rebuild-all")]
    RebuildAll(PathArgs),
    /// Validate front-end templates and exit.
    #[command(name = "check-templates")]
    CheckTemplates(PathArgs),
    /// Queue a command for the running workers.
    Submit(SubmitArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    /// Rebuild every artifact during boot.
    #[arg(short = 'r', long = "reload")]
    pub reload: bool,

    /// Run the boot checks, then exit without starting workers.
    #[arg(long = "no-daemon")]
    pub no_daemon: bool,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PathOverrides {
    /// Override the data directory read by the file-backed data provider.
    #[arg(long = "data-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    /// Override the front-end directory holding templates.
    #[arg(long = "fe-path", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub fe_path: Option<PathBuf>,

    /// Override the artifact cache root.
    #[arg(long = "cache-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_root: Option<PathBuf>,

    /// Override the spool directory workers poll for commands.
    #[arg(long = "spool-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub spool_dir: Option<PathBuf>,
}

impl PathOverrides {
    /// The same overrides as command-line arguments, for child processes.
    pub fn to_args(&self) -> Vec<OsString> {
        [
            ("--data-dir", &self.data_dir),
            ("--fe-path", &self.fe_path),
            ("--cache-root", &self.cache_root),
            ("--spool-dir", &self.spool_dir),
        ]
        .into_iter()
        .filter_map(|(flag, value)| value.as_ref().map(|path| (flag, path)))
        .flat_map(|(flag, path)| [OsString::from(flag), path.clone().into_os_string()])
        .collect()
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct PathArgs {
    #[command(flatten)]
    pub paths: PathOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub paths: PathOverrides,

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

    /// Report rebuild failures at warning level.
    #[arg(
        long = "verbose",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub verbose: Option<bool>,

    /// Override the number of worker processes.
    #[arg(long = "workers", value_name = "COUNT")]
    pub workers: Option<u32>,

    /// Override the crash-loop window in milliseconds.
    #[arg(long = "min-worker-uptime-ms", value_name = "MILLIS")]
    pub min_worker_uptime_ms: Option<u64>,

    /// Override how many rebuilds may run at once.
    #[arg(long = "max-concurrent-rebuilds", value_name = "COUNT")]
    pub max_concurrent_rebuilds: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct WorkerArgs {
    /// Identifier assigned by the supervisor.
    #[arg(long = "id", value_name = "ID")]
    pub id: u32,

    #[command(flatten)]
    pub paths: PathOverrides,
}

#[derive(Debug, Args, Clone)]
#[command(group(ArgGroup::new("payload").required(true).args(["file", "rebuild"])))]
pub struct SubmitArgs {
    /// JSON file holding a worker command.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Inline rebuild message, e.g. `{"board":"a","buildAll":true}`.
    #[arg(long = "rebuild", value_name = "JSON")]
    pub rebuild: Option<String>,

    #[command(flatten)]
    pub paths: PathOverrides,
}

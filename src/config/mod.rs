//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    thread,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{
    CliArgs, Command, PathArgs, PathOverrides, ServeArgs, ServeOverrides, SubmitArgs, WorkerArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "boardcache";
const ENV_PREFIX: &str = "BOARDCACHE";

const DEFAULT_MESSAGE_LENGTH: u32 = 4096;
const DEFAULT_MAX_FILES: u32 = 3;
const DEFAULT_MAX_FILE_SIZE_MB: u32 = 10;
const DEFAULT_CLEAR_IP_MIN_ROLE: u8 = 0;
const DEFAULT_MAX_STAFF_ROLE: u8 = 3;
const DEFAULT_TOP_BOARDS: usize = 25;
const DEFAULT_LATEST_POSTS: usize = 15;
const DEFAULT_LATEST_IMAGES: usize = 15;
const DEFAULT_PREVIEW_POSTS: usize = 5;
const DEFAULT_THREADS_PER_PAGE: u32 = 10;
const DEFAULT_MAX_PAGES: u32 = 16;
const DEFAULT_AUTO_SAGE_LIMIT: u32 = 500;
const DEFAULT_MAX_THREAD_COUNT: u32 = 50;
const DEFAULT_MAX_BOARD_TAGS: usize = 5;
const DEFAULT_ACCEPTED_MIMES: [&str; 10] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "video/webm",
    "audio/mpeg",
    "video/mp4",
    "video/ogg",
    "audio/ogg",
    "audio/webm",
];
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_FE_PATH: &str = "fe";
const TEMPLATE_SETTINGS_FILE: &str = "templateSettings.json";
const SPOOL_DIR_NAME: &str = "spool";
const DEFAULT_CACHE_ROOT: &str = "cache";
const DEFAULT_MAX_CONCURRENT_REBUILDS: u32 = 4;
const DEFAULT_MIN_WORKER_UPTIME_MS: u64 = 1000;
const DEFAULT_SPOOL_POLL_MS: u64 = 500;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub general: GeneralSettings,
    pub paths: PathSettings,
    pub cache: CacheSettings,
    pub supervisor: SupervisorSettings,
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

/// Forum-wide values consumed by builders and board administration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralSettings {
    pub message_length: u32,
    pub max_files: u32,
    pub max_file_size_mb: u32,
    pub clear_ip_min_role: u8,
    pub max_staff_role: u8,
    pub force_captcha: bool,
    pub overboard: Option<String>,
    pub sfw_overboard: Option<String>,
    pub verbose: bool,
    pub top_boards_count: usize,
    pub latest_posts_count: usize,
    pub latest_images_count: usize,
    pub preview_posts: usize,
    pub threads_per_page: NonZeroU32,
    pub max_pages: NonZeroU32,
    pub accepted_mimes: Vec<String>,
    pub auto_sage_limit: u32,
    pub max_thread_count: u32,
    pub max_board_tags: usize,
}

#[derive(Debug, Clone)]
pub struct PathSettings {
    pub data_dir: PathBuf,
    pub fe_path: PathBuf,
    pub template_settings: PathBuf,
    pub spool_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root: PathBuf,
    pub max_concurrent_rebuilds: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub workers: NonZeroUsize,
    pub min_worker_uptime: Duration,
    pub spool_poll: Duration,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Worker(args)) => raw.apply_path_overrides(&args.paths),
        Some(Command::RebuildAll(args)) | Some(Command::CheckTemplates(args)) => {
            raw.apply_path_overrides(&args.paths)
        }
        Some(Command::Submit(args)) => raw.apply_path_overrides(&args.paths),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    general: RawGeneralSettings,
    paths: RawPathSettings,
    cache: RawCacheSettings,
    supervisor: RawSupervisorSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(verbose) = overrides.verbose {
            self.general.verbose = Some(verbose);
        }
        if let Some(workers) = overrides.workers {
            self.supervisor.workers = Some(workers);
        }
        if let Some(uptime) = overrides.min_worker_uptime_ms {
            self.supervisor.min_worker_uptime_ms = Some(uptime);
        }
        if let Some(max) = overrides.max_concurrent_rebuilds {
            self.cache.max_concurrent_rebuilds = Some(max);
        }

        self.apply_path_overrides(&overrides.paths);
    }

    fn apply_path_overrides(&mut self, overrides: &PathOverrides) {
        if let Some(dir) = overrides.data_dir.as_ref() {
            self.paths.data_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.fe_path.as_ref() {
            self.paths.fe_path = Some(dir.clone());
        }
        if let Some(dir) = overrides.spool_dir.as_ref() {
            self.paths.spool_dir = Some(dir.clone());
        }
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            general,
            paths,
            cache,
            supervisor,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let general = build_general_settings(general)?;
        let paths = build_path_settings(paths)?;
        let cache = build_cache_settings(cache)?;
        let supervisor = build_supervisor_settings(supervisor)?;

        Ok(Self {
            logging,
            general,
            paths,
            cache,
            supervisor,
        })
    }
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            message_length: DEFAULT_MESSAGE_LENGTH,
            max_files: DEFAULT_MAX_FILES,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            clear_ip_min_role: DEFAULT_CLEAR_IP_MIN_ROLE,
            max_staff_role: DEFAULT_MAX_STAFF_ROLE,
            force_captcha: false,
            overboard: None,
            sfw_overboard: None,
            verbose: false,
            top_boards_count: DEFAULT_TOP_BOARDS,
            latest_posts_count: DEFAULT_LATEST_POSTS,
            latest_images_count: DEFAULT_LATEST_IMAGES,
            preview_posts: DEFAULT_PREVIEW_POSTS,
            threads_per_page: NonZeroU32::new(DEFAULT_THREADS_PER_PAGE).unwrap_or(NonZeroU32::MIN),
            max_pages: NonZeroU32::new(DEFAULT_MAX_PAGES).unwrap_or(NonZeroU32::MIN),
            accepted_mimes: DEFAULT_ACCEPTED_MIMES
                .iter()
                .map(|mime| mime.to_string())
                .collect(),
            auto_sage_limit: DEFAULT_AUTO_SAGE_LIMIT,
            max_thread_count: DEFAULT_MAX_THREAD_COUNT,
            max_board_tags: DEFAULT_MAX_BOARD_TAGS,
        }
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

fn build_general_settings(general: RawGeneralSettings) -> Result<GeneralSettings, LoadError> {
    let max_staff_role = general.max_staff_role.unwrap_or(DEFAULT_MAX_STAFF_ROLE);
    let clear_ip_min_role = general
        .clear_ip_min_role
        .unwrap_or(DEFAULT_CLEAR_IP_MIN_ROLE);
    if clear_ip_min_role > max_staff_role {
        return Err(LoadError::invalid(
            "general.clear_ip_min_role",
            format!("must not exceed max_staff_role ({max_staff_role})"),
        ));
    }

    let message_length = general.message_length.unwrap_or(DEFAULT_MESSAGE_LENGTH);
    if message_length == 0 {
        return Err(LoadError::invalid(
            "general.message_length",
            "must be greater than zero",
        ));
    }

    let overboard = non_blank(general.overboard);
    let sfw_overboard = non_blank(general.sfw_overboard);
    if overboard.is_some() && overboard == sfw_overboard {
        return Err(LoadError::invalid(
            "general.sfw_overboard",
            "must differ from general.overboard",
        ));
    }

    let accepted_mimes = match general.accepted_mimes {
        Some(mimes) => mimes
            .into_iter()
            .map(|mime| mime.trim().to_lowercase())
            .filter(|mime| !mime.is_empty())
            .collect(),
        None => DEFAULT_ACCEPTED_MIMES
            .iter()
            .map(|mime| mime.to_string())
            .collect(),
    };

    Ok(GeneralSettings {
        message_length,
        max_files: general.max_files.unwrap_or(DEFAULT_MAX_FILES),
        max_file_size_mb: general.max_file_size_mb.unwrap_or(DEFAULT_MAX_FILE_SIZE_MB),
        clear_ip_min_role,
        max_staff_role,
        force_captcha: general.force_captcha.unwrap_or(false),
        overboard,
        sfw_overboard,
        verbose: general.verbose.unwrap_or(false),
        top_boards_count: general.top_boards_count.unwrap_or(DEFAULT_TOP_BOARDS),
        latest_posts_count: general.latest_posts_count.unwrap_or(DEFAULT_LATEST_POSTS),
        latest_images_count: general
            .latest_images_count
            .unwrap_or(DEFAULT_LATEST_IMAGES),
        preview_posts: general.preview_posts.unwrap_or(DEFAULT_PREVIEW_POSTS),
        threads_per_page: non_zero_u32(
            general
                .threads_per_page
                .unwrap_or(DEFAULT_THREADS_PER_PAGE)
                .into(),
            "general.threads_per_page",
        )?,
        max_pages: non_zero_u32(
            general.max_pages.unwrap_or(DEFAULT_MAX_PAGES).into(),
            "general.max_pages",
        )?,
        accepted_mimes,
        auto_sage_limit: general.auto_sage_limit.unwrap_or(DEFAULT_AUTO_SAGE_LIMIT),
        max_thread_count: general.max_thread_count.unwrap_or(DEFAULT_MAX_THREAD_COUNT),
        max_board_tags: general.max_board_tags.unwrap_or(DEFAULT_MAX_BOARD_TAGS),
    })
}

fn build_path_settings(paths: RawPathSettings) -> Result<PathSettings, LoadError> {
    let data_dir = paths
        .data_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    if data_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid("paths.data_dir", "path must not be empty"));
    }

    let fe_path = paths
        .fe_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FE_PATH));
    if fe_path.as_os_str().is_empty() {
        return Err(LoadError::invalid("paths.fe_path", "path must not be empty"));
    }

    let template_settings = paths
        .template_settings
        .unwrap_or_else(|| fe_path.join(TEMPLATE_SETTINGS_FILE));
    let spool_dir = paths
        .spool_dir
        .unwrap_or_else(|| data_dir.join(SPOOL_DIR_NAME));

    Ok(PathSettings {
        data_dir,
        fe_path,
        template_settings,
        spool_dir,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let root = cache
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.root", "path must not be empty"));
    }

    let max = cache
        .max_concurrent_rebuilds
        .unwrap_or(DEFAULT_MAX_CONCURRENT_REBUILDS);

    Ok(CacheSettings {
        root,
        max_concurrent_rebuilds: non_zero_usize(max.into(), "cache.max_concurrent_rebuilds")?,
    })
}

fn build_supervisor_settings(
    supervisor: RawSupervisorSettings,
) -> Result<SupervisorSettings, LoadError> {
    let workers = match supervisor.workers {
        Some(count) => non_zero_usize(count.into(), "supervisor.workers")?,
        None => thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
    };

    let spool_poll_ms = supervisor.spool_poll_ms.unwrap_or(DEFAULT_SPOOL_POLL_MS);
    if spool_poll_ms == 0 {
        return Err(LoadError::invalid(
            "supervisor.spool_poll_ms",
            "must be greater than zero",
        ));
    }

    Ok(SupervisorSettings {
        workers,
        min_worker_uptime: Duration::from_millis(
            supervisor
                .min_worker_uptime_ms
                .unwrap_or(DEFAULT_MIN_WORKER_UPTIME_MS),
        ),
        spool_poll: Duration::from_millis(spool_poll_ms),
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
struct RawGeneralSettings {
    message_length: Option<u32>,
    max_files: Option<u32>,
    max_file_size_mb: Option<u32>,
    clear_ip_min_role: Option<u8>,
    max_staff_role: Option<u8>,
    force_captcha: Option<bool>,
    overboard: Option<String>,
    sfw_overboard: Option<String>,
    verbose: Option<bool>,
    top_boards_count: Option<usize>,
    latest_posts_count: Option<usize>,
    latest_images_count: Option<usize>,
    preview_posts: Option<usize>,
    threads_per_page: Option<u32>,
    max_pages: Option<u32>,
    accepted_mimes: Option<Vec<String>>,
    auto_sage_limit: Option<u32>,
    max_thread_count: Option<u32>,
    max_board_tags: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPathSettings {
    data_dir: Option<PathBuf>,
    fe_path: Option<PathBuf>,
    template_settings: Option<PathBuf>,
    spool_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    root: Option<PathBuf>,
    max_concurrent_rebuilds: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSupervisorSettings {
    workers: Option<u32>,
    min_worker_uptime_ms: Option<u64>,
    spool_poll_ms: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;

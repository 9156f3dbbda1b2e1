//! Explicit, swappable settings generation shared by builders and services.

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::cache::lock::{rw_read, rw_write};
use crate::config::{self, CliArgs, GeneralSettings, LoadError};
use crate::util::bytes::{format_file_size, megabytes};

const SOURCE: &str = "application::settings";

/// Global settings plus the values builders derive from them once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub general: GeneralSettings,
    /// `max_file_size_mb` rendered the way pages show it.
    pub display_max_size: String,
    pub version: &'static str,
}

impl BuildSettings {
    pub fn new(general: GeneralSettings) -> Self {
        let display_max_size = format_file_size(megabytes(general.max_file_size_mb.into()));
        Self {
            general,
            display_max_size,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        megabytes(self.general.max_file_size_mb.into())
    }

    /// Board URIs taken by the configured overboards.
    pub fn reserved_uris(&self) -> Vec<&str> {
        [&self.general.overboard, &self.general.sfw_overboard]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// Holder of the current settings generation.
///
/// Readers take an `Arc` snapshot; `reload` replaces the whole value so a
/// rebuild never observes a half-updated configuration.
pub struct SettingsHandle {
    current: RwLock<Arc<BuildSettings>>,
}

impl SettingsHandle {
    pub fn new(general: GeneralSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(BuildSettings::new(general))),
        }
    }

    pub fn current(&self) -> Arc<BuildSettings> {
        Arc::clone(&rw_read(&self.current, SOURCE, "current"))
    }

    pub fn reload(&self, general: GeneralSettings) {
        let next = Arc::new(BuildSettings::new(general));
        *rw_write(&self.current, SOURCE, "reload") = next;
        info!(target = "boardcache::settings", "Global settings reloaded");
    }

    /// Re-read the configuration sources `cli` names and swap in the new
    /// global settings. On error the current generation stays in place.
    pub fn reload_from(&self, cli: &CliArgs) -> Result<(), LoadError> {
        let settings = config::load(cli)?;
        self.reload(settings.general);
        Ok(())
    }
}

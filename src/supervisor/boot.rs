//! Boot sequence run by the supervisor before any worker starts.
//!
//! Order: template settings, template integrity, then either a full rebuild
//! (`--reload`) or the default-artifact check. Nothing is served until the
//! cache holds the front page, the 404 page, the login page and the generic
//! thumbnail.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::application::rebuild::{
    ArtifactGenerator, GenericThumbSource, RebuildError, RebuildRequest, RebuildTarget,
    RegenerationQueue,
};
use crate::application::repos::ForumRepository;
use crate::application::settings::SettingsHandle;
use crate::cache::{CacheError, CachePath, CacheStore};
use crate::infra::templates::{TemplateError, TemplateReport, TemplateSettings, check_templates};

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    TemplateSettings(#[from] TemplateError),
    #[error("{errors} template issue(s) found")]
    TemplateIntegrity { errors: usize },
    #[error("checking default artifacts failed: {0}")]
    Cache(#[from] CacheError),
    #[error("generating default artifacts failed: {0}")]
    Rebuild(#[from] RebuildError),
    #[error("full rebuild finished with {failed} failed key(s); first: {first}")]
    PartialRebuild { failed: usize, first: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BootOptions {
    pub debug: bool,
    pub reload: bool,
    pub no_daemon: bool,
}

/// Everything boot needs to build the regeneration queue.
pub struct BootContext {
    pub fe_path: PathBuf,
    pub template_settings: PathBuf,
    pub forum: Arc<dyn ForumRepository>,
    pub store: Arc<dyn CacheStore>,
    pub settings: Arc<SettingsHandle>,
    pub max_concurrent_rebuilds: NonZeroUsize,
}

/// How cold the cache was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultArtifacts {
    Present,
    Completed { generated: usize },
    RebuiltAll,
}

pub enum BootOutcome {
    /// Baseline cache in place; start workers on this queue.
    Ready {
        queue: RegenerationQueue,
        defaults: DefaultArtifacts,
    },
    /// `--no-daemon`: boot checks passed, exit without workers.
    Finished { defaults: DefaultArtifacts },
    /// Boot failed outside debug mode; the reason was logged.
    Halted,
}

/// Run the boot sequence. Outside debug mode a failure is logged and turned
/// into [`BootOutcome::Halted`].
pub async fn boot(context: BootContext, options: BootOptions) -> Result<BootOutcome, BootError> {
    match prepare(context, options).await {
        Ok((queue, defaults)) if options.no_daemon => {
            queue.wait_idle().await;
            info!(?defaults, "Boot checks passed; not starting workers");
            Ok(BootOutcome::Finished { defaults })
        }
        Ok((queue, defaults)) => Ok(BootOutcome::Ready { queue, defaults }),
        Err(err) if options.debug => Err(err),
        Err(err) => {
            error!(error = %err, "Boot failed; not starting workers");
            Ok(BootOutcome::Halted)
        }
    }
}

async fn prepare(
    context: BootContext,
    options: BootOptions,
) -> Result<(RegenerationQueue, DefaultArtifacts), BootError> {
    let templates = TemplateSettings::load(&context.template_settings).await?;
    let verbose = context.settings.current().general.verbose;

    let report = check_templates(&context.fe_path, &templates).await;
    log_template_report(&report, verbose);
    if !report.is_clean() {
        return Err(BootError::TemplateIntegrity {
            errors: report.errors.len(),
        });
    }

    let thumb = GenericThumbSource::from_template(&context.fe_path, &templates.thumb);
    let generator = ArtifactGenerator::new(
        context.forum,
        Arc::clone(&context.store),
        context.settings,
        thumb,
    );
    let thumb_path = generator.generic_thumb_path()?;
    let queue = RegenerationQueue::new(
        Arc::new(generator),
        context.max_concurrent_rebuilds,
        verbose,
    );

    let defaults = if options.reload {
        info!("Reload requested; rebuilding every artifact");
        rebuild_everything(&queue).await?;
        DefaultArtifacts::RebuiltAll
    } else {
        ensure_default_artifacts(context.store.as_ref(), &queue, thumb_path).await?
    };

    Ok((queue, defaults))
}

fn log_template_report(report: &TemplateReport, verbose: bool) {
    if report.errors.is_empty() && report.warnings.is_empty() {
        return;
    }
    warn!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "Issues found in templates"
    );
    if verbose {
        for issue in &report.errors {
            warn!(%issue, "Template error");
        }
        for issue in &report.warnings {
            warn!(%issue, "Template warning");
        }
    } else {
        info!("Enable general.verbose to list template issues");
    }
}

async fn rebuild_everything(queue: &RegenerationQueue) -> Result<(), BootError> {
    let report = queue.rebuild_everything().await?;
    match report.failures.first() {
        None => Ok(()),
        Some(first) => Err(BootError::PartialRebuild {
            failed: report.failures.len(),
            first: first.to_string(),
        }),
    }
}

/// Generate whichever default artifacts are missing. An empty cache gets a
/// full rebuild instead.
pub async fn ensure_default_artifacts(
    store: &dyn CacheStore,
    queue: &RegenerationQueue,
    thumb_path: CachePath,
) -> Result<DefaultArtifacts, BootError> {
    let defaults = [
        (CachePath::front_page(), RebuildTarget::FrontPage),
        (CachePath::not_found(), RebuildTarget::NotFound),
        (CachePath::login(), RebuildTarget::Login),
        (thumb_path, RebuildTarget::GenericThumb),
    ];
    let paths: Vec<CachePath> = defaults.iter().map(|(path, _)| path.clone()).collect();
    let present = store.exists(&paths).await?;

    if present.is_empty() {
        info!("No default artifacts found; rebuilding every artifact");
        rebuild_everything(queue).await?;
        return Ok(DefaultArtifacts::RebuiltAll);
    }

    let mut generated = 0;
    for (path, target) in defaults {
        if present.contains(&path) {
            continue;
        }
        info!(path = %path, "Generating missing default artifact");
        queue.rebuild_now(RebuildRequest::new(target)).await?;
        generated += 1;
    }

    Ok(if generated == 0 {
        DefaultArtifacts::Present
    } else {
        DefaultArtifacts::Completed { generated }
    })
}

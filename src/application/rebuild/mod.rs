//! Regeneration: typed requests, per-key coalescing queue and the executor
//! that turns plans into cache writes.

mod generator;
mod plan;
mod queue;
mod request;

use async_trait::async_trait;
use thiserror::Error;

use crate::application::builder::BuildError;
use crate::application::repos::RepoError;
use crate::cache::CacheError;

pub use generator::{ArtifactGenerator, GenericThumbSource};
pub use plan::{BoardWork, PlanScope, RebuildPlan};
pub use queue::{RebuildReport, RegenerationQueue};
pub use request::{RebuildKey, RebuildRequest, RebuildTarget, RequestError, TargetKind};

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("fetching data for `{key}` failed: {source}")]
    Fetch {
        key: RebuildKey,
        #[source]
        source: RepoError,
    },
    #[error("building `{key}` failed: {source}")]
    Build {
        key: RebuildKey,
        #[source]
        source: BuildError,
    },
    #[error("writing `{key}` to the cache failed: {source}")]
    Cache {
        key: RebuildKey,
        #[source]
        source: CacheError,
    },
    #[error("reading the generic thumbnail failed: {0}")]
    Thumb(#[source] std::io::Error),
    #[error("rebuild of `{key}` panicked")]
    Panicked { key: RebuildKey },
}

impl RebuildError {
    pub fn key(&self) -> Option<&RebuildKey> {
        match self {
            RebuildError::Fetch { key, .. }
            | RebuildError::Build { key, .. }
            | RebuildError::Cache { key, .. }
            | RebuildError::Panicked { key } => Some(key),
            RebuildError::Thumb(_) => None,
        }
    }
}

/// What one execution changed in the cache store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOutcome {
    pub written: usize,
    pub deleted: usize,
}

impl RebuildOutcome {
    pub fn add(&mut self, other: RebuildOutcome) {
        self.written += other.written;
        self.deleted += other.deleted;
    }
}

/// Materializes plans. The queue guarantees one call per key at a time.
#[async_trait]
pub trait RebuildExecutor: Send + Sync {
    async fn execute(&self, plan: &RebuildPlan) -> Result<RebuildOutcome, RebuildError>;

    /// Every concrete request that together rebuild the whole cache.
    async fn expand_all(&self) -> Result<Vec<RebuildRequest>, RebuildError>;
}

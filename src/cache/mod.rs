//! Artifact cache: logical paths, the store contract and its implementations.
//!
//! Stores only persist what rebuilds hand them. Scheduling lives in
//! `application::rebuild`.

mod fs;
pub(crate) mod lock;
mod memory;
mod paths;
mod store;

pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;
pub use paths::CachePath;
pub use store::{
    ArtifactKind, CacheEntry, CacheError, CacheMetadata, CacheStore, JSON_CONTENT_TYPE,
    TagPredicate,
};

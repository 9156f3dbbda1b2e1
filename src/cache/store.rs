//! Cache store contract.
//!
//! A store is a dumb, consistent sink for generated artifacts: it persists
//! whole entries, answers existence checks and deletes by metadata. It knows
//! nothing about rebuild scheduling.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::paths::CachePath;

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o failed for `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cache metadata could not be encoded: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid cache path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("cache task aborted: {0}")]
    Task(String),
}

impl CacheError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Kind of artifact an entry holds; the `type` tag of its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    FrontPage,
    Thread,
    Page,
    Catalog,
    Rules,
    Overboard,
    Multiboard,
    Log,
    NotFound,
    Login,
    GenericThumb,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::FrontPage => "frontPage",
            ArtifactKind::Thread => "thread",
            ArtifactKind::Page => "page",
            ArtifactKind::Catalog => "catalog",
            ArtifactKind::Rules => "rules",
            ArtifactKind::Overboard => "overboard",
            ArtifactKind::Multiboard => "multiboard",
            ArtifactKind::Log => "log",
            ArtifactKind::NotFound => "notFound",
            ArtifactKind::Login => "login",
            ArtifactKind::GenericThumb => "genericThumb",
        }
    }
}

/// Tags attached to an entry for later lookup. Never interpreted by stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boards: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl CacheMetadata {
    pub fn new(kind: ArtifactKind) -> Self {
        Self {
            kind,
            board_uri: None,
            thread_id: None,
            page: None,
            boards: Vec::new(),
            date: None,
        }
    }

    pub fn for_board(kind: ArtifactKind, board_uri: &str) -> Self {
        Self {
            board_uri: Some(board_uri.to_string()),
            ..Self::new(kind)
        }
    }

    pub fn tagged_with_board(&self, board_uri: &str) -> bool {
        self.board_uri.as_deref() == Some(board_uri)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: CachePath,
    pub content: Bytes,
    pub content_type: String,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn json(path: CachePath, content: Bytes, metadata: CacheMetadata) -> Self {
        Self {
            path,
            content,
            content_type: JSON_CONTENT_TYPE.to_string(),
            metadata,
        }
    }
}

/// Predicate used by [`CacheStore::delete_by_tag`].
pub type TagPredicate<'a> = dyn Fn(&CachePath, &CacheMetadata) -> bool + Send + Sync + 'a;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Replace the entry at `entry.path` as a whole.
    async fn write(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// The subset of `paths` currently present.
    async fn exists(&self, paths: &[CachePath]) -> Result<BTreeSet<CachePath>, CacheError>;

    async fn read(&self, path: &CachePath) -> Result<Option<CacheEntry>, CacheError>;

    /// Remove every entry matching `predicate`, returning the removed paths.
    async fn delete_by_tag(
        &self,
        predicate: &TagPredicate<'_>,
    ) -> Result<Vec<CachePath>, CacheError>;
}

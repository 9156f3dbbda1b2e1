//! Content builders: domain records in, immutable view snapshots out.
//!
//! Builders are pure. They take records already fetched by the caller, the
//! current [`BuildSettings`] and, for moderation views, a redaction context.
//! Output is serialized through `serde_json::Map`, whose keys are ordered, so
//! identical inputs always give identical bytes.

pub mod moderation;
pub mod projection;
pub mod public;
pub mod redaction;
mod views;

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::application::settings::BuildSettings;
use crate::cache::{CacheEntry, CacheError, CacheMetadata, CachePath, JSON_CONTENT_TYPE};
use crate::domain::entities::BoardRecord;
use crate::util::bytes::{format_file_size, megabytes};

pub use redaction::{RedactionContext, Viewer};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to serialize view: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Path(#[from] CacheError),
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// A fully-resolved artifact ready for the cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub path: CachePath,
    pub metadata: CacheMetadata,
    pub content_type: String,
    pub body: Bytes,
}

impl ViewSnapshot {
    pub fn json(path: CachePath, metadata: CacheMetadata, view: &Value) -> Result<Self, BuildError> {
        Ok(Self {
            path,
            metadata,
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: Bytes::from(serde_json::to_vec(view)?),
        })
    }

    pub fn into_entry(self) -> CacheEntry {
        CacheEntry {
            path: self.path,
            content: self.body,
            content_type: self.content_type,
            metadata: self.metadata,
        }
    }
}

/// Effective upload limits: the board may only tighten the global ones.
pub(crate) fn set_file_limits(
    target: &mut Map<String, Value>,
    board: &BoardRecord,
    settings: &BuildSettings,
) {
    let global_files = settings.general.max_files;
    let max_files = board
        .max_files
        .filter(|files| *files > 0)
        .map_or(global_files, |files| files.min(global_files));
    target.insert("maxFileCount".to_string(), Value::from(max_files));

    let max_size = match board.max_file_size_mb {
        Some(size) if size > 0 && size < settings.general.max_file_size_mb => {
            format_file_size(megabytes(size.into()))
        }
        _ => settings.display_max_size.clone(),
    };
    target.insert("maxFileSize".to_string(), Value::String(max_size));
}

pub(crate) fn insert_flag_data(target: &mut Map<String, Value>, board: &BoardRecord) {
    if board.flags.is_empty() {
        return;
    }
    let flags = board
        .flags
        .iter()
        .map(|flag| {
            let mut entry = Map::new();
            entry.insert("_id".to_string(), Value::String(flag.id.clone()));
            entry.insert("name".to_string(), Value::String(flag.name.clone()));
            Value::Object(entry)
        })
        .collect();
    target.insert("flagData".to_string(), Value::Array(flags));
}

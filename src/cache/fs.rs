//! Filesystem-backed cache store.
//!
//! Layout under the root directory:
//!
//! - `content/<logical path>` holds the artifact bytes,
//! - `meta/<logical path>.meta.json` holds a sidecar with content type and tags.
//!
//! Both files are written to a temporary file in the target directory and
//! renamed into place, so readers see either the old or the new artifact.
//! The tag index lives in memory and is rebuilt from sidecars at open.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::task;
use tracing::{debug, info, warn};

use super::paths::CachePath;
use super::store::{CacheEntry, CacheError, CacheMetadata, CacheStore, TagPredicate};

const CONTENT_DIR: &str = "content";
const META_DIR: &str = "meta";
const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    path: CachePath,
    content_type: String,
    metadata: CacheMetadata,
}

#[derive(Debug, Clone)]
struct Indexed {
    content_type: String,
    metadata: CacheMetadata,
}

pub struct FsCacheStore {
    root: PathBuf,
    index: Arc<DashMap<CachePath, Indexed>>,
}

impl FsCacheStore {
    /// Open (creating if needed) a store rooted at `root` and load its index.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        let scan_root = root.clone();
        let sidecars = task::spawn_blocking(move || scan_sidecars(&scan_root))
            .await
            .map_err(|err| CacheError::Task(err.to_string()))??;

        let index = DashMap::new();
        for sidecar in sidecars {
            index.insert(
                sidecar.path,
                Indexed {
                    content_type: sidecar.content_type,
                    metadata: sidecar.metadata,
                },
            );
        }

        info!(
            root = %root.display(),
            entries = index.len(),
            "Filesystem cache store opened"
        );

        Ok(Self {
            root,
            index: Arc::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Where the bytes of `path` live on disk.
    pub fn content_path(&self, path: &CachePath) -> PathBuf {
        resolve(&self.root.join(CONTENT_DIR), path, "")
    }

    fn meta_path(&self, path: &CachePath) -> PathBuf {
        resolve(&self.root.join(META_DIR), path, META_SUFFIX)
    }
}

fn resolve(base: &Path, path: &CachePath, suffix: &str) -> PathBuf {
    let mut resolved = base.to_path_buf();
    let mut segments = path.segments().peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            resolved.push(format!("{segment}{suffix}"));
        } else {
            resolved.push(segment);
        }
    }
    resolved
}

fn scan_sidecars(root: &Path) -> Result<Vec<Sidecar>, CacheError> {
    let meta_root = root.join(META_DIR);
    std::fs::create_dir_all(&meta_root)
        .map_err(|err| CacheError::io(meta_root.display().to_string(), err))?;
    let content_root = root.join(CONTENT_DIR);
    std::fs::create_dir_all(&content_root)
        .map_err(|err| CacheError::io(content_root.display().to_string(), err))?;

    let mut found = Vec::new();
    let mut pending = vec![meta_root];

    while let Some(dir) = pending.pop() {
        let entries =
            std::fs::read_dir(&dir).map_err(|err| CacheError::io(dir.display().to_string(), err))?;
        for entry in entries {
            let entry = entry.map_err(|err| CacheError::io(dir.display().to_string(), err))?;
            let file_path = entry.path();
            if file_path.is_dir() {
                pending.push(file_path);
                continue;
            }
            let is_sidecar = file_path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(META_SUFFIX));
            if !is_sidecar {
                continue;
            }

            match read_sidecar(&file_path) {
                Ok(sidecar) if resolve(&content_root, &sidecar.path, "").is_file() => {
                    found.push(sidecar)
                }
                Ok(sidecar) => debug!(
                    path = %sidecar.path,
                    "Skipping cache sidecar without content"
                ),
                Err(err) => warn!(
                    sidecar = %file_path.display(),
                    error = %err,
                    "Skipping unreadable cache sidecar"
                ),
            }
        }
    }

    Ok(found)
}

fn read_sidecar(path: &Path) -> Result<Sidecar, CacheError> {
    let raw = std::fs::read(path).map_err(|err| CacheError::io(path.display().to_string(), err))?;
    Ok(serde_json::from_slice(&raw)?)
}

fn persist_atomically(target: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let describe = || target.display().to_string();
    let parent = target
        .parent()
        .ok_or_else(|| CacheError::io(describe(), io::Error::other("target has no parent")))?;
    std::fs::create_dir_all(parent).map_err(|err| CacheError::io(describe(), err))?;

    let mut staged = NamedTempFile::new_in(parent).map_err(|err| CacheError::io(describe(), err))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|err| CacheError::io(describe(), err))?;
    staged
        .persist(target)
        .map_err(|err| CacheError::io(describe(), err.error))?;
    Ok(())
}

fn remove_if_present(target: &Path) -> Result<(), CacheError> {
    match std::fs::remove_file(target) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CacheError::io(target.display().to_string(), err)),
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn write(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let CacheEntry {
            path,
            content,
            content_type,
            metadata,
        } = entry;

        let sidecar = Sidecar {
            path: path.clone(),
            content_type: content_type.clone(),
            metadata: metadata.clone(),
        };
        let sidecar_bytes = serde_json::to_vec(&sidecar)?;
        let content_target = self.content_path(&path);
        let meta_target = self.meta_path(&path);

        task::spawn_blocking(move || {
            persist_atomically(&content_target, &content)?;
            persist_atomically(&meta_target, &sidecar_bytes)
        })
        .await
        .map_err(|err| CacheError::Task(err.to_string()))??;

        self.index.insert(
            path,
            Indexed {
                content_type,
                metadata,
            },
        );
        Ok(())
    }

    async fn exists(&self, paths: &[CachePath]) -> Result<BTreeSet<CachePath>, CacheError> {
        Ok(paths
            .iter()
            .filter(|path| self.index.contains_key(*path))
            .cloned()
            .collect())
    }

    async fn read(&self, path: &CachePath) -> Result<Option<CacheEntry>, CacheError> {
        let Some(indexed) = self.index.get(path).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };

        let target = self.content_path(path);
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(CacheEntry {
                path: path.clone(),
                content: Bytes::from(bytes),
                content_type: indexed.content_type,
                metadata: indexed.metadata,
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::io(target.display().to_string(), err)),
        }
    }

    async fn delete_by_tag(
        &self,
        predicate: &TagPredicate<'_>,
    ) -> Result<Vec<CachePath>, CacheError> {
        let doomed: Vec<CachePath> = self
            .index
            .iter()
            .filter(|entry| predicate(entry.key(), &entry.value().metadata))
            .map(|entry| entry.key().clone())
            .collect();

        if doomed.is_empty() {
            return Ok(doomed);
        }

        let targets: Vec<(PathBuf, PathBuf)> = doomed
            .iter()
            .map(|path| (self.content_path(path), self.meta_path(path)))
            .collect();

        task::spawn_blocking(move || {
            for (content, meta) in &targets {
                remove_if_present(content)?;
                remove_if_present(meta)?;
            }
            Ok::<(), CacheError>(())
        })
        .await
        .map_err(|err| CacheError::Task(err.to_string()))??;

        for path in &doomed {
            self.index.remove(path);
        }
        Ok(doomed)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::cache::store::ArtifactKind;

    fn entry(path: &str, body: &str, metadata: CacheMetadata) -> CacheEntry {
        CacheEntry::json(
            CachePath::new(path).expect("valid path"),
            Bytes::from(body.to_string()),
            metadata,
        )
    }

    #[tokio::test]
    async fn write_replaces_content_and_survives_reopen() {
        let dir = TempDir::new().expect("temp dir");
        let store = FsCacheStore::open(dir.path()).await.expect("open");

        let metadata = CacheMetadata::for_board(ArtifactKind::Catalog, "a");
        store
            .write(entry("/a/catalog.json", "[1]", metadata.clone()))
            .await
            .expect("first write");
        store
            .write(entry("/a/catalog.json", "[2]", metadata.clone()))
            .await
            .expect("second write");

        let path = CachePath::catalog("a").expect("valid path");
        assert_eq!(
            std::fs::read_to_string(store.content_path(&path)).expect("content on disk"),
            "[2]"
        );

        drop(store);
        let reopened = FsCacheStore::open(dir.path()).await.expect("reopen");
        let read = reopened
            .read(&path)
            .await
            .expect("read")
            .expect("entry present");
        assert_eq!(read.content, Bytes::from_static(b"[2]"));
        assert_eq!(read.metadata, metadata);
        assert_eq!(read.content_type, "application/json");
    }

    #[tokio::test]
    async fn delete_by_tag_removes_only_matching_entries() {
        let dir = TempDir::new().expect("temp dir");
        let store = FsCacheStore::open(dir.path()).await.expect("open");

        store
            .write(entry(
                "/a/1.json",
                "{}",
                CacheMetadata::for_board(ArtifactKind::Page, "a"),
            ))
            .await
            .expect("write a");
        store
            .write(entry(
                "/b/1.json",
                "{}",
                CacheMetadata::for_board(ArtifactKind::Page, "b"),
            ))
            .await
            .expect("write b");

        let removed = store
            .delete_by_tag(&|_, metadata| metadata.tagged_with_board("a"))
            .await
            .expect("delete");
        assert_eq!(removed, vec![CachePath::board_page("a", 1).expect("valid")]);

        let present = store
            .exists(&[
                CachePath::board_page("a", 1).expect("valid"),
                CachePath::board_page("b", 1).expect("valid"),
            ])
            .await
            .expect("exists");
        assert_eq!(present.len(), 1);
        assert!(!dir.path().join("content/a/1.json").exists());
    }
}

//! Spool directory shared by tooling and workers.
//!
//! Commands are dropped in as `<id>.json` through a hidden temporary name
//! and a rename, so a worker never sees a half-written file. Workers claim a
//! command by renaming it into `claimed/`; the rename succeeds for exactly
//! one of them.

use std::io;
use std::path::{Path, PathBuf};

use boardcache_wire::SpoolEnvelope;
use metrics::counter;
use tracing::{debug, warn};

use super::error::InfraError;

const CLAIMED_DIR: &str = "claimed";
const FAILED_DIR: &str = "failed";
const METRIC_SPOOL_CLAIMED: &str = "boardcache_spool_claimed_total";

/// A command this worker now exclusively owns.
#[derive(Debug)]
pub struct ClaimedCommand {
    pub envelope: SpoolEnvelope,
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, InfraError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join(CLAIMED_DIR)).await?;
        tokio::fs::create_dir_all(dir.join(FAILED_DIR)).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop `envelope` into the spool.
    pub async fn submit(&self, envelope: &SpoolEnvelope) -> Result<PathBuf, InfraError> {
        let bytes = serde_json::to_vec(envelope)
            .map_err(|err| InfraError::spool(format!("encoding command: {err}")))?;
        let name = envelope.file_name();
        let staged = self.dir.join(format!(".{name}.tmp"));
        let target = self.dir.join(&name);

        tokio::fs::write(&staged, &bytes).await?;
        tokio::fs::rename(&staged, &target).await?;
        debug!(command = %envelope.id, "Command spooled");
        Ok(target)
    }

    /// Claim the oldest-named pending command, if any.
    pub async fn claim(&self, worker_id: u32) -> Result<Option<ClaimedCommand>, InfraError> {
        for candidate in self.pending().await? {
            let Some(name) = candidate.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let claimed = self.dir.join(CLAIMED_DIR).join(format!("{name}.{worker_id}"));

            match tokio::fs::rename(&candidate, &claimed).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }

            let raw = tokio::fs::read(&claimed).await?;
            match serde_json::from_slice::<SpoolEnvelope>(&raw) {
                Ok(envelope) => {
                    counter!(METRIC_SPOOL_CLAIMED).increment(1);
                    return Ok(Some(ClaimedCommand {
                        envelope,
                        path: claimed,
                    }));
                }
                Err(err) => {
                    warn!(file = name, error = %err, "Discarding malformed spool command");
                    self.quarantine(&claimed, name).await?;
                }
            }
        }
        Ok(None)
    }

    /// Remove a command that has been handled.
    pub async fn complete(&self, command: ClaimedCommand) -> Result<(), InfraError> {
        match tokio::fs::remove_file(&command.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Park a command whose handling failed so it is not retried forever.
    pub async fn fail(&self, command: ClaimedCommand) -> Result<(), InfraError> {
        let name = command.envelope.file_name();
        self.quarantine(&command.path, &name).await
    }

    async fn quarantine(&self, path: &Path, name: &str) -> Result<(), InfraError> {
        tokio::fs::rename(path, self.dir.join(FAILED_DIR).join(name)).await?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PathBuf>, InfraError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut pending = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let visible = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.') && name.ends_with(".json"));
            if visible && entry.file_type().await?.is_file() {
                pending.push(path);
            }
        }
        pending.sort();
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use boardcache_wire::{RebuildMessage, WorkerCommand};
    use tempfile::TempDir;

    use super::*;

    fn rebuild_envelope(uri: &str) -> SpoolEnvelope {
        SpoolEnvelope::new(WorkerCommand::Rebuild {
            message: RebuildMessage::board(uri),
        })
    }

    #[tokio::test]
    async fn each_command_is_claimed_once() {
        let dir = TempDir::new().expect("tempdir");
        let spool = Spool::open(dir.path()).await.expect("open");
        let envelope = rebuild_envelope("a");
        spool.submit(&envelope).await.expect("submit");

        let first = spool.claim(1).await.expect("claim");
        let second = spool.claim(2).await.expect("claim");
        let first = first.expect("first worker gets the command");
        assert_eq!(first.envelope, envelope);
        assert!(second.is_none());

        spool.complete(first).await.expect("complete");
        assert!(spool.claim(1).await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_command() {
        let dir = TempDir::new().expect("tempdir");
        let spool = Spool::open(dir.path()).await.expect("open");
        for uri in ["a", "b", "c", "d"] {
            spool.submit(&rebuild_envelope(uri)).await.expect("submit");
        }

        let mut handles = Vec::new();
        for worker in 0..4u32 {
            let spool = spool.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(command) = spool.claim(worker).await.expect("claim") {
                    ids.push(command.envelope.id);
                    spool.complete(command).await.expect("complete");
                }
                ids
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            claimed.extend(handle.await.expect("join"));
        }
        claimed.sort();
        let before = claimed.len();
        claimed.dedup();
        assert_eq!(before, 4);
        assert_eq!(claimed.len(), 4);
    }

    #[tokio::test]
    async fn malformed_commands_are_quarantined() {
        let dir = TempDir::new().expect("tempdir");
        let spool = Spool::open(dir.path()).await.expect("open");
        std::fs::write(dir.path().join("broken.json"), b"{not json").expect("write");

        assert!(spool.claim(1).await.expect("claim").is_none());
        assert!(dir.path().join(FAILED_DIR).join("broken.json").exists());
    }
}

//! Worker process runtime.
//!
//! A worker applies spooled commands against the data directory and reports
//! the rebuilds they imply to the supervisor as JSON lines on stdout.

use std::io::Write;
use std::sync::{Arc, Mutex};

use boardcache_wire::{RebuildMessage, WorkerCommand};
use tracing::{debug, info, instrument, warn};

use crate::application::boards::{BoardAdminError, BoardAdminService};
use crate::application::notifier::RebuildNotifier;
use crate::application::settings::SettingsHandle;
use crate::cache::lock::mutex_lock;
use crate::config::Settings;
use crate::infra::error::InfraError;
use crate::infra::forum::FsForum;
use crate::infra::spool::Spool;

const SOURCE: &str = "worker";

/// Writes each request as one JSON line.
pub struct LineNotifier<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> LineNotifier<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl LineNotifier<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> RebuildNotifier for LineNotifier<W> {
    fn request_rebuild(&self, message: RebuildMessage) {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Rebuild request could not be encoded");
                return;
            }
        };
        let mut out = mutex_lock(&self.out, SOURCE, "request_rebuild");
        if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!(error = %err, "Rebuild request could not be sent to the supervisor");
        }
    }
}

/// Apply one command. Rebuild commands are forwarded untouched.
pub async fn apply_command(
    admin: &BoardAdminService,
    notifier: &dyn RebuildNotifier,
    command: WorkerCommand,
) -> Result<(), BoardAdminError> {
    match command {
        WorkerCommand::SetBoardSettings { actor, input } => {
            admin.set_settings(&actor, input).await.map(|_| ())
        }
        WorkerCommand::CreateBoard { actor, input } => {
            admin.create_board(&actor, input).await.map(|_| ())
        }
        WorkerCommand::TransferBoard { actor, input } => {
            admin.transfer(&actor, input).await.map(|_| ())
        }
        WorkerCommand::Rebuild { message } => {
            notifier.request_rebuild(message);
            Ok(())
        }
    }
}

/// Claim and apply every pending command. Returns how many were handled.
pub async fn drain_spool(
    worker_id: u32,
    spool: &Spool,
    admin: &BoardAdminService,
    notifier: &dyn RebuildNotifier,
) -> Result<usize, InfraError> {
    let mut handled = 0;
    while let Some(claimed) = spool.claim(worker_id).await? {
        let id = claimed.envelope.id;
        match apply_command(admin, notifier, claimed.envelope.command.clone()).await {
            Ok(()) => {
                debug!(worker = worker_id, command = %id, "Command applied");
                spool.complete(claimed).await?;
            }
            Err(err) => {
                warn!(worker = worker_id, command = %id, error = %err, "Command failed");
                spool.fail(claimed).await?;
            }
        }
        handled += 1;
    }
    Ok(handled)
}

/// Worker entry point: poll the spool until interrupted.
#[instrument(skip(settings))]
pub async fn run(worker_id: u32, settings: Settings) -> Result<(), InfraError> {
    let forum = Arc::new(FsForum::new(&settings.paths.data_dir));
    let notifier: Arc<dyn RebuildNotifier> = Arc::new(LineNotifier::stdout());
    let admin = BoardAdminService::new(
        forum.clone(),
        forum,
        Arc::clone(&notifier),
        Arc::new(SettingsHandle::new(settings.general.clone())),
    );
    let spool = Spool::open(&settings.paths.spool_dir).await?;

    info!(
        spool = %spool.dir().display(),
        poll_ms = settings.supervisor.spool_poll.as_millis() as u64,
        "Worker ready"
    );

    let mut ticker = tokio::time::interval(settings.supervisor.spool_poll);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupted; worker stopping");
                return Ok(());
            }
            _ = ticker.tick() => {
                drain_spool(worker_id, &spool, &admin, notifier.as_ref()).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use boardcache_wire::{Actor, CreateBoardInput, SpoolEnvelope};
    use tempfile::TempDir;

    use super::*;
    use crate::application::repos::{BoardWriteRepository, ForumRepository};
    use crate::config::GeneralSettings;
    use crate::domain::entities::UserRecord;

    #[test]
    fn line_notifier_writes_one_json_object_per_line() {
        let notifier = LineNotifier::new(Vec::new());
        notifier.request_rebuild(RebuildMessage::board_all("a"));
        notifier.request_rebuild(RebuildMessage::front_page());

        let written = String::from_utf8(notifier.into_inner()).expect("utf8");
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            RebuildMessage::from_line(lines[0]).expect("decode"),
            RebuildMessage::board_all("a")
        );
    }

    #[tokio::test]
    async fn spooled_board_creation_requests_a_full_board_rebuild() {
        let data = TempDir::new().expect("data dir");
        let spool_dir = TempDir::new().expect("spool dir");
        let forum = Arc::new(FsForum::new(data.path()));
        forum
            .save_user(UserRecord::new("owner"))
            .await
            .expect("seed user");

        let notifier = Arc::new(LineNotifier::new(Vec::new()));
        let admin = BoardAdminService::new(
            forum.clone(),
            forum.clone(),
            notifier.clone(),
            Arc::new(SettingsHandle::new(GeneralSettings::default())),
        );
        let spool = Spool::open(spool_dir.path()).await.expect("spool");
        spool
            .submit(&SpoolEnvelope::new(WorkerCommand::CreateBoard {
                actor: Actor {
                    login: "owner".to_string(),
                },
                input: CreateBoardInput {
                    board_uri: "tech".to_string(),
                    board_name: "Technology".to_string(),
                    board_description: "Computers".to_string(),
                },
            }))
            .await
            .expect("submit");

        let handled = drain_spool(1, &spool, &admin, notifier.as_ref())
            .await
            .expect("drain");
        assert_eq!(handled, 1);
        assert!(forum.find_board("tech").await.expect("find").is_some());

        drop(admin);
        let notifier = Arc::try_unwrap(notifier).ok().expect("sole owner");
        let written = String::from_utf8(notifier.into_inner()).expect("utf8");
        assert_eq!(
            RebuildMessage::from_line(written.trim()).expect("decode"),
            RebuildMessage::board_all("tech")
        );
    }
}

//! Launches workers as child processes of the current executable.
//!
//! A worker writes one JSON rebuild message per line on stdout. Anything it
//! logs goes to stderr, which the child inherits.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use boardcache_wire::RebuildMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{SupervisorError, WorkerEvent, WorkerHandle, WorkerLauncher};

#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    global_args: Vec<OsString>,
    worker_args: Vec<OsString>,
}

impl ProcessLauncher {
    /// Children run `program <global_args> worker --id N <worker_args>`.
    pub fn new(
        program: impl Into<PathBuf>,
        global_args: Vec<OsString>,
        worker_args: Vec<OsString>,
    ) -> Self {
        Self {
            program: program.into(),
            global_args,
            worker_args,
        }
    }

    /// Launch copies of the running binary.
    pub fn current_exe(
        global_args: Vec<OsString>,
        worker_args: Vec<OsString>,
    ) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, global_args, worker_args))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        worker: u32,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<WorkerHandle, SupervisorError> {
        let mut child = Command::new(&self.program)
            .args(&self.global_args)
            .arg("worker")
            .arg("--id")
            .arg(worker.to_string())
            .args(&self.worker_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Launch { worker, source })?;

        let stdout = child.stdout.take().ok_or_else(|| SupervisorError::Launch {
            worker,
            source: std::io::Error::other("worker stdout was not captured"),
        })?;
        debug!(worker, pid = child.id(), "Worker process spawned");

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        if let Err(err) = child.kill().await {
                            warn!(worker, error = %err, "Failed to stop worker process");
                        }
                        return;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) if line.trim().is_empty() => {}
                        Ok(Some(line)) => match RebuildMessage::from_line(&line) {
                            Ok(message) => {
                                let _ = events.send(WorkerEvent::Message { worker, message });
                            }
                            Err(err) => {
                                warn!(worker, error = %err, "Ignoring malformed worker message");
                            }
                        },
                        Ok(None) => break,
                        Err(err) => {
                            warn!(worker, error = %err, "Worker output unreadable");
                            break;
                        }
                    }
                }
            }

            let status = tokio::select! {
                _ = &mut stop_rx => None,
                status = child.wait() => Some(status),
            };
            let Some(status) = status else {
                let _ = child.kill().await;
                return;
            };
            let code = status.ok().and_then(|status| status.code());
            let _ = events.send(WorkerEvent::Exited { worker, code });
        });

        Ok(WorkerHandle::new(stop_tx, task))
    }
}

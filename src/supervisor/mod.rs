//! Process supervisor: keeps a fixed pool of workers alive and relays their
//! rebuild requests into the regeneration queue.

pub mod boot;
mod process;

pub use process::ProcessLauncher;

use std::collections::BTreeMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use boardcache_wire::RebuildMessage;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::application::rebuild::RegenerationQueue;

const METRIC_WORKER_RESTARTS: &str = "boardcache_worker_restarts_total";

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch worker {worker}: {source}")]
    Launch {
        worker: u32,
        #[source]
        source: std::io::Error,
    },
}

/// What a worker reports to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Message { worker: u32, message: RebuildMessage },
    Exited { worker: u32, code: Option<i32> },
}

/// A running worker. Dropping it or calling [`WorkerHandle::shutdown`] stops
/// the worker without reporting an exit.
pub struct WorkerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(stop: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            stop: Some(stop),
            task,
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

/// Starts workers. Every event a worker produces goes to `events`, and each
/// worker sends exactly one `Exited` unless it is shut down first.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(
        &self,
        worker: u32,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<WorkerHandle, SupervisorError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub workers: NonZeroUsize,
    pub min_worker_uptime: Duration,
}

/// Counters gathered over a supervisor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub launched: u64,
    pub restarts: u64,
    pub relayed: u64,
    /// Workers that exited inside the crash-loop window and were not respawned.
    pub abandoned: Vec<u32>,
}

struct Slot {
    started: Instant,
    handle: WorkerHandle,
}

pub struct Supervisor<L> {
    launcher: L,
    queue: RegenerationQueue,
    config: SupervisorConfig,
}

impl<L: WorkerLauncher> Supervisor<L> {
    pub fn new(launcher: L, queue: RegenerationQueue, config: SupervisorConfig) -> Self {
        Self {
            launcher,
            queue,
            config,
        }
    }

    /// Run until `shutdown` resolves or no worker is left, then stop every
    /// worker and let in-flight rebuilds finish.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<SupervisorReport, SupervisorError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut slots: BTreeMap<u32, Slot> = BTreeMap::new();
        let mut report = SupervisorReport::default();

        let count = u32::try_from(self.config.workers.get()).unwrap_or(u32::MAX);
        for worker in 0..count {
            let slot = self.spawn(worker, &events_tx).await?;
            slots.insert(worker, slot);
            report.launched += 1;
        }
        info!(
            workers = count,
            min_uptime_ms = self.config.min_worker_uptime.as_millis() as u64,
            "Workers started"
        );

        tokio::pin!(shutdown);
        loop {
            let event = tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested; stopping workers");
                    break;
                }
                event = events_rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                WorkerEvent::Message { worker, message } => {
                    report.relayed += 1;
                    tracing::trace!(worker, "Relaying rebuild request");
                    self.queue.enqueue_message(&message);
                }
                WorkerEvent::Exited { worker, code } => {
                    let Some(slot) = slots.remove(&worker) else {
                        continue;
                    };
                    let uptime = slot.started.elapsed();

                    if uptime < self.config.min_worker_uptime {
                        warn!(
                            worker,
                            code,
                            uptime_ms = uptime.as_millis() as u64,
                            "Worker exited right after start; not respawning"
                        );
                        report.abandoned.push(worker);
                    } else {
                        info!(
                            worker,
                            code,
                            uptime_ms = uptime.as_millis() as u64,
                            "Worker exited; respawning"
                        );
                        match self.spawn(worker, &events_tx).await {
                            Ok(slot) => {
                                slots.insert(worker, slot);
                                report.launched += 1;
                                report.restarts += 1;
                                counter!(METRIC_WORKER_RESTARTS).increment(1);
                            }
                            Err(err) => {
                                error!(worker, error = %err, "Worker could not be respawned");
                                report.abandoned.push(worker);
                            }
                        }
                    }

                    if slots.is_empty() {
                        warn!("No workers left; supervisor stopping");
                        break;
                    }
                }
            }
        }

        for (_, slot) in std::mem::take(&mut slots) {
            slot.handle.shutdown().await;
        }
        drop(events_tx);
        while let Ok(event) = events_rx.try_recv() {
            if let WorkerEvent::Message { message, .. } = event {
                report.relayed += 1;
                self.queue.enqueue_message(&message);
            }
        }
        self.queue.wait_idle().await;

        info!(
            launched = report.launched,
            restarts = report.restarts,
            relayed = report.relayed,
            abandoned = report.abandoned.len(),
            "Supervisor stopped"
        );
        Ok(report)
    }

    async fn spawn(
        &self,
        worker: u32,
        events: &mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Slot, SupervisorError> {
        let started = Instant::now();
        let handle = self.launcher.launch(worker, events.clone()).await?;
        Ok(Slot { started, handle })
    }
}

//! Stage position poller.
//!
//! A single background task samples every stage once per cycle and forwards each position to
//! the presentation sink. Each read happens under the lock of that stage's own category, held
//! only for the read itself. A failed read is logged and skipped; the other stages in the cycle
//! and later cycles are unaffected.
//!
//! The poller runs until its handle is shut down or the sink goes away.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppResult, ConsoleError};
use crate::hardware::capabilities::Stage;
use crate::hardware::DeviceKind;
use crate::live::events::{ConsoleEvent, EventSender};
use crate::locks::LockRegistry;

/// Outcome of one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Positions forwarded to the sink
    pub sampled: usize,
    /// Reads that failed and were skipped
    pub failed: usize,
}

/// Periodic sampler of every stage.
pub struct StagePoller {
    stages: Vec<(String, DeviceKind, Arc<dyn Stage>)>,
    interval: Duration,
    locks: LockRegistry,
    events: EventSender,
}

impl StagePoller {
    /// Poll `stages` every `interval`. Each entry names the category lock guarding the stage.
    pub fn new(
        stages: Vec<(String, DeviceKind, Arc<dyn Stage>)>,
        interval: Duration,
        locks: LockRegistry,
        events: EventSender,
    ) -> Self {
        Self {
            stages,
            interval,
            locks,
            events,
        }
    }

    /// Sample every stage once.
    ///
    /// Returns `Err(ChannelClosed)` only when the sink is gone; hardware failures are counted in
    /// the summary.
    pub async fn poll_once(&self) -> AppResult<PollSummary> {
        let mut summary = PollSummary::default();
        for (name, kind, stage) in &self.stages {
            let reading = {
                let _guard = self.locks.acquire(*kind).await;
                stage.position().await
            };
            match reading {
                Ok(position) => {
                    self.events
                        .emit(ConsoleEvent::StagePosition {
                            stage: name.clone(),
                            position,
                        })
                        .await?;
                    summary.sampled += 1;
                }
                Err(source) => {
                    let error = ConsoleError::hardware(name, "position", source);
                    warn!(stage = %name, category = %kind, error = %error, "stage read failed, skipping");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Start the polling loop on its own task.
    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        PollerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    #[tracing::instrument(skip_all, fields(stages = self.stages.len()))]
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        info!(interval_ms = self.interval.as_millis() as u64, "stage poller started");
        let mut cycles = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = self.poll_once() => match result {
                    Ok(summary) => {
                        cycles += 1;
                        if summary.failed > 0 {
                            debug!(cycle = cycles, failed = summary.failed, "cycle finished with failures");
                        }
                    }
                    Err(_) => {
                        info!("presentation sink closed, stopping stage poller");
                        return;
                    }
                },
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!(cycles, "stage poller stopped");
    }
}

/// Handle to a running poller.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Whether the poller task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the poller and wait for it to exit.
    pub async fn shutdown(mut self) -> AppResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await?;
        Ok(())
    }
}

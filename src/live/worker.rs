//! Frame worker: grabs frames from one camera and forwards them to the presentation sink.
//!
//! One iteration is
//!
//! ```text
//! cancelled? ─► acquire(camera) ─► cancelled? ─► grab_frame ─► release ─► emit (awaits capacity)
//! ```
//!
//! The camera lock is released before the emission, so a slow sink backs up this worker but
//! never stalls a property edit on another camera. Cancellation is observed at the top of
//! every iteration, right after the lock is acquired, and while an emission is waiting for
//! capacity. A frame whose emission was interrupted by cancellation is dropped.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ConsoleError;
use crate::hardware::capabilities::Camera;
use crate::hardware::{DeviceKind, FrameCount};
use crate::live::events::{ConsoleEvent, EventSender};
use crate::locks::LockRegistry;

/// How a worker loop ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The requested number of frames was emitted
    Completed,
    /// Cancellation was observed before the count was reached
    Cancelled,
    /// A grab or an emission failed
    Failed(ConsoleError),
}

/// Result of one worker run.
#[derive(Debug)]
pub struct WorkerExit {
    /// Frames delivered to the sink
    pub emitted: u64,
    /// Why the loop ended
    pub outcome: WorkerOutcome,
}

/// Grab loop for one camera.
pub struct FrameWorker {
    camera_name: String,
    camera: Arc<dyn Camera>,
    frames: FrameCount,
    locks: LockRegistry,
    events: EventSender,
}

impl FrameWorker {
    /// Create a worker that stops after `frames` emissions.
    pub fn new(
        camera_name: impl Into<String>,
        camera: Arc<dyn Camera>,
        frames: FrameCount,
        locks: LockRegistry,
        events: EventSender,
    ) -> Self {
        Self {
            camera_name: camera_name.into(),
            camera,
            frames,
            locks,
            events,
        }
    }

    /// Run the loop on its own task. Setting `cancel` to `true` ends it.
    pub fn spawn(self, cancel: watch::Receiver<bool>) -> JoinHandle<WorkerExit> {
        tokio::spawn(self.run(cancel))
    }

    /// Run the loop on the current task.
    #[tracing::instrument(skip_all, fields(camera = %self.camera_name, frames = %self.frames))]
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> WorkerExit {
        let mut emitted = 0u64;
        loop {
            if self.frames.is_reached(emitted) {
                debug!(emitted, "frame count reached");
                return WorkerExit {
                    emitted,
                    outcome: WorkerOutcome::Completed,
                };
            }
            if *cancel.borrow() {
                return self.cancelled(emitted);
            }

            let grabbed = {
                let _guard = self.locks.acquire(DeviceKind::Camera).await;
                if *cancel.borrow() {
                    return self.cancelled(emitted);
                }
                self.camera.grab_frame().await
            };

            let frame = match grabbed {
                Ok(frame) => frame,
                Err(source) => {
                    let error = ConsoleError::hardware(&self.camera_name, "grab_frame", source);
                    warn!(emitted, error = %error, "frame grab failed");
                    return WorkerExit {
                        emitted,
                        outcome: WorkerOutcome::Failed(error),
                    };
                }
            };

            let event = ConsoleEvent::Frame {
                camera: self.camera_name.clone(),
                image: Arc::new(frame),
            };
            tokio::select! {
                biased;
                _ = cancel.wait_for(|cancelled| *cancelled) => {
                    debug!(emitted, "cancelled while waiting for sink capacity, frame dropped");
                    return self.cancelled(emitted);
                }
                sent = self.events.emit(event) => match sent {
                    Ok(()) => emitted += 1,
                    Err(error) => {
                        warn!(emitted, "presentation sink closed");
                        return WorkerExit {
                            emitted,
                            outcome: WorkerOutcome::Failed(error),
                        };
                    }
                },
            }
        }
    }

    fn cancelled(&self, emitted: u64) -> WorkerExit {
        debug!(emitted, "cancellation observed");
        WorkerExit {
            emitted,
            outcome: WorkerOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCamera;
    use crate::live::events::event_channel;
    use std::time::Duration;

    async fn started_camera(locks: &LockRegistry) -> Arc<MockCamera> {
        let camera = Arc::new(MockCamera::new(4, 4).with_lock_watch(locks.clone()));
        let _guard = locks.acquire(DeviceKind::Camera).await;
        camera.start(FrameCount::Unbounded).await.unwrap();
        camera
    }

    #[tokio::test]
    async fn finite_worker_emits_exactly_the_requested_frames() {
        let locks = LockRegistry::new();
        let camera = started_camera(&locks).await;
        let (tx, mut rx) = event_channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let worker = FrameWorker::new("cam0", camera.clone(), FrameCount::Finite(3), locks, tx);
        let exit = worker.run(cancel_rx).await;

        assert_eq!(exit.emitted, 3);
        assert!(matches!(exit.outcome, WorkerOutcome::Completed));
        for expected in 1..=3 {
            match rx.try_recv() {
                Some(ConsoleEvent::Frame { camera, image }) => {
                    assert_eq!(camera, "cam0");
                    assert_eq!(image.frame_number, expected);
                }
                other => panic!("expected frame, got {other:?}"),
            }
        }
        assert!(rx.try_recv().is_none());
        assert_eq!(camera.unlocked_calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_before_first_grab_emits_nothing() {
        let locks = LockRegistry::new();
        let camera = started_camera(&locks).await;
        let (tx, mut rx) = event_channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let exit = FrameWorker::new("cam0", camera.clone(), FrameCount::Unbounded, locks, tx)
            .run(cancel_rx)
            .await;

        assert_eq!(exit.emitted, 0);
        assert!(matches!(exit.outcome, WorkerOutcome::Cancelled));
        assert_eq!(camera.frames_grabbed(), 0);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn camera_lock_is_free_while_emission_blocks() {
        let locks = LockRegistry::new();
        let camera = started_camera(&locks).await;
        let (tx, mut rx) = event_channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handle = FrameWorker::new(
            "cam0",
            camera.clone(),
            FrameCount::Unbounded,
            locks.clone(),
            tx,
        )
        .spawn(cancel_rx);

        // First frame fills the channel, second grab completes and then blocks on emission.
        tokio::time::timeout(Duration::from_secs(2), async {
            while camera.frames_grabbed() < 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!locks.is_held(DeviceKind::Camera));
        let guard = locks.try_acquire(DeviceKind::Camera);
        assert!(guard.is_some(), "worker must not hold the camera lock while blocked");
        drop(guard);

        cancel_tx.send(true).unwrap();
        let exit = handle.await.unwrap();
        assert!(matches!(exit.outcome, WorkerOutcome::Cancelled));
        assert_eq!(exit.emitted, 1);
        assert_eq!(camera.frames_grabbed(), 2);

        // Only the first frame reached the sink; the blocked one was dropped.
        assert!(matches!(rx.try_recv(), Some(ConsoleEvent::Frame { .. })));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn grab_failure_ends_the_loop() {
        let locks = LockRegistry::new();
        let camera = Arc::new(MockCamera::new(2, 2).failing_after(2));
        camera.start(FrameCount::Unbounded).await.unwrap();
        let (tx, _rx) = event_channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let exit = FrameWorker::new("cam0", camera, FrameCount::Unbounded, locks, tx)
            .run(cancel_rx)
            .await;

        assert_eq!(exit.emitted, 2);
        assert!(matches!(
            exit.outcome,
            WorkerOutcome::Failed(ConsoleError::Hardware { operation: "grab_frame", .. })
        ));
    }
}

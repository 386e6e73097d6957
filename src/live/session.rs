//! Live session controller.
//!
//! Owns the lifecycle of live and snapshot sessions, one per camera:
//!
//! ```text
//!           start()                    DAQ running          worker exits
//!  Idle ─────────────► Starting ───────────────► Streaming ──────────────► Stopping ─► Idle
//!                         │                                    ▲
//!                         └──── startup failure ───────────────┘
//! ```
//!
//! Starting spawns a [`FrameWorker`], prepares and starts the camera under the camera lock,
//! then generates, writes and starts the waveforms of every signal-generation board under the
//! DAQ lock. The two locks are never held together.
//!
//! Every session gets a supervisor task that waits for the worker to exit, whatever the
//! reason, and runs teardown exactly once: abort the camera under the camera lock, then stop
//! every board under the DAQ lock. Teardown runs every step even when an earlier one fails and
//! reports all failures in the [`SessionReport`].
//!
//! A snapshot is a session with [`FrameCount::SNAPSHOT`]; its worker exits after one frame and
//! the supervisor tears down without any explicit stop.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConsoleConfig, DaqTasks};
use crate::error::{AppResult, ConsoleError};
use crate::hardware::capabilities::Camera;
use crate::hardware::instrument::Instrument;
use crate::hardware::{DeviceKind, FrameCount, WaveformKind};
use crate::live::events::{ConsoleEvent, EventSender};
use crate::live::worker::{FrameWorker, WorkerExit, WorkerOutcome};
use crate::locks::{CategoryGuard, LockRegistry};

/// Lifecycle state of one camera's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Worker spawned, hardware being started
    Starting,
    /// Camera and waveforms running
    Streaming,
    /// Teardown in progress
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The requested frame count was reached
    Completed,
    /// Stopped on request
    Cancelled,
    /// Startup, a frame grab or the sink failed
    Failed(String),
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// Camera name
    pub camera: String,
    /// Frames the session was started with
    pub frames_requested: FrameCount,
    /// Frames delivered to the sink
    pub frames_emitted: u64,
    /// Why the session ended
    pub outcome: SessionOutcome,
    /// Teardown steps that failed
    pub teardown_errors: Vec<String>,
}

impl SessionReport {
    /// Whether the session ended normally and teardown fully succeeded.
    pub fn is_clean(&self) -> bool {
        !matches!(self.outcome, SessionOutcome::Failed(_)) && self.teardown_errors.is_empty()
    }
}

struct ActiveSession {
    cancel: watch::Sender<bool>,
    supervisor: Option<JoinHandle<SessionReport>>,
}

struct Shared {
    instrument: Arc<Instrument>,
    daq_tasks: IndexMap<String, DaqTasks>,
    locks: LockRegistry,
    events: EventSender,
    wavelength: watch::Sender<String>,
    states: HashMap<String, watch::Sender<SessionState>>,
    sessions: Mutex<HashMap<String, ActiveSession>>,
}

impl Shared {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, ActiveSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, camera: &str, state: SessionState) {
        if let Some(tx) = self.states.get(camera) {
            tx.send_replace(state);
        }
        debug!(camera, %state, "session state changed");
        self.events.notify(ConsoleEvent::SessionChanged {
            camera: camera.to_string(),
            state,
        });
    }

    /// Prepare and start the camera, then start every board's waveforms.
    async fn start_hardware(
        &self,
        camera_name: &str,
        camera: &Arc<dyn Camera>,
        frames: FrameCount,
        camera_guard: CategoryGuard,
    ) -> AppResult<()> {
        camera
            .prepare()
            .await
            .map_err(|e| ConsoleError::hardware(camera_name, "prepare", e))?;
        camera
            .start(frames)
            .await
            .map_err(|e| ConsoleError::hardware(camera_name, "start", e))?;
        drop(camera_guard);

        let wavelength = self.wavelength.borrow().clone();
        let _guard = self.locks.acquire(DeviceKind::Daq).await;
        for (name, daq) in self.instrument.daqs() {
            let tasks = self.daq_tasks.get(&name).cloned().unwrap_or_default();
            debug!(daq = %name, ao_task = %tasks.ao_task, do_task = %tasks.do_task, %wavelength, "starting waveforms");
            daq.generate_waveforms(&tasks.ao_task, WaveformKind::Ao, &wavelength)
                .await
                .map_err(|e| ConsoleError::hardware(&name, "generate_waveforms", e))?;
            daq.generate_waveforms(&tasks.do_task, WaveformKind::Do, &wavelength)
                .await
                .map_err(|e| ConsoleError::hardware(&name, "generate_waveforms", e))?;
            daq.write_ao_waveforms()
                .await
                .map_err(|e| ConsoleError::hardware(&name, "write_ao_waveforms", e))?;
            daq.write_do_waveforms()
                .await
                .map_err(|e| ConsoleError::hardware(&name, "write_do_waveforms", e))?;
            daq.start_all()
                .await
                .map_err(|e| ConsoleError::hardware(&name, "start_all", e))?;
        }
        Ok(())
    }

    /// Abort the camera, then stop every board. Runs every step and collects failures.
    async fn teardown(&self, camera_name: &str, camera: &Arc<dyn Camera>) -> Vec<ConsoleError> {
        let mut errors = Vec::new();
        {
            let _guard = self.locks.acquire(DeviceKind::Camera).await;
            if let Err(e) = camera.abort().await {
                errors.push(ConsoleError::hardware(camera_name, "abort", e));
            }
        }
        {
            let _guard = self.locks.acquire(DeviceKind::Daq).await;
            for (name, daq) in self.instrument.daqs() {
                if let Err(e) = daq.stop_all().await {
                    errors.push(ConsoleError::hardware(&name, "stop_all", e));
                }
            }
        }
        errors
    }

    /// Wait for the worker, tear down, and publish the report.
    async fn supervise(
        self: Arc<Self>,
        camera_name: String,
        camera: Arc<dyn Camera>,
        frames: FrameCount,
        worker: JoinHandle<WorkerExit>,
        startup_failure: Option<String>,
    ) -> SessionReport {
        let exit = match worker.await {
            Ok(exit) => exit,
            Err(join) => WorkerExit {
                emitted: 0,
                outcome: WorkerOutcome::Failed(join.into()),
            },
        };

        self.set_state(&camera_name, SessionState::Stopping);
        let teardown_errors = self.teardown(&camera_name, &camera).await;
        for error in &teardown_errors {
            warn!(camera = %camera_name, error = %error, "teardown step failed");
            self.events.notify(ConsoleEvent::fault(&camera_name, error));
        }

        let outcome = match (startup_failure, exit.outcome) {
            (Some(message), _) => SessionOutcome::Failed(message),
            (None, WorkerOutcome::Completed) => SessionOutcome::Completed,
            (None, WorkerOutcome::Cancelled) => SessionOutcome::Cancelled,
            (None, WorkerOutcome::Failed(error)) => {
                self.events.notify(ConsoleEvent::fault(&camera_name, &error));
                SessionOutcome::Failed(error.to_string())
            }
        };
        let report = SessionReport {
            camera: camera_name.clone(),
            frames_requested: frames,
            frames_emitted: exit.emitted,
            outcome,
            teardown_errors: teardown_errors.iter().map(ToString::to_string).collect(),
        };
        info!(
            camera = %camera_name,
            frames = exit.emitted,
            outcome = ?report.outcome,
            "live session ended"
        );

        // Idle is visible before the end event is, and a newer start is ordered after both.
        let mut sessions = self.sessions();
        sessions.remove(&camera_name);
        self.set_state(&camera_name, SessionState::Idle);
        self.events.notify(ConsoleEvent::SessionEnded {
            camera: camera_name.clone(),
            report: report.clone(),
        });
        drop(sessions);
        report
    }
}

/// Starts and stops live sessions. Cloning is cheap and every clone controls the same
/// sessions.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// Create a controller for every camera of `instrument`.
    pub fn new(
        instrument: Arc<Instrument>,
        config: &ConsoleConfig,
        locks: LockRegistry,
        events: EventSender,
    ) -> Self {
        let daq_tasks = instrument
            .daqs()
            .into_iter()
            .map(|(name, _)| {
                let tasks = config.daq_tasks(&name);
                (name, tasks)
            })
            .collect();
        let states = instrument
            .camera_names()
            .map(|name| (name.to_string(), watch::channel(SessionState::Idle).0))
            .collect();
        let (wavelength, _) = watch::channel(config.live.wavelength.clone());

        Self {
            shared: Arc::new(Shared {
                instrument,
                daq_tasks,
                locks,
                events,
                wavelength,
                states,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a session on `camera` that ends after `frames` frames, or on [`stop`](Self::stop).
    ///
    /// Fails with [`ConsoleError::SessionActive`] if the camera already has a session. If
    /// starting the hardware fails, the session is torn down before the error is returned.
    #[tracing::instrument(skip(self), fields(wavelength = %self.wavelength()))]
    pub async fn start(&self, camera: &str, frames: FrameCount) -> AppResult<()> {
        let shared = &self.shared;
        let handle = shared.instrument.camera(camera)?;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut sessions = shared.sessions();
            if sessions.contains_key(camera) {
                return Err(ConsoleError::SessionActive(camera.to_string()));
            }
            sessions.insert(
                camera.to_string(),
                ActiveSession {
                    cancel: cancel_tx,
                    supervisor: None,
                },
            );
            shared.set_state(camera, SessionState::Starting);
        }
        info!(camera, %frames, "starting live session");

        // The worker is spawned while the camera lock is held so its first grab waits for
        // the camera to be started.
        let camera_guard = shared.locks.acquire(DeviceKind::Camera).await;
        let worker = FrameWorker::new(
            camera,
            Arc::clone(&handle),
            frames,
            shared.locks.clone(),
            shared.events.clone(),
        )
        .spawn(cancel_rx);
        let started = shared
            .start_hardware(camera, &handle, frames, camera_guard)
            .await;

        match started {
            Ok(()) => {
                shared.set_state(camera, SessionState::Streaming);
                // The supervisor removes the entry when it finishes, so it is registered
                // before the lock is released.
                let mut sessions = shared.sessions();
                let supervisor = tokio::spawn(Arc::clone(shared).supervise(
                    camera.to_string(),
                    handle,
                    frames,
                    worker,
                    None,
                ));
                if let Some(session) = sessions.get_mut(camera) {
                    session.supervisor = Some(supervisor);
                }
                Ok(())
            }
            Err(error) => {
                warn!(camera, error = %error, "live session failed to start, tearing down");
                if let Some(session) = shared.sessions().get(camera) {
                    session.cancel.send_replace(true);
                }
                let supervisor = tokio::spawn(Arc::clone(shared).supervise(
                    camera.to_string(),
                    handle,
                    frames,
                    worker,
                    Some(error.to_string()),
                ));
                supervisor.await?;
                Err(error)
            }
        }
    }

    /// Request cancellation of `camera`'s session and wait for its teardown.
    pub async fn stop(&self, camera: &str) -> AppResult<SessionReport> {
        let supervisor = {
            let mut sessions = self.shared.sessions();
            let session = sessions
                .get_mut(camera)
                .ok_or_else(|| ConsoleError::NoActiveSession(camera.to_string()))?;
            session.cancel.send_replace(true);
            match session.supervisor.take() {
                Some(supervisor) => supervisor,
                None if self.state(camera) == SessionState::Starting => {
                    return Err(ConsoleError::SessionStarting(camera.to_string()))
                }
                None => return Err(ConsoleError::NoActiveSession(camera.to_string())),
            }
        };
        info!(camera, "stopping live session");
        Ok(supervisor.await?)
    }

    /// Stop every active session, collecting the reports.
    pub async fn stop_all(&self) -> Vec<SessionReport> {
        let cameras: Vec<String> = self.shared.sessions().keys().cloned().collect();
        let mut reports = Vec::with_capacity(cameras.len());
        for camera in cameras {
            match self.stop(&camera).await {
                Ok(report) => reports.push(report),
                Err(error) => debug!(camera = %camera, error = %error, "session already ended"),
            }
        }
        reports
    }

    /// Current state of `camera`'s session.
    pub fn state(&self, camera: &str) -> SessionState {
        self.shared
            .states
            .get(camera)
            .map(|tx| *tx.borrow())
            .unwrap_or_default()
    }

    /// Watch `camera`'s session state.
    pub fn subscribe(&self, camera: &str) -> AppResult<watch::Receiver<SessionState>> {
        self.shared
            .states
            .get(camera)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| ConsoleError::UnknownDevice(camera.to_string()))
    }

    /// Wait until `camera` has no session.
    pub async fn wait_until_idle(&self, camera: &str) -> AppResult<()> {
        let mut state = self.subscribe(camera)?;
        state
            .wait_for(|s| *s == SessionState::Idle)
            .await
            .map_err(|_| ConsoleError::ChannelClosed)?;
        Ok(())
    }

    /// Wavelength used for waveforms and display entry keys.
    pub fn wavelength(&self) -> String {
        self.shared.wavelength.borrow().clone()
    }

    /// Change the live wavelength. Applies to sessions started afterwards.
    pub fn set_wavelength(&self, wavelength: impl Into<String>) {
        self.shared.wavelength.send_replace(wavelength.into());
    }

    /// Watch the live wavelength.
    pub fn subscribe_wavelength(&self) -> watch::Receiver<String> {
        self.shared.wavelength.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockCamera, MockSignalGenerator};
    use crate::live::events::{event_channel, EventReceiver};
    use std::time::Duration;

    struct Rig {
        controller: SessionController,
        camera: Arc<MockCamera>,
        daq: Arc<MockSignalGenerator>,
        events: EventReceiver,
    }

    fn rig(camera: MockCamera, capacity: usize) -> Rig {
        let locks = LockRegistry::new();
        let camera = Arc::new(camera);
        let daq = Arc::new(MockSignalGenerator::new());
        let instrument = Instrument::new()
            .with_camera("cam0", camera.clone())
            .with_daq("daq0", daq.clone());
        let (tx, rx) = event_channel(capacity);
        let controller =
            SessionController::new(Arc::new(instrument), &ConsoleConfig::default(), locks, tx);
        Rig {
            controller,
            camera,
            daq,
            events: rx,
        }
    }

    #[tokio::test]
    async fn snapshot_tears_down_without_stop() {
        let rig = rig(MockCamera::new(4, 4), 8);
        rig.controller.start("cam0", FrameCount::SNAPSHOT).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), rig.controller.wait_until_idle("cam0"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rig.camera.abort_calls(), 1);
        assert_eq!(rig.daq.count("stop_all"), 1);
        assert!(!rig.daq.is_running());
        assert_eq!(rig.camera.frames_grabbed(), 1);
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let rig = rig(MockCamera::new(4, 4), 8);
        rig.controller.start("cam0", FrameCount::Unbounded).await.unwrap();
        let err = rig
            .controller
            .start("cam0", FrameCount::Unbounded)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::SessionActive(_)));
        assert_eq!(rig.camera.start_calls(), 1);

        let report = rig.controller.stop("cam0").await.unwrap();
        assert_eq!(report.outcome, SessionOutcome::Cancelled);
        assert_eq!(rig.controller.state("cam0"), SessionState::Idle);
    }

    #[tokio::test]
    async fn waveforms_follow_configured_sequence() {
        let rig = rig(MockCamera::new(4, 4), 8);
        rig.controller.set_wavelength("561");
        rig.controller.start("cam0", FrameCount::Unbounded).await.unwrap();
        assert_eq!(
            rig.daq.calls(),
            vec![
                "generate ao_task ao 561",
                "generate do_task do 561",
                "write_ao",
                "write_do",
                "start_all"
            ]
        );
        rig.controller.stop("cam0").await.unwrap();
        assert_eq!(rig.daq.calls().last().map(String::as_str), Some("stop_all"));
    }

    #[tokio::test]
    async fn stop_without_session_is_an_error() {
        let rig = rig(MockCamera::new(4, 4), 8);
        assert!(matches!(
            rig.controller.stop("cam0").await,
            Err(ConsoleError::NoActiveSession(_))
        ));
    }

    #[tokio::test]
    async fn failed_daq_start_still_tears_down() {
        let rig = rig(MockCamera::new(4, 4), 8);
        rig.daq.set_fail_start(true);
        let err = rig
            .controller
            .start("cam0", FrameCount::Unbounded)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Hardware { operation: "start_all", .. }));
        assert_eq!(rig.camera.abort_calls(), 1);
        assert_eq!(rig.daq.count("stop_all"), 1);
        assert_eq!(rig.controller.state("cam0"), SessionState::Idle);

        // A fresh start is accepted once the failure is cleared.
        rig.daq.set_fail_start(false);
        rig.controller.start("cam0", FrameCount::Unbounded).await.unwrap();
        rig.controller.stop("cam0").await.unwrap();
    }

    #[tokio::test]
    async fn session_end_is_published() {
        let mut rig = rig(MockCamera::new(4, 4), 8);
        rig.controller.start("cam0", FrameCount::Finite(2)).await.unwrap();
        rig.controller.wait_until_idle("cam0").await.unwrap();

        let mut frames = 0;
        let mut report = None;
        while let Some(event) = rig.events.try_recv() {
            match event {
                ConsoleEvent::Frame { .. } => frames += 1,
                ConsoleEvent::SessionEnded { report: r, .. } => report = Some(r),
                _ => {}
            }
        }
        assert_eq!(frames, 2);
        let report = report.expect("session end event");
        assert_eq!(report.frames_emitted, 2);
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert!(report.is_clean());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn state_is_idle_when_session_end_arrives() {
        for _ in 0..20 {
            let mut rig = rig(MockCamera::new(4, 4).failing_after(1), 8);
            rig.controller.start("cam0", FrameCount::Unbounded).await.unwrap();

            let mut states = Vec::new();
            let report = tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    match rig.events.recv().await {
                        Some(ConsoleEvent::SessionChanged { state, .. }) => states.push(state),
                        Some(ConsoleEvent::SessionEnded { report, .. }) => break report,
                        Some(_) => {}
                        None => panic!("event channel closed"),
                    }
                }
            })
            .await
            .unwrap();

            assert!(matches!(report.outcome, SessionOutcome::Failed(_)));
            assert_eq!(rig.controller.state("cam0"), SessionState::Idle);
            assert_eq!(states.last(), Some(&SessionState::Idle));
        }
    }
}

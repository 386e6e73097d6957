//! The live console: everything the operator interacts with, wired together.
//!
//! [`LiveConsole`] is the presentation context. It owns the [`PresentationSink`] and the event
//! receiver, the live/snapshot controls of every camera, and handles to the background
//! contexts (session controller, stage poller, property service). Operator actions are
//! methods on the console; display updates arrive through [`LiveConsole::pump`] or
//! [`LiveConsole::next_event`].

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ConsoleConfig;
use crate::controls::{LiveAction, LiveToggle, SnapshotButton};
use crate::error::{AppResult, ConsoleError};
use crate::hardware::instrument::{Acquisition, Instrument};
use crate::hardware::FrameCount;
use crate::live::{
    event_channel, ConsoleEvent, EventReceiver, PollerHandle, PropertyCommand, PropertyService,
    PropertyServiceHandle, SessionController, SessionReport, SessionState, StagePoller,
};
use crate::locks::LockRegistry;
use crate::persist;
use crate::property::{MetadataBridge, PropertyBridge, PropertyEdit, PropertyValue};
use crate::sink::{DisplayKey, PresentationSink};

/// Mouse button of a click on a display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    /// Left button
    Primary,
    /// Right button, opens the save dialog
    Secondary,
    /// Middle button
    Middle,
}

/// Operator console over one instrument.
pub struct LiveConsole {
    acquisition: Arc<Acquisition>,
    controller: SessionController,
    poller: Option<PollerHandle>,
    properties: Option<PropertyServiceHandle>,
    sink: PresentationSink,
    events: EventReceiver,
    live_toggles: IndexMap<String, LiveToggle>,
    snapshot_buttons: IndexMap<String, SnapshotButton>,
}

impl LiveConsole {
    /// Build the console and start its background contexts.
    ///
    /// Registers one form per configurable device (instrument devices, then the acquisition's
    /// writers and transfers), starts the stage poller and the property service, and queues
    /// an initial load of every device's properties.
    pub fn start(
        config: &ConsoleConfig,
        instrument: Arc<Instrument>,
        acquisition: Arc<Acquisition>,
    ) -> AppResult<Self> {
        config.validate()?;
        let locks = LockRegistry::new();
        let (tx, rx) = event_channel(config.live.event_capacity);

        let controller =
            SessionController::new(Arc::clone(&instrument), config, locks.clone(), tx.clone());
        let mut sink = PresentationSink::new(controller.subscribe_wavelength());

        let mut bridges = Vec::new();
        let devices = instrument
            .configurable_devices()
            .into_iter()
            .chain(acquisition.configurable_devices());
        for (name, kind, device) in devices {
            let bridge = PropertyBridge::new(&name, kind, device, locks.clone());
            sink.register_form(
                &name,
                kind,
                config.widget_binding(&name, kind),
                bridge.schema().to_vec(),
            );
            bridges.push(bridge);
        }
        let properties = PropertyService::new(
            bridges,
            MetadataBridge::new(Arc::clone(&acquisition)),
            tx.clone(),
        )
        .spawn();
        properties.submit(PropertyCommand::Refresh(None))?;

        let poller = StagePoller::new(
            instrument.stages(),
            config.live.poll_interval(),
            locks,
            tx,
        )
        .spawn();

        let cooldown = config.live.control_cooldown();
        let cameras: Vec<String> = instrument.camera_names().map(str::to_string).collect();
        let live_toggles = cameras
            .iter()
            .map(|c| (c.clone(), LiveToggle::new(c, cooldown)))
            .collect();
        let snapshot_buttons = cameras
            .iter()
            .map(|c| (c.clone(), SnapshotButton::new(c, cooldown)))
            .collect();

        info!(cameras = cameras.len(), "live console started");
        Ok(Self {
            acquisition,
            controller,
            poller: Some(poller),
            properties: Some(properties),
            sink,
            events: rx,
            live_toggles,
            snapshot_buttons,
        })
    }

    /// Display state.
    pub fn sink(&self) -> &PresentationSink {
        &self.sink
    }

    /// Session controller shared with the background contexts.
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Live toggle of `camera`.
    pub fn live_toggle(&self, camera: &str) -> Option<&LiveToggle> {
        self.live_toggles.get(camera)
    }

    /// Snapshot control of `camera`.
    pub fn snapshot_button(&self, camera: &str) -> Option<&SnapshotButton> {
        self.snapshot_buttons.get(camera)
    }

    /// Change the live wavelength used by sessions started afterwards.
    pub fn set_wavelength(&self, wavelength: impl Into<String>) {
        self.controller.set_wavelength(wavelength);
    }

    /// Press the live toggle of `camera`. Returns the action performed.
    pub async fn press_live(&mut self, camera: &str) -> AppResult<LiveAction> {
        let toggle = self
            .live_toggles
            .get_mut(camera)
            .ok_or_else(|| ConsoleError::UnknownDevice(camera.to_string()))?;
        let action = toggle.press(Instant::now())?;
        let result = match action {
            LiveAction::Start => self.controller.start(camera, FrameCount::Unbounded).await,
            LiveAction::Stop => self.controller.stop(camera).await.map(|report| {
                info!(camera, frames = report.frames_emitted, "live stopped");
            }),
        };
        if let Err(error) = &result {
            warn!(camera, error = %error, ?action, "live toggle failed");
            if let Some(toggle) = self.live_toggles.get_mut(camera) {
                toggle.reset();
            }
        }
        result.map(|()| action)
    }

    /// Press the snapshot control of `camera`: one frame, then automatic teardown.
    pub async fn press_snapshot(&mut self, camera: &str) -> AppResult<()> {
        let button = self
            .snapshot_buttons
            .get_mut(camera)
            .ok_or_else(|| ConsoleError::UnknownDevice(camera.to_string()))?;
        button.press(Instant::now())?;
        self.controller.start(camera, FrameCount::SNAPSHOT).await
    }

    /// Queue an edit of a device property.
    pub fn edit_property(&self, edit: PropertyEdit) -> AppResult<()> {
        self.property_service()?
            .submit(PropertyCommand::Edit(edit))
    }

    /// Queue an edit of an acquisition metadata field.
    pub fn edit_metadata(&self, key: impl Into<String>, value: impl Into<PropertyValue>) -> AppResult<()> {
        self.property_service()?.submit(PropertyCommand::EditMetadata {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Queue a re-read of one device, or of everything when `device` is `None`.
    pub fn refresh_properties(&self, device: Option<&str>) -> AppResult<()> {
        self.property_service()?
            .submit(PropertyCommand::Refresh(device.map(str::to_string)))
    }

    fn property_service(&self) -> AppResult<&PropertyServiceHandle> {
        self.properties.as_ref().ok_or(ConsoleError::ChannelClosed)
    }

    /// Handle a click on the layer of `key`.
    ///
    /// A secondary click asks `choose_folder` for a destination, starting from the camera's
    /// writer directory, and saves the layer's current frame there. Returns the saved path.
    pub fn on_layer_clicked<F>(
        &self,
        key: &DisplayKey,
        button: PointerButton,
        choose_folder: F,
    ) -> AppResult<Option<PathBuf>>
    where
        F: FnOnce(Option<&Path>) -> Option<PathBuf>,
    {
        if button != PointerButton::Secondary {
            return Ok(None);
        }
        let Some(entry) = self.sink.entry(key) else {
            return Ok(None);
        };
        let folder = choose_folder(self.acquisition.writer_path(&key.camera).as_deref());
        persist::save_frame(
            &entry.image,
            &key.layer_name(),
            folder.as_deref(),
            chrono::Local::now(),
        )
    }

    /// Apply every queued event without waiting. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next event and apply it. Returns `false` once every sender is gone.
    pub async fn next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, event: ConsoleEvent) {
        if let ConsoleEvent::SessionEnded { camera, .. } = &event {
            // A live session that ended on its own leaves the toggle showing "Stop".
            if self.controller.state(camera) == SessionState::Idle {
                if let Some(toggle) = self.live_toggles.get_mut(camera) {
                    toggle.reset();
                }
            }
        }
        self.sink.handle(event);
    }

    /// Stop every session and background context, then apply the remaining events.
    pub async fn shutdown(mut self) -> AppResult<Vec<SessionReport>> {
        let reports = self.controller.stop_all().await;
        let mut errors = Vec::new();
        if let Some(poller) = self.poller.take() {
            if let Err(e) = poller.shutdown().await {
                errors.push(e);
            }
        }
        if let Some(properties) = self.properties.take() {
            if let Err(e) = properties.shutdown().await {
                errors.push(e);
            }
        }
        self.pump();
        info!(sessions = reports.len(), "live console stopped");
        if errors.is_empty() {
            Ok(reports)
        } else {
            Err(ConsoleError::ShutdownFailed(errors))
        }
    }
}

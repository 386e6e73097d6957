//! Presentation sink.
//!
//! The only place display state is mutated. Background contexts never touch it; they send
//! [`ConsoleEvent`]s that the owner of the sink applies one by one with
//! [`PresentationSink::handle`].
//!
//! Frames land in display entries keyed by camera and the live wavelength current when the
//! frame is handled. An entry is created on the first frame for its key and updated in place
//! afterwards, so a live session produces one entry however many frames it delivers.

use indexmap::IndexMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::config::WidgetBinding;
use crate::hardware::{DeviceKind, Frame, Position};
use crate::live::events::{ConsoleEvent, EventReceiver};
use crate::live::session::{SessionReport, SessionState};
use crate::property::{PropertyDescriptor, PropertyRecord};

const MAX_FAULTS: usize = 100;

/// Key of one display entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayKey {
    /// Camera name
    pub camera: String,
    /// Live wavelength
    pub wavelength: String,
}

impl DisplayKey {
    /// Build a key.
    pub fn new(camera: impl Into<String>, wavelength: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            wavelength: wavelength.into(),
        }
    }

    /// Layer name shown to the operator.
    pub fn layer_name(&self) -> String {
        format!("Video {} {}", self.camera, self.wavelength)
    }
}

impl fmt::Display for DisplayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.layer_name())
    }
}

/// Latest frame of one camera/wavelength pair.
#[derive(Debug, Clone)]
pub struct DisplayEntry {
    /// Most recent frame
    pub image: Arc<Frame>,
    /// Frames applied to this entry, including the one that created it
    pub updates: u64,
}

/// Text shown for one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageReadout {
    /// Single position field
    Scalar(String),
    /// One `position.{axis}` field per axis
    Axes(IndexMap<String, String>),
}

impl StageReadout {
    /// Text of the field named `field` (`position` or `position.{axis}`).
    pub fn field(&self, field: &str) -> Option<&str> {
        match (self, field.split_once('.')) {
            (StageReadout::Scalar(text), None) if field == "position" => Some(text),
            (StageReadout::Axes(axes), Some(("position", axis))) => {
                axes.get(axis).map(String::as_str)
            }
            _ => None,
        }
    }
}

/// Editable form of one device.
#[derive(Debug, Clone)]
pub struct DeviceForm {
    /// Device category
    pub kind: DeviceKind,
    /// Generic or custom widget
    pub binding: WidgetBinding,
    /// Declared properties, in display order
    pub schema: Vec<PropertyDescriptor>,
    /// Last record the device reported
    pub values: PropertyRecord,
}

impl DeviceForm {
    /// Window title, e.g. `camera cam0`.
    pub fn title(&self, device: &str) -> String {
        format!("{} {}", self.kind, device)
    }
}

/// A failure reported by a background context.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    /// Device or component
    pub source: String,
    /// Description
    pub message: String,
    /// Whether the console keeps working normally
    pub recoverable: bool,
}

/// Display state owned by the presentation context.
#[derive(Debug)]
pub struct PresentationSink {
    wavelength: watch::Receiver<String>,
    entries: IndexMap<DisplayKey, DisplayEntry>,
    stages: IndexMap<String, StageReadout>,
    forms: IndexMap<String, DeviceForm>,
    metadata: PropertyRecord,
    sessions: IndexMap<String, SessionState>,
    reports: IndexMap<String, SessionReport>,
    faults: VecDeque<Fault>,
}

impl PresentationSink {
    /// Create an empty sink following the live wavelength.
    pub fn new(wavelength: watch::Receiver<String>) -> Self {
        Self {
            wavelength,
            entries: IndexMap::new(),
            stages: IndexMap::new(),
            forms: IndexMap::new(),
            metadata: PropertyRecord::new(),
            sessions: IndexMap::new(),
            reports: IndexMap::new(),
            faults: VecDeque::new(),
        }
    }

    /// Add a device form before its first refresh.
    pub fn register_form(
        &mut self,
        device: impl Into<String>,
        kind: DeviceKind,
        binding: WidgetBinding,
        schema: Vec<PropertyDescriptor>,
    ) {
        self.forms.insert(
            device.into(),
            DeviceForm {
                kind,
                binding,
                schema,
                values: PropertyRecord::new(),
            },
        );
    }

    /// Apply one event to the display state.
    pub fn handle(&mut self, event: ConsoleEvent) {
        match event {
            ConsoleEvent::Frame { camera, image } => self.show_frame(camera, image),
            ConsoleEvent::StagePosition { stage, position } => self.show_position(stage, position),
            ConsoleEvent::PropertiesRefreshed { device, record } => {
                match self.forms.get_mut(&device) {
                    Some(form) => form.values = record,
                    None => debug!(device = %device, "refresh for device without a form"),
                }
            }
            ConsoleEvent::MetadataRefreshed { record } => self.metadata = record,
            ConsoleEvent::SessionChanged { camera, state } => {
                self.sessions.insert(camera, state);
            }
            ConsoleEvent::SessionEnded { camera, report } => {
                self.sessions.insert(camera.clone(), SessionState::Idle);
                self.reports.insert(camera, report);
            }
            ConsoleEvent::Fault {
                source,
                message,
                recoverable,
            } => {
                if self.faults.len() == MAX_FAULTS {
                    self.faults.pop_front();
                }
                self.faults.push_back(Fault {
                    source,
                    message,
                    recoverable,
                });
            }
        }
    }

    /// Apply every event already queued, without waiting. Returns how many were applied.
    pub fn drain(&mut self, events: &mut EventReceiver) -> usize {
        let mut applied = 0;
        while let Some(event) = events.try_recv() {
            self.handle(event);
            applied += 1;
        }
        applied
    }

    fn show_frame(&mut self, camera: String, image: Arc<Frame>) {
        let key = DisplayKey::new(camera, self.wavelength.borrow().clone());
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.image = image;
                entry.updates += 1;
                trace!(layer = %key, updates = entry.updates, "display entry updated");
            }
            None => {
                debug!(layer = %key, "display entry created");
                self.entries.insert(key, DisplayEntry { image, updates: 1 });
            }
        }
    }

    fn show_position(&mut self, stage: String, position: Position) {
        let readout = match position {
            Position::Scalar(value) => StageReadout::Scalar(value.to_string()),
            Position::Axes(axes) => StageReadout::Axes(
                axes.into_iter()
                    .map(|(axis, value)| (axis, value.to_string()))
                    .collect(),
            ),
        };
        match (self.stages.get_mut(&stage), readout) {
            // Axes not reported this cycle keep their previous text.
            (Some(StageReadout::Axes(fields)), StageReadout::Axes(update)) => fields.extend(update),
            (_, readout) => {
                self.stages.insert(stage, readout);
            }
        }
    }

    /// Display entry for `key`.
    pub fn entry(&self, key: &DisplayKey) -> Option<&DisplayEntry> {
        self.entries.get(key)
    }

    /// Every display entry, in creation order.
    pub fn entries(&self) -> impl Iterator<Item = (&DisplayKey, &DisplayEntry)> {
        self.entries.iter()
    }

    /// Position text of `stage`.
    pub fn stage(&self, stage: &str) -> Option<&StageReadout> {
        self.stages.get(stage)
    }

    /// Position text of every stage seen so far.
    pub fn stages(&self) -> impl Iterator<Item = (&String, &StageReadout)> {
        self.stages.iter()
    }

    /// Form of `device`.
    pub fn form(&self, device: &str) -> Option<&DeviceForm> {
        self.forms.get(device)
    }

    /// Every device form, in registration order.
    pub fn forms(&self) -> impl Iterator<Item = (&String, &DeviceForm)> {
        self.forms.iter()
    }

    /// Acquisition metadata as last reported.
    pub fn metadata(&self) -> &PropertyRecord {
        &self.metadata
    }

    /// Last known session state of `camera`.
    pub fn session_state(&self, camera: &str) -> SessionState {
        self.sessions.get(camera).copied().unwrap_or_default()
    }

    /// Report of `camera`'s most recent finished session.
    pub fn last_report(&self, camera: &str) -> Option<&SessionReport> {
        self.reports.get(camera)
    }

    /// Most recent faults, oldest first.
    pub fn faults(&self) -> impl Iterator<Item = &Fault> {
        self.faults.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::FrameCount;
    use crate::live::session::SessionOutcome;

    fn frame(n: u64) -> Arc<Frame> {
        Arc::new(Frame::new(2, 2, vec![n as u16; 4], n))
    }

    fn frame_event(camera: &str, n: u64) -> ConsoleEvent {
        ConsoleEvent::Frame {
            camera: camera.to_string(),
            image: frame(n),
        }
    }

    #[test]
    fn frames_update_one_entry_in_place() {
        let (_tx, rx) = watch::channel("488".to_string());
        let mut sink = PresentationSink::new(rx);
        for n in 1..=3 {
            sink.handle(frame_event("cam0", n));
        }

        let key = DisplayKey::new("cam0", "488");
        let entry = sink.entry(&key).unwrap();
        assert_eq!(entry.updates, 3);
        assert_eq!(entry.image.frame_number, 3);
        assert_eq!(sink.entries().count(), 1);
        assert_eq!(key.layer_name(), "Video cam0 488");
    }

    #[test]
    fn wavelength_change_creates_a_new_entry() {
        let (tx, rx) = watch::channel("488".to_string());
        let mut sink = PresentationSink::new(rx);
        sink.handle(frame_event("cam0", 1));
        tx.send_replace("561".to_string());
        sink.handle(frame_event("cam0", 2));

        assert_eq!(sink.entry(&DisplayKey::new("cam0", "488")).unwrap().updates, 1);
        assert_eq!(sink.entry(&DisplayKey::new("cam0", "561")).unwrap().updates, 1);
    }

    #[test]
    fn stage_positions_fill_text_fields() {
        let (_tx, rx) = watch::channel("488".to_string());
        let mut sink = PresentationSink::new(rx);
        sink.handle(ConsoleEvent::StagePosition {
            stage: "scan_z".to_string(),
            position: Position::Scalar(1.25),
        });
        sink.handle(ConsoleEvent::StagePosition {
            stage: "tile_xy".to_string(),
            position: Position::Axes(IndexMap::from([
                ("x".to_string(), 1.0),
                ("y".to_string(), 2.5),
            ])),
        });
        sink.handle(ConsoleEvent::StagePosition {
            stage: "tile_xy".to_string(),
            position: Position::Axes(IndexMap::from([("x".to_string(), 3.0)])),
        });

        assert_eq!(sink.stage("scan_z").unwrap().field("position"), Some("1.25"));
        let tile = sink.stage("tile_xy").unwrap();
        assert_eq!(tile.field("position.x"), Some("3"));
        assert_eq!(tile.field("position.y"), Some("2.5"));
        assert_eq!(tile.field("position"), None);
    }

    #[test]
    fn session_end_resets_state_and_keeps_report() {
        let (_tx, rx) = watch::channel("488".to_string());
        let mut sink = PresentationSink::new(rx);
        sink.handle(ConsoleEvent::SessionChanged {
            camera: "cam0".to_string(),
            state: SessionState::Streaming,
        });
        assert_eq!(sink.session_state("cam0"), SessionState::Streaming);

        sink.handle(ConsoleEvent::SessionEnded {
            camera: "cam0".to_string(),
            report: SessionReport {
                camera: "cam0".to_string(),
                frames_requested: FrameCount::SNAPSHOT,
                frames_emitted: 1,
                outcome: SessionOutcome::Completed,
                teardown_errors: Vec::new(),
            },
        });
        assert_eq!(sink.session_state("cam0"), SessionState::Idle);
        assert_eq!(sink.last_report("cam0").unwrap().frames_emitted, 1);
    }

    #[test]
    fn fault_log_is_bounded() {
        let (_tx, rx) = watch::channel("488".to_string());
        let mut sink = PresentationSink::new(rx);
        for i in 0..(MAX_FAULTS + 5) {
            sink.handle(ConsoleEvent::Fault {
                source: format!("dev{i}"),
                message: "failed".to_string(),
                recoverable: true,
            });
        }
        assert_eq!(sink.faults().count(), MAX_FAULTS);
        assert_eq!(sink.faults().next().unwrap().source, "dev5");
    }

    #[test]
    fn refresh_updates_registered_form() {
        let (_tx, rx) = watch::channel("488".to_string());
        let mut sink = PresentationSink::new(rx);
        sink.register_form(
            "laser_488",
            DeviceKind::Laser,
            WidgetBinding::Generic,
            vec![PropertyDescriptor::new("power_mw")],
        );
        let mut record = PropertyRecord::new();
        record.insert("power_mw".to_string(), 12.5.into());
        sink.handle(ConsoleEvent::PropertiesRefreshed {
            device: "laser_488".to_string(),
            record: record.clone(),
        });

        let form = sink.form("laser_488").unwrap();
        assert_eq!(form.values, record);
        assert_eq!(form.title("laser_488"), "laser laser_488");
    }
}

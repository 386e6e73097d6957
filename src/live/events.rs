//! Events flowing from background tasks to the presentation sink.
//!
//! Two lanes feed the single consumer:
//!
//! - a **bounded data lane** for frames and stage positions. `emit` awaits free capacity, so
//!   a slow consumer backs up the producer instead of dropping frames.
//! - an **unbounded control lane** for state changes, property refreshes and faults.
//!   `notify` never blocks, so a context awaiting teardown can never deadlock against a full
//!   data lane.
//!
//! The receiver prefers the control lane when both have events ready.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{AppResult, ConsoleError};
use crate::hardware::{Frame, Position};
use crate::live::session::{SessionReport, SessionState};
use crate::property::PropertyRecord;

/// Something the presentation sink must render.
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    /// A frame grabbed by a frame worker
    Frame {
        /// Camera that produced the frame
        camera: String,
        /// The frame
        image: Arc<Frame>,
    },
    /// A sampled stage position
    StagePosition {
        /// Stage name
        stage: String,
        /// Position, scalar or per axis
        position: Position,
    },
    /// A device's properties after a load or an edit
    PropertiesRefreshed {
        /// Device name
        device: String,
        /// Every property as the device reports it
        record: PropertyRecord,
    },
    /// The acquisition metadata after an edit
    MetadataRefreshed {
        /// Current metadata
        record: PropertyRecord,
    },
    /// A live session changed state
    SessionChanged {
        /// Camera name
        camera: String,
        /// New state
        state: SessionState,
    },
    /// A live session finished teardown
    SessionEnded {
        /// Camera name
        camera: String,
        /// What happened during the session
        report: SessionReport,
    },
    /// An operation failed in a background context
    Fault {
        /// Device or component the failure came from
        source: String,
        /// Human-readable description
        message: String,
        /// Whether the console keeps working normally
        recoverable: bool,
    },
}

impl ConsoleEvent {
    /// Build a fault event from an error.
    pub fn fault(source: impl Into<String>, error: &ConsoleError) -> Self {
        ConsoleEvent::Fault {
            source: source.into(),
            message: error.to_string(),
            recoverable: error.is_recoverable(),
        }
    }
}

/// Producer side, cloned into every background task.
#[derive(Debug, Clone)]
pub struct EventSender {
    data: mpsc::Sender<ConsoleEvent>,
    control: mpsc::UnboundedSender<ConsoleEvent>,
}

impl EventSender {
    /// Send on the data lane, waiting for capacity.
    pub async fn emit(&self, event: ConsoleEvent) -> AppResult<()> {
        self.data
            .send(event)
            .await
            .map_err(|_| ConsoleError::ChannelClosed)
    }

    /// Send on the control lane. Never blocks; a closed sink is only logged.
    pub fn notify(&self, event: ConsoleEvent) {
        if self.control.send(event).is_err() {
            tracing::trace!("presentation sink gone, dropping control event");
        }
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.data.is_closed() && self.control.is_closed()
    }
}

/// Consumer side, owned by the presentation context.
#[derive(Debug)]
pub struct EventReceiver {
    data: mpsc::Receiver<ConsoleEvent>,
    control: mpsc::UnboundedReceiver<ConsoleEvent>,
}

impl EventReceiver {
    /// Wait for the next event. Returns `None` once every sender is gone and both lanes are
    /// drained.
    pub async fn recv(&mut self) -> Option<ConsoleEvent> {
        tokio::select! {
            biased;
            Some(event) = self.control.recv() => Some(event),
            Some(event) = self.data.recv() => Some(event),
            else => None,
        }
    }

    /// Take the next pending event without waiting.
    pub fn try_recv(&mut self) -> Option<ConsoleEvent> {
        self.control
            .try_recv()
            .or_else(|_| self.data.try_recv())
            .ok()
    }
}

/// Create the two-lane event channel. `capacity` bounds the data lane.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (data_tx, data_rx) = mpsc::channel(capacity.max(1));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    (
        EventSender {
            data: data_tx,
            control: control_tx,
        },
        EventReceiver {
            data: data_rx,
            control: control_rx,
        },
    )
}

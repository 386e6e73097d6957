//! Hardware abstractions for the live console.
//!
//! - `capabilities`: declared capability traits per device kind (`Camera`, `Stage`,
//!   `SignalGenerator`, `Configurable`)
//! - `instrument`: the instrument and acquisition models that own device handles, including
//!   the acquisition's image writers and file transfers
//! - `mock`: simulated devices for tests and the headless binary
//!
//! The shared value types used across those traits live here.

pub mod capabilities;
pub mod instrument;
pub mod mock;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device class. Every class has exactly one lock in the
/// [`LockRegistry`](crate::locks::LockRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Scientific cameras
    Camera,
    /// Stages that sweep the light sheet during capture
    ScanningStage,
    /// Stages that move between tiles
    TilingStage,
    /// Signal-generation (DAQ) boards producing analog/digital waveforms
    Daq,
    /// Lasers
    Laser,
    /// Emission filter wheels
    FilterWheel,
    /// Laser combiners
    Combiner,
    /// Acquisition image writers
    Writer,
    /// Acquisition file transfers to external storage
    Transfer,
}

impl DeviceKind {
    /// Every device kind, in lock-registry order.
    pub const ALL: [DeviceKind; 9] = [
        DeviceKind::Camera,
        DeviceKind::ScanningStage,
        DeviceKind::TilingStage,
        DeviceKind::Daq,
        DeviceKind::Laser,
        DeviceKind::FilterWheel,
        DeviceKind::Combiner,
        DeviceKind::Writer,
        DeviceKind::Transfer,
    ];

    /// Singular name used in configuration files and window titles.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Camera => "camera",
            DeviceKind::ScanningStage => "scanning_stage",
            DeviceKind::TilingStage => "tiling_stage",
            DeviceKind::Daq => "daq",
            DeviceKind::Laser => "laser",
            DeviceKind::FilterWheel => "filter_wheel",
            DeviceKind::Combiner => "combiner",
            DeviceKind::Writer => "writer",
            DeviceKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of frames a camera should deliver in one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameCount {
    /// Stop after this many frames
    Finite(u64),
    /// Stream until cancelled (live view)
    Unbounded,
}

impl FrameCount {
    /// A single-frame snapshot.
    pub const SNAPSHOT: FrameCount = FrameCount::Finite(1);

    /// True once `emitted` frames satisfy the request.
    pub fn is_reached(&self, emitted: u64) -> bool {
        match self {
            FrameCount::Finite(n) => emitted >= *n,
            FrameCount::Unbounded => false,
        }
    }

    /// True for live (unbounded) sessions.
    pub fn is_unbounded(&self) -> bool {
        matches!(self, FrameCount::Unbounded)
    }
}

impl fmt::Display for FrameCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameCount::Finite(n) => write!(f, "{n}"),
            FrameCount::Unbounded => f.write_str("inf"),
        }
    }
}

/// A single 16-bit camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major pixel data, `width * height` long
    pub pixels: Vec<u16>,
    /// Sequence number reported by the camera
    pub frame_number: u64,
    /// Software capture time
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Create a frame stamped with the current time.
    pub fn new(width: u32, height: u32, pixels: Vec<u16>, frame_number: u64) -> Self {
        Self {
            width,
            height,
            pixels,
            frame_number,
            timestamp: Utc::now(),
        }
    }

    /// Whether the pixel buffer matches the declared dimensions.
    pub fn is_consistent(&self) -> bool {
        self.pixels.len() == self.width as usize * self.height as usize
    }
}

/// Stage position as reported by the device.
///
/// Single-axis stages report a scalar; multi-axis stages report one value per axis name.
/// Consumers must branch on the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    /// Single-axis position
    Scalar(f64),
    /// Axis name to position
    Axes(IndexMap<String, f64>),
}

/// Kind of waveform loaded onto a signal-generation board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformKind {
    /// Analog output (galvos, ETL, stage sweep)
    Ao,
    /// Digital output (laser enables, camera trigger)
    Do,
}

impl WaveformKind {
    /// Short name used by DAQ task configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveformKind::Ao => "ao",
            WaveformKind::Do => "do",
        }
    }
}

//! Declared Hardware Capabilities
//!
//! Each device kind the console drives exposes exactly the operations the live core needs,
//! as a small trait:
//!
//! - A camera implements: `Camera + Configurable`
//! - A stage implements: `Stage + Configurable`
//! - A DAQ board implements: `SignalGenerator + Configurable`
//! - Lasers, filter wheels and combiners implement only `Configurable`
//!
//! `Configurable` replaces attribute scanning: every device declares the schema of its editable
//! properties, and the [`PropertyBridge`](crate::property::PropertyBridge) enumerates that
//! schema instead of reflecting over the device.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Does not lock anything itself; callers hold the category lock from
//!   [`LockRegistry`](crate::locks::LockRegistry) around every call
//!
//! # Example
//!
//! ```rust,ignore
//! let _guard = locks.acquire(DeviceKind::Camera).await;
//! camera.prepare().await?;
//! camera.start(FrameCount::Unbounded).await?;
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::hardware::{Frame, FrameCount, Position, WaveformKind};
use crate::property::{PropertyDescriptor, PropertyValue};

/// Capability: Editable Properties
///
/// Devices whose settings the operator can inspect and change.
///
/// # Contract
/// - `property_schema()` is fixed for the lifetime of the device
/// - `read_property` returns what the hardware currently reports, which may differ from
///   the last written value (clamping, rounding, derived values)
/// - `write_property` may change other properties as a side effect
#[async_trait]
pub trait Configurable: Send + Sync {
    /// Editable and read-only properties, in display order.
    fn property_schema(&self) -> Vec<PropertyDescriptor>;

    /// Read one property from the device.
    async fn read_property(&self, name: &str) -> Result<PropertyValue>;

    /// Write one property to the device.
    ///
    /// # Returns
    /// - Ok(()) if the device accepted the value
    /// - Err if the property is unknown, read-only or the value is rejected
    async fn write_property(&self, name: &str, value: PropertyValue) -> Result<()>;
}

/// Capability: Frame Capture
///
/// # Contract
/// - `prepare()` allocates buffers and applies pending settings
/// - `start(count)` arms the sensor for `count` frames
/// - `grab_frame()` blocks until the next frame is available
/// - `abort()` stops acquisition and is safe to call when not started
#[async_trait]
pub trait Camera: Send + Sync {
    /// Prepare the camera for acquisition.
    async fn prepare(&self) -> Result<()>;

    /// Start acquiring `frames` frames.
    async fn start(&self, frames: FrameCount) -> Result<()>;

    /// Stop acquisition.
    async fn abort(&self) -> Result<()>;

    /// Wait for and return the next frame.
    async fn grab_frame(&self) -> Result<Frame>;
}

/// Capability: Position Readout
///
/// Motorized stages. Single-axis stages report [`Position::Scalar`], multi-axis stages report
/// [`Position::Axes`].
#[async_trait]
pub trait Stage: Send + Sync {
    /// Current position in device-native units.
    async fn position(&self) -> Result<Position>;
}

/// Capability: Waveform Generation
///
/// Signal-generation boards that drive galvos, lasers and camera triggers in sync with
/// frame capture.
///
/// # Contract
/// - `generate_waveforms` computes (but does not load) the waveforms of one task
/// - `write_ao_waveforms` / `write_do_waveforms` load the computed waveforms
/// - `start_all` starts every loaded task, `stop_all` stops every task
#[async_trait]
pub trait SignalGenerator: Send + Sync {
    /// Compute waveforms for `task` at `wavelength`.
    async fn generate_waveforms(
        &self,
        task: &str,
        kind: WaveformKind,
        wavelength: &str,
    ) -> Result<()>;

    /// Load computed analog waveforms onto the board.
    async fn write_ao_waveforms(&self) -> Result<()>;

    /// Load computed digital waveforms onto the board.
    async fn write_do_waveforms(&self) -> Result<()>;

    /// Start every task on the board.
    async fn start_all(&self) -> Result<()>;

    /// Stop every task on the board.
    async fn stop_all(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::sync::Mutex;

    struct XyStage {
        axes: Mutex<IndexMap<String, f64>>,
    }

    #[async_trait]
    impl Stage for XyStage {
        async fn position(&self) -> Result<Position> {
            Ok(Position::Axes(self.axes.lock().unwrap().clone()))
        }
    }

    #[tokio::test]
    async fn multi_axis_stage_reports_axes() {
        let mut axes = IndexMap::new();
        axes.insert("x".to_string(), 1.0);
        axes.insert("y".to_string(), -2.5);
        let stage = XyStage {
            axes: Mutex::new(axes),
        };

        match stage.position().await.unwrap() {
            Position::Axes(map) => assert_eq!(map["y"], -2.5),
            Position::Scalar(_) => panic!("expected axes"),
        }
    }
}

//! Mock Hardware Implementations
//!
//! Provides simulated devices for tests and for running the console without physical
//! hardware. All mock devices use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockCamera` - Camera with clamped exposure, derived frame rate and fault injection
//! - `MockStage` - Single-axis stage reporting a scalar position
//! - `MockMultiAxisStage` - Stage reporting one position per axis
//! - `MockSignalGenerator` - DAQ board that records every waveform call
//! - `MockLaser` - Laser with clamped output power
//!
//! [`simulated_instrument`] assembles these into a complete instrument for the headless binary.
//!
//! Every mock counts its hardware calls. Attaching a lock watch
//! (`with_lock_watch(locks)`) makes the mock record each call made while its category lock was
//! *not* held, which is how tests verify the locking discipline.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::config::SimulatedConfig;
use crate::hardware::capabilities::{Camera, Configurable, SignalGenerator, Stage};
use crate::hardware::instrument::Instrument;
use crate::hardware::{DeviceKind, Frame, FrameCount, Position, WaveformKind};
use crate::locks::LockRegistry;
use crate::property::{PropertyDescriptor, PropertyValue};

/// Records hardware calls made without the owning category lock held.
#[derive(Debug)]
struct LockWatch {
    locks: LockRegistry,
    kind: DeviceKind,
    unlocked_calls: AtomicU64,
}

impl LockWatch {
    fn check(&self, operation: &str) {
        if !self.locks.is_held(self.kind) {
            tracing::warn!(category = %self.kind, operation, "hardware call without category lock");
            self.unlocked_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn watch_call(watch: &Option<LockWatch>, operation: &str) {
    if let Some(watch) = watch {
        watch.check(operation);
    }
}

fn unlocked_count(watch: &Option<LockWatch>) -> u64 {
    watch
        .as_ref()
        .map(|p| p.unlocked_calls.load(Ordering::SeqCst))
        .unwrap_or(0)
}

fn expect_f64(name: &str, value: &PropertyValue) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| anyhow!("'{name}' expects a number, got {value}"))
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera with realistic property side effects
///
/// Simulates a camera with:
/// - Exposure clamped to [`MIN_EXPOSURE_MS`](Self::MIN_EXPOSURE_MS)..[`MAX_EXPOSURE_MS`](Self::MAX_EXPOSURE_MS)
/// - Read-only frame rate derived from exposure
/// - Binning restricted to 1, 2 or 4
/// - `grab_frame` waits one frame interval and fails unless the camera was started
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockCamera::new(640, 480);
/// camera.prepare().await?;
/// camera.start(FrameCount::Finite(1)).await?;
/// let frame = camera.grab_frame().await?;
/// ```
pub struct MockCamera {
    resolution: (u32, u32),
    exposure_ms: RwLock<f64>,
    binning: RwLock<i64>,
    frame_interval: Duration,
    started: RwLock<Option<FrameCount>>,
    fail_after: Option<u64>,
    prepare_calls: AtomicU64,
    start_calls: AtomicU64,
    abort_calls: AtomicU64,
    frames_grabbed: AtomicU64,
    watch: Option<LockWatch>,
}

impl MockCamera {
    /// Shortest accepted exposure.
    pub const MIN_EXPOSURE_MS: f64 = 1.0;
    /// Longest accepted exposure.
    pub const MAX_EXPOSURE_MS: f64 = 1000.0;

    /// Create new mock camera with specified resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            exposure_ms: RwLock::new(10.0),
            binning: RwLock::new(1),
            frame_interval: Duration::from_millis(1),
            started: RwLock::new(None),
            fail_after: None,
            prepare_calls: AtomicU64::new(0),
            start_calls: AtomicU64::new(0),
            abort_calls: AtomicU64::new(0),
            frames_grabbed: AtomicU64::new(0),
            watch: None,
        }
    }

    /// Simulated readout time per frame.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Make every `grab_frame` after the first `frames` fail.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Record calls made without the camera lock held.
    pub fn with_lock_watch(mut self, locks: LockRegistry) -> Self {
        self.watch = Some(LockWatch {
            locks,
            kind: DeviceKind::Camera,
            unlocked_calls: AtomicU64::new(0),
        });
        self
    }

    /// Number of `prepare()` calls.
    pub fn prepare_calls(&self) -> u64 {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    /// Number of `start()` calls.
    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of `abort()` calls.
    pub fn abort_calls(&self) -> u64 {
        self.abort_calls.load(Ordering::SeqCst)
    }

    /// Frames successfully grabbed since creation.
    pub fn frames_grabbed(&self) -> u64 {
        self.frames_grabbed.load(Ordering::SeqCst)
    }

    /// Hardware calls made without the camera lock held.
    pub fn unlocked_calls(&self) -> u64 {
        unlocked_count(&self.watch)
    }

    /// Whether the camera is between `start()` and `abort()`.
    pub async fn is_started(&self) -> bool {
        self.started.read().await.is_some()
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(2048, 2048)
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn prepare(&self) -> Result<()> {
        watch_call(&self.watch, "prepare");
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("MockCamera: prepared");
        Ok(())
    }

    async fn start(&self, frames: FrameCount) -> Result<()> {
        watch_call(&self.watch, "start");
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.started.write().await = Some(frames);
        tracing::debug!(%frames, "MockCamera: started");
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        watch_call(&self.watch, "abort");
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        *self.started.write().await = None;
        tracing::debug!("MockCamera: aborted");
        Ok(())
    }

    async fn grab_frame(&self) -> Result<Frame> {
        watch_call(&self.watch, "grab_frame");
        if self.started.read().await.is_none() {
            bail!("MockCamera: grab_frame before start");
        }
        let grabbed = self.frames_grabbed.load(Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| grabbed >= limit) {
            bail!("MockCamera: frame timeout");
        }

        // CRITICAL: Use tokio::time::sleep, NOT std::thread::sleep
        sleep(self.frame_interval).await;

        let frame_number = self.frames_grabbed.fetch_add(1, Ordering::SeqCst) + 1;
        let (width, height) = self.resolution;
        let pixels: Vec<u16> = (0..width * height)
            .map(|i| ((i as u64 + frame_number) % 65536) as u16)
            .collect();
        Ok(Frame::new(width, height, pixels, frame_number))
    }
}

#[async_trait]
impl Configurable for MockCamera {
    fn property_schema(&self) -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new("exposure_ms").with_unit("ms"),
            PropertyDescriptor::new("frame_rate_hz")
                .with_unit("Hz")
                .read_only(),
            PropertyDescriptor::new("binning"),
            PropertyDescriptor::new("width_px").with_unit("px").read_only(),
            PropertyDescriptor::new("height_px").with_unit("px").read_only(),
        ]
    }

    async fn read_property(&self, name: &str) -> Result<PropertyValue> {
        let binning = *self.binning.read().await;
        match name {
            "exposure_ms" => Ok(PropertyValue::Float(*self.exposure_ms.read().await)),
            "frame_rate_hz" => Ok(PropertyValue::Float(
                1000.0 / *self.exposure_ms.read().await,
            )),
            "binning" => Ok(PropertyValue::Int(binning)),
            "width_px" => Ok(PropertyValue::Int(self.resolution.0 as i64 / binning)),
            "height_px" => Ok(PropertyValue::Int(self.resolution.1 as i64 / binning)),
            other => bail!("MockCamera: unknown property '{other}'"),
        }
    }

    async fn write_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "exposure_ms" => {
                let requested = expect_f64(name, &value)?;
                if requested <= 0.0 {
                    bail!("MockCamera: exposure must be positive");
                }
                *self.exposure_ms.write().await =
                    requested.clamp(Self::MIN_EXPOSURE_MS, Self::MAX_EXPOSURE_MS);
                Ok(())
            }
            "binning" => match value {
                PropertyValue::Int(b @ (1 | 2 | 4)) => {
                    *self.binning.write().await = b;
                    Ok(())
                }
                other => bail!("MockCamera: unsupported binning {other}"),
            },
            "frame_rate_hz" | "width_px" | "height_px" => {
                bail!("MockCamera: '{name}' is read-only")
            }
            other => bail!("MockCamera: unknown property '{other}'"),
        }
    }
}

// =============================================================================
// MockStage - Simulated Single-Axis Stage
// =============================================================================

/// Mock single-axis stage.
///
/// Writing `position` teleports the stage; there is no motion simulation because the
/// console only ever samples positions.
pub struct MockStage {
    position: RwLock<f64>,
    speed_mm_s: RwLock<f64>,
    failing: AtomicBool,
    reads: AtomicU64,
    watch: Option<LockWatch>,
}

impl MockStage {
    /// Create new mock stage at position 0.0mm
    pub fn new() -> Self {
        Self::with_position(0.0)
    }

    /// Create new mock stage at specified initial position
    pub fn with_position(initial_position: f64) -> Self {
        Self {
            position: RwLock::new(initial_position),
            speed_mm_s: RwLock::new(10.0),
            failing: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            watch: None,
        }
    }

    /// Record reads made without the lock of `kind` held.
    pub fn with_lock_watch(mut self, locks: LockRegistry, kind: DeviceKind) -> Self {
        self.watch = Some(LockWatch {
            locks,
            kind,
            unlocked_calls: AtomicU64::new(0),
        });
        self
    }

    /// Make subsequent position reads fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Move the simulated stage.
    pub async fn set_position(&self, position: f64) {
        *self.position.write().await = position;
    }

    /// Successful position reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Reads made without the category lock held.
    pub fn unlocked_calls(&self) -> u64 {
        unlocked_count(&self.watch)
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for MockStage {
    async fn position(&self) -> Result<Position> {
        watch_call(&self.watch, "position");
        if self.failing.load(Ordering::SeqCst) {
            bail!("MockStage: encoder read failed");
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Position::Scalar(*self.position.read().await))
    }
}

#[async_trait]
impl Configurable for MockStage {
    fn property_schema(&self) -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new("position").with_unit("mm"),
            PropertyDescriptor::new("speed_mm_s").with_unit("mm/s"),
        ]
    }

    async fn read_property(&self, name: &str) -> Result<PropertyValue> {
        match name {
            "position" => Ok(PropertyValue::Float(*self.position.read().await)),
            "speed_mm_s" => Ok(PropertyValue::Float(*self.speed_mm_s.read().await)),
            other => bail!("MockStage: unknown property '{other}'"),
        }
    }

    async fn write_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        let value = expect_f64(name, &value)?;
        match name {
            "position" => *self.position.write().await = value,
            "speed_mm_s" if value > 0.0 => *self.speed_mm_s.write().await = value,
            "speed_mm_s" => bail!("MockStage: speed must be positive"),
            other => bail!("MockStage: unknown property '{other}'"),
        }
        Ok(())
    }
}

// =============================================================================
// MockMultiAxisStage - Simulated Multi-Axis Stage
// =============================================================================

/// Mock stage reporting one position per axis.
pub struct MockMultiAxisStage {
    axes: RwLock<IndexMap<String, f64>>,
    failing: AtomicBool,
    watch: Option<LockWatch>,
}

impl MockMultiAxisStage {
    /// Create a stage with the given axes, all at 0.0.
    pub fn new<I, S>(axes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            axes: RwLock::new(axes.into_iter().map(|a| (a.into(), 0.0)).collect()),
            failing: AtomicBool::new(false),
            watch: None,
        }
    }

    /// Record reads made without the lock of `kind` held.
    pub fn with_lock_watch(mut self, locks: LockRegistry, kind: DeviceKind) -> Self {
        self.watch = Some(LockWatch {
            locks,
            kind,
            unlocked_calls: AtomicU64::new(0),
        });
        self
    }

    /// Move one axis.
    pub async fn set_axis(&self, axis: &str, position: f64) -> Result<()> {
        let mut axes = self.axes.write().await;
        let slot = axes
            .get_mut(axis)
            .ok_or_else(|| anyhow!("MockMultiAxisStage: unknown axis '{axis}'"))?;
        *slot = position;
        Ok(())
    }

    /// Make subsequent position reads fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Reads made without the category lock held.
    pub fn unlocked_calls(&self) -> u64 {
        unlocked_count(&self.watch)
    }
}

#[async_trait]
impl Stage for MockMultiAxisStage {
    async fn position(&self) -> Result<Position> {
        watch_call(&self.watch, "position");
        if self.failing.load(Ordering::SeqCst) {
            bail!("MockMultiAxisStage: controller not responding");
        }
        Ok(Position::Axes(self.axes.read().await.clone()))
    }
}

#[async_trait]
impl Configurable for MockMultiAxisStage {
    fn property_schema(&self) -> Vec<PropertyDescriptor> {
        vec![PropertyDescriptor::new("position").with_unit("mm")]
    }

    async fn read_property(&self, name: &str) -> Result<PropertyValue> {
        match name {
            "position" => {
                let axes = self.axes.read().await;
                Ok(PropertyValue::Map(
                    axes.iter()
                        .map(|(axis, position)| (axis.clone(), PropertyValue::Float(*position)))
                        .collect(),
                ))
            }
            other => bail!("MockMultiAxisStage: unknown property '{other}'"),
        }
    }

    async fn write_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        match (name, value) {
            ("position", PropertyValue::Map(requested)) => {
                for (axis, position) in &requested {
                    let position = expect_f64(axis, position)?;
                    self.set_axis(axis, position).await?;
                }
                Ok(())
            }
            (name, value) => bail!("MockMultiAxisStage: cannot set '{name}' to {value}"),
        }
    }
}

// =============================================================================
// MockSignalGenerator - Simulated DAQ Board
// =============================================================================

/// Mock DAQ board recording every call in order.
pub struct MockSignalGenerator {
    calls: Mutex<Vec<String>>,
    running: AtomicBool,
    sample_rate_hz: RwLock<f64>,
    fail_start: AtomicBool,
    watch: Option<LockWatch>,
}

impl MockSignalGenerator {
    /// Create an idle board.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            sample_rate_hz: RwLock::new(10_000.0),
            fail_start: AtomicBool::new(false),
            watch: None,
        }
    }

    /// Record calls made without the DAQ lock held.
    pub fn with_lock_watch(mut self, locks: LockRegistry) -> Self {
        self.watch = Some(LockWatch {
            locks,
            kind: DeviceKind::Daq,
            unlocked_calls: AtomicU64::new(0),
        });
        self
    }

    /// Make `start_all` fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of calls whose description starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Whether tasks are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Calls made without the DAQ lock held.
    pub fn unlocked_calls(&self) -> u64 {
        unlocked_count(&self.watch)
    }

    fn record(&self, call: String) {
        watch_call(&self.watch, &call);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Default for MockSignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalGenerator for MockSignalGenerator {
    async fn generate_waveforms(
        &self,
        task: &str,
        kind: WaveformKind,
        wavelength: &str,
    ) -> Result<()> {
        self.record(format!("generate {task} {} {wavelength}", kind.as_str()));
        Ok(())
    }

    async fn write_ao_waveforms(&self) -> Result<()> {
        self.record("write_ao".to_string());
        Ok(())
    }

    async fn write_do_waveforms(&self) -> Result<()> {
        self.record("write_do".to_string());
        Ok(())
    }

    async fn start_all(&self) -> Result<()> {
        self.record("start_all".to_string());
        if self.fail_start.load(Ordering::SeqCst) {
            bail!("MockSignalGenerator: task reserved by another process");
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_all(&self) -> Result<()> {
        self.record("stop_all".to_string());
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Configurable for MockSignalGenerator {
    fn property_schema(&self) -> Vec<PropertyDescriptor> {
        vec![PropertyDescriptor::new("sample_rate_hz").with_unit("Hz")]
    }

    async fn read_property(&self, name: &str) -> Result<PropertyValue> {
        match name {
            "sample_rate_hz" => Ok(PropertyValue::Float(*self.sample_rate_hz.read().await)),
            other => bail!("MockSignalGenerator: unknown property '{other}'"),
        }
    }

    async fn write_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "sample_rate_hz" => {
                let rate = expect_f64(name, &value)?;
                if !(1.0..=1_000_000.0).contains(&rate) {
                    bail!("MockSignalGenerator: sample rate {rate} out of range");
                }
                *self.sample_rate_hz.write().await = rate;
                Ok(())
            }
            other => bail!("MockSignalGenerator: unknown property '{other}'"),
        }
    }
}

// =============================================================================
// MockLaser - Simulated Laser
// =============================================================================

/// Mock laser with clamped power.
pub struct MockLaser {
    wavelength_nm: i64,
    max_power_mw: f64,
    power_mw: RwLock<f64>,
    enabled: RwLock<bool>,
}

impl MockLaser {
    /// Create a disabled laser at 0 mW.
    pub fn new(wavelength_nm: i64, max_power_mw: f64) -> Self {
        Self {
            wavelength_nm,
            max_power_mw,
            power_mw: RwLock::new(0.0),
            enabled: RwLock::new(false),
        }
    }
}

#[async_trait]
impl Configurable for MockLaser {
    fn property_schema(&self) -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new("wavelength_nm")
                .with_unit("nm")
                .read_only(),
            PropertyDescriptor::new("power_mw").with_unit("mW"),
            PropertyDescriptor::new("enabled"),
        ]
    }

    async fn read_property(&self, name: &str) -> Result<PropertyValue> {
        match name {
            "wavelength_nm" => Ok(PropertyValue::Int(self.wavelength_nm)),
            "power_mw" => Ok(PropertyValue::Float(*self.power_mw.read().await)),
            "enabled" => Ok(PropertyValue::Bool(*self.enabled.read().await)),
            other => bail!("MockLaser: unknown property '{other}'"),
        }
    }

    async fn write_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "power_mw" => {
                let power = expect_f64(name, &value)?;
                *self.power_mw.write().await = power.clamp(0.0, self.max_power_mw);
                Ok(())
            }
            "enabled" => {
                let enabled = value
                    .as_bool()
                    .ok_or_else(|| anyhow!("MockLaser: 'enabled' expects a boolean"))?;
                *self.enabled.write().await = enabled;
                Ok(())
            }
            "wavelength_nm" => bail!("MockLaser: 'wavelength_nm' is read-only"),
            other => bail!("MockLaser: unknown property '{other}'"),
        }
    }
}

// =============================================================================
// Simulated instrument
// =============================================================================

/// Build an instrument of mock devices as described by `config`.
pub fn simulated_instrument(config: &SimulatedConfig) -> Instrument {
    let (width, height) = config.camera_resolution;
    let mut instrument = Instrument::new();
    for name in &config.cameras {
        instrument = instrument.with_camera(
            name,
            Arc::new(MockCamera::new(width, height).with_frame_interval(Duration::from_millis(20))),
        );
    }
    for name in &config.scanning_stages {
        instrument = instrument.with_scanning_stage(name, Arc::new(MockStage::new()));
    }
    for name in &config.tiling_stages {
        instrument = instrument.with_tiling_stage(name, Arc::new(MockMultiAxisStage::new(["x", "y"])));
    }
    for name in &config.daqs {
        instrument = instrument.with_daq(name, Arc::new(MockSignalGenerator::new()));
    }
    for (name, wavelength) in &config.lasers {
        instrument = instrument.with_laser(name, Arc::new(MockLaser::new(*wavelength, 100.0)));
    }
    instrument
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_camera_requires_start() {
        let camera = MockCamera::new(4, 4);
        assert!(camera.grab_frame().await.is_err());

        camera.prepare().await.unwrap();
        camera.start(FrameCount::Unbounded).await.unwrap();
        let frame = camera.grab_frame().await.unwrap();
        assert_eq!(frame.frame_number, 1);
        assert!(frame.is_consistent());

        camera.abort().await.unwrap();
        assert!(!camera.is_started().await);
        assert!(camera.grab_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_camera_fault_injection() {
        let camera = MockCamera::new(2, 2).failing_after(2);
        camera.start(FrameCount::Unbounded).await.unwrap();
        camera.grab_frame().await.unwrap();
        camera.grab_frame().await.unwrap();
        assert!(camera.grab_frame().await.is_err());
        assert_eq!(camera.frames_grabbed(), 2);
    }

    #[tokio::test]
    async fn test_mock_camera_binning_changes_size() {
        let camera = MockCamera::new(64, 32);
        camera
            .write_property("binning", PropertyValue::Int(2))
            .await
            .unwrap();
        assert_eq!(
            camera.read_property("width_px").await.unwrap(),
            PropertyValue::Int(32)
        );
        assert!(camera
            .write_property("binning", PropertyValue::Int(3))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_lock_unlocked_counts_unlocked_calls() {
        let locks = LockRegistry::new();
        let camera = MockCamera::new(2, 2).with_lock_watch(locks.clone());

        camera.prepare().await.unwrap();
        assert_eq!(camera.unlocked_calls(), 1);

        let _guard = locks.acquire(DeviceKind::Camera).await;
        camera.prepare().await.unwrap();
        assert_eq!(camera.unlocked_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_stage_failure_toggle() {
        let stage = MockStage::with_position(3.0);
        assert_eq!(stage.position().await.unwrap(), Position::Scalar(3.0));
        stage.set_failing(true);
        assert!(stage.position().await.is_err());
        stage.set_failing(false);
        stage.position().await.unwrap();
        assert_eq!(stage.reads(), 2);
    }

    #[tokio::test]
    async fn test_multi_axis_stage_property_roundtrip() {
        let stage = MockMultiAxisStage::new(["x", "y", "z"]);
        stage
            .write_property(
                "position",
                PropertyValue::Map(IndexMap::from([("y".to_string(), PropertyValue::Float(4.5))])),
            )
            .await
            .unwrap();
        assert!(stage
            .write_property("position", PropertyValue::from("4.5"))
            .await
            .is_err());
        match stage.position().await.unwrap() {
            Position::Axes(axes) => {
                assert_eq!(axes["y"], 4.5);
                assert_eq!(axes["x"], 0.0);
            }
            Position::Scalar(_) => panic!("expected axes"),
        }
    }

    #[tokio::test]
    async fn test_signal_generator_records_calls() {
        let daq = MockSignalGenerator::new();
        daq.generate_waveforms("ao_task", WaveformKind::Ao, "488")
            .await
            .unwrap();
        daq.start_all().await.unwrap();
        assert!(daq.is_running());
        daq.stop_all().await.unwrap();
        assert!(!daq.is_running());
        assert_eq!(
            daq.calls(),
            vec!["generate ao_task ao 488", "start_all", "stop_all"]
        );
    }

    #[test]
    fn test_simulated_instrument_matches_config() {
        let instrument = simulated_instrument(&SimulatedConfig::default());
        assert_eq!(instrument.camera_names().collect::<Vec<_>>(), vec!["cam0"]);
        assert_eq!(instrument.stages().len(), 2);
        assert_eq!(instrument.daqs().len(), 1);
        assert_eq!(instrument.configurable_devices().len(), 5);
    }

    #[tokio::test]
    async fn test_mock_laser_clamps_power() {
        let laser = MockLaser::new(488, 100.0);
        laser
            .write_property("power_mw", PropertyValue::Float(250.0))
            .await
            .unwrap();
        assert_eq!(
            laser.read_property("power_mw").await.unwrap(),
            PropertyValue::Float(100.0)
        );
    }
}

//! Instrument and acquisition models.
//!
//! The instrument model owns every device handle, grouped into named collections by kind.
//! Each capability-bearing device is stored twice over the same allocation: once as its
//! capability (`Arc<dyn Camera>`, ...) for the live core and once as `Arc<dyn Configurable>`
//! for the property bridge. The live core only ever clones handles out of the model.
//!
//! The acquisition model holds the editable metadata record plus the image writers and file
//! transfers of an acquisition. Writers and transfers are configurable devices of their own,
//! each kind guarded by its own category lock like any hardware.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::RwLock;

use crate::config::ConsoleConfig;
use crate::error::{AppResult, ConsoleError};
use crate::hardware::capabilities::{Camera, Configurable, SignalGenerator, Stage};
use crate::hardware::DeviceKind;
use crate::property::{PropertyDescriptor, PropertyRecord, PropertyValue};

/// A device handle together with its property view.
pub struct DeviceSlot<T: ?Sized> {
    /// Capability used by the live core
    pub handle: Arc<T>,
    /// Same device seen through its editable properties
    pub properties: Arc<dyn Configurable>,
}

impl<T: ?Sized> Clone for DeviceSlot<T> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            properties: Arc::clone(&self.properties),
        }
    }
}

/// Named device collections of the microscope.
#[derive(Default)]
pub struct Instrument {
    cameras: IndexMap<String, DeviceSlot<dyn Camera>>,
    scanning_stages: IndexMap<String, DeviceSlot<dyn Stage>>,
    tiling_stages: IndexMap<String, DeviceSlot<dyn Stage>>,
    daqs: IndexMap<String, DeviceSlot<dyn SignalGenerator>>,
    lasers: IndexMap<String, Arc<dyn Configurable>>,
    filter_wheels: IndexMap<String, Arc<dyn Configurable>>,
    combiners: IndexMap<String, Arc<dyn Configurable>>,
}

impl Instrument {
    /// Empty instrument.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a camera.
    pub fn with_camera<C>(mut self, name: impl Into<String>, camera: Arc<C>) -> Self
    where
        C: Camera + Configurable + 'static,
    {
        let properties: Arc<dyn Configurable> = camera.clone();
        let handle: Arc<dyn Camera> = camera;
        self.cameras.insert(
            name.into(),
            DeviceSlot {
                handle,
                properties,
            },
        );
        self
    }

    /// Add a scanning stage.
    pub fn with_scanning_stage<S>(mut self, name: impl Into<String>, stage: Arc<S>) -> Self
    where
        S: Stage + Configurable + 'static,
    {
        let properties: Arc<dyn Configurable> = stage.clone();
        let handle: Arc<dyn Stage> = stage;
        self.scanning_stages.insert(
            name.into(),
            DeviceSlot {
                handle,
                properties,
            },
        );
        self
    }

    /// Add a tiling stage.
    pub fn with_tiling_stage<S>(mut self, name: impl Into<String>, stage: Arc<S>) -> Self
    where
        S: Stage + Configurable + 'static,
    {
        let properties: Arc<dyn Configurable> = stage.clone();
        let handle: Arc<dyn Stage> = stage;
        self.tiling_stages.insert(
            name.into(),
            DeviceSlot {
                handle,
                properties,
            },
        );
        self
    }

    /// Add a signal-generation board.
    pub fn with_daq<D>(mut self, name: impl Into<String>, daq: Arc<D>) -> Self
    where
        D: SignalGenerator + Configurable + 'static,
    {
        let properties: Arc<dyn Configurable> = daq.clone();
        let handle: Arc<dyn SignalGenerator> = daq;
        self.daqs.insert(
            name.into(),
            DeviceSlot {
                handle,
                properties,
            },
        );
        self
    }

    /// Add a laser.
    pub fn with_laser(mut self, name: impl Into<String>, laser: Arc<dyn Configurable>) -> Self {
        self.lasers.insert(name.into(), laser);
        self
    }

    /// Add a filter wheel.
    pub fn with_filter_wheel(
        mut self,
        name: impl Into<String>,
        wheel: Arc<dyn Configurable>,
    ) -> Self {
        self.filter_wheels.insert(name.into(), wheel);
        self
    }

    /// Add a laser combiner.
    pub fn with_combiner(
        mut self,
        name: impl Into<String>,
        combiner: Arc<dyn Configurable>,
    ) -> Self {
        self.combiners.insert(name.into(), combiner);
        self
    }

    /// Camera handle by name.
    pub fn camera(&self, name: &str) -> AppResult<Arc<dyn Camera>> {
        self.cameras
            .get(name)
            .map(|slot| Arc::clone(&slot.handle))
            .ok_or_else(|| ConsoleError::UnknownDevice(name.to_string()))
    }

    /// Camera names in configuration order.
    pub fn camera_names(&self) -> impl Iterator<Item = &str> {
        self.cameras.keys().map(String::as_str)
    }

    /// Every signal-generation board.
    pub fn daqs(&self) -> Vec<(String, Arc<dyn SignalGenerator>)> {
        self.daqs
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(&slot.handle)))
            .collect()
    }

    /// Every stage with the category whose lock guards it; scanning stages first.
    pub fn stages(&self) -> Vec<(String, DeviceKind, Arc<dyn Stage>)> {
        let scanning = self
            .scanning_stages
            .iter()
            .map(|(name, slot)| (name, DeviceKind::ScanningStage, slot));
        let tiling = self
            .tiling_stages
            .iter()
            .map(|(name, slot)| (name, DeviceKind::TilingStage, slot));
        scanning
            .chain(tiling)
            .map(|(name, kind, slot)| (name.clone(), kind, Arc::clone(&slot.handle)))
            .collect()
    }

    /// Every device with editable properties, grouped by kind.
    pub fn configurable_devices(&self) -> Vec<(String, DeviceKind, Arc<dyn Configurable>)> {
        fn slots<T: ?Sized>(
            map: &IndexMap<String, DeviceSlot<T>>,
            kind: DeviceKind,
        ) -> impl Iterator<Item = (String, DeviceKind, Arc<dyn Configurable>)> + '_ {
            map.iter()
                .map(move |(name, slot)| (name.clone(), kind, Arc::clone(&slot.properties)))
        }
        fn plain(
            map: &IndexMap<String, Arc<dyn Configurable>>,
            kind: DeviceKind,
        ) -> impl Iterator<Item = (String, DeviceKind, Arc<dyn Configurable>)> + '_ {
            map.iter()
                .map(move |(name, device)| (name.clone(), kind, Arc::clone(device)))
        }

        plain(&self.lasers, DeviceKind::Laser)
            .chain(plain(&self.combiners, DeviceKind::Combiner))
            .chain(slots(&self.cameras, DeviceKind::Camera))
            .chain(slots(&self.tiling_stages, DeviceKind::TilingStage))
            .chain(slots(&self.scanning_stages, DeviceKind::ScanningStage))
            .chain(plain(&self.filter_wheels, DeviceKind::FilterWheel))
            .chain(slots(&self.daqs, DeviceKind::Daq))
            .collect()
    }
}

fn read<T: Clone>(lock: &StdRwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(lock: &StdRwLock<T>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

fn expect_text(name: &str, value: &PropertyValue) -> anyhow::Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("'{name}' expects text, got {value}"))
}

/// Compression choices accepted by [`ImageWriter`].
pub const COMPRESSIONS: [&str; 3] = ["none", "lz4", "zstd"];

/// Local image writer of one camera.
#[derive(Debug)]
pub struct ImageWriter {
    camera: String,
    path: StdRwLock<PathBuf>,
    compression: StdRwLock<String>,
}

impl ImageWriter {
    /// Writer storing `camera`'s images under `path`, uncompressed.
    pub fn new(camera: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            camera: camera.into(),
            path: StdRwLock::new(path.into()),
            compression: StdRwLock::new(COMPRESSIONS[0].to_string()),
        }
    }

    /// Select the compression; unknown names are rejected.
    pub fn with_compression(self, compression: &str) -> anyhow::Result<Self> {
        if !COMPRESSIONS.contains(&compression) {
            bail!("unknown compression '{compression}'");
        }
        write(&self.compression, compression.to_string());
        Ok(self)
    }

    /// Camera whose frames this writer stores.
    pub fn camera(&self) -> &str {
        &self.camera
    }

    /// Current storage directory.
    pub fn path(&self) -> PathBuf {
        read(&self.path)
    }
}

#[async_trait]
impl Configurable for ImageWriter {
    fn property_schema(&self) -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new("camera").read_only(),
            PropertyDescriptor::new("path"),
            PropertyDescriptor::new("compression"),
        ]
    }

    async fn read_property(&self, name: &str) -> anyhow::Result<PropertyValue> {
        match name {
            "camera" => Ok(self.camera.as_str().into()),
            "path" => Ok(self.path().display().to_string().into()),
            "compression" => Ok(read(&self.compression).into()),
            other => bail!("ImageWriter: unknown property '{other}'"),
        }
    }

    async fn write_property(&self, name: &str, value: PropertyValue) -> anyhow::Result<()> {
        match name {
            "path" => {
                let path = expect_text(name, &value)?;
                if path.trim().is_empty() {
                    bail!("ImageWriter: 'path' must not be empty");
                }
                write(&self.path, PathBuf::from(path));
                Ok(())
            }
            "compression" => {
                let compression = expect_text(name, &value)?;
                if !COMPRESSIONS.contains(&compression.as_str()) {
                    bail!(
                        "ImageWriter: compression must be one of {}",
                        COMPRESSIONS.join(", ")
                    );
                }
                write(&self.compression, compression);
                Ok(())
            }
            "camera" => bail!("ImageWriter: 'camera' is read-only"),
            other => bail!("ImageWriter: unknown property '{other}'"),
        }
    }
}

/// Copy of finished acquisitions to external storage.
#[derive(Debug)]
pub struct FileTransfer {
    external_path: StdRwLock<PathBuf>,
    verify_checksums: StdRwLock<bool>,
}

impl FileTransfer {
    /// Transfer to `external_path`.
    pub fn new(external_path: impl Into<PathBuf>, verify_checksums: bool) -> Self {
        Self {
            external_path: StdRwLock::new(external_path.into()),
            verify_checksums: StdRwLock::new(verify_checksums),
        }
    }

    /// Current destination.
    pub fn external_path(&self) -> PathBuf {
        read(&self.external_path)
    }
}

#[async_trait]
impl Configurable for FileTransfer {
    fn property_schema(&self) -> Vec<PropertyDescriptor> {
        vec![
            PropertyDescriptor::new("external_path"),
            PropertyDescriptor::new("verify_checksums"),
        ]
    }

    async fn read_property(&self, name: &str) -> anyhow::Result<PropertyValue> {
        match name {
            "external_path" => Ok(self.external_path().display().to_string().into()),
            "verify_checksums" => Ok(PropertyValue::Bool(read(&self.verify_checksums))),
            other => bail!("FileTransfer: unknown property '{other}'"),
        }
    }

    async fn write_property(&self, name: &str, value: PropertyValue) -> anyhow::Result<()> {
        match name {
            "external_path" => {
                let path = expect_text(name, &value)?;
                if path.trim().is_empty() {
                    bail!("FileTransfer: 'external_path' must not be empty");
                }
                write(&self.external_path, PathBuf::from(path));
                Ok(())
            }
            "verify_checksums" => {
                let verify = value
                    .as_bool()
                    .ok_or_else(|| anyhow!("'{name}' expects a boolean, got {value}"))?;
                write(&self.verify_checksums, verify);
                Ok(())
            }
            other => bail!("FileTransfer: unknown property '{other}'"),
        }
    }
}

/// Acquisition settings shared with the console.
#[derive(Debug, Default)]
pub struct Acquisition {
    writers: IndexMap<String, Arc<ImageWriter>>,
    transfers: IndexMap<String, Arc<FileTransfer>>,
    metadata: RwLock<PropertyRecord>,
}

impl Acquisition {
    /// Acquisition with `metadata` and no writers or transfers.
    pub fn new(metadata: PropertyRecord) -> Self {
        Self {
            metadata: RwLock::new(metadata),
            ..Self::default()
        }
    }

    /// Add an image writer.
    pub fn with_writer(mut self, name: impl Into<String>, writer: ImageWriter) -> Self {
        self.writers.insert(name.into(), Arc::new(writer));
        self
    }

    /// Add a file transfer.
    pub fn with_transfer(mut self, name: impl Into<String>, transfer: FileTransfer) -> Self {
        self.transfers.insert(name.into(), Arc::new(transfer));
        self
    }

    /// Build from the `[acquisition]` section of the configuration.
    pub fn from_config(config: &ConsoleConfig) -> AppResult<Self> {
        let mut acquisition = Self::new(config.acquisition.metadata.clone());
        for (name, writer) in &config.acquisition.writers {
            let device = ImageWriter::new(&writer.camera, &writer.path)
                .with_compression(&writer.compression)
                .map_err(|e| ConsoleError::Configuration(format!("writer '{name}': {e}")))?;
            acquisition = acquisition.with_writer(name, device);
        }
        for (name, transfer) in &config.acquisition.transfers {
            acquisition = acquisition.with_transfer(
                name,
                FileTransfer::new(&transfer.external_path, transfer.verify_checksums),
            );
        }
        Ok(acquisition)
    }

    /// Current storage directory of the first writer bound to `camera`.
    pub fn writer_path(&self, camera: &str) -> Option<PathBuf> {
        self.writers
            .values()
            .find(|writer| writer.camera() == camera)
            .map(|writer| writer.path())
    }

    /// Writers and transfers with their lock categories; writers first.
    pub fn configurable_devices(&self) -> Vec<(String, DeviceKind, Arc<dyn Configurable>)> {
        let writers = self.writers.iter().map(|(name, writer)| {
            let device: Arc<dyn Configurable> = writer.clone();
            (name.clone(), DeviceKind::Writer, device)
        });
        let transfers = self.transfers.iter().map(|(name, transfer)| {
            let device: Arc<dyn Configurable> = transfer.clone();
            (name.clone(), DeviceKind::Transfer, device)
        });
        writers.chain(transfers).collect()
    }

    /// Snapshot of the metadata record.
    pub async fn metadata(&self) -> PropertyRecord {
        self.metadata.read().await.clone()
    }

    /// Overwrite one existing metadata field.
    pub async fn set_metadata(&self, key: &str, value: PropertyValue) -> AppResult<()> {
        let mut metadata = self.metadata.write().await;
        let slot = metadata
            .get_mut(key)
            .ok_or_else(|| ConsoleError::UnknownProperty {
                device: "metadata".to_string(),
                property: key.to_string(),
            })?;
        *slot = value;
        Ok(())
    }
}

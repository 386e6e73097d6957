//! Device property bridge.
//!
//! Reflects a device's declared properties into a generic key→value record and propagates
//! operator edits back to the hardware. Inspired by ScopeFoundry's LoggedQuantity, but the
//! synchronization is explicit: one edit is one locked write followed by a full re-read.
//!
//! # Edit sequence
//!
//! ```text
//! acquire(category) ─► write(attr, value) ─► re-read every property ─► release
//!                                                    │
//!                                                    └─► refreshed record to the display
//! ```
//!
//! The whole record is re-read because a single write can change other properties (a new
//! exposure time changes the frame rate). The displayed value therefore always equals the
//! device's post-write report, never the value the operator typed.
//!
//! Acquisition metadata has no hardware behind it and is edited through [`MetadataBridge`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{AppResult, ConsoleError};
use crate::hardware::capabilities::Configurable;
use crate::hardware::instrument::Acquisition;
use crate::hardware::DeviceKind;
use crate::locks::{CategoryGuard, LockRegistry};

// =============================================================================
// Values and schema
// =============================================================================

/// A property value as shown in an editable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean switch
    Bool(bool),
    /// Integer field
    Int(i64),
    /// Floating point field
    Float(f64),
    /// Free text or enumerated choice
    Text(String),
    /// Named entries, e.g. one position per stage axis
    Map(IndexMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Entries of a map value.
    pub fn as_map(&self) -> Option<&IndexMap<String, PropertyValue>> {
        match self {
            PropertyValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Replace the entry at the dotted `path` (`x`, `offset.x`) and return the whole value.
    ///
    /// Only existing entries can be replaced; anything else is an error.
    pub fn with_entry(mut self, path: &str, value: PropertyValue) -> anyhow::Result<Self> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let entries = match &mut self {
            PropertyValue::Map(entries) => entries,
            other => anyhow::bail!("{other} has no entry '{head}'"),
        };
        let slot = entries
            .get_mut(head)
            .ok_or_else(|| anyhow::anyhow!("no entry '{head}'"))?;
        *slot = match rest {
            Some(rest) => std::mem::replace(slot, PropertyValue::Bool(false)).with_entry(rest, value)?,
            None => value,
        };
        Ok(self)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => f.write_str(v),
            PropertyValue::Map(entries) => {
                let json = serde_json::to_string(entries).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<IndexMap<String, PropertyValue>> for PropertyValue {
    fn from(value: IndexMap<String, PropertyValue>) -> Self {
        PropertyValue::Map(value)
    }
}

/// Declaration of one device property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Attribute name on the device
    pub name: String,
    /// Unit of measurement (e.g., "ms", "mW", "nm")
    pub unit: Option<String>,
    /// Read-only properties are displayed but never written
    pub read_only: bool,
}

impl PropertyDescriptor {
    /// A writable property without a unit.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: None,
            read_only: false,
        }
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Mark the property read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Property name to value, in schema order.
pub type PropertyRecord = IndexMap<String, PropertyValue>;

/// One operator edit, consumed immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEdit {
    /// Device name in the instrument model
    pub device: String,
    /// Property name; a dotted name (`position.x`) edits one entry of a map-valued property
    pub property: String,
    /// New value
    pub value: PropertyValue,
}

impl PropertyEdit {
    /// Build an edit record.
    pub fn new(
        device: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            device: device.into(),
            property: property.into(),
            value: value.into(),
        }
    }

    /// Device attribute addressed by this edit.
    pub fn attribute(&self) -> &str {
        root_attribute(&self.property)
    }
}

fn root_attribute(property: &str) -> &str {
    property.split('.').next().unwrap_or(property)
}

// =============================================================================
// PropertyBridge
// =============================================================================

/// Binds one device to its editable record.
pub struct PropertyBridge {
    device: String,
    kind: DeviceKind,
    handle: Arc<dyn Configurable>,
    schema: Vec<PropertyDescriptor>,
    locks: LockRegistry,
}

impl fmt::Debug for PropertyBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBridge")
            .field("device", &self.device)
            .field("kind", &self.kind)
            .field("schema", &self.schema)
            .finish()
    }
}

impl PropertyBridge {
    /// Create a bridge for `handle`, capturing its declared schema.
    pub fn new(
        device: impl Into<String>,
        kind: DeviceKind,
        handle: Arc<dyn Configurable>,
        locks: LockRegistry,
    ) -> Self {
        let schema = handle.property_schema();
        Self {
            device: device.into(),
            kind,
            handle,
            schema,
            locks,
        }
    }

    /// Device name.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Category whose lock guards this device.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Declared properties, in display order.
    pub fn schema(&self) -> &[PropertyDescriptor] {
        &self.schema
    }

    /// Read every tracked property under the category lock.
    pub async fn load(&self) -> AppResult<PropertyRecord> {
        let guard = self.locks.acquire(self.kind).await;
        self.read_all(&guard).await
    }

    /// Apply an operator edit and return the device's refreshed record.
    ///
    /// The lock is held from the write until every property has been read back. A dotted
    /// property (`position.x`) reads the current value of its attribute, replaces that one
    /// entry and writes the whole value back. A rejected write returns
    /// [`ConsoleError::PropertyWrite`] and nothing is re-read, so the display keeps the last
    /// record the device reported.
    pub async fn apply(&self, property: &str, value: PropertyValue) -> AppResult<PropertyRecord> {
        let attribute = root_attribute(property);
        let descriptor = self
            .schema
            .iter()
            .find(|d| d.name == attribute)
            .ok_or_else(|| ConsoleError::UnknownProperty {
                device: self.device.clone(),
                property: attribute.to_string(),
            })?;
        if descriptor.read_only {
            return Err(ConsoleError::PropertyWrite {
                device: self.device.clone(),
                property: attribute.to_string(),
                source: anyhow::anyhow!("property is read-only"),
            });
        }

        let write_error = |source: anyhow::Error| ConsoleError::PropertyWrite {
            device: self.device.clone(),
            property: attribute.to_string(),
            source,
        };

        let guard = self.locks.acquire(self.kind).await;
        let value = match property.split_once('.') {
            Some((_, path)) => {
                let current = self
                    .handle
                    .read_property(attribute)
                    .await
                    .map_err(|source| ConsoleError::hardware(&self.device, "read_property", source))?;
                current.with_entry(path, value).map_err(write_error)?
            }
            None => value,
        };
        tracing::debug!(device = %self.device, property, %value, "writing property");
        self.handle
            .write_property(attribute, value)
            .await
            .map_err(write_error)?;

        let record = self.read_all(&guard).await?;
        drop(guard);

        if let Some(reported) = record.get(attribute) {
            tracing::debug!(device = %self.device, property = attribute, %reported, "device reports");
        }
        Ok(record)
    }

    /// Re-read every property. Taking the guard proves the caller holds the category lock.
    async fn read_all(&self, guard: &CategoryGuard) -> AppResult<PropertyRecord> {
        debug_assert_eq!(guard.kind(), self.kind);
        let mut record = PropertyRecord::with_capacity(self.schema.len());
        for descriptor in &self.schema {
            let value = self
                .handle
                .read_property(&descriptor.name)
                .await
                .map_err(|source| ConsoleError::hardware(&self.device, "read_property", source))?;
            record.insert(descriptor.name.clone(), value);
        }
        Ok(record)
    }
}

// =============================================================================
// MetadataBridge
// =============================================================================

/// Editable view of the acquisition metadata.
#[derive(Clone)]
pub struct MetadataBridge {
    acquisition: Arc<Acquisition>,
}

impl MetadataBridge {
    /// Bridge onto `acquisition`'s metadata map.
    pub fn new(acquisition: Arc<Acquisition>) -> Self {
        Self { acquisition }
    }

    /// Current metadata record.
    pub async fn load(&self) -> PropertyRecord {
        self.acquisition.metadata().await
    }

    /// Write one metadata field and return the updated record.
    pub async fn apply(&self, key: &str, value: PropertyValue) -> AppResult<PropertyRecord> {
        self.acquisition.set_metadata(key, value).await?;
        Ok(self.acquisition.metadata().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockCamera, MockMultiAxisStage, MockStage};

    #[test]
    fn dotted_edit_addresses_root_attribute() {
        let edit = PropertyEdit::new("stage0", "position.x", 1.0);
        assert_eq!(edit.attribute(), "position");
        assert_eq!(PropertyEdit::new("cam0", "exposure_ms", 5.0).attribute(), "exposure_ms");
    }

    #[test]
    fn value_views() {
        assert_eq!(PropertyValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(PropertyValue::from("mono").as_str(), Some("mono"));
        assert_eq!(PropertyValue::from(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::Float(2.5).to_string(), "2.5");
    }

    #[tokio::test]
    async fn bridge_reports_device_value_after_write() {
        let locks = LockRegistry::new();
        let camera = Arc::new(MockCamera::new(8, 8));
        let bridge = PropertyBridge::new("cam0", DeviceKind::Camera, camera, locks);

        // Exposure is clamped by the device and frame rate follows it.
        let record = bridge
            .apply("exposure_ms", PropertyValue::Float(5000.0))
            .await
            .unwrap();
        assert_eq!(record["exposure_ms"], PropertyValue::Float(MockCamera::MAX_EXPOSURE_MS));
        assert_eq!(
            record["frame_rate_hz"],
            PropertyValue::Float(1000.0 / MockCamera::MAX_EXPOSURE_MS)
        );
    }

    #[test]
    fn with_entry_replaces_one_axis() {
        let position = PropertyValue::Map(IndexMap::from([
            ("x".to_string(), PropertyValue::Float(0.0)),
            ("y".to_string(), PropertyValue::Float(2.0)),
        ]));
        let moved = position.clone().with_entry("x", 1.5.into()).unwrap();
        assert_eq!(moved.as_map().unwrap()["x"], PropertyValue::Float(1.5));
        assert_eq!(moved.as_map().unwrap()["y"], PropertyValue::Float(2.0));
        assert_eq!(moved.to_string(), r#"{"x":1.5,"y":2.0}"#);

        assert!(position.clone().with_entry("z", 1.0.into()).is_err());
        assert!(PropertyValue::Float(3.0).with_entry("x", 1.0.into()).is_err());
    }

    #[tokio::test]
    async fn dotted_edit_moves_one_axis_of_a_multi_axis_stage() {
        let locks = LockRegistry::new();
        let stage = Arc::new(
            MockMultiAxisStage::new(["x", "y"])
                .with_lock_watch(locks.clone(), DeviceKind::TilingStage),
        );
        stage.set_axis("y", -4.0).await.unwrap();
        let bridge =
            PropertyBridge::new("tile_xy", DeviceKind::TilingStage, stage.clone(), locks.clone());

        let record = bridge.apply("position.x", 1.5.into()).await.unwrap();
        let axes = record["position"].as_map().unwrap();
        assert_eq!(axes["x"], PropertyValue::Float(1.5));
        assert_eq!(axes["y"], PropertyValue::Float(-4.0));
        assert_eq!(stage.unlocked_calls(), 0);

        let err = bridge.apply("position.z", 1.0.into()).await.unwrap_err();
        assert!(matches!(err, ConsoleError::PropertyWrite { ref property, .. } if property == "position"));
    }

    #[tokio::test]
    async fn dotted_edit_on_scalar_property_is_rejected() {
        let locks = LockRegistry::new();
        let stage = Arc::new(MockStage::with_position(2.0));
        let bridge = PropertyBridge::new("scan_z", DeviceKind::ScanningStage, stage, locks);

        let err = bridge.apply("position.x", 1.0.into()).await.unwrap_err();
        assert!(matches!(err, ConsoleError::PropertyWrite { .. }));
        assert_eq!(bridge.load().await.unwrap()["position"], PropertyValue::Float(2.0));
    }

    #[tokio::test]
    async fn unknown_and_read_only_properties_are_rejected() {
        let locks = LockRegistry::new();
        let camera = Arc::new(MockCamera::new(8, 8));
        let bridge = PropertyBridge::new("cam0", DeviceKind::Camera, camera, locks.clone());

        let err = bridge.apply("gain", 1.0.into()).await.unwrap_err();
        assert!(matches!(err, ConsoleError::UnknownProperty { .. }));

        let err = bridge.apply("frame_rate_hz", 10.0.into()).await.unwrap_err();
        assert!(matches!(err, ConsoleError::PropertyWrite { .. }));

        // Neither rejection touched the hardware lock.
        assert_eq!(locks.acquisitions(DeviceKind::Camera), 0);
    }
}

//! Background property service.
//!
//! Operator edits are queued to one task that owns every [`PropertyBridge`]. The task applies
//! each edit under its device's category lock and publishes the refreshed record, so the
//! presentation context never waits on hardware.

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppResult, ConsoleError};
use crate::live::events::{ConsoleEvent, EventSender};
use crate::property::{MetadataBridge, PropertyBridge, PropertyEdit, PropertyValue};

/// Request handled by the property service.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyCommand {
    /// Write one device property and re-read the device
    Edit(PropertyEdit),
    /// Write one acquisition metadata field
    EditMetadata {
        /// Metadata key
        key: String,
        /// New value
        value: PropertyValue,
    },
    /// Re-read one device, or every device and the metadata when `None`
    Refresh(Option<String>),
}

/// Owns the property bridges and applies queued commands in order.
pub struct PropertyService {
    bridges: IndexMap<String, PropertyBridge>,
    metadata: MetadataBridge,
    events: EventSender,
}

impl PropertyService {
    /// Create a service for `bridges`, keyed by device name.
    pub fn new(
        bridges: impl IntoIterator<Item = PropertyBridge>,
        metadata: MetadataBridge,
        events: EventSender,
    ) -> Self {
        Self {
            bridges: bridges
                .into_iter()
                .map(|bridge| (bridge.device().to_string(), bridge))
                .collect(),
            metadata,
            events,
        }
    }

    /// Start the command loop on its own task.
    pub fn spawn(self) -> PropertyServiceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        PropertyServiceHandle { tx, task }
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<PropertyCommand>) {
        info!(devices = self.bridges.len(), "property service started");
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        info!("property service stopped");
    }

    /// Apply one command and publish the result.
    pub async fn handle(&self, command: PropertyCommand) {
        match command {
            PropertyCommand::Edit(edit) => {
                let result = match self.bridges.get(&edit.device) {
                    Some(bridge) => bridge.apply(&edit.property, edit.value).await,
                    None => Err(ConsoleError::UnknownDevice(edit.device.clone())),
                };
                match result {
                    Ok(record) => self.events.notify(ConsoleEvent::PropertiesRefreshed {
                        device: edit.device,
                        record,
                    }),
                    Err(error) => {
                        warn!(device = %edit.device, property = %edit.property, error = %error, "property edit rejected");
                        self.events.notify(ConsoleEvent::fault(&edit.device, &error));
                    }
                }
            }
            PropertyCommand::EditMetadata { key, value } => {
                match self.metadata.apply(&key, value).await {
                    Ok(record) => self
                        .events
                        .notify(ConsoleEvent::MetadataRefreshed { record }),
                    Err(error) => {
                        warn!(key = %key, error = %error, "metadata edit rejected");
                        self.events.notify(ConsoleEvent::fault("metadata", &error));
                    }
                }
            }
            PropertyCommand::Refresh(Some(device)) => match self.bridges.get(&device) {
                Some(bridge) => self.refresh(bridge).await,
                None => self.events.notify(ConsoleEvent::fault(
                    &device,
                    &ConsoleError::UnknownDevice(device.clone()),
                )),
            },
            PropertyCommand::Refresh(None) => {
                for bridge in self.bridges.values() {
                    self.refresh(bridge).await;
                }
                let record = self.metadata.load().await;
                self.events
                    .notify(ConsoleEvent::MetadataRefreshed { record });
            }
        }
    }

    async fn refresh(&self, bridge: &PropertyBridge) {
        match bridge.load().await {
            Ok(record) => {
                debug!(device = bridge.device(), properties = record.len(), "properties loaded");
                self.events.notify(ConsoleEvent::PropertiesRefreshed {
                    device: bridge.device().to_string(),
                    record,
                });
            }
            Err(error) => {
                warn!(device = bridge.device(), error = %error, "property load failed");
                self.events.notify(ConsoleEvent::fault(bridge.device(), &error));
            }
        }
    }
}

/// Queue side of a running [`PropertyService`].
#[derive(Debug)]
pub struct PropertyServiceHandle {
    tx: mpsc::UnboundedSender<PropertyCommand>,
    task: JoinHandle<()>,
}

impl PropertyServiceHandle {
    /// Queue a command.
    pub fn submit(&self, command: PropertyCommand) -> AppResult<()> {
        self.tx
            .send(command)
            .map_err(|_| ConsoleError::ChannelClosed)
    }

    /// Finish queued commands and stop the service.
    pub async fn shutdown(self) -> AppResult<()> {
        drop(self.tx);
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::instrument::Acquisition;
    use crate::hardware::mock::{MockCamera, MockLaser};
    use crate::hardware::DeviceKind;
    use crate::live::events::event_channel;
    use crate::locks::LockRegistry;
    use crate::property::PropertyRecord;
    use std::sync::Arc;

    fn service(events: EventSender) -> PropertyService {
        let locks = LockRegistry::new();
        let mut metadata = PropertyRecord::new();
        metadata.insert("specimen".to_string(), "mouse brain".into());
        let acquisition = Arc::new(Acquisition::new(metadata));
        PropertyService::new(
            [
                PropertyBridge::new(
                    "cam0",
                    DeviceKind::Camera,
                    Arc::new(MockCamera::new(8, 8)),
                    locks.clone(),
                ),
                PropertyBridge::new(
                    "laser_488",
                    DeviceKind::Laser,
                    Arc::new(MockLaser::new(488, 50.0)),
                    locks,
                ),
            ],
            MetadataBridge::new(acquisition),
            events,
        )
    }

    #[tokio::test]
    async fn edit_publishes_refreshed_record() {
        let (tx, mut rx) = event_channel(4);
        let handle = service(tx).spawn();
        handle
            .submit(PropertyCommand::Edit(PropertyEdit::new("laser_488", "power_mw", 80.0)))
            .unwrap();
        handle.shutdown().await.unwrap();

        match rx.try_recv() {
            Some(ConsoleEvent::PropertiesRefreshed { device, record }) => {
                assert_eq!(device, "laser_488");
                assert_eq!(record["power_mw"], PropertyValue::Float(50.0));
            }
            other => panic!("expected refreshed record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_edit_becomes_a_fault() {
        let (tx, mut rx) = event_channel(4);
        let service = service(tx);
        service
            .handle(PropertyCommand::Edit(PropertyEdit::new("cam0", "binning", 3i64)))
            .await;
        service
            .handle(PropertyCommand::Edit(PropertyEdit::new("cam9", "binning", 2i64)))
            .await;

        assert!(matches!(
            rx.try_recv(),
            Some(ConsoleEvent::Fault { source, recoverable: true, .. }) if source == "cam0"
        ));
        assert!(matches!(
            rx.try_recv(),
            Some(ConsoleEvent::Fault { source, .. }) if source == "cam9"
        ));
    }

    #[tokio::test]
    async fn full_refresh_covers_devices_and_metadata() {
        let (tx, mut rx) = event_channel(4);
        let service = service(tx);
        service.handle(PropertyCommand::Refresh(None)).await;

        let mut devices = Vec::new();
        let mut metadata = None;
        while let Some(event) = rx.try_recv() {
            match event {
                ConsoleEvent::PropertiesRefreshed { device, .. } => devices.push(device),
                ConsoleEvent::MetadataRefreshed { record } => metadata = Some(record),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(devices, vec!["cam0", "laser_488"]);
        assert_eq!(
            metadata.unwrap()["specimen"],
            PropertyValue::from("mouse brain")
        );
    }

    #[tokio::test]
    async fn metadata_edit_round_trips() {
        let (tx, mut rx) = event_channel(4);
        let service = service(tx);
        service
            .handle(PropertyCommand::EditMetadata {
                key: "specimen".to_string(),
                value: "zebrafish".into(),
            })
            .await;
        match rx.try_recv() {
            Some(ConsoleEvent::MetadataRefreshed { record }) => {
                assert_eq!(record["specimen"], PropertyValue::from("zebrafish"));
            }
            other => panic!("expected metadata, got {other:?}"),
        }
    }
}

//! Media devices discovered by the enumerator.

use crate::capture::DeviceConfig;
use crate::signal::Signal;
use std::cell::Cell;
use std::fmt;

/// A physical device node exposing one or more media entities.
///
/// Pipeline handlers must [`acquire`](MediaDevice::acquire) a device
/// before using it. A device can be unplugged at any time, which fires
/// the [`disconnected`](MediaDevice::disconnected) signal once.
pub struct MediaDevice {
    driver: String,
    model: String,
    dev_node: String,
    entities: Vec<String>,
    acquired: Cell<bool>,
    connected: Cell<bool>,
    disconnected: Signal<()>,
}

impl MediaDevice {
    pub fn new(
        driver: impl Into<String>,
        model: impl Into<String>,
        dev_node: impl Into<String>,
        entities: Vec<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            model: model.into(),
            dev_node: dev_node.into(),
            entities,
            acquired: Cell::new(false),
            connected: Cell::new(true),
            disconnected: Signal::new(),
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            config.driver.as_str(),
            config.model.as_str(),
            config.dev_node.as_str(),
            config.entities.clone(),
        )
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dev_node(&self) -> &str {
        &self.dev_node
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.iter().any(|e| e == name)
    }

    /// Claims exclusive use of the device.
    ///
    /// Returns false if the device is already acquired or unplugged.
    pub fn acquire(&self) -> bool {
        if self.acquired.get() || !self.connected.get() {
            return false;
        }
        self.acquired.set(true);
        true
    }

    pub fn release(&self) {
        self.acquired.set(false);
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.get()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Notification fired when the device is unplugged.
    pub fn disconnected(&self) -> &Signal<()> {
        &self.disconnected
    }

    /// Marks the device as unplugged and notifies subscribers.
    ///
    /// Only the first call emits.
    pub fn disconnect(&self) {
        if !self.connected.replace(false) {
            return;
        }
        tracing::info!(dev_node = %self.dev_node, driver = %self.driver, "Media device removed");
        self.disconnected.emit(&());
    }
}

impl fmt::Debug for MediaDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaDevice")
            .field("driver", &self.driver)
            .field("model", &self.model)
            .field("dev_node", &self.dev_node)
            .field("acquired", &self.acquired.get())
            .field("connected", &self.connected.get())
            .finish()
    }
}

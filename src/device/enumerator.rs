//! In-process device enumeration and matching.

use super::media_device::MediaDevice;
use crate::capture::DeviceConfig;
use std::rc::Rc;

/// Criteria a pipeline handler uses to find its devices.
#[derive(Debug, Clone)]
pub struct DeviceMatch {
    driver: String,
    entities: Vec<String>,
}

impl DeviceMatch {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            entities: Vec::new(),
        }
    }

    /// Requires the device to expose an entity with this name.
    pub fn add_entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.push(entity.into());
        self
    }

    pub fn matches(&self, device: &MediaDevice) -> bool {
        device.driver() == self.driver && self.entities.iter().all(|e| device.has_entity(e))
    }
}

/// The set of media devices currently present.
#[derive(Debug, Default)]
pub struct DeviceEnumerator {
    devices: Vec<Rc<MediaDevice>>,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an enumerator from configured devices.
    pub fn from_configs(configs: &[DeviceConfig]) -> Self {
        let mut enumerator = Self::new();
        for config in configs {
            enumerator.add_device(MediaDevice::from_config(config));
        }
        enumerator
    }

    pub fn add_device(&mut self, device: MediaDevice) -> Rc<MediaDevice> {
        tracing::debug!(dev_node = device.dev_node(), driver = device.driver(), "Added media device");
        let device = Rc::new(device);
        self.devices.push(Rc::clone(&device));
        device
    }

    /// Returns the first device that matches and is not yet acquired.
    pub fn search(&self, dm: &DeviceMatch) -> Option<Rc<MediaDevice>> {
        self.devices
            .iter()
            .find(|d| !d.is_acquired() && d.is_connected() && dm.matches(d))
            .cloned()
    }

    /// Removes a device from the enumerator.
    ///
    /// The caller is expected to fire the device's disconnect notification
    /// once no enumerator borrow is held.
    pub fn remove_device(&mut self, dev_node: &str) -> Option<Rc<MediaDevice>> {
        let position = self.devices.iter().position(|d| d.dev_node() == dev_node)?;
        Some(self.devices.remove(position))
    }

    pub fn devices(&self) -> &[Rc<MediaDevice>] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

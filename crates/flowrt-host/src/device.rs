//! Devices and the device manager.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// What kind of hardware a device represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    /// The host CPU.
    Cpu,
    /// Anything else, named (used by embedders registering accelerators).
    Other(&'static str),
}

/// A named execution device.
#[derive(Debug)]
pub struct Device {
    name: String,
    device_type: DeviceType,
}

impl Device {
    /// Creates a device.
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            device_type,
        })
    }

    /// The device's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device's type.
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// `true` for CPU devices.
    pub fn is_cpu(&self) -> bool {
        self.device_type == DeviceType::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Registry of devices by name, shared across threads.
#[derive(Debug, Default)]
pub struct DeviceManager {
    devices: RwLock<HashMap<String, Arc<Device>>>,
}

impl DeviceManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device, returning it for convenience. Re-registering a
    /// name replaces the previous device.
    pub fn register(&self, device: Arc<Device>) -> Arc<Device> {
        self.devices
            .write()
            .insert(device.name().to_string(), device.clone());
        device
    }

    /// Looks up a device by name.
    pub fn get(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.read().get(name).cloned()
    }
}

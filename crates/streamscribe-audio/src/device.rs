use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use streamscribe_foundation::AudioError;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: usize,
    pub name: String,
    pub is_default: bool,
}

pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            host: cpal::default_host(),
        })
    }

    pub fn host_id(&self) -> cpal::HostId {
        self.host.id()
    }

    /// Query-only enumeration of input devices; no side effects.
    pub fn enumerate_devices(&self) -> Vec<DeviceInfo> {
        let default_name = self.default_input_device_name();
        let mut devices = Vec::new();

        if let Ok(inputs) = self.host.input_devices() {
            for (id, device) in inputs.enumerate() {
                if let Ok(name) = device.name() {
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    devices.push(DeviceInfo {
                        id,
                        name,
                        is_default,
                    });
                }
            }
        }

        devices
    }

    pub fn default_input_device_name(&self) -> Option<String> {
        self.host.default_input_device().and_then(|d| d.name().ok())
    }

    /// Open a device by enumeration id, or the host default when `None`.
    pub fn open_device(&self, id: Option<usize>) -> Result<Device, AudioError> {
        match id {
            Some(wanted) => self
                .host
                .input_devices()
                .map_err(|e| AudioError::Fatal(format!("Device enumeration failed: {}", e)))?
                .nth(wanted)
                .ok_or(AudioError::DeviceNotFound {
                    name: Some(format!("#{}", wanted)),
                }),
            None => self
                .host
                .default_input_device()
                .ok_or(AudioError::DeviceNotFound { name: None }),
        }
    }

    /// Open a device by (case-insensitive substring) name match.
    pub fn open_device_by_name(&self, name: &str) -> Result<Device, AudioError> {
        let devices = self
            .host
            .input_devices()
            .map_err(|e| AudioError::Fatal(format!("Device enumeration failed: {}", e)))?;

        let wanted = name.to_lowercase();
        for device in devices {
            if let Ok(n) = device.name() {
                if n == name || n.to_lowercase().contains(&wanted) {
                    return Ok(device);
                }
            }
        }

        Err(AudioError::DeviceNotFound {
            name: Some(name.to_string()),
        })
    }
}

use cpal::traits::{DeviceTrait, HostTrait};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AudioDevice {
    /// cpal exposes no stable id; the name doubles as one.
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub direction: DeviceDirection,
}

fn describe(device: &cpal::Device, default_name: Option<&str>, direction: DeviceDirection) -> AudioDevice {
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let is_default = default_name == Some(name.as_str());
    AudioDevice {
        id: name.clone(),
        name,
        is_default,
        direction,
    }
}

pub fn list_input_devices() -> crate::Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()?
        .map(|device| describe(&device, default_name.as_deref(), DeviceDirection::Input))
        .collect();
    Ok(devices)
}

pub fn list_output_devices() -> crate::Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()?
        .map(|device| describe(&device, default_name.as_deref(), DeviceDirection::Output))
        .collect();
    Ok(devices)
}

pub fn default_input_device() -> Option<AudioDevice> {
    let device = cpal::default_host().default_input_device()?;
    let mut described = describe(&device, None, DeviceDirection::Input);
    described.is_default = true;
    Some(described)
}

/// Resolve an input device by id, or the default one.
///
/// A missing default device means the platform gave us no microphone, which
/// callers treat the same as a refused permission.
pub fn find_input_device(host: &cpal::Host, device_id: Option<&str>) -> crate::Result<cpal::Device> {
    match device_id {
        Some(id) => host
            .input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(id))
            .ok_or_else(|| crate::AudioError::DeviceNotFound(id.to_string())),
        None => host
            .default_input_device()
            .ok_or(crate::AudioError::PermissionDenied),
    }
}

pub(crate) fn find_output_device(host: &cpal::Host, device_id: Option<&str>) -> crate::Result<cpal::Device> {
    match device_id {
        Some(id) => host
            .output_devices()?
            .find(|d| d.name().ok().as_deref() == Some(id))
            .ok_or_else(|| crate::AudioError::DeviceNotFound(id.to_string())),
        None => host
            .default_output_device()
            .ok_or_else(|| crate::AudioError::DeviceNotFound("default output".to_string())),
    }
}

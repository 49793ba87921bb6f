//! Microphone capture and speaker output on top of cpal.
//!
//! cpal streams are not `Send`, so both directions park their stream on a
//! dedicated thread and hand out `Send` handles: [`CpalMicrophone`] publishes
//! 16 kHz mono frames on the audio bus, [`CpalOutput`] renders buffers handed
//! to it by the playback scheduler.

mod capture;
mod device;
mod output;
mod stream;

pub use capture::{CpalMicrophone, FrameChunker, Microphone};
pub use device::{
    default_input_device, find_input_device, list_input_devices, list_output_devices,
    AudioDevice, DeviceDirection,
};
pub use output::CpalOutput;
pub use stream::InputStream;

pub use talkmee_bus::SAMPLE_RATE;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("stream error: {0}")]
    StreamError(String),
    #[error("device error: {0}")]
    DeviceError(#[from] cpal::DevicesError),
    #[error("build stream error: {0}")]
    BuildStreamError(cpal::BuildStreamError),
}

// A device that vanished or refused to open is how a denied permission
// surfaces through cpal on most hosts.
impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => AudioError::PermissionDenied,
            other => AudioError::BuildStreamError(other),
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => AudioError::PermissionDenied,
            other => AudioError::StreamError(format!("failed to get default config: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        // CI machines may have no audio host at all.
        let Ok(devices) = list_input_devices() else {
            return;
        };
        println!("Found {} input devices:", devices.len());
        for device in &devices {
            println!("  - {} (default: {})", device.name, device.is_default);
        }
        assert!(devices.iter().filter(|d| d.is_default).count() <= 1);
    }

    #[test]
    fn test_unavailable_device_reads_as_permission_denied() {
        assert!(matches!(
            AudioError::from(cpal::BuildStreamError::DeviceNotAvailable),
            AudioError::PermissionDenied
        ));
        assert!(matches!(
            AudioError::from(cpal::BuildStreamError::InvalidArgument),
            AudioError::BuildStreamError(_)
        ));
        assert!(matches!(
            AudioError::from(cpal::DefaultStreamConfigError::DeviceNotAvailable),
            AudioError::PermissionDenied
        ));
    }
}

//! Input devices and their selection.

use serde::Serialize;

use super::MediaKind;

/// Information about an available input device.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InputDeviceInfo {
    /// Unique identifier of the device.
    pub device_id: String,

    /// Human-readable label of the device.
    pub label: String,

    /// [`MediaKind`] the device produces.
    pub kind: MediaKind,
}

/// Devices chosen by the user for the next capture requests.
///
/// `None` means the default device of the platform.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DeviceSettings {
    /// Chosen camera.
    pub camera: Option<String>,

    /// Chosen microphone.
    pub microphone: Option<String>,
}

impl DeviceSettings {
    /// Records `device_id` as the chosen device of the given [`MediaKind`].
    pub fn select(&mut self, kind: MediaKind, device_id: Option<String>) {
        match kind {
            MediaKind::Video => self.camera = device_id,
            MediaKind::Audio => self.microphone = device_id,
        }
    }

    /// Returns the chosen device of the given [`MediaKind`].
    pub fn device_for(&self, kind: MediaKind) -> Option<String> {
        match kind {
            MediaKind::Video => self.camera.clone(),
            MediaKind::Audio => self.microphone.clone(),
        }
    }
}

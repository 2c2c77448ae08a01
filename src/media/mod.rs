//! Local and remote media tracks.

mod device;
pub mod local;
pub mod registry;

use std::str::FromStr;

use derive_more::{Display, From};
use serde::Serialize;

#[doc(inline)]
pub use self::{
    device::{DeviceSettings, InputDeviceInfo},
    local::{LocalTrack, LocalTracks, TrackSlot},
    registry::{Track, TrackRegistry},
};

/// Kind of a media track.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track.
    #[display(fmt = "audio")]
    Audio,

    /// Video track.
    #[display(fmt = "video")]
    Video,
}

/// ID of a media track, assigned by the SDK.
#[derive(
    Clone,
    Debug,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[from(forward)]
pub struct TrackId(pub String);

/// ID of a room participant.
#[derive(
    Clone,
    Debug,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[from(forward)]
pub struct UserId(pub String);

/// Role of a local track.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackTag {
    /// Camera video.
    #[display(fmt = "camera")]
    Camera,

    /// Microphone audio.
    #[display(fmt = "microphone")]
    Microphone,

    /// Screen sharing video.
    #[display(fmt = "screenVideo")]
    ScreenVideo,

    /// Screen sharing (system) audio.
    #[display(fmt = "screenAudio")]
    ScreenAudio,
}

impl TrackTag {
    /// All the [`TrackTag`]s, in their display order.
    pub const ALL: [Self; 4] = [
        Self::Camera,
        Self::Microphone,
        Self::ScreenVideo,
        Self::ScreenAudio,
    ];

    /// Returns [`MediaKind`] of tracks with this [`TrackTag`].
    pub fn kind(self) -> MediaKind {
        match self {
            Self::Camera | Self::ScreenVideo => MediaKind::Video,
            Self::Microphone | Self::ScreenAudio => MediaKind::Audio,
        }
    }

    /// Indicates whether this [`TrackTag`] belongs to screen sharing.
    #[inline]
    pub fn is_screen(self) -> bool {
        matches!(self, Self::ScreenVideo | Self::ScreenAudio)
    }
}

/// Error of parsing an unknown [`TrackTag`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
#[display(fmt = "Unknown track tag: {}", _0)]
pub struct UnknownTrackTag(String);

impl FromStr for TrackTag {
    type Err = UnknownTrackTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|tag| tag.to_string() == s)
            .ok_or_else(|| UnknownTrackTag(s.to_owned()))
    }
}

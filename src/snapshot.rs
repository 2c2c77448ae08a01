//! Immutable views of a room state, read by UI subscribers.

use serde::Serialize;

use crate::{
    errors::Notice,
    live::{LiveMode, LivePhase, StreamId},
    media::{
        DeviceSettings, InputDeviceInfo, MediaKind, Track, TrackId, TrackSlot,
        TrackTag, UserId,
    },
    room::{ConnectionState, RemoteUser, UserState},
};

/// View of a remote user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RemoteUserSnapshot {
    /// ID of the user.
    pub id: UserId,

    /// Opaque data attached by the user.
    pub user_data: Option<String>,

    /// Connection sub-state of the user.
    pub state: UserState,

    /// IDs of the tracks published by the user.
    pub track_ids: Vec<TrackId>,
}

impl From<RemoteUser> for RemoteUserSnapshot {
    fn from(user: RemoteUser) -> Self {
        Self {
            id: user.id,
            user_data: user.user_data,
            state: user.state,
            track_ids: user.track_ids,
        }
    }
}

/// View of a registered track.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TrackSnapshot {
    /// ID of the track.
    pub id: TrackId,

    /// Kind of the track.
    pub kind: MediaKind,

    /// Publisher of the track, `None` for local ones.
    pub owner: Option<UserId>,

    /// Role of a local track.
    pub tag: Option<TrackTag>,

    /// Indicator whether the track is muted.
    pub muted: bool,

    /// Indicator whether the track can be rendered (is captured or
    /// subscribed).
    pub playable: bool,
}

impl From<&Track> for TrackSnapshot {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id().clone(),
            kind: track.kind(),
            owner: track.owner().cloned(),
            tag: track.tag(),
            muted: track.is_muted(),
            playable: track.has_media(),
        }
    }
}

/// Status of a non-absent local track slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalTrackStatus {
    /// Track is being captured.
    Pending,

    /// Track is captured and may be previewed.
    Created,

    /// Track is published.
    Published,
}

/// View of a local track slot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LocalTrackSnapshot {
    /// Role of the track.
    pub tag: TrackTag,

    /// Status of the track.
    pub status: LocalTrackStatus,

    /// Indicator whether the track is muted.
    pub muted: bool,

    /// ID of the track, once negotiated.
    pub track_id: Option<TrackId>,
}

impl LocalTrackSnapshot {
    /// Builds a view of the given [`TrackSlot`], `None` if it's absent.
    pub fn new(tag: TrackTag, slot: &TrackSlot) -> Option<Self> {
        match slot {
            TrackSlot::Absent => None,
            TrackSlot::Pending => Some(Self {
                tag,
                status: LocalTrackStatus::Pending,
                muted: false,
                track_id: None,
            }),
            TrackSlot::Present(track) => Some(Self {
                tag,
                status: if track.published {
                    LocalTrackStatus::Published
                } else {
                    LocalTrackStatus::Created
                },
                muted: track.muted,
                track_id: track.media.id(),
            }),
        }
    }
}

/// View of re-streaming.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LiveSnapshot {
    /// Mode of the current (or the next) session.
    pub mode: LiveMode,

    /// Observable phase.
    pub phase: LivePhase,

    /// ID of the current session.
    pub stream_id: Option<StreamId>,

    /// IDs of all the sessions not confirmed stopped yet.
    pub active: Vec<StreamId>,
}

/// Consistent view of a whole room.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RoomSnapshot {
    /// Number of notifications happened before this snapshot was taken.
    pub version: u64,

    /// Name of the joined room.
    pub room: Option<String>,

    /// ID of the local user.
    pub user_id: Option<UserId>,

    /// Connection state.
    pub connection: ConnectionState,

    /// Remote users in their joining order.
    pub users: Vec<RemoteUserSnapshot>,

    /// Registered tracks in their registration order.
    pub tracks: Vec<TrackSnapshot>,

    /// Non-absent local track slots.
    pub local_tracks: Vec<LocalTrackSnapshot>,

    /// Re-streaming.
    pub live: LiveSnapshot,

    /// Last enumerated input devices.
    pub devices: Vec<InputDeviceInfo>,

    /// Chosen input devices.
    pub selected_devices: DeviceSettings,

    /// Notices not dismissed yet.
    pub notices: Vec<Notice>,
}

impl RoomSnapshot {
    /// Looks up a local track view by its [`TrackTag`].
    pub fn local_track(&self, tag: TrackTag) -> Option<&LocalTrackSnapshot> {
        self.local_tracks.iter().find(|t| t.tag == tag)
    }

    /// Looks up a remote user view by its ID.
    pub fn user(&self, id: &UserId) -> Option<&RemoteUserSnapshot> {
        self.users.iter().find(|u| &u.id == id)
    }
}

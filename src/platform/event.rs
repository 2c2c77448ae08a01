//! Events emitted by the SDK and subscriptions to them.

use std::rc::Rc;

use derive_more::Display;

use crate::{
    live::{LiveMode, StreamId},
    media::{MediaKind, TrackId, UserId},
    room::ConnectionState,
};

use super::RtcClient;

/// Description of a remote track, as announced by the SDK.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTrackInfo {
    /// ID of the track.
    pub id: TrackId,

    /// [`MediaKind`] of the track.
    pub kind: MediaKind,

    /// Indicator whether the track is muted by its publisher.
    pub muted: bool,
}

/// State of a re-streaming session reported by the SDK.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum LiveStreamingState {
    /// Session is live.
    #[display(fmt = "STARTED")]
    Started,

    /// Session is stopped.
    #[display(fmt = "STOPPED")]
    Stopped,

    /// Session has failed on the server side.
    #[display(fmt = "FAILED")]
    Failed,
}

/// Event emitted by an [`RtcClient`].
#[derive(Clone, Debug, PartialEq)]
pub enum RtcEvent {
    /// Connection with the room changed its state.
    ConnectionStateChanged(ConnectionState),

    /// Remote user joined the room.
    UserJoined {
        /// ID of the joined user.
        user_id: UserId,

        /// Opaque data attached by the user.
        user_data: Option<String>,
    },

    /// Remote user left the room.
    UserLeft {
        /// ID of the user.
        user_id: UserId,
    },

    /// Remote user published some tracks.
    UserPublished {
        /// ID of the publisher.
        user_id: UserId,

        /// Published tracks.
        tracks: Vec<RemoteTrackInfo>,
    },

    /// Remote user unpublished some tracks.
    UserUnpublished {
        /// ID of the publisher.
        user_id: UserId,

        /// IDs of the unpublished tracks.
        track_ids: Vec<TrackId>,
    },

    /// Remote user lost its connection and is reconnecting.
    UserReconnecting {
        /// ID of the user.
        user_id: UserId,
    },

    /// Remote user restored its connection.
    UserReconnected {
        /// ID of the user.
        user_id: UserId,
    },

    /// Remote user muted or unmuted one of its tracks.
    UserTrackMuted {
        /// ID of the publisher.
        user_id: UserId,

        /// ID of the track.
        track_id: TrackId,

        /// New muted flag.
        muted: bool,
    },

    /// Re-streaming session changed its state.
    LiveStreamingStateChanged {
        /// ID of the session.
        stream_id: StreamId,

        /// Mode of the session.
        mode: LiveMode,

        /// New state of the session.
        state: LiveStreamingState,
    },
}

/// ID of a listener registered via [`RtcClient::on_event()`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub struct ListenerId(pub u64);

/// Subscription to [`RtcEvent`]s of an [`RtcClient`].
///
/// Listener is removed from the [`RtcClient`] once this [`EventListener`] is
/// dropped.
pub struct EventListener {
    /// ID of the registered listener.
    id: ListenerId,

    /// Client the listener is registered on.
    client: Rc<dyn RtcClient>,
}

impl EventListener {
    /// Registers the provided `listener` on the given [`RtcClient`].
    pub fn new<F>(client: Rc<dyn RtcClient>, listener: F) -> Self
    where
        F: Fn(RtcEvent) + 'static,
    {
        let id = client.on_event(Rc::new(listener));
        Self { id, client }
    }

    /// Returns [`ListenerId`] of this [`EventListener`].
    #[inline]
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.client.off_event(self.id);
    }
}

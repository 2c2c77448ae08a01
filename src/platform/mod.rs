//! Collaborators provided by the underlying real-time media SDK.
//!
//! Everything related to media capture, encoding, network transport and
//! signaling lives behind these traits. This crate only consumes them.

mod event;

use std::{rc::Rc, time::Duration};

use async_trait::async_trait;
use derive_more::Display;
use futures::future::LocalBoxFuture;

use crate::{
    live::{LiveMode, LiveStreamRequest, StreamId},
    media::{InputDeviceInfo, MediaKind, TrackId, UserId},
};

#[doc(inline)]
pub use self::event::{
    EventListener, ListenerId, LiveStreamingState, RemoteTrackInfo, RtcEvent,
};

/// Kind of a rejection returned by the SDK.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum RejectionKind {
    /// Provided credentials were refused.
    #[display(fmt = "AuthenticationError")]
    Authentication,

    /// Network round-trip failed or timed out.
    #[display(fmt = "NetworkError")]
    Network,

    /// User or OS refused access to a capture device.
    #[display(fmt = "PermissionDenied")]
    PermissionDenied,

    /// Capture device is used by another application.
    #[display(fmt = "DeviceBusy")]
    DeviceBusy,

    /// Requested capture device doesn't exist.
    #[display(fmt = "DeviceNotFound")]
    DeviceNotFound,

    /// Any other rejection.
    #[display(fmt = "Error")]
    Other,
}

/// Error returned by any SDK call.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
#[display(fmt = "{}: {}", kind, message)]
pub struct Error {
    kind: RejectionKind,
    message: String,
}

impl Error {
    /// Creates a new [`Error`] of the given [`RejectionKind`].
    #[inline]
    pub fn new<M: Into<String>>(kind: RejectionKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns [`RejectionKind`] of this [`Error`].
    #[inline]
    pub fn kind(&self) -> RejectionKind {
        self.kind
    }

    /// Returns the message of this [`Error`].
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Indicates whether this [`Error`] is caused by a capture device being
    /// unavailable, so the user may fix it and retry.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self.kind,
            RejectionKind::PermissionDenied
                | RejectionKind::DeviceBusy
                | RejectionKind::DeviceNotFound
        )
    }
}

/// Opaque SDK handle of a local (captured) or remote (subscribed) media
/// track.
pub trait MediaTrack {
    /// Returns ID of this track, if it has been negotiated already.
    fn id(&self) -> Option<TrackId>;

    /// Returns [`MediaKind`] of this track.
    fn kind(&self) -> MediaKind;

    /// Mutes or unmutes this track.
    fn set_muted(&self, muted: bool);

    /// Releases all resources held by this track (stops capture for local
    /// tracks, detaches remote ones).
    ///
    /// The handle must not be used afterwards.
    fn release(&self);

    /// Returns a [`Future`] resolving once the underlying source of this
    /// track ends on its own (for example, screen sharing being stopped via
    /// OS-level UI).
    ///
    /// [`Future`]: std::future::Future
    fn on_ended(&self) -> LocalBoxFuture<'static, ()>;
}

/// Result of a screen capture request.
///
/// Depending on a platform, screen capture may or may not provide an audio
/// track along with the video one.
pub struct ScreenCapture {
    /// Captured screen video.
    pub video: Rc<dyn MediaTrack>,

    /// Captured screen (system) audio, if supported.
    pub audio: Option<Rc<dyn MediaTrack>>,
}

/// Capture subsystem of the SDK.
#[async_trait(?Send)]
pub trait MediaCapture {
    /// Captures a camera track using the given device (or the default one).
    async fn create_camera_track(
        &self,
        device_id: Option<String>,
    ) -> Result<Rc<dyn MediaTrack>, Error>;

    /// Captures a microphone track using the given device (or the default
    /// one).
    async fn create_microphone_track(
        &self,
        device_id: Option<String>,
    ) -> Result<Rc<dyn MediaTrack>, Error>;

    /// Captures the screen, optionally along with its audio.
    async fn create_screen_tracks(
        &self,
        with_audio: bool,
    ) -> Result<ScreenCapture, Error>;

    /// Lists the available input devices.
    async fn enumerate_devices(&self) -> Result<Vec<InputDeviceInfo>, Error>;
}

/// Transport and signaling subsystem of the SDK, scoped to a single room.
#[async_trait(?Send)]
pub trait RtcClient {
    /// Joins a room with the provided credentials `token`.
    async fn join(&self, token: &str, user_id: &UserId) -> Result<(), Error>;

    /// Leaves the currently joined room.
    async fn leave(&self) -> Result<(), Error>;

    /// Publishes the provided local tracks.
    async fn publish(&self, tracks: Vec<Rc<dyn MediaTrack>>)
        -> Result<(), Error>;

    /// Unpublishes the provided local tracks.
    async fn unpublish(
        &self,
        tracks: Vec<Rc<dyn MediaTrack>>,
    ) -> Result<(), Error>;

    /// Subscribes to the remote tracks with the provided IDs.
    async fn subscribe(
        &self,
        track_ids: Vec<TrackId>,
    ) -> Result<Vec<Rc<dyn MediaTrack>>, Error>;

    /// Unsubscribes from the remote tracks with the provided IDs.
    async fn unsubscribe(&self, track_ids: Vec<TrackId>) -> Result<(), Error>;

    /// Starts re-streaming according to the provided request.
    async fn start_live_streaming(
        &self,
        request: LiveStreamRequest,
    ) -> Result<(), Error>;

    /// Stops re-streaming with the provided [`StreamId`].
    async fn stop_live_streaming(
        &self,
        stream_id: &StreamId,
        mode: LiveMode,
    ) -> Result<(), Error>;

    /// Registers the provided `listener` for all [`RtcEvent`]s of this
    /// client.
    ///
    /// Listeners are invoked synchronously, in the order events occur.
    fn on_event(&self, listener: Rc<dyn Fn(RtcEvent)>) -> ListenerId;

    /// Removes a listener previously registered via
    /// [`RtcClient::on_event()`].
    fn off_event(&self, id: ListenerId);
}

/// Timers of the platform.
pub trait Timer {
    /// Returns a [`Future`] resolving once the provided `delay` passes.
    ///
    /// [`Future`]: std::future::Future
    fn delay_for(&self, delay: Duration) -> LocalBoxFuture<'static, ()>;
}

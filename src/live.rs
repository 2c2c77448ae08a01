//! Re-streaming of a room to an external destination.
//!
//! [`LiveStreaming`] keeps every re-streaming session it has started until
//! the session is confirmed stopped. The observable [`LivePhase`] is derived
//! from the current session:
//!
//! ```text
//! idle -> pending -> connected -> pending -> idle
//! ```
//!
//! Switching the [`LiveMode`] of a connected room starts a new session and
//! stops the old one only after the new one is confirmed
//! [`LiveStreamingState::Started`], so there is no gap in the output.
//!
//! A started session not confirmed within [`conf::Live::confirmation_timeout`]
//! is forgotten.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
};

use derive_more::{Display, From};
use futures::{
    channel::oneshot,
    future::{self, Either, LocalBoxFuture},
    task::{LocalSpawn, LocalSpawnExt as _},
};
use rand::{distributions::Alphanumeric, Rng as _};
use serde::Serialize;
use tracerr::Traced;

use crate::{
    conf,
    errors::{Classified, ErrorKind},
    media::{MediaKind, TrackId, TrackRegistry, TrackTag},
    platform::{self, LiveStreamingState, RtcClient, Timer},
    room::State,
    store::{Reason, RoomStore},
};

/// Length of generated [`StreamId`]s.
const STREAM_ID_LEN: usize = 16;

/// Source of a re-streaming session.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveMode {
    /// Local camera and microphone tracks are re-streamed as is.
    #[display(fmt = "direct")]
    Direct,

    /// Server composes all the published tracks into a single output.
    #[display(fmt = "composed")]
    Composed,
}

impl Default for LiveMode {
    fn default() -> Self {
        Self::Direct
    }
}

/// Observable phase of re-streaming.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LivePhase {
    /// Nothing is re-streamed.
    Idle,

    /// Start, stop or mode switch is in progress.
    Pending,

    /// Re-streaming is confirmed started.
    Connected,
}

/// ID of a re-streaming session.
#[derive(Clone, Debug, Display, Eq, From, Hash, PartialEq, Serialize)]
#[from(forward)]
pub struct StreamId(pub String);

impl StreamId {
    /// Generates a new random [`StreamId`].
    pub fn random() -> Self {
        Self(
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(STREAM_ID_LEN)
                .map(char::from)
                .collect(),
        )
    }
}

/// Placement of a single video track on a composed canvas.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LayoutTile {
    /// ID of the placed video track.
    pub track_id: TrackId,

    /// Horizontal offset of the tile, in pixels.
    pub x: u32,

    /// Vertical offset of the tile, in pixels.
    pub y: u32,

    /// Width of the tile, in pixels.
    pub width: u32,

    /// Height of the tile, in pixels.
    pub height: u32,
}

/// Places the provided video tracks onto a `width`x`height` canvas as an
/// (almost) square grid, row by row.
pub fn grid_layout(
    track_ids: &[TrackId],
    width: u32,
    height: u32,
) -> Vec<LayoutTile> {
    let count = track_ids.len() as u32;
    if count == 0 {
        return Vec::new();
    }
    let mut cols = 1;
    while cols * cols < count {
        cols += 1;
    }
    let rows = (count + cols - 1) / cols;
    let (tile_w, tile_h) = (width / cols, height / rows);

    track_ids
        .iter()
        .zip(0..)
        .map(|(id, i)| LayoutTile {
            track_id: id.clone(),
            x: (i % cols) * tile_w,
            y: (i / cols) * tile_h,
            width: tile_w,
            height: tile_h,
        })
        .collect()
}

/// Request to start a re-streaming session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LiveStreamRequest {
    /// Re-stream local tracks as is.
    Direct {
        /// ID of the session.
        id: StreamId,

        /// Destination of the session.
        url: String,

        /// Re-streamed video track.
        video_track: Option<TrackId>,

        /// Re-streamed audio track.
        audio_track: Option<TrackId>,
    },

    /// Compose tracks into a single output.
    Composed {
        /// ID of the session.
        id: StreamId,

        /// Destination of the session.
        url: String,

        /// Width of the output canvas.
        width: u32,

        /// Height of the output canvas.
        height: u32,

        /// Placement of video tracks.
        tiles: Vec<LayoutTile>,

        /// Mixed audio tracks.
        audio_tracks: Vec<TrackId>,
    },
}

impl LiveStreamRequest {
    /// Returns [`StreamId`] of the requested session.
    pub fn id(&self) -> &StreamId {
        match self {
            Self::Direct { id, .. } | Self::Composed { id, .. } => id,
        }
    }

    /// Returns [`LiveMode`] of the requested session.
    pub fn mode(&self) -> LiveMode {
        match self {
            Self::Direct { .. } => LiveMode::Direct,
            Self::Composed { .. } => LiveMode::Composed,
        }
    }
}

/// Errors occurring in [`LiveStreaming`] operations.
#[derive(Clone, Debug, Display)]
pub enum LiveStreamError {
    /// Re-streaming requires a joined room.
    #[display(fmt = "Room is not connected")]
    NotConnected,

    /// Another start, stop or switch is in progress.
    #[display(fmt = "Live streaming operation is already in progress")]
    InProgress,

    /// There are no published tracks to re-stream in the given [`LiveMode`].
    #[display(fmt = "No published tracks to stream in {} mode", _0)]
    NoPublishedTracks(LiveMode),

    /// SDK rejected starting a session.
    #[display(fmt = "Failed to start live streaming: {}", _0)]
    Start(platform::Error),

    /// SDK rejected stopping a session.
    #[display(fmt = "Failed to stop live streaming: {}", _0)]
    Stop(platform::Error),

    /// Started session was never confirmed.
    #[display(fmt = "Live streaming {} was not confirmed", _0)]
    NotConfirmed(StreamId),
}

impl Classified for LiveStreamError {
    fn name(&self) -> &'static str {
        match self {
            Self::NotConnected => "NotConnected",
            Self::InProgress => "LiveStreamingInProgress",
            Self::NoPublishedTracks(_) => "NoPublishedTracks",
            Self::Start(_) => "LiveStreamingStartError",
            Self::Stop(_) => "LiveStreamingStopError",
            Self::NotConfirmed(_) => "LiveStreamingNotConfirmed",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected
            | Self::InProgress
            | Self::NoPublishedTracks(_) => ErrorKind::RecoverableUser,
            Self::Start(_) | Self::Stop(_) | Self::NotConfirmed(_) => {
                ErrorKind::TransportRejection
            }
        }
    }
}

/// State of a single re-streaming session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SessionState {
    Starting,
    Started,
    Stopping,
}

#[derive(Clone, Debug)]
struct Session {
    id: StreamId,
    mode: LiveMode,
    state: SessionState,
}

/// Mutable state of [`LiveStreaming`].
#[derive(Debug, Default)]
struct Inner {
    /// [`LiveMode`] of the next session started by toggling.
    mode: LiveMode,

    /// Sessions which are not confirmed stopped yet.
    sessions: Vec<Session>,

    /// Session the [`LivePhase`] is derived from.
    current: Option<StreamId>,

    /// Target [`LiveMode`] of an in-flight switch.
    switching_to: Option<LiveMode>,

    /// All the [`StreamId`]s generated during the room session.
    used_ids: HashSet<StreamId>,

    /// Waiters of started sessions' confirmations.
    confirmations: HashMap<StreamId, oneshot::Sender<bool>>,
}

impl Inner {
    fn session(&self, id: &StreamId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    fn set_session_state(&mut self, id: &StreamId, state: SessionState) {
        if let Some(s) = self.sessions.iter_mut().find(|s| &s.id == id) {
            s.state = state;
        }
    }

    fn remove_session(&mut self, id: &StreamId) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| &s.id == id)?;
        let removed = self.sessions.remove(idx);
        if self.current.as_ref() == Some(id) {
            self.current = self
                .sessions
                .iter()
                .rev()
                .find(|s| s.state == SessionState::Started)
                .map(|s| s.id.clone());
            if let Some(fallback) = &self.current {
                log::debug!("Falling back to live stream {}", fallback);
            }
        }
        Some(removed)
    }

    fn phase(&self) -> LivePhase {
        if self.switching_to.is_some() {
            return LivePhase::Pending;
        }
        match self
            .current
            .as_ref()
            .and_then(|id| self.session(id))
            .map(|s| s.state)
        {
            None => LivePhase::Idle,
            Some(SessionState::Started) => LivePhase::Connected,
            Some(SessionState::Starting) | Some(SessionState::Stopping) => {
                LivePhase::Pending
            }
        }
    }

    /// Generates a [`StreamId`] not used in the current room session yet.
    fn next_stream_id(&mut self) -> StreamId {
        loop {
            let id = StreamId::random();
            if self.used_ids.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Resolves the confirmation waiter of a session, if any.
    fn confirm(&mut self, id: &StreamId, started: bool) {
        if let Some(tx) = self.confirmations.remove(id) {
            if tx.send(started).is_err() {
                log::debug!("Live stream {} confirmation is dropped", id);
            }
        }
    }

    /// Forgets a session which is not confirmed started yet.
    ///
    /// Returns `false` if there is no such session.
    fn discard_starting(&mut self, id: &StreamId) -> bool {
        drop(self.confirmations.remove(id));
        let starting = self
            .session(id)
            .map_or(false, |s| s.state == SessionState::Starting);
        starting && self.remove_session(id).is_some()
    }
}

/// Resolves to `true` once a session is confirmed started, or to `false` once
/// it's rejected, forgotten or the `timeout` passes.
async fn confirmation(
    rx: oneshot::Receiver<bool>,
    timeout: LocalBoxFuture<'static, ()>,
) -> bool {
    match future::select(rx, timeout).await {
        Either::Left((confirmed, _)) => confirmed.unwrap_or(false),
        Either::Right(((), _)) => false,
    }
}

/// Live-streaming controller of a room.
pub struct LiveStreaming {
    inner: Rc<RefCell<Inner>>,
    client: Rc<dyn RtcClient>,
    registry: Rc<TrackRegistry>,
    state: Rc<State>,
    store: Rc<RoomStore>,
    spawner: Rc<dyn LocalSpawn>,
    timer: Rc<dyn Timer>,
    conf: conf::Live,
}

impl LiveStreaming {
    /// Creates a new idle [`LiveStreaming`] controller.
    pub fn new(
        client: Rc<dyn RtcClient>,
        registry: Rc<TrackRegistry>,
        state: Rc<State>,
        store: Rc<RoomStore>,
        spawner: Rc<dyn LocalSpawn>,
        timer: Rc<dyn Timer>,
        conf: conf::Live,
    ) -> Self {
        Self {
            inner: Rc::default(),
            client,
            registry,
            state,
            store,
            spawner,
            timer,
            conf,
        }
    }

    /// Returns the current [`LivePhase`].
    pub fn phase(&self) -> LivePhase {
        self.inner.borrow().phase()
    }

    /// Returns [`LiveMode`] of the current (or the next) session.
    pub fn mode(&self) -> LiveMode {
        self.inner.borrow().mode
    }

    /// Returns [`StreamId`] of the current session, if any.
    pub fn current(&self) -> Option<StreamId> {
        self.inner.borrow().current.clone()
    }

    /// Returns [`StreamId`]s of all the sessions not confirmed stopped yet.
    pub fn active(&self) -> Vec<StreamId> {
        self.inner
            .borrow()
            .sessions
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }

    /// Starts re-streaming in the current [`LiveMode`] if it's idle, or
    /// stops the current session if it's connected.
    ///
    /// A started session stays pending until the server confirms it. It's
    /// forgotten if no confirmation comes within the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`LiveStreamError::InProgress`] if the [`LivePhase`] is pending.
    /// - [`LiveStreamError::NotConnected`] if starting in a not connected
    ///   room.
    /// - [`LiveStreamError::NoPublishedTracks`] if there is nothing to
    ///   stream.
    /// - [`LiveStreamError::Start`]/[`LiveStreamError::Stop`] if the SDK
    ///   rejects the request.
    pub async fn toggle(&self) -> Result<(), Traced<LiveStreamError>> {
        match self.phase() {
            LivePhase::Pending => {
                Err(tracerr::new!(LiveStreamError::InProgress))
            }
            LivePhase::Idle => {
                let mode = self.mode();
                let request = self.request(mode)?;
                let id = request.id().clone();
                let (tx, rx) = oneshot::channel();
                {
                    let mut inner = self.inner.borrow_mut();
                    inner.sessions.push(Session {
                        id: id.clone(),
                        mode,
                        state: SessionState::Starting,
                    });
                    inner.current = Some(id.clone());
                    drop(inner.confirmations.insert(id.clone(), tx));
                }
                self.store.notify(Reason::Live);

                let result = self.client.start_live_streaming(request).await;
                if let Err(e) = result {
                    let removed = self.inner.borrow_mut().discard_starting(&id);
                    if removed {
                        self.store.notify(Reason::Live);
                    }
                    return Err(tracerr::new!(LiveStreamError::Start(e)));
                }
                self.watch_start(id, rx);
                Ok(())
            }
            LivePhase::Connected => {
                let id = match self.current() {
                    Some(id) => id,
                    None => return Ok(()),
                };
                self.stop(&id).await
            }
        }
    }

    /// Switches re-streaming to the given [`LiveMode`].
    ///
    /// No-op if the mode is the current one. If nothing is re-streamed, only
    /// the mode is changed. Otherwise, a session in the new mode is started,
    /// and the old one is stopped once the new one is confirmed started. If
    /// the new one fails to start or isn't confirmed within the configured
    /// timeout, the old one is left untouched.
    ///
    /// # Errors
    ///
    /// - [`LiveStreamError::InProgress`] if the [`LivePhase`] is pending.
    /// - [`LiveStreamError::NotConfirmed`] if the new session is not
    ///   confirmed.
    /// - Any error of starting or stopping a session.
    pub async fn change_mode(
        &self,
        mode: LiveMode,
    ) -> Result<(), Traced<LiveStreamError>> {
        if self.mode() == mode {
            return Ok(());
        }
        let old = match self.phase() {
            LivePhase::Pending => {
                return Err(tracerr::new!(LiveStreamError::InProgress));
            }
            LivePhase::Idle => {
                self.inner.borrow_mut().mode = mode;
                self.store.notify(Reason::Live);
                return Ok(());
            }
            LivePhase::Connected => match self.current() {
                Some(id) => id,
                None => return Ok(()),
            },
        };

        let request = self.request(mode)?;
        let new = request.id().clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.borrow_mut();
            inner.sessions.push(Session {
                id: new.clone(),
                mode,
                state: SessionState::Starting,
            });
            inner.switching_to = Some(mode);
            drop(inner.confirmations.insert(new.clone(), tx));
        }
        self.store.notify(Reason::Live);

        if let Err(e) = self.client.start_live_streaming(request).await {
            self.abort_switch(&new);
            return Err(tracerr::new!(LiveStreamError::Start(e)));
        }
        let timeout = self.timer.delay_for(self.conf.confirmation_timeout);
        if !confirmation(rx, timeout).await {
            self.abort_switch(&new);
            return Err(tracerr::new!(LiveStreamError::NotConfirmed(new)));
        }

        let old_started = self
            .inner
            .borrow()
            .session(&old)
            .map_or(false, |s| s.state == SessionState::Started);
        if old_started {
            self.stop(&old).await?;
        } else {
            log::debug!("Live stream {} is already stopped", old);
        }
        Ok(())
    }

    /// Applies a [`LiveStreamingState`] change reported by the SDK.
    ///
    /// Returns `false` if the change is about an unknown session. Doesn't
    /// notify.
    pub fn on_state_changed(
        &self,
        id: &StreamId,
        mode: LiveMode,
        state: LiveStreamingState,
    ) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.session(id).is_none() {
            log::debug!("Ignoring {} of unknown live stream {}", state, id);
            return false;
        }
        match state {
            LiveStreamingState::Started => {
                inner.set_session_state(id, SessionState::Started);
                inner.current = Some(id.clone());
                inner.mode = mode;
                inner.switching_to = None;
                inner.confirm(id, true);
            }
            LiveStreamingState::Stopped | LiveStreamingState::Failed => {
                if state == LiveStreamingState::Failed {
                    log::error!("Live stream {} has failed", id);
                }
                drop(inner.remove_session(id));
                inner.confirm(id, false);
            }
        }
        true
    }

    /// Forgets all the sessions, once the room session is over.
    ///
    /// Pending switches are resolved as not confirmed. Doesn't notify.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.sessions.clear();
        inner.current = None;
        inner.switching_to = None;
        inner.used_ids.clear();
        for (id, tx) in inner.confirmations.drain() {
            if tx.send(false).is_err() {
                log::debug!("Live stream {} confirmation is dropped", id);
            }
        }
    }

    /// Stops a started session.
    async fn stop(&self, id: &StreamId) -> Result<(), Traced<LiveStreamError>> {
        let mode = {
            let mut inner = self.inner.borrow_mut();
            let mode = match inner.session(id) {
                Some(s) if s.state == SessionState::Started => s.mode,
                _ => return Ok(()),
            };
            inner.set_session_state(id, SessionState::Stopping);
            mode
        };
        self.store.notify(Reason::Live);

        let result = self.client.stop_live_streaming(id, mode).await;
        {
            let mut inner = self.inner.borrow_mut();
            let stopping = inner
                .session(id)
                .map_or(false, |s| s.state == SessionState::Stopping);
            if stopping {
                if result.is_ok() {
                    drop(inner.remove_session(id));
                } else {
                    inner.set_session_state(id, SessionState::Started);
                }
            }
        }
        self.store.notify(Reason::Live);

        result.map_err(|e| tracerr::new!(LiveStreamError::Stop(e)))
    }

    /// Spawns a task forgetting the session started by toggling, unless it's
    /// confirmed within the configured timeout.
    fn watch_start(&self, id: StreamId, rx: oneshot::Receiver<bool>) {
        let timeout = self.timer.delay_for(self.conf.confirmation_timeout);
        let inner = Rc::downgrade(&self.inner);
        let store = Rc::downgrade(&self.store);
        let task = async move {
            if confirmation(rx, timeout).await {
                return;
            }
            let (inner, store) = match (inner.upgrade(), store.upgrade()) {
                (Some(inner), Some(store)) => (inner, store),
                _ => return,
            };
            let discarded = inner.borrow_mut().discard_starting(&id);
            if discarded {
                log::warn!("Live stream {} is not confirmed started", id);
                store.notify(Reason::Live);
            }
        };
        if let Err(e) = self.spawner.spawn_local(task) {
            log::error!("Failed to watch live stream start: {}", e);
        }
    }

    /// Forgets a session of a failed switch.
    fn abort_switch(&self, id: &StreamId) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.switching_to = None;
            if inner.discard_starting(id) {
                log::debug!("Live stream {} is discarded", id);
            }
        }
        self.store.notify(Reason::Live);
    }

    /// Builds a [`LiveStreamRequest`] of a new session in the given
    /// [`LiveMode`] from the currently published tracks.
    fn request(
        &self,
        mode: LiveMode,
    ) -> Result<LiveStreamRequest, Traced<LiveStreamError>> {
        if !self.state.connection().is_connected() {
            return Err(tracerr::new!(LiveStreamError::NotConnected));
        }
        let tracks = self.registry.all();

        let request = match mode {
            LiveMode::Direct => {
                let local = |tag| {
                    tracks
                        .iter()
                        .find(|t| t.tag() == Some(tag))
                        .map(|t| t.id().clone())
                };
                let video_track = local(TrackTag::Camera);
                let audio_track = local(TrackTag::Microphone);
                if video_track.is_none() && audio_track.is_none() {
                    return Err(tracerr::new!(
                        LiveStreamError::NoPublishedTracks(mode)
                    ));
                }
                let id = self.inner.borrow_mut().next_stream_id();
                LiveStreamRequest::Direct {
                    url: self.url(&id),
                    id,
                    video_track,
                    audio_track,
                }
            }
            LiveMode::Composed => {
                let ids = |kind| {
                    tracks
                        .iter()
                        .filter(|t| t.kind() == kind)
                        .map(|t| t.id().clone())
                        .collect::<Vec<_>>()
                };
                let video = ids(MediaKind::Video);
                let audio_tracks = ids(MediaKind::Audio);
                if video.is_empty() && audio_tracks.is_empty() {
                    return Err(tracerr::new!(
                        LiveStreamError::NoPublishedTracks(mode)
                    ));
                }
                let id = self.inner.borrow_mut().next_stream_id();
                LiveStreamRequest::Composed {
                    url: self.url(&id),
                    id,
                    width: self.conf.width,
                    height: self.conf.height,
                    tiles: grid_layout(
                        &video,
                        self.conf.width,
                        self.conf.height,
                    ),
                    audio_tracks,
                }
            }
        };
        Ok(request)
    }

    /// Returns destination URL of a session.
    fn url(&self, id: &StreamId) -> String {
        format!("{}/{}", self.conf.publish_url.trim_end_matches('/'), id)
    }
}

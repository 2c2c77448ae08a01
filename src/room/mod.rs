//! Room session: connection state, roster of remote users and reconciliation
//! of SDK events into them.

mod state;
pub mod validation;

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use derive_more::Display;
use futures::{
    stream::LocalBoxStream,
    task::{LocalSpawn, LocalSpawnExt as _},
};
use tracerr::Traced;

use crate::{
    conf::Conf,
    errors::{Classified, Error, ErrorKind, HandleDetachedError, Notices},
    live::{LiveMode, LiveStreaming},
    media::{
        InputDeviceInfo, LocalTracks, MediaKind, Track, TrackId,
        TrackRegistry, TrackTag, UserId,
    },
    platform::{
        self, EventListener, MediaCapture, MediaTrack, RejectionKind,
        RtcClient, RtcEvent, Timer,
    },
    prefs::Preferences,
    snapshot::{LiveSnapshot, LocalTrackSnapshot, RoomSnapshot},
    store::{ListenerHandle, Reason, RoomStore},
    token::{Credentials, TokenError, TokenRequest},
};

#[doc(inline)]
pub use self::{
    state::{ConnectionState, RemoteUser, State, UserState},
    validation::Invalid,
};

/// Errors occurring in [`RoomHandle::join()`] method.
#[derive(Clone, Debug, Display)]
pub enum RoomJoinError {
    /// Room name is not acceptable.
    #[display(fmt = "Room name {}", _0)]
    InvalidRoomName(Invalid),

    /// User ID is not acceptable.
    #[display(fmt = "User ID {}", _0)]
    InvalidUserId(Invalid),

    /// Room is joined (or being joined) already.
    #[display(fmt = "Room is already joined")]
    AlreadyJoined,

    /// Credentials cannot be obtained.
    #[display(fmt = "Failed to obtain credentials: {}", _0)]
    Token(TokenError),

    /// SDK rejected joining.
    #[display(fmt = "Failed to join room: {}", _0)]
    Rejected(platform::Error),

    /// Join was abandoned because the room was left meanwhile.
    #[display(fmt = "Join was aborted")]
    Aborted,
}

impl From<TokenError> for RoomJoinError {
    #[inline]
    fn from(err: TokenError) -> Self {
        Self::Token(err)
    }
}

impl Classified for RoomJoinError {
    fn name(&self) -> &'static str {
        match self {
            Self::InvalidRoomName(_) => "InvalidRoomName",
            Self::InvalidUserId(_) => "InvalidUserId",
            Self::AlreadyJoined => "AlreadyJoined",
            Self::Token(_) => "TokenError",
            Self::Rejected(e) => match e.kind() {
                RejectionKind::Authentication => "AuthenticationError",
                RejectionKind::Network => "NetworkError",
                _ => "JoinRejected",
            },
            Self::Aborted => "JoinAborted",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRoomName(_)
            | Self::InvalidUserId(_)
            | Self::AlreadyJoined
            | Self::Aborted => ErrorKind::RecoverableUser,
            Self::Token(_) | Self::Rejected(_) => ErrorKind::TransportRejection,
        }
    }
}

/// Error of the connection with a joined room being lost unexpectedly.
#[derive(Clone, Copy, Debug, Display)]
#[display(fmt = "Connection with the room is lost")]
pub struct ConnectionLostError;

impl Classified for ConnectionLostError {
    fn name(&self) -> &'static str {
        "ConnectionLost"
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::FatalDisconnect
    }
}

/// Error of subscribing to remote tracks.
#[derive(Clone, Debug, Display)]
#[display(fmt = "Failed to subscribe to tracks of {}: {}", _0, _1)]
pub struct SubscribeError(UserId, platform::Error);

impl Classified for SubscribeError {
    fn name(&self) -> &'static str {
        "SubscribeError"
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::TransportRejection
    }
}

macro_rules! upgrade_inner {
    ($v:expr) => {
        $v.upgrade()
            .ok_or_else(|| Error::from(tracerr::new!(HandleDetachedError)))
    };
}

/// External handle to a [`Room`].
///
/// Errors returned by its methods (except [`HandleDetachedError`]) are
/// reported as [`Notice`]s of the [`Room`] as well.
///
/// [`Notice`]: crate::errors::Notice
#[derive(Clone)]
pub struct RoomHandle(Weak<InnerRoom>);

impl RoomHandle {
    /// Joins the room with the given name as the given user.
    ///
    /// # Errors
    ///
    /// See [`RoomJoinError`] for details.
    pub async fn join(
        &self,
        room_name: String,
        user_id: UserId,
    ) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner
            .join(room_name, user_id)
            .await
            .map_err(|e| inner.report(e))
    }

    /// Leaves the room. Local state is cleared even if the SDK fails to
    /// leave.
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] only.
    pub async fn leave(&self) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner.leave().await;
        Ok(())
    }

    /// Creates a local track with the given [`TrackTag`].
    ///
    /// # Errors
    ///
    /// See [`LocalTrackError`] for details.
    ///
    /// [`LocalTrackError`]: crate::media::local::LocalTrackError
    pub async fn create_track(&self, tag: TrackTag) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner
            .local
            .create_track(tag)
            .await
            .map_err(|e| inner.report(e))
    }

    /// Publishes created local tracks with the given [`TrackTag`]s.
    ///
    /// # Errors
    ///
    /// See [`LocalTrackError`] for details.
    ///
    /// [`LocalTrackError`]: crate::media::local::LocalTrackError
    pub async fn publish(&self, tags: Vec<TrackTag>) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner
            .local
            .publish(&tags)
            .await
            .map_err(|e| inner.report(e))
    }

    /// Removes a local track with the given [`TrackTag`]. No-op if there is
    /// no such track.
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] only.
    pub async fn remove_track(&self, tag: TrackTag) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner.local.remove_tracks(&[tag]).await;
        Ok(())
    }

    /// Removes all the local tracks.
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] only.
    pub async fn remove_all_tracks(&self) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner.local.remove_tracks(&TrackTag::ALL).await;
        Ok(())
    }

    /// Mutes or unmutes a local track.
    ///
    /// # Errors
    ///
    /// See [`LocalTrackError`] for details.
    ///
    /// [`LocalTrackError`]: crate::media::local::LocalTrackError
    pub fn set_muted(&self, tag: TrackTag, muted: bool) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner
            .local
            .set_muted(tag, muted)
            .map_err(|e| inner.report(e))
    }

    /// Lists the available input devices.
    ///
    /// # Errors
    ///
    /// See [`LocalTrackError`] for details.
    ///
    /// [`LocalTrackError`]: crate::media::local::LocalTrackError
    pub async fn enumerate_devices(
        &self,
    ) -> Result<Vec<InputDeviceInfo>, Error> {
        let inner = upgrade_inner!(self.0)?;
        inner
            .local
            .enumerate_devices()
            .await
            .map_err(|e| inner.report(e))
    }

    /// Chooses an input device for the next capture requests.
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] only.
    pub fn select_device(
        &self,
        kind: MediaKind,
        device_id: Option<String>,
    ) -> Result<(), Error> {
        upgrade_inner!(self.0)
            .map(|inner| inner.local.select_device(kind, device_id))
    }

    /// Starts or stops re-streaming.
    ///
    /// # Errors
    ///
    /// See [`LiveStreamError`] for details.
    ///
    /// [`LiveStreamError`]: crate::live::LiveStreamError
    pub async fn toggle_live(&self) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner.live.toggle().await.map_err(|e| inner.report(e))
    }

    /// Switches re-streaming to the given [`LiveMode`].
    ///
    /// # Errors
    ///
    /// See [`LiveStreamError`] for details.
    ///
    /// [`LiveStreamError`]: crate::live::LiveStreamError
    pub async fn change_live_mode(&self, mode: LiveMode) -> Result<(), Error> {
        let inner = upgrade_inner!(self.0)?;
        inner
            .live
            .change_mode(mode)
            .await
            .map_err(|e| inner.report(e))
    }

    /// Returns the current [`RoomSnapshot`].
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] only.
    pub fn snapshot(&self) -> Result<Rc<RoomSnapshot>, Error> {
        upgrade_inner!(self.0).map(|inner| inner.snapshot())
    }

    /// Registers a listener invoked after every state change.
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] only.
    pub fn register<F>(
        &self,
        listener: F,
    ) -> Result<ListenerHandle<RoomSnapshot>, Error>
    where
        F: Fn(Reason) + 'static,
    {
        upgrade_inner!(self.0).map(|inner| inner.store.register(listener))
    }

    /// Dismisses a [`Notice`] with the given ID. Returns `false` if there is
    /// no such notice.
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] only.
    ///
    /// [`Notice`]: crate::errors::Notice
    pub fn dismiss_notice(&self, id: u64) -> Result<bool, Error> {
        let inner = upgrade_inner!(self.0)?;
        let dismissed = inner.notices.dismiss(id);
        if dismissed {
            inner.store.notify(Reason::Notices);
        }
        Ok(dismissed)
    }

    /// Returns a [`Stream`] of [`ConnectionState`] changes, starting with the
    /// current one.
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] only.
    ///
    /// [`Stream`]: futures::Stream
    pub fn on_connection_state_change(
        &self,
    ) -> Result<LocalBoxStream<'static, ConnectionState>, Error> {
        upgrade_inner!(self.0).map(|inner| inner.state.on_connection_change())
    }
}

/// Room session owning all its state.
pub struct Room(Rc<InnerRoom>);

impl Room {
    /// Creates a new disconnected [`Room`] over the provided SDK client.
    pub fn new(
        client: Rc<dyn RtcClient>,
        capture: Rc<dyn MediaCapture>,
        credentials: Rc<Credentials>,
        prefs: Preferences,
        spawner: Rc<dyn LocalSpawn>,
        timer: Rc<dyn Timer>,
        conf: Rc<Conf>,
    ) -> Self {
        let state = Rc::new(State::default());
        let registry = Rc::new(TrackRegistry::default());
        let store = Rc::new(RoomStore::default());
        let local = Rc::new(LocalTracks::new(
            capture,
            Rc::clone(&client),
            Rc::clone(&registry),
            Rc::clone(&state),
            Rc::clone(&store),
            Rc::clone(&spawner),
        ));
        let live = LiveStreaming::new(
            Rc::clone(&client),
            Rc::clone(&registry),
            Rc::clone(&state),
            Rc::clone(&store),
            Rc::clone(&spawner),
            timer,
            conf.live.clone(),
        );

        Self(Rc::new(InnerRoom {
            client,
            state,
            registry,
            local,
            live,
            store,
            notices: Notices::default(),
            credentials,
            prefs,
            spawner,
            conf,
            listener: RefCell::new(None),
            attempt: Cell::new(0),
        }))
    }

    /// Creates a new external handle to this [`Room`].
    #[inline]
    pub fn new_handle(&self) -> RoomHandle {
        RoomHandle(Rc::downgrade(&self.0))
    }

    /// Checks [`RoomHandle`] equality by comparing inner pointers.
    pub fn inner_ptr_eq(&self, handle: &RoomHandle) -> bool {
        handle
            .0
            .upgrade()
            .map_or(false, |inner| Rc::ptr_eq(&self.0, &inner))
    }

    /// Leaves this [`Room`] (best-effort).
    pub async fn leave(&self) {
        self.0.leave().await;
    }
}

/// Actual data of a [`Room`].
///
/// Shared between an external [`RoomHandle`] and Rust side ([`Room`]).
struct InnerRoom {
    /// SDK client of this room.
    client: Rc<dyn RtcClient>,

    /// Connection state and roster.
    state: Rc<State>,

    /// All the tracks known to this room.
    registry: Rc<TrackRegistry>,

    /// Local tracks controller.
    local: Rc<LocalTracks>,

    /// Live-streaming controller.
    live: LiveStreaming,

    /// Bridge notifying UI subscribers.
    store: Rc<RoomStore>,

    /// Reported errors not dismissed yet.
    notices: Notices,

    /// Join credentials cache.
    credentials: Rc<Credentials>,

    /// Persisted preferences.
    prefs: Preferences,

    /// Spawner of background tasks.
    spawner: Rc<dyn LocalSpawn>,

    /// Application configuration.
    conf: Rc<Conf>,

    /// Subscription to SDK events, held during a session only.
    listener: RefCell<Option<EventListener>>,

    /// Number of join attempts and session ends happened so far.
    ///
    /// Join completes only if no other attempt or session end has happened
    /// while it was awaiting.
    attempt: Cell<u64>,
}

impl InnerRoom {
    /// Joins the room with the given name.
    async fn join(
        self: &Rc<Self>,
        room_name: String,
        user_id: UserId,
    ) -> Result<(), Traced<RoomJoinError>> {
        validation::room_name(&room_name)
            .map_err(RoomJoinError::InvalidRoomName)
            .map_err(tracerr::wrap!())?;
        validation::user_id(&user_id)
            .map_err(RoomJoinError::InvalidUserId)
            .map_err(tracerr::wrap!())?;
        if self.state.connection() != ConnectionState::Disconnected {
            return Err(tracerr::new!(RoomJoinError::AlreadyJoined));
        }

        let attempt = self.attempt.get() + 1;
        self.attempt.set(attempt);
        let is_stale = || self.attempt.get() != attempt;

        self.state.set_identity(room_name.clone(), user_id.clone());
        self.state.set_connection(ConnectionState::Connecting);
        self.subscribe();
        self.store.notify(Reason::Connection);

        let request = TokenRequest {
            app_id: self.conf.app.id.to_string(),
            room: room_name,
            user_id: user_id.clone(),
        };
        let token = match self.credentials.token(&request).await {
            Ok(token) => token,
            Err(e) => {
                if !is_stale() {
                    self.abort_join();
                }
                return Err(e).map_err(tracerr::map_from_and_wrap!());
            }
        };
        if is_stale() {
            log::debug!("Join of {} is abandoned", request.room);
            return Err(tracerr::new!(RoomJoinError::Aborted));
        }

        if let Err(e) = self.client.join(&token, &user_id).await {
            self.credentials.invalidate(&request);
            if !is_stale() {
                self.abort_join();
            }
            return Err(tracerr::new!(RoomJoinError::Rejected(e)));
        }
        if is_stale() {
            log::debug!("Join of {} is abandoned", request.room);
            if self.state.connection() == ConnectionState::Disconnected {
                if let Err(e) = self.client.leave().await {
                    log::warn!("Failed to leave abandoned room: {}", e);
                }
            }
            return Err(tracerr::new!(RoomJoinError::Aborted));
        }
        self.prefs.set_user_id(&user_id);

        Ok(())
    }

    /// Rolls back an optimistic [`ConnectionState::Connecting`] of a failed
    /// join.
    fn abort_join(&self) {
        self.end_session();
        self.store.notify(Reason::Connection);
    }

    /// Leaves the room, clearing its session state first.
    async fn leave(&self) {
        let was = self.state.connection();
        self.end_session();
        self.store.notify(Reason::Connection);

        if was != ConnectionState::Disconnected {
            if let Err(e) = self.client.leave().await {
                log::warn!("Failed to leave room: {}", e);
            }
        }
    }

    /// Subscribes to the SDK events for the session being started.
    fn subscribe(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let listener =
            EventListener::new(Rc::clone(&self.client), move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_event(event);
                }
            });
        drop(self.listener.replace(Some(listener)));
    }

    /// Ends the current session: clears the roster, releases remote tracks,
    /// resets local tracks publishing and live streaming.
    ///
    /// Doesn't notify.
    fn end_session(&self) {
        self.attempt.set(self.attempt.get() + 1);
        let listener = self.listener.borrow_mut().take();
        drop(listener);

        self.state.set_connection(ConnectionState::Disconnected);
        release(self.state.clear_users(&self.registry));
        self.local.reset_published();
        self.live.clear();
    }

    /// Reconciles the given [`RtcEvent`] into the room state, notifying
    /// subscribers exactly once.
    fn handle_event(self: &Rc<Self>, event: RtcEvent) {
        let reason = match event {
            RtcEvent::ConnectionStateChanged(next) => {
                self.on_connection_state_changed(next);
                Reason::Connection
            }
            RtcEvent::UserJoined { user_id, user_data } => {
                self.state.upsert_user(user_id, user_data);
                Reason::Roster
            }
            RtcEvent::UserLeft { user_id } => {
                if let Some((_, tracks)) =
                    self.state.remove_user(&self.registry, &user_id)
                {
                    release(tracks);
                }
                Reason::Roster
            }
            RtcEvent::UserPublished { user_id, tracks } => {
                let ids: Vec<TrackId> =
                    tracks.iter().map(|t| t.id.clone()).collect();
                let tracks = tracks
                    .into_iter()
                    .map(|t| {
                        Track::remote(t.id, t.kind, user_id.clone(), t.muted)
                    })
                    .collect();
                self.state.add_user_tracks(&self.registry, &user_id, tracks);
                if self.conf.room.auto_subscribe && !ids.is_empty() {
                    self.spawn_subscribe(user_id, ids);
                }
                Reason::Tracks
            }
            RtcEvent::UserUnpublished { user_id, track_ids } => {
                let removed = self.state.remove_user_tracks(
                    &self.registry,
                    &user_id,
                    &track_ids,
                );
                let subscribed: Vec<TrackId> = removed
                    .iter()
                    .filter(|t| t.has_media())
                    .map(|t| t.id().clone())
                    .collect();
                release(removed);
                if !subscribed.is_empty() {
                    self.spawn_unsubscribe(subscribed);
                }
                Reason::Tracks
            }
            RtcEvent::UserReconnecting { user_id } => {
                self.state.set_user_state(&user_id, UserState::Reconnecting);
                Reason::Roster
            }
            RtcEvent::UserReconnected { user_id } => {
                self.state.set_user_state(&user_id, UserState::Connected);
                Reason::Roster
            }
            RtcEvent::UserTrackMuted {
                user_id,
                track_id,
                muted,
            } => {
                let owned = self
                    .registry
                    .get(&track_id)
                    .map_or(false, |t| t.owner() == Some(&user_id));
                if owned {
                    self.registry.update(&track_id, |t| t.set_muted(muted));
                }
                Reason::Tracks
            }
            RtcEvent::LiveStreamingStateChanged {
                stream_id,
                mode,
                state,
            } => {
                self.live.on_state_changed(&stream_id, mode, state);
                Reason::Live
            }
        };
        self.store.notify(reason);
    }

    /// Applies a [`ConnectionState`] reported by the SDK.
    ///
    /// Losing an established session ends it and reports a
    /// [`ConnectionLostError`].
    fn on_connection_state_changed(&self, next: ConnectionState) {
        let prev = self.state.connection();
        if next != ConnectionState::Disconnected {
            self.state.set_connection(next);
            return;
        }
        if prev == ConnectionState::Disconnected {
            return;
        }
        self.end_session();
        if prev.is_established() {
            let err = Error::from(tracerr::new!(ConnectionLostError));
            err.print();
            self.notices.push(&err);
        }
    }

    /// Spawns subscription to the given remote tracks of a user.
    fn spawn_subscribe(self: &Rc<Self>, user_id: UserId, ids: Vec<TrackId>) {
        let weak = Rc::downgrade(self);
        let client = Rc::clone(&self.client);
        let task = async move {
            let result = client.subscribe(ids).await;
            let inner = match weak.upgrade() {
                Some(inner) => inner,
                None => {
                    if let Ok(handles) = result {
                        handles.iter().for_each(|h| h.release());
                    }
                    return;
                }
            };
            match result {
                Ok(handles) => inner.on_subscribed(&user_id, handles).await,
                Err(e) => {
                    drop(inner.report(tracerr::new!(SubscribeError(
                        user_id, e
                    ))));
                }
            }
        };
        if let Err(e) = self.spawner.spawn_local(task) {
            log::error!("Failed to spawn subscription: {}", e);
        }
    }

    /// Attaches subscribed remote tracks, discarding the ones unpublished
    /// (or whose publisher left) while the subscription was in flight.
    async fn on_subscribed(
        &self,
        user_id: &UserId,
        handles: Vec<Rc<dyn MediaTrack>>,
    ) {
        let mut attached = false;
        let mut stale = Vec::new();
        for media in handles {
            let id = match media.id() {
                Some(id) => id,
                None => {
                    media.release();
                    continue;
                }
            };
            match self.registry.get(&id) {
                Some(t) if t.owner() == Some(user_id) => {
                    if t.has_media() {
                        media.release();
                    } else {
                        attached |= self
                            .registry
                            .update(&id, |t| t.set_media(Rc::clone(&media)));
                    }
                }
                _ => stale.push((id, media)),
            }
        }
        if attached {
            self.store.notify(Reason::Tracks);
        }
        if stale.is_empty() {
            return;
        }

        log::debug!("Discarding {} stale subscriptions", stale.len());
        let (ids, handles): (Vec<_>, Vec<_>) = stale.into_iter().unzip();
        if self.state.connection().is_established() {
            if let Err(e) = self.client.unsubscribe(ids).await {
                log::warn!("Failed to unsubscribe from stale tracks: {}", e);
            }
        }
        handles.iter().for_each(|h| h.release());
    }

    /// Spawns best-effort unsubscription from the given remote tracks.
    fn spawn_unsubscribe(&self, ids: Vec<TrackId>) {
        let client = Rc::clone(&self.client);
        let task = async move {
            if let Err(e) = client.unsubscribe(ids).await {
                log::warn!("Failed to unsubscribe from tracks: {}", e);
            }
        };
        if let Err(e) = self.spawner.spawn_local(task) {
            log::error!("Failed to spawn unsubscription: {}", e);
        }
    }

    /// Records the given error as a [`Notice`], returning its flattened
    /// form.
    ///
    /// [`Notice`]: crate::errors::Notice
    fn report<E>(&self, err: Traced<E>) -> Error
    where
        E: Classified + fmt::Display,
    {
        let err = Error::from(err);
        if err.kind() == ErrorKind::RecoverableUser {
            log::warn!("{}", err);
        } else {
            err.print();
        }
        self.notices.push(&err);
        self.store.notify(Reason::Notices);
        err
    }

    /// Returns the current [`RoomSnapshot`].
    fn snapshot(&self) -> Rc<RoomSnapshot> {
        self.store.snapshot(|| RoomSnapshot {
            version: self.store.version(),
            room: self.state.room_name(),
            user_id: self.state.user_id(),
            connection: self.state.connection(),
            users: self.state.users().into_iter().map(Into::into).collect(),
            tracks: self.registry.all().iter().map(Into::into).collect(),
            local_tracks: TrackTag::ALL
                .iter()
                .filter_map(|tag| {
                    LocalTrackSnapshot::new(*tag, &self.local.slot(*tag))
                })
                .collect(),
            live: LiveSnapshot {
                mode: self.live.mode(),
                phase: self.live.phase(),
                stream_id: self.live.current(),
                active: self.live.active(),
            },
            devices: self.local.available_devices(),
            selected_devices: self.local.devices(),
            notices: self.notices.all(),
        })
    }
}

impl Drop for InnerRoom {
    /// Releases all the remote tracks. Local ones are released by
    /// [`LocalTracks`].
    fn drop(&mut self) {
        release(self.registry.remove_remote());
    }
}

/// Releases SDK handles of the given removed [`Track`]s.
fn release(tracks: Vec<Track>) {
    for track in tracks {
        if let Some(media) = track.media() {
            media.release();
        }
    }
}

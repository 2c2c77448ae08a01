//! Connection state and roster of remote users.

use std::cell::RefCell;

use derive_more::Display;
use futures::stream::LocalBoxStream;
use medea_reactive::ObservableCell;
use serde::Serialize;

use crate::media::{Track, TrackId, TrackRegistry, UserId};

/// State of the connection with a room.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected. Initial and terminal state of a session.
    #[display(fmt = "disconnected")]
    Disconnected,

    /// Join is in progress.
    #[display(fmt = "connecting")]
    Connecting,

    /// Joined the room.
    #[display(fmt = "connected")]
    Connected,

    /// Connection is lost and being restored.
    #[display(fmt = "reconnecting")]
    Reconnecting,

    /// Connection has been restored after a loss.
    #[display(fmt = "reconnected")]
    Reconnected,
}

impl ConnectionState {
    /// Indicates whether media can be exchanged in this [`ConnectionState`].
    #[inline]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }

    /// Indicates whether the session has been established in this
    /// [`ConnectionState`], so losing it is a fatal disconnect.
    #[inline]
    pub fn is_established(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting | Self::Reconnected)
    }

    /// Indicates whether the transition into the `next` [`ConnectionState`]
    /// is expected.
    pub fn can_transit_to(self, next: Self) -> bool {
        use ConnectionState as S;

        match (self, next) {
            (_, S::Disconnected)
            | (S::Disconnected, S::Connecting)
            | (S::Connecting, S::Connected)
            | (S::Connected, S::Reconnecting)
            | (S::Reconnecting, S::Reconnected)
            | (S::Reconnected, S::Reconnecting)
            | (S::Reconnected, S::Connected) => true,
            (a, b) => a == b,
        }
    }
}

/// Connection sub-state of a [`RemoteUser`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    /// User is connected.
    Connected,

    /// User has lost its connection and is reconnecting.
    Reconnecting,
}

/// Other participant of a room.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteUser {
    /// ID of this [`RemoteUser`].
    pub id: UserId,

    /// Opaque data attached by this [`RemoteUser`].
    pub user_data: Option<String>,

    /// Connection sub-state of this [`RemoteUser`].
    pub state: UserState,

    /// IDs of the tracks currently published by this [`RemoteUser`], in
    /// their publishing order.
    ///
    /// Every listed ID is present in the [`TrackRegistry`] as a remote track
    /// owned by this [`RemoteUser`].
    pub track_ids: Vec<TrackId>,
}

impl RemoteUser {
    /// Creates a new connected [`RemoteUser`] without tracks.
    pub fn new(id: UserId, user_data: Option<String>) -> Self {
        Self {
            id,
            user_data,
            state: UserState::Connected,
            track_ids: Vec::new(),
        }
    }
}

/// Connection and roster state of a room session.
pub struct State {
    /// Current [`ConnectionState`].
    connection: ObservableCell<ConnectionState>,

    /// [`RemoteUser`]s in their joining order.
    roster: RefCell<Vec<RemoteUser>>,

    /// Name of the joined (or being joined) room.
    room_name: RefCell<Option<String>>,

    /// ID of the local user in the joined (or being joined) room.
    user_id: RefCell<Option<UserId>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            connection: ObservableCell::new(ConnectionState::Disconnected),
            roster: RefCell::default(),
            room_name: RefCell::default(),
            user_id: RefCell::default(),
        }
    }
}

impl State {
    /// Returns the current [`ConnectionState`].
    #[inline]
    pub fn connection(&self) -> ConnectionState {
        self.connection.get()
    }

    /// Sets the current [`ConnectionState`], returning the previous one.
    pub fn set_connection(&self, state: ConnectionState) -> ConnectionState {
        let prev = self.connection.get();
        if !prev.can_transit_to(state) {
            log::warn!(
                "Unexpected connection transition: {} -> {}",
                prev,
                state,
            );
        }
        self.connection.set(state);
        prev
    }

    /// Returns a [`Stream`] of [`ConnectionState`] changes, starting with
    /// the current one.
    ///
    /// [`Stream`]: futures::Stream
    #[inline]
    pub fn on_connection_change(
        &self,
    ) -> LocalBoxStream<'static, ConnectionState> {
        self.connection.subscribe()
    }

    /// Records identity of the local user in a room being joined.
    pub fn set_identity(&self, room_name: String, user_id: UserId) {
        self.room_name.replace(Some(room_name));
        self.user_id.replace(Some(user_id));
    }

    /// Returns name of the joined (or being joined) room.
    #[inline]
    pub fn room_name(&self) -> Option<String> {
        self.room_name.borrow().clone()
    }

    /// Returns ID of the local user.
    #[inline]
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id.borrow().clone()
    }

    /// Returns all the [`RemoteUser`]s.
    pub fn users(&self) -> Vec<RemoteUser> {
        self.roster.borrow().clone()
    }

    /// Looks up a [`RemoteUser`] by its ID.
    pub fn user(&self, id: &UserId) -> Option<RemoteUser> {
        self.roster.borrow().iter().find(|u| &u.id == id).cloned()
    }

    /// Adds a new [`RemoteUser`] or updates `user_data` of the existing one.
    pub fn upsert_user(&self, id: UserId, user_data: Option<String>) {
        let mut roster = self.roster.borrow_mut();
        if let Some(user) = roster.iter_mut().find(|u| u.id == id) {
            user.user_data = user_data;
        } else {
            roster.push(RemoteUser::new(id, user_data));
        }
    }

    /// Sets [`UserState`] of a [`RemoteUser`].
    ///
    /// Returns `false` if there is no such [`RemoteUser`].
    pub fn set_user_state(&self, id: &UserId, state: UserState) -> bool {
        self.roster
            .borrow_mut()
            .iter_mut()
            .find(|u| &u.id == id)
            .map(|u| u.state = state)
            .is_some()
    }

    /// Registers the provided remote `tracks` as published by a
    /// [`RemoteUser`], adding the user if it's unknown yet.
    pub fn add_user_tracks(
        &self,
        registry: &TrackRegistry,
        id: &UserId,
        tracks: Vec<Track>,
    ) {
        let mut roster = self.roster.borrow_mut();
        let idx = if let Some(idx) = roster.iter().position(|u| &u.id == id) {
            idx
        } else {
            log::warn!("Tracks published by unknown user {}", id);
            roster.push(RemoteUser::new(id.clone(), None));
            roster.len() - 1
        };
        let user = &mut roster[idx];
        for track in tracks {
            if !user.track_ids.contains(track.id()) {
                user.track_ids.push(track.id().clone());
            }
            drop(registry.put(track));
        }
    }

    /// Unregisters the remote tracks with the provided IDs published by a
    /// [`RemoteUser`], returning the removed ones.
    pub fn remove_user_tracks(
        &self,
        registry: &TrackRegistry,
        id: &UserId,
        track_ids: &[TrackId],
    ) -> Vec<Track> {
        let mut roster = self.roster.borrow_mut();
        let user = match roster.iter_mut().find(|u| &u.id == id) {
            Some(user) => user,
            None => return Vec::new(),
        };
        user.track_ids.retain(|t| !track_ids.contains(t));
        track_ids
            .iter()
            .filter(|t| {
                registry
                    .get(t)
                    .map_or(false, |track| track.owner() == Some(id))
            })
            .filter_map(|t| registry.remove(t))
            .collect()
    }

    /// Removes a [`RemoteUser`] along with all its tracks in one step,
    /// returning the removed tracks.
    pub fn remove_user(
        &self,
        registry: &TrackRegistry,
        id: &UserId,
    ) -> Option<(RemoteUser, Vec<Track>)> {
        let mut roster = self.roster.borrow_mut();
        let idx = roster.iter().position(|u| &u.id == id)?;
        let user = roster.remove(idx);
        let tracks = registry.remove_for_user(id);
        Some((user, tracks))
    }

    /// Removes all the [`RemoteUser`]s along with all the remote tracks,
    /// returning the removed tracks.
    pub fn clear_users(&self, registry: &TrackRegistry) -> Vec<Track> {
        self.roster.borrow_mut().clear();
        registry.remove_remote()
    }
}

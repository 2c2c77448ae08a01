//! General library interface.

use std::{cell::RefCell, rc::Rc};

use futures::task::{LocalSpawn, LocalSpawnExt as _};

use crate::{
    conf::Conf,
    platform::{MediaCapture, RtcClient, Timer},
    prefs::{Preferences, Storage},
    room::{Room, RoomHandle},
    token::{Credentials, HttpTokenSource, TokenSource},
};

/// General library interface.
///
/// Responsible for sharing credentials, preferences and capture subsystem
/// between [`Room`]s and for their initialization.
pub struct App(Rc<RefCell<Inner>>);

/// Inner representation of an [`App`].
struct Inner {
    /// Configuration [`Room`]s are created with.
    conf: Rc<Conf>,

    /// Capture subsystem shared by all the [`Room`]s.
    capture: Rc<dyn MediaCapture>,

    /// Join credentials cache shared by all the [`Room`]s.
    credentials: Rc<Credentials>,

    /// Persisted preferences.
    prefs: Preferences,

    /// Spawner of background tasks.
    spawner: Rc<dyn LocalSpawn>,

    /// Timers of the platform.
    timer: Rc<dyn Timer>,

    /// [`Room`]s maintained by this [`App`] instance.
    rooms: Vec<Room>,
}

impl App {
    /// Instantiates a new [`App`] fetching credentials with the provided
    /// [`TokenSource`].
    ///
    /// Applies the configured log level.
    pub fn new(
        conf: Conf,
        capture: Rc<dyn MediaCapture>,
        tokens: Rc<dyn TokenSource>,
        storage: Rc<dyn Storage>,
        spawner: Rc<dyn LocalSpawn>,
        timer: Rc<dyn Timer>,
    ) -> Self {
        match conf.log.level() {
            Some(level) => log::set_max_level(level),
            None => log::warn!("Unknown log level `{}`", conf.log.level),
        }
        Self(Rc::new(RefCell::new(Inner {
            conf: Rc::new(conf),
            capture,
            credentials: Rc::new(Credentials::new(tokens)),
            prefs: Preferences::new(storage),
            spawner,
            timer,
            rooms: Vec::new(),
        })))
    }

    /// Instantiates a new [`App`] fetching credentials from the configured
    /// HTTP token endpoint.
    pub fn with_http_tokens(
        conf: Conf,
        capture: Rc<dyn MediaCapture>,
        storage: Rc<dyn Storage>,
        spawner: Rc<dyn LocalSpawn>,
        timer: Rc<dyn Timer>,
    ) -> Self {
        let tokens = Rc::new(HttpTokenSource::new(&conf.token));
        Self::new(conf, capture, tokens, storage, spawner, timer)
    }

    /// Creates a new [`Room`] over the provided SDK client and returns its
    /// [`RoomHandle`].
    pub fn init_room(&self, client: Rc<dyn RtcClient>) -> RoomHandle {
        let mut inner = self.0.borrow_mut();
        let room = Room::new(
            client,
            Rc::clone(&inner.capture),
            Rc::clone(&inner.credentials),
            inner.prefs.clone(),
            Rc::clone(&inner.spawner),
            Rc::clone(&inner.timer),
            Rc::clone(&inner.conf),
        );
        let handle = room.new_handle();
        inner.rooms.push(room);
        handle
    }

    /// Returns the persisted [`Preferences`].
    pub fn preferences(&self) -> Preferences {
        self.0.borrow().prefs.clone()
    }

    /// Closes the provided [`RoomHandle`], leaving its room (best-effort).
    ///
    /// The handle becomes detached once the leave completes.
    #[allow(clippy::needless_pass_by_value)]
    pub fn close_room(&self, room_to_close: RoomHandle) {
        let mut inner = self.0.borrow_mut();
        let index = inner
            .rooms
            .iter()
            .position(|room| room.inner_ptr_eq(&room_to_close));
        if let Some(index) = index {
            let room = inner.rooms.remove(index);
            let task = async move { room.leave().await };
            if let Err(e) = inner.spawner.spawn_local(task) {
                log::error!("Failed to spawn room closing: {}", e);
            }
        }
    }

    /// Drops this [`App`], leaving all its [`Room`]s (best-effort).
    ///
    /// All the related [`RoomHandle`]s become detached once the leaves
    /// complete.
    pub fn dispose(self) {
        let mut inner = self.0.borrow_mut();
        let rooms: Vec<_> = inner.rooms.drain(..).collect();
        for room in rooms {
            let task = async move { room.leave().await };
            if let Err(e) = inner.spawner.spawn_local(task) {
                log::error!("Failed to spawn room leaving: {}", e);
            }
        }
    }
}

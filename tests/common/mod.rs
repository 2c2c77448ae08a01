//! Fake SDK collaborators and a test harness driving a room on a
//! [`LocalPool`].

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::Rc,
    time::Duration,
};

use async_trait::async_trait;
use futures::{
    channel::oneshot,
    executor::LocalPool,
    future::{self, LocalBoxFuture},
    task::LocalSpawn,
    FutureExt as _,
};
use rtc_demo::{
    live::{LiveMode, LiveStreamRequest, StreamId},
    media::{InputDeviceInfo, MediaKind, TrackId, UserId},
    platform::{
        self, ListenerId, MediaCapture, MediaTrack, RejectionKind,
        RemoteTrackInfo, RtcClient, RtcEvent, ScreenCapture, Timer,
    },
    prefs::MemoryStorage,
    snapshot::RoomSnapshot,
    token::{TokenError, TokenRequest, TokenSource},
    App, Conf, ConnectionState, RoomHandle,
};
use tracerr::Traced;

/// Name of the room joined by [`Harness::join()`].
pub const ROOM: &str = "demo-room";

/// ID of the local user joining by [`Harness::join()`].
pub const ME: &str = "alice";

pub fn rejection(kind: RejectionKind) -> platform::Error {
    platform::Error::new(kind, "rejected by fake")
}

/// Fake media track tracking its release.
pub struct FakeTrack {
    id: Option<TrackId>,
    kind: MediaKind,
    pub device_id: Option<String>,
    pub muted: Cell<bool>,
    pub released: Cell<bool>,
    ended_tx: RefCell<Option<oneshot::Sender<()>>>,
    ended_rx: RefCell<Option<oneshot::Receiver<()>>>,
}

impl FakeTrack {
    pub fn new(id: Option<&str>, kind: MediaKind) -> Rc<Self> {
        Self::with_device(id, kind, None)
    }

    pub fn with_device(
        id: Option<&str>,
        kind: MediaKind,
        device_id: Option<String>,
    ) -> Rc<Self> {
        let (tx, rx) = oneshot::channel();
        Rc::new(Self {
            id: id.map(TrackId::from),
            kind,
            device_id,
            muted: Cell::new(false),
            released: Cell::new(false),
            ended_tx: RefCell::new(Some(tx)),
            ended_rx: RefCell::new(Some(rx)),
        })
    }

    /// Ends this track as if its source was stopped externally.
    pub fn end(&self) {
        if let Some(tx) = self.ended_tx.borrow_mut().take() {
            let _ = tx.send(());
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> Option<TrackId> {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_muted(&self, muted: bool) {
        self.muted.set(muted);
    }

    fn release(&self) {
        self.released.set(true);
    }

    fn on_ended(&self) -> LocalBoxFuture<'static, ()> {
        match self.ended_rx.borrow_mut().take() {
            Some(rx) => async move {
                if rx.await.is_err() {
                    future::pending::<()>().await;
                }
            }
            .boxed_local(),
            None => future::pending().boxed_local(),
        }
    }
}

/// Fake capture subsystem.
#[derive(Default)]
pub struct FakeCapture {
    /// Number of capture requests issued.
    pub requests: Cell<u32>,
    /// Whether screen capture provides audio.
    pub screen_audio: Cell<bool>,
    /// Error returned by the next capture requests.
    pub error: RefCell<Option<platform::Error>>,
    /// All the tracks created so far.
    pub created: RefCell<Vec<Rc<FakeTrack>>>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
}

impl FakeCapture {
    /// Makes the next capture request wait until the returned sender fires.
    pub fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gate.replace(Some(rx));
        tx
    }

    pub fn last(&self) -> Rc<FakeTrack> {
        Rc::clone(self.created.borrow().last().unwrap())
    }

    async fn request(&self) -> Result<(), platform::Error> {
        self.requests.set(self.requests.get() + 1);
        let gate = self.gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match self.error.borrow().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn track(
        &self,
        id: &str,
        kind: MediaKind,
        device_id: Option<String>,
    ) -> Rc<FakeTrack> {
        let id = format!("{}-{}", id, self.created.borrow().len() + 1);
        let track = FakeTrack::with_device(Some(&id), kind, device_id);
        self.created.borrow_mut().push(Rc::clone(&track));
        track
    }
}

#[async_trait(?Send)]
impl MediaCapture for FakeCapture {
    async fn create_camera_track(
        &self,
        device_id: Option<String>,
    ) -> Result<Rc<dyn MediaTrack>, platform::Error> {
        self.request().await?;
        let track = self.track("camera", MediaKind::Video, device_id);
        Ok(track as Rc<dyn MediaTrack>)
    }

    async fn create_microphone_track(
        &self,
        device_id: Option<String>,
    ) -> Result<Rc<dyn MediaTrack>, platform::Error> {
        self.request().await?;
        let track = self.track("mic", MediaKind::Audio, device_id);
        Ok(track as Rc<dyn MediaTrack>)
    }

    async fn create_screen_tracks(
        &self,
        with_audio: bool,
    ) -> Result<ScreenCapture, platform::Error> {
        self.request().await?;
        let video: Rc<dyn MediaTrack> =
            self.track("screen", MediaKind::Video, None);
        let audio = if with_audio && self.screen_audio.get() {
            Some(self.track("screen-audio", MediaKind::Audio, None)
                as Rc<dyn MediaTrack>)
        } else {
            None
        };
        Ok(ScreenCapture { video, audio })
    }

    async fn enumerate_devices(
        &self,
    ) -> Result<Vec<InputDeviceInfo>, platform::Error> {
        if let Some(e) = self.error.borrow().clone() {
            return Err(e);
        }
        Ok(vec![
            InputDeviceInfo {
                device_id: "cam-1".into(),
                label: "Front camera".into(),
                kind: MediaKind::Video,
            },
            InputDeviceInfo {
                device_id: "mic-1".into(),
                label: "Headset".into(),
                kind: MediaKind::Audio,
            },
        ])
    }
}

/// Fake SDK client recording all the calls made on it.
pub struct FakeClient {
    /// Calls made so far, like `join`, `publish:camera-1` or `stop:<id>`.
    pub calls: RefCell<Vec<String>>,
    /// Whether a successful join emits [`ConnectionState::Connected`].
    pub connect_on_join: Cell<bool>,
    pub join_error: RefCell<Option<platform::Error>>,
    pub publish_error: RefCell<Option<platform::Error>>,
    pub start_error: RefCell<Option<platform::Error>>,
    pub stop_error: RefCell<Option<platform::Error>>,
    /// Live-streaming requests issued so far.
    pub live_requests: RefCell<Vec<LiveStreamRequest>>,
    /// Remote tracks handed out by subscriptions so far.
    pub subscribed: RefCell<Vec<Rc<FakeTrack>>>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn(RtcEvent)>)>>,
    last_listener: Cell<u64>,
    subscribe_gate: RefCell<Option<oneshot::Receiver<()>>>,
    publish_gate: RefCell<Option<oneshot::Receiver<()>>>,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self {
            calls: RefCell::default(),
            connect_on_join: Cell::new(true),
            join_error: RefCell::default(),
            publish_error: RefCell::default(),
            start_error: RefCell::default(),
            stop_error: RefCell::default(),
            live_requests: RefCell::default(),
            subscribed: RefCell::default(),
            listeners: RefCell::default(),
            last_listener: Cell::new(0),
            subscribe_gate: RefCell::default(),
            publish_gate: RefCell::default(),
        }
    }
}

impl FakeClient {
    /// Emits the given event to all the registered listeners.
    pub fn emit(&self, event: RtcEvent) {
        let listeners: Vec<_> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(event.clone());
        }
    }

    pub fn listeners_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Makes the next subscription wait until the returned sender fires.
    pub fn hold_subscriptions(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.subscribe_gate.replace(Some(rx));
        tx
    }

    /// Makes the next publishing wait until the returned sender fires.
    pub fn hold_publishing(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.publish_gate.replace(Some(rx));
        tx
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.borrow().iter().any(|c| c == call)
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.borrow().iter().position(|c| c == call)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Returns [`StreamId`] of the `n`-th live-streaming request.
    pub fn stream_id(&self, n: usize) -> StreamId {
        self.live_requests.borrow()[n].id().clone()
    }

    /// Subscribed remote track with the given ID.
    pub fn remote(&self, id: &str) -> Rc<FakeTrack> {
        let id = TrackId::from(id);
        Rc::clone(
            self.subscribed
                .borrow()
                .iter()
                .find(|t| t.id() == Some(id.clone()))
                .unwrap(),
        )
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

fn ids(tracks: &[Rc<dyn MediaTrack>]) -> String {
    tracks
        .iter()
        .map(|t| t.id().map(|id| id.0).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait(?Send)]
impl RtcClient for FakeClient {
    async fn join(
        &self,
        token: &str,
        _: &UserId,
    ) -> Result<(), platform::Error> {
        self.record(format!("join:{}", token));
        if let Some(e) = self.join_error.borrow().clone() {
            return Err(e);
        }
        if self.connect_on_join.get() {
            self.emit(RtcEvent::ConnectionStateChanged(
                ConnectionState::Connected,
            ));
        }
        Ok(())
    }

    async fn leave(&self) -> Result<(), platform::Error> {
        self.record("leave".into());
        Ok(())
    }

    async fn publish(
        &self,
        tracks: Vec<Rc<dyn MediaTrack>>,
    ) -> Result<(), platform::Error> {
        self.record(format!("publish:{}", ids(&tracks)));
        let gate = self.publish_gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match self.publish_error.borrow().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn unpublish(
        &self,
        tracks: Vec<Rc<dyn MediaTrack>>,
    ) -> Result<(), platform::Error> {
        self.record(format!("unpublish:{}", ids(&tracks)));
        Ok(())
    }

    async fn subscribe(
        &self,
        track_ids: Vec<TrackId>,
    ) -> Result<Vec<Rc<dyn MediaTrack>>, platform::Error> {
        let joined: Vec<_> = track_ids.iter().map(|t| t.0.as_str()).collect();
        self.record(format!("subscribe:{}", joined.join(",")));
        let gate = self.subscribe_gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(track_ids
            .iter()
            .map(|id| {
                let track = FakeTrack::new(Some(&id.0), MediaKind::Video);
                self.subscribed.borrow_mut().push(Rc::clone(&track));
                track as Rc<dyn MediaTrack>
            })
            .collect())
    }

    async fn unsubscribe(
        &self,
        track_ids: Vec<TrackId>,
    ) -> Result<(), platform::Error> {
        let joined: Vec<_> = track_ids.iter().map(|t| t.0.as_str()).collect();
        self.record(format!("unsubscribe:{}", joined.join(",")));
        Ok(())
    }

    async fn start_live_streaming(
        &self,
        request: LiveStreamRequest,
    ) -> Result<(), platform::Error> {
        self.record(format!("start:{}", request.id()));
        self.live_requests.borrow_mut().push(request);
        match self.start_error.borrow().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn stop_live_streaming(
        &self,
        stream_id: &StreamId,
        _: LiveMode,
    ) -> Result<(), platform::Error> {
        self.record(format!("stop:{}", stream_id));
        match self.stop_error.borrow().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn on_event(&self, listener: Rc<dyn Fn(RtcEvent)>) -> ListenerId {
        let id = ListenerId(self.last_listener.get() + 1);
        self.last_listener.set(id.0);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    fn off_event(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(i, _)| *i != id);
    }
}

/// Fake timers firing only on demand.
#[derive(Default)]
pub struct FakeTimer {
    /// Delays requested so far.
    pub delays: RefCell<Vec<Duration>>,
    pending: RefCell<Vec<oneshot::Sender<()>>>,
}

impl FakeTimer {
    /// Fires all the delays requested so far.
    pub fn elapse(&self) {
        for tx in self.pending.borrow_mut().drain(..) {
            let _ = tx.send(());
        }
    }
}

impl Timer for FakeTimer {
    fn delay_for(&self, delay: Duration) -> LocalBoxFuture<'static, ()> {
        self.delays.borrow_mut().push(delay);
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().push(tx);
        async move {
            if rx.await.is_err() {
                future::pending::<()>().await;
            }
        }
        .boxed_local()
    }
}

/// Fake credentials issuer.
#[derive(Default)]
pub struct FakeTokenSource {
    pub fetched: Cell<u32>,
    pub fail: Cell<bool>,
}

#[async_trait(?Send)]
impl TokenSource for FakeTokenSource {
    async fn fetch(
        &self,
        request: &TokenRequest,
    ) -> Result<String, Traced<TokenError>> {
        if self.fail.get() {
            return Err(tracerr::new!(TokenError::Status(503)));
        }
        self.fetched.set(self.fetched.get() + 1);
        Ok(format!("{}-{}", request.user_id, self.fetched.get()))
    }
}

/// Room over fake collaborators, driven by a [`LocalPool`].
pub struct Harness {
    pub pool: LocalPool,
    pub app: App,
    pub client: Rc<FakeClient>,
    pub capture: Rc<FakeCapture>,
    pub tokens: Rc<FakeTokenSource>,
    pub timer: Rc<FakeTimer>,
    pub room: RoomHandle,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_conf(Conf::default())
    }

    pub fn with_conf(conf: Conf) -> Self {
        let pool = LocalPool::new();
        let spawner: Rc<dyn LocalSpawn> = Rc::new(pool.spawner());
        let client = Rc::new(FakeClient::default());
        let capture = Rc::new(FakeCapture::default());
        let tokens = Rc::new(FakeTokenSource::default());
        let timer = Rc::new(FakeTimer::default());
        let app = App::new(
            conf,
            Rc::clone(&capture) as Rc<dyn MediaCapture>,
            Rc::clone(&tokens) as Rc<dyn TokenSource>,
            Rc::new(MemoryStorage::default()),
            spawner,
            Rc::clone(&timer) as Rc<dyn Timer>,
        );
        let room = app.init_room(Rc::clone(&client) as Rc<dyn RtcClient>);
        Self {
            pool,
            app,
            client,
            capture,
            tokens,
            timer,
            room,
        }
    }

    /// Runs the given future to completion along with all the spawned tasks.
    pub fn run<F: Future>(&mut self, fut: F) -> F::Output {
        self.pool.run_until(fut)
    }

    /// Runs spawned tasks until none of them can make progress.
    pub fn settle(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Spawns the given future on the pool, without running it.
    pub fn spawn<F: Future<Output = ()> + 'static>(&self, fut: F) {
        use futures::task::LocalSpawnExt as _;

        self.pool.spawner().spawn_local(fut).unwrap();
    }

    pub fn join(&mut self) {
        let room = self.room.clone();
        self.run(async move { room.join(ROOM.into(), ME.into()).await })
            .unwrap();
    }

    pub fn snapshot(&self) -> Rc<RoomSnapshot> {
        self.room.snapshot().unwrap()
    }

    /// Makes a remote `user` join and publish tracks with the given IDs.
    pub fn remote_user(&mut self, user: &str, tracks: &[&str]) {
        self.client.emit(RtcEvent::UserJoined {
            user_id: user.into(),
            user_data: None,
        });
        self.client.emit(RtcEvent::UserPublished {
            user_id: user.into(),
            tracks: tracks
                .iter()
                .map(|id| RemoteTrackInfo {
                    id: (*id).into(),
                    kind: MediaKind::Video,
                    muted: false,
                })
                .collect(),
        });
        self.settle();
    }
}

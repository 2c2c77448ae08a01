//! Lifecycle of local media tracks keyed by their [`TrackTag`]s.
//!
//! Every [`TrackTag`] has a single [`TrackSlot`]. A slot becomes
//! [`TrackSlot::Pending`] synchronously, before a capture request is issued,
//! so a concurrent request for the same tag observes a non-absent slot and
//! doesn't issue a second capture. Every completion re-checks its slot after
//! the await point and discards its result if the slot was cleared meanwhile.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use derive_more::Display;
use futures::task::{LocalSpawn, LocalSpawnExt as _};
use tracerr::Traced;

use crate::{
    errors::{Classified, ErrorKind},
    platform::{self, MediaCapture, MediaTrack, RtcClient, ScreenCapture},
    room::State,
    store::{Reason, RoomStore},
};

use super::{
    DeviceSettings, InputDeviceInfo, MediaKind, Track, TrackRegistry, TrackTag,
};

/// Errors occurring in [`LocalTracks`] operations.
#[derive(Clone, Debug, Display)]
pub enum LocalTrackError {
    /// Capture subsystem failed to create a track.
    #[display(fmt = "Failed to create {} track: {}", _0, _1)]
    Capture(TrackTag, platform::Error),

    /// Transport rejected publishing.
    #[display(fmt = "Failed to publish tracks: {}", _0)]
    Publish(platform::Error),

    /// Input devices cannot be listed.
    #[display(fmt = "Failed to enumerate devices: {}", _0)]
    Devices(platform::Error),

    /// Operation requires a joined room.
    #[display(fmt = "Room is not connected")]
    NotConnected,

    /// There is no created track with the given [`TrackTag`].
    #[display(fmt = "There is no {} track", _0)]
    NoTrack(TrackTag),
}

impl Classified for LocalTrackError {
    fn name(&self) -> &'static str {
        match self {
            Self::Capture(..) => "CaptureError",
            Self::Publish(_) => "PublishError",
            Self::Devices(_) => "DevicesError",
            Self::NotConnected => "NotConnected",
            Self::NoTrack(_) => "NoTrack",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::Capture(_, e) | Self::Devices(e) if e.is_device_error() => {
                ErrorKind::RecoverableUser
            }
            Self::Capture(..) | Self::Devices(_) | Self::Publish(_) => {
                ErrorKind::TransportRejection
            }
            Self::NotConnected | Self::NoTrack(_) => ErrorKind::RecoverableUser,
        }
    }
}

/// Created local track.
#[derive(Clone)]
pub struct LocalTrack {
    /// Role of this [`LocalTrack`].
    pub tag: TrackTag,

    /// Underlying SDK handle.
    pub media: Rc<dyn MediaTrack>,

    /// Indicator whether this [`LocalTrack`] is published. Unpublished ones
    /// are previews.
    pub published: bool,

    /// Indicator whether this [`LocalTrack`] is muted.
    pub muted: bool,
}

impl LocalTrack {
    fn new(tag: TrackTag, media: Rc<dyn MediaTrack>) -> Self {
        Self {
            tag,
            media,
            published: false,
            muted: false,
        }
    }
}

/// State of a slot of a single [`TrackTag`].
#[derive(Clone)]
pub enum TrackSlot {
    /// No track, a new one may be requested.
    Absent,

    /// Capture request is in flight.
    Pending,

    /// Track is created.
    Present(LocalTrack),
}

impl TrackSlot {
    /// Indicates whether this [`TrackSlot`] is [`TrackSlot::Absent`].
    #[inline]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Indicates whether this [`TrackSlot`] is [`TrackSlot::Pending`].
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Compares two SDK handles by identity.
fn is_same(a: &Rc<dyn MediaTrack>, b: &Rc<dyn MediaTrack>) -> bool {
    Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>()
}

/// Controller of local tracks of a room.
pub struct LocalTracks {
    /// Non-absent [`TrackSlot`]s.
    slots: RefCell<HashMap<TrackTag, TrackSlot>>,

    /// Devices chosen for the next capture requests.
    devices: RefCell<DeviceSettings>,

    /// Last enumerated input devices.
    available: RefCell<Vec<InputDeviceInfo>>,

    /// Number of room sessions ended so far.
    ///
    /// Publishing completes only within the session it was started in.
    sessions_ended: Cell<u64>,

    capture: Rc<dyn MediaCapture>,
    client: Rc<dyn RtcClient>,
    registry: Rc<TrackRegistry>,
    state: Rc<State>,
    store: Rc<RoomStore>,
    spawner: Rc<dyn LocalSpawn>,
}

impl LocalTracks {
    /// Creates a new [`LocalTracks`] controller without any tracks.
    pub fn new(
        capture: Rc<dyn MediaCapture>,
        client: Rc<dyn RtcClient>,
        registry: Rc<TrackRegistry>,
        state: Rc<State>,
        store: Rc<RoomStore>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            slots: RefCell::default(),
            devices: RefCell::default(),
            available: RefCell::default(),
            sessions_ended: Cell::new(0),
            capture,
            client,
            registry,
            state,
            store,
            spawner,
        }
    }

    /// Returns the current [`TrackSlot`] of the given [`TrackTag`].
    pub fn slot(&self, tag: TrackTag) -> TrackSlot {
        self.slots
            .borrow()
            .get(&tag)
            .cloned()
            .unwrap_or(TrackSlot::Absent)
    }

    /// Returns the chosen devices.
    pub fn devices(&self) -> DeviceSettings {
        self.devices.borrow().clone()
    }

    /// Returns the last enumerated input devices.
    pub fn available_devices(&self) -> Vec<InputDeviceInfo> {
        self.available.borrow().clone()
    }

    /// Creates a new track for the given [`TrackTag`].
    ///
    /// No-op if the [`TrackSlot`] of this tag is not absent. Any screen tag
    /// captures the screen, reserving [`TrackTag::ScreenAudio`] as well if
    /// it's absent.
    ///
    /// # Errors
    ///
    /// With [`LocalTrackError::Capture`] if the capture subsystem fails. The
    /// slot is freed for a retry in this case.
    pub async fn create_track(
        self: &Rc<Self>,
        tag: TrackTag,
    ) -> Result<(), Traced<LocalTrackError>> {
        if tag.is_screen() {
            return self.create_screen_tracks().await;
        }
        if !self.reserve(tag) {
            log::debug!("Track {} is already requested", tag);
            return Ok(());
        }
        self.store.notify(Reason::LocalTracks);

        let device_id = self.devices.borrow().device_for(tag.kind());
        let result = if tag == TrackTag::Camera {
            self.capture.create_camera_track(device_id).await
        } else {
            self.capture.create_microphone_track(device_id).await
        };

        match result {
            Ok(media) => {
                if self.fill(tag, Rc::clone(&media)) {
                    self.store.notify(Reason::LocalTracks);
                } else {
                    log::debug!("Discarding {} track of a cleared slot", tag);
                    media.release();
                }
                Ok(())
            }
            Err(e) => {
                if self.free_pending(tag) {
                    self.store.notify(Reason::LocalTracks);
                }
                Err(tracerr::new!(LocalTrackError::Capture(tag, e)))
            }
        }
    }

    /// Captures the screen into [`TrackTag::ScreenVideo`] and (if the
    /// platform provides it) [`TrackTag::ScreenAudio`] slots.
    async fn create_screen_tracks(
        self: &Rc<Self>,
    ) -> Result<(), Traced<LocalTrackError>> {
        if !self.reserve(TrackTag::ScreenVideo) {
            log::debug!("Screen capture is already requested");
            return Ok(());
        }
        let with_audio = self.reserve(TrackTag::ScreenAudio);
        self.store.notify(Reason::LocalTracks);

        let result = self.capture.create_screen_tracks(with_audio).await;
        let capture = match result {
            Ok(capture) => capture,
            Err(e) => {
                let mut changed = self.free_pending(TrackTag::ScreenVideo);
                if with_audio {
                    changed |= self.free_pending(TrackTag::ScreenAudio);
                }
                if changed {
                    self.store.notify(Reason::LocalTracks);
                }
                return Err(tracerr::new!(LocalTrackError::Capture(
                    TrackTag::ScreenVideo,
                    e
                )));
            }
        };
        let ScreenCapture { video, audio } = capture;

        if !self.fill(TrackTag::ScreenVideo, Rc::clone(&video)) {
            log::debug!("Discarding screen capture of a cleared slot");
            if with_audio {
                self.free_pending(TrackTag::ScreenAudio);
            }
            video.release();
            if let Some(audio) = audio {
                audio.release();
            }
            self.store.notify(Reason::LocalTracks);
            return Ok(());
        }
        match audio {
            Some(audio) => {
                let filled = with_audio
                    && self.fill(TrackTag::ScreenAudio, Rc::clone(&audio));
                if !filled {
                    audio.release();
                }
            }
            None => {
                if with_audio {
                    self.free_pending(TrackTag::ScreenAudio);
                }
            }
        }
        self.watch_screen_end(video);
        self.store.notify(Reason::LocalTracks);

        Ok(())
    }

    /// Spawns a task removing both screen tracks once the provided screen
    /// `video` capture ends on its own.
    fn watch_screen_end(self: &Rc<Self>, video: Rc<dyn MediaTrack>) {
        let ended = video.on_ended();
        let this = Rc::downgrade(self);
        let task = async move {
            ended.await;
            let this = match this.upgrade() {
                Some(this) => this,
                None => return,
            };
            let is_current = matches!(
                this.slot(TrackTag::ScreenVideo),
                TrackSlot::Present(t) if is_same(&t.media, &video)
            );
            if is_current {
                log::info!("Screen capture has ended");
                this.remove_tracks(&[
                    TrackTag::ScreenVideo,
                    TrackTag::ScreenAudio,
                ])
                .await;
            }
        };
        if let Err(e) = self.spawner.spawn_local(task) {
            log::error!("Failed to watch screen capture: {}", e);
        }
    }

    /// Publishes created and not yet published tracks with the given
    /// [`TrackTag`]s.
    ///
    /// Published tracks with known IDs are registered in the
    /// [`TrackRegistry`]. Tracks removed while publishing is in flight are
    /// unpublished right away. If the room session ends while publishing is
    /// in flight, all the tracks are unpublished and stay unpublished.
    ///
    /// # Errors
    ///
    /// - [`LocalTrackError::NotConnected`] if the room is not connected.
    /// - [`LocalTrackError::Publish`] if the transport rejects publishing.
    ///   Tracks are unpublished back (best-effort) in this case.
    pub async fn publish(
        &self,
        tags: &[TrackTag],
    ) -> Result<(), Traced<LocalTrackError>> {
        if !self.state.connection().is_connected() {
            return Err(tracerr::new!(LocalTrackError::NotConnected));
        }
        let tracks: Vec<LocalTrack> = tags
            .iter()
            .filter_map(|tag| match self.slot(*tag) {
                TrackSlot::Present(t) if !t.published => Some(t),
                _ => None,
            })
            .collect();
        if tracks.is_empty() {
            log::debug!("Nothing to publish");
            return Ok(());
        }
        let media: Vec<_> =
            tracks.iter().map(|t| Rc::clone(&t.media)).collect();
        let session = self.sessions_ended.get();

        if let Err(e) = self.client.publish(media.clone()).await {
            if let Err(e) = self.client.unpublish(media).await {
                log::warn!("Failed to roll back publishing: {}", e);
            }
            return Err(tracerr::new!(LocalTrackError::Publish(e)));
        }
        if self.sessions_ended.get() != session {
            log::debug!("Discarding publishing of an ended session");
            if let Err(e) = self.client.unpublish(media).await {
                log::warn!("Failed to unpublish discarded tracks: {}", e);
            }
            return Ok(());
        }

        let stale: Vec<_> = tracks
            .into_iter()
            .filter(|t| !self.mark_published(t))
            .map(|t| t.media)
            .collect();
        self.store.notify(Reason::LocalTracks);
        if !stale.is_empty() {
            log::debug!("Unpublishing {} removed tracks", stale.len());
            if let Err(e) = self.client.unpublish(stale).await {
                log::warn!("Failed to unpublish removed tracks: {}", e);
            }
        }

        Ok(())
    }

    /// Removes tracks with the given [`TrackTag`]s.
    ///
    /// Slots and registry entries are cleared synchronously. Published tracks
    /// are unpublished (best-effort) and all of them are released afterwards.
    /// Removing an absent tag is a no-op.
    pub async fn remove_tracks(&self, tags: &[TrackTag]) {
        let mut changed = false;
        let removed: Vec<LocalTrack> = {
            let mut slots = self.slots.borrow_mut();
            tags.iter()
                .filter_map(|tag| match slots.remove(tag) {
                    Some(TrackSlot::Present(t)) => Some(t),
                    Some(_) => {
                        changed = true;
                        None
                    }
                    None => None,
                })
                .collect()
        };
        if removed.is_empty() && !changed {
            return;
        }
        for track in &removed {
            if let Some(id) = track.media.id() {
                drop(self.registry.remove(&id));
            }
        }
        self.store.notify(Reason::LocalTracks);

        let published: Vec<_> = removed
            .iter()
            .filter(|t| t.published)
            .map(|t| Rc::clone(&t.media))
            .collect();
        if !published.is_empty() {
            if let Err(e) = self.client.unpublish(published).await {
                log::warn!("Failed to unpublish removed tracks: {}", e);
            }
        }
        for track in removed {
            track.media.release();
        }
    }

    /// Mutes or unmutes a created track.
    ///
    /// # Errors
    ///
    /// With [`LocalTrackError::NoTrack`] if there is no created track with
    /// the given [`TrackTag`].
    pub fn set_muted(
        &self,
        tag: TrackTag,
        muted: bool,
    ) -> Result<(), Traced<LocalTrackError>> {
        let media = match self.slots.borrow_mut().get_mut(&tag) {
            Some(TrackSlot::Present(t)) => {
                t.muted = muted;
                Rc::clone(&t.media)
            }
            _ => return Err(tracerr::new!(LocalTrackError::NoTrack(tag))),
        };
        media.set_muted(muted);
        if let Some(id) = media.id() {
            self.registry.update(&id, |t| t.set_muted(muted));
        }
        self.store.notify(Reason::LocalTracks);
        Ok(())
    }

    /// Lists the available input devices, remembering them.
    ///
    /// # Errors
    ///
    /// With [`LocalTrackError::Devices`] if the capture subsystem fails.
    pub async fn enumerate_devices(
        &self,
    ) -> Result<Vec<InputDeviceInfo>, Traced<LocalTrackError>> {
        let devices = self
            .capture
            .enumerate_devices()
            .await
            .map_err(LocalTrackError::Devices)
            .map_err(tracerr::wrap!())?;
        self.available.replace(devices.clone());
        self.store.notify(Reason::Devices);
        Ok(devices)
    }

    /// Chooses a device of the given [`MediaKind`] for the next capture
    /// requests. `None` resets the choice to the default device.
    pub fn select_device(&self, kind: MediaKind, device_id: Option<String>) {
        self.devices.borrow_mut().select(kind, device_id);
        self.store.notify(Reason::Devices);
    }

    /// Marks all the tracks as unpublished and unregisters them, once the
    /// session they were published in is over.
    ///
    /// Created tracks are kept as previews. Doesn't notify.
    pub fn reset_published(&self) {
        self.sessions_ended.set(self.sessions_ended.get() + 1);
        for slot in self.slots.borrow_mut().values_mut() {
            if let TrackSlot::Present(t) = slot {
                t.published = false;
            }
        }
        drop(self.registry.remove_local());
    }

    /// Puts the [`TrackSlot`] of the given [`TrackTag`] into pending state if
    /// it's absent.
    fn reserve(&self, tag: TrackTag) -> bool {
        let mut slots = self.slots.borrow_mut();
        if slots.contains_key(&tag) {
            return false;
        }
        drop(slots.insert(tag, TrackSlot::Pending));
        true
    }

    /// Fills a pending [`TrackSlot`] with the created track.
    ///
    /// Returns `false` if the slot is not pending anymore.
    fn fill(&self, tag: TrackTag, media: Rc<dyn MediaTrack>) -> bool {
        let mut slots = self.slots.borrow_mut();
        match slots.get_mut(&tag) {
            Some(slot) if slot.is_pending() => {
                *slot = TrackSlot::Present(LocalTrack::new(tag, media));
                true
            }
            _ => false,
        }
    }

    /// Frees a [`TrackSlot`] if it's still pending.
    fn free_pending(&self, tag: TrackTag) -> bool {
        let mut slots = self.slots.borrow_mut();
        if slots.get(&tag).map_or(false, TrackSlot::is_pending) {
            drop(slots.remove(&tag));
            true
        } else {
            false
        }
    }

    /// Marks the given track as published if its slot still holds it,
    /// registering it in the [`TrackRegistry`].
    fn mark_published(&self, track: &LocalTrack) -> bool {
        let mut slots = self.slots.borrow_mut();
        let current = match slots.get_mut(&track.tag) {
            Some(TrackSlot::Present(t)) if is_same(&t.media, &track.media) => t,
            _ => return false,
        };
        current.published = true;
        match current.media.id() {
            Some(id) => {
                drop(self.registry.put(Track::local(
                    id,
                    current.tag,
                    current.muted,
                    Rc::clone(&current.media),
                )));
            }
            None => log::debug!("Published {} track has no ID yet", track.tag),
        }
        true
    }
}

impl Drop for LocalTracks {
    fn drop(&mut self) {
        for (_, slot) in self.slots.get_mut().drain() {
            if let TrackSlot::Present(t) = slot {
                t.media.release();
            }
        }
    }
}

//! Keyed store of all the tracks known to a room.

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use crate::platform;

use super::{MediaKind, TrackId, TrackTag, UserId};

/// Local or remote media track known to a room.
#[derive(Clone)]
pub struct Track {
    /// ID of this [`Track`].
    id: TrackId,

    /// [`MediaKind`] of this [`Track`].
    kind: MediaKind,

    /// Owner of this [`Track`]. `None` for local tracks.
    owner: Option<UserId>,

    /// Role of this [`Track`]. Only local tracks have it.
    tag: Option<TrackTag>,

    /// Indicator whether this [`Track`] is muted.
    muted: bool,

    /// Underlying SDK handle.
    ///
    /// Remote tracks don't have it until subscribed.
    media: Option<Rc<dyn platform::MediaTrack>>,
}

impl Track {
    /// Creates a new local [`Track`] published under the given [`TrackTag`].
    pub fn local(
        id: TrackId,
        tag: TrackTag,
        muted: bool,
        media: Rc<dyn platform::MediaTrack>,
    ) -> Self {
        Self {
            id,
            kind: tag.kind(),
            owner: None,
            tag: Some(tag),
            muted,
            media: Some(media),
        }
    }

    /// Creates a new remote [`Track`] published by the given `owner`.
    pub fn remote(
        id: TrackId,
        kind: MediaKind,
        owner: UserId,
        muted: bool,
    ) -> Self {
        Self {
            id,
            kind,
            owner: Some(owner),
            tag: None,
            muted,
            media: None,
        }
    }

    /// Returns ID of this [`Track`].
    #[inline]
    pub fn id(&self) -> &TrackId {
        &self.id
    }

    /// Returns [`MediaKind`] of this [`Track`].
    #[inline]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Returns owner of this [`Track`], if it's a remote one.
    #[inline]
    pub fn owner(&self) -> Option<&UserId> {
        self.owner.as_ref()
    }

    /// Returns [`TrackTag`] of this [`Track`], if it's a local one.
    #[inline]
    pub fn tag(&self) -> Option<TrackTag> {
        self.tag
    }

    /// Indicates whether this [`Track`] is muted.
    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Indicates whether this [`Track`] is owned by a remote user.
    #[inline]
    pub fn is_remote(&self) -> bool {
        self.owner.is_some()
    }

    /// Returns underlying SDK handle of this [`Track`], if any.
    #[inline]
    pub fn media(&self) -> Option<&Rc<dyn platform::MediaTrack>> {
        self.media.as_ref()
    }

    /// Indicates whether this [`Track`] has an SDK handle attached (is
    /// subscribed, for remote tracks).
    #[inline]
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Sets muted flag of this [`Track`].
    #[inline]
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Attaches an SDK handle to this [`Track`].
    #[inline]
    pub fn set_media(&mut self, media: Rc<dyn platform::MediaTrack>) {
        self.media = Some(media);
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("tag", &self.tag)
            .field("muted", &self.muted)
            .field("has_media", &self.media.is_some())
            .finish()
    }
}

/// Actual storage of a [`TrackRegistry`].
#[derive(Default)]
struct Entries {
    /// [`Track`]s by their IDs.
    tracks: HashMap<TrackId, Track>,

    /// Insertion order of [`Track`]s.
    order: Vec<TrackId>,
}

/// Keyed store of [`Track`]s.
///
/// Lookups of unknown IDs return `None`: such a [`Track`] may be negotiated
/// already but not yet surfaced, so callers should just omit it.
#[derive(Default)]
pub struct TrackRegistry(RefCell<Entries>);

impl TrackRegistry {
    /// Stores the provided [`Track`] under its ID, returning the replaced
    /// one (if any).
    pub fn put(&self, track: Track) -> Option<Track> {
        let mut entries = self.0.borrow_mut();
        let id = track.id.clone();
        let prev = entries.tracks.insert(id.clone(), track);
        if prev.is_none() {
            entries.order.push(id);
        }
        prev
    }

    /// Looks up a [`Track`] by its ID.
    pub fn get(&self, id: &TrackId) -> Option<Track> {
        self.0.borrow().tracks.get(id).cloned()
    }

    /// Indicates whether a [`Track`] with the provided ID is stored.
    pub fn contains(&self, id: &TrackId) -> bool {
        self.0.borrow().tracks.contains_key(id)
    }

    /// Removes a [`Track`] by its ID.
    pub fn remove(&self, id: &TrackId) -> Option<Track> {
        let mut entries = self.0.borrow_mut();
        let removed = entries.tracks.remove(id);
        if removed.is_some() {
            entries.order.retain(|i| i != id);
        }
        removed
    }

    /// Applies `f` to a stored [`Track`].
    ///
    /// Returns `false` if there is no [`Track`] with the provided ID.
    pub fn update<F: FnOnce(&mut Track)>(&self, id: &TrackId, f: F) -> bool {
        self.0.borrow_mut().tracks.get_mut(id).map(f).is_some()
    }

    /// Returns all the stored [`Track`]s in their insertion order.
    pub fn all(&self) -> Vec<Track> {
        self.filter(|_| true)
    }

    /// Returns all the stored [`Track`]s of the given [`MediaKind`].
    pub fn all_by_kind(&self, kind: MediaKind) -> Vec<Track> {
        self.filter(|t| t.kind == kind)
    }

    /// Returns all the stored [`Track`]s owned by the given remote user.
    pub fn all_for_user(&self, user_id: &UserId) -> Vec<Track> {
        self.filter(|t| t.owner.as_ref() == Some(user_id))
    }

    /// Removes all the [`Track`]s owned by the given remote user.
    pub fn remove_for_user(&self, user_id: &UserId) -> Vec<Track> {
        self.remove_where(|t| t.owner.as_ref() == Some(user_id))
    }

    /// Removes all the remote [`Track`]s.
    pub fn remove_remote(&self) -> Vec<Track> {
        self.remove_where(Track::is_remote)
    }

    /// Removes all the local [`Track`]s.
    pub fn remove_local(&self) -> Vec<Track> {
        self.remove_where(|t| !t.is_remote())
    }

    /// Returns the number of stored [`Track`]s.
    pub fn len(&self) -> usize {
        self.0.borrow().tracks.len()
    }

    /// Indicates whether this [`TrackRegistry`] is empty.
    pub fn is_empty(&self) -> bool {
        self.0.borrow().tracks.is_empty()
    }

    /// Returns stored [`Track`]s matching the predicate, in insertion order.
    fn filter<F: Fn(&Track) -> bool>(&self, pred: F) -> Vec<Track> {
        let entries = self.0.borrow();
        entries
            .order
            .iter()
            .filter_map(|id| entries.tracks.get(id))
            .filter(|t| pred(t))
            .cloned()
            .collect()
    }

    /// Removes stored [`Track`]s matching the predicate, returning them in
    /// insertion order.
    fn remove_where<F: Fn(&Track) -> bool>(&self, pred: F) -> Vec<Track> {
        let mut entries = self.0.borrow_mut();
        let Entries { tracks, order } = &mut *entries;
        let mut removed = Vec::new();
        order.retain(|id| {
            let matches = tracks.get(id).map_or(false, |t| pred(t));
            if matches {
                if let Some(track) = tracks.remove(id) {
                    removed.push(track);
                }
            }
            !matches
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str, kind: MediaKind, owner: &str) -> Track {
        Track::remote(id.into(), kind, owner.into(), false)
    }

    #[test]
    fn get_of_unknown_id_is_none() {
        let registry = TrackRegistry::default();
        assert!(registry.get(&"nope".into()).is_none());
        assert!(registry.remove(&"nope".into()).is_none());
    }

    #[test]
    fn keeps_insertion_order() {
        let registry = TrackRegistry::default();
        registry.put(remote("b", MediaKind::Video, "alice"));
        registry.put(remote("a", MediaKind::Audio, "alice"));
        registry.put(remote("c", MediaKind::Video, "bob"));

        let ids: Vec<_> =
            registry.all().into_iter().map(|t| t.id().0.clone()).collect();
        assert_eq!(ids, ["b", "a", "c"]);

        registry.put(remote("a", MediaKind::Audio, "alice"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn queries_by_kind_and_user() {
        let registry = TrackRegistry::default();
        registry.put(remote("1", MediaKind::Video, "alice"));
        registry.put(remote("2", MediaKind::Audio, "alice"));
        registry.put(remote("3", MediaKind::Video, "bob"));

        assert_eq!(registry.all_by_kind(MediaKind::Video).len(), 2);
        assert_eq!(registry.all_for_user(&"alice".into()).len(), 2);
        assert!(registry.all_for_user(&"carol".into()).is_empty());

        let removed = registry.remove_for_user(&"alice".into());
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&"3".into()).is_some());
    }

    #[test]
    fn updates_in_place() {
        let registry = TrackRegistry::default();
        registry.put(remote("1", MediaKind::Audio, "alice"));

        assert!(registry.update(&"1".into(), |t| t.set_muted(true)));
        assert!(registry.get(&"1".into()).map_or(false, |t| t.is_muted()));
        assert!(!registry.update(&"2".into(), |t| t.set_muted(true)));
    }
}

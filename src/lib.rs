//! State core of the RTC demo client.
//!
//! Reconciles asynchronous events of an external real-time media SDK (users
//! joining and leaving, tracks being published, connection state changes,
//! live-streaming state changes) into a consistent in-memory view, and drives
//! the lifecycle of local media tracks and re-streaming sessions.
//!
//! UI layers observe the state via the [`store::Store`] of a [`RoomHandle`]:
//! they read immutable [`snapshot::RoomSnapshot`]s and register listeners
//! which are notified synchronously after every state mutation.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod app;
pub mod conf;
pub mod errors;
pub mod live;
pub mod media;
pub mod platform;
pub mod prefs;
pub mod room;
pub mod snapshot;
pub mod store;
pub mod token;

#[doc(inline)]
pub use self::{
    app::App,
    conf::Conf,
    errors::{Classified, Error, ErrorKind, Notice},
    live::{LiveMode, LivePhase, StreamId},
    media::{MediaKind, TrackId, TrackTag, UserId},
    room::{ConnectionState, Room, RoomHandle},
};

//! Error taxonomy and user-facing notices.

use std::{
    cell::{Cell, RefCell},
    fmt,
};

use derive_more::Display;
use serde::Serialize;
use tracerr::{Trace, Traced};

/// Class of an error, defining how it's surfaced and recovered from.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    /// Invalid user input or an unavailable device. Surfaced as a transient
    /// notification, no state is affected.
    RecoverableUser,

    /// SDK call was rejected. Any optimistic state is rolled back.
    TransportRejection,

    /// Connection has been lost unexpectedly and the session is over.
    FatalDisconnect,
}

/// Error which can be classified into an [`ErrorKind`].
pub trait Classified {
    /// Returns name of this error.
    fn name(&self) -> &'static str;

    /// Returns [`ErrorKind`] of this error.
    fn kind(&self) -> ErrorKind;
}

/// Flattened representation of a [`Traced`] [`Classified`] error.
#[derive(Clone, Debug, Display)]
#[display(fmt = "{}: {}\n{}", name, message, trace)]
pub struct Error {
    name: &'static str,
    message: String,
    kind: ErrorKind,
    trace: Trace,
}

impl Error {
    /// Logs this [`Error`] with its trace.
    pub fn print(&self) {
        log::error!("{}", self);
    }

    /// Returns name of this [`Error`].
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns message of this [`Error`].
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns [`ErrorKind`] of this [`Error`].
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns trace information of this [`Error`].
    #[inline]
    pub fn trace(&self) -> &Trace {
        &self.trace
    }
}

impl<E: Classified + fmt::Display> From<Traced<E>> for Error {
    fn from(traced: Traced<E>) -> Self {
        let (err, trace) = traced.into_parts();
        Self {
            name: err.name(),
            message: err.to_string(),
            kind: err.kind(),
            trace,
        }
    }
}

/// Occurs if a handle is used after its underlying object was dropped.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[display(fmt = "Handle is in detached state")]
pub struct HandleDetachedError;

impl Classified for HandleDetachedError {
    fn name(&self) -> &'static str {
        "HandleDetached"
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::RecoverableUser
    }
}

/// Transient notification about an [`Error`] shown to the user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Notice {
    /// Unique ID of this [`Notice`].
    pub id: u64,

    /// [`ErrorKind`] of the reported [`Error`].
    pub kind: ErrorKind,

    /// Name of the reported [`Error`].
    pub name: &'static str,

    /// Message of the reported [`Error`].
    pub message: String,
}

/// Queue of [`Notice`]s not yet dismissed by the user.
#[derive(Debug, Default)]
pub struct Notices {
    items: RefCell<Vec<Notice>>,
    last_id: Cell<u64>,
}

impl Notices {
    /// Adds a new [`Notice`] about the given [`Error`], returning its ID.
    pub fn push(&self, err: &Error) -> u64 {
        let id = self.last_id.get() + 1;
        self.last_id.set(id);
        self.items.borrow_mut().push(Notice {
            id,
            kind: err.kind(),
            name: err.name(),
            message: err.message().to_owned(),
        });
        id
    }

    /// Removes a [`Notice`] with the given ID.
    ///
    /// Returns `false` if there was no such [`Notice`].
    pub fn dismiss(&self, id: u64) -> bool {
        let mut items = self.items.borrow_mut();
        let len = items.len();
        items.retain(|n| n.id != id);
        items.len() != len
    }

    /// Returns all the pending [`Notice`]s, oldest first.
    pub fn all(&self) -> Vec<Notice> {
        self.items.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_traced_error() {
        let err = Error::from(tracerr::new!(HandleDetachedError));

        assert_eq!(err.name(), "HandleDetached");
        assert_eq!(err.message(), "Handle is in detached state");
        assert_eq!(err.kind(), ErrorKind::RecoverableUser);
    }

    #[test]
    fn notices_are_dismissable() {
        let notices = Notices::default();
        let err = Error::from(tracerr::new!(HandleDetachedError));

        let first = notices.push(&err);
        let second = notices.push(&err);
        assert_ne!(first, second);
        assert_eq!(notices.all().len(), 2);

        assert!(notices.dismiss(first));
        assert!(!notices.dismiss(first));
        assert_eq!(notices.all()[0].id, second);
    }
}

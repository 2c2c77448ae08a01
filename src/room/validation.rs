//! Validation of user input required to join a room.

use derive_more::Display;

use crate::media::UserId;

/// Minimal length of a room name.
const ROOM_NAME_MIN_LEN: usize = 3;

/// Maximal length of a room name.
const ROOM_NAME_MAX_LEN: usize = 64;

/// Reason of an input being rejected.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Invalid {
    /// Input is empty.
    #[display(fmt = "must not be empty")]
    Empty,

    /// Input is too short or too long.
    #[display(
        fmt = "must be {}..={} characters long",
        ROOM_NAME_MIN_LEN,
        ROOM_NAME_MAX_LEN
    )]
    Length,

    /// Input contains a character other than ASCII alphanumerics, `-`, `_`.
    #[display(fmt = "must contain only [A-Za-z0-9_-] characters")]
    Charset,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Checks the given room name.
pub fn room_name(name: &str) -> Result<(), Invalid> {
    if name.is_empty() {
        return Err(Invalid::Empty);
    }
    if !(ROOM_NAME_MIN_LEN..=ROOM_NAME_MAX_LEN).contains(&name.len()) {
        return Err(Invalid::Length);
    }
    if !name.chars().all(is_allowed) {
        return Err(Invalid::Charset);
    }
    Ok(())
}

/// Checks the given [`UserId`].
pub fn user_id(id: &UserId) -> Result<(), Invalid> {
    if id.0.trim().is_empty() {
        return Err(Invalid::Empty);
    }
    if !id.0.chars().all(is_allowed) {
        return Err(Invalid::Charset);
    }
    Ok(())
}

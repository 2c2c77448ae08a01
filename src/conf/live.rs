//! Live-streaming settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Live-streaming settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Live {
    /// Base URL re-streaming sessions are published to. ID of a session is
    /// appended to it. Defaults to `rtmp://127.0.0.1:1935/live`.
    #[default("rtmp://127.0.0.1:1935/live".to_owned())]
    pub publish_url: String,

    /// Width of a composed output, in pixels. Defaults to `1280`.
    #[default(1280)]
    pub width: u32,

    /// Height of a composed output, in pixels. Defaults to `720`.
    #[default(720)]
    pub height: u32,

    /// Time a started session is given to be confirmed by the server.
    /// Unconfirmed sessions are forgotten. Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub confirmation_timeout: Duration,
}

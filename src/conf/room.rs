//! Room behavior settings.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Room behavior settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Room {
    /// Indicator whether tracks published by remote users are subscribed to
    /// automatically. Defaults to `true`.
    #[default(true)]
    pub auto_subscribe: bool,
}

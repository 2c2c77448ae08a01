//! Application identity settings.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Application identity settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct App {
    /// ID of the application credentials are issued for.
    /// Defaults to `rtc-demo`.
    #[default("rtc-demo")]
    pub id: Cow<'static, str>,
}

//! Token endpoint settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Token endpoint settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Token {
    /// Base URL of the endpoint issuing room join credentials.
    /// Defaults to `http://127.0.0.1:8080/token`.
    #[default("http://127.0.0.1:8080/token".to_owned())]
    pub endpoint: String,

    /// Timeout of a single credentials request. Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

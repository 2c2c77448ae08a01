//! Provides application configuration options.
//!
//! Configuration options can be parsed from config files in TOML format.

pub mod app;
pub mod live;
pub mod log;
pub mod room;
pub mod token;

use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[doc(inline)]
pub use self::{app::App, live::Live, log::Log, room::Room, token::Token};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";

/// Environment variable that is responsible for holding application
/// configuration file path.
static APP_CONF_PATH_ENV_VAR_NAME: &str = "RTC_DEMO_CONF";

/// Prefix of environment variables overriding configuration options.
static APP_CONF_ENV_PREFIX: &str = "RTC_DEMO";

/// Holds application config.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Conf {
    /// Application identity settings.
    pub app: App,

    /// Token endpoint settings.
    pub token: Token,

    /// Room behavior settings.
    pub room: Room,

    /// Live-streaming settings.
    pub live: Live,

    /// Logging settings.
    pub log: Log,
}

impl Conf {
    /// Creates new [`Conf`] and applies values from such sources
    /// and in that order:
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    ///   parameter or environment variable;
    /// - environment variables.
    ///
    /// # Errors
    ///
    /// If the configuration file cannot be read or any option cannot be
    /// parsed.
    pub fn parse() -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        let env_path = env::var(APP_CONF_PATH_ENV_VAR_NAME);
        if let Some(path) = get_conf_file_name(env_path, env::args()) {
            cfg.merge(File::with_name(&path))?;
        }

        cfg.merge(
            Environment::with_prefix(APP_CONF_ENV_PREFIX).separator("__"),
        )?;

        cfg.try_into()
    }
}

/// Returns the path to a configuration file, if it's set via a command line
/// argument or an environment variable.
///
/// The environment variable has a priority.
fn get_conf_file_name<T>(
    env_var: Result<String, env::VarError>,
    cmd_args: T,
) -> Option<String>
where
    T: Iterator<Item = String>,
{
    if let Ok(path) = env_var {
        if !path.is_empty() {
            return Some(path);
        }
    }
    let mut args = cmd_args.skip_while(|a| a != APP_CONF_PATH_CMD_ARG_NAME);
    args.next()?;
    args.next()
}

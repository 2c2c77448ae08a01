//! User preferences persisted between application runs.

use std::{cell::RefCell, collections::HashMap, rc::Rc, str::FromStr};

use derive_more::Display;
use serde::Serialize;

use crate::media::UserId;

/// Key the last used [`UserId`] is stored under.
pub const USER_ID_KEY: &str = "rtc-demo.user-id";

/// Key the [`Theme`] is stored under.
pub const THEME_KEY: &str = "rtc-demo.theme";

/// Persistent key-value storage, like a browser's local storage.
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
pub trait Storage {
    /// Returns a value stored under the given `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores the `value` under the given `key`.
    fn set(&self, key: &str, value: &str);

    /// Removes a value stored under the given `key`.
    fn remove(&self, key: &str);
}

/// In-memory [`Storage`].
#[derive(Debug, Default)]
pub struct MemoryStorage(RefCell<HashMap<String, String>>);

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.0.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        drop(self.0.borrow_mut().insert(key.to_owned(), value.to_owned()));
    }

    fn remove(&self, key: &str) {
        drop(self.0.borrow_mut().remove(key));
    }
}

/// Color theme of the UI.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light theme.
    #[display(fmt = "light")]
    Light,

    /// Dark theme.
    #[display(fmt = "dark")]
    Dark,

    /// Theme of the OS.
    #[display(fmt = "system")]
    System,
}

impl Default for Theme {
    fn default() -> Self {
        Self::System
    }
}

impl FromStr for Theme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            _ => Err(()),
        }
    }
}

/// Typed access to the persisted preferences.
///
/// Absent or malformed values are read as defaults.
#[derive(Clone)]
pub struct Preferences(Rc<dyn Storage>);

impl Preferences {
    /// Wraps the given [`Storage`].
    #[inline]
    pub fn new(storage: Rc<dyn Storage>) -> Self {
        Self(storage)
    }

    /// Returns the last used [`UserId`], if any.
    pub fn user_id(&self) -> Option<UserId> {
        self.0
            .get(USER_ID_KEY)
            .filter(|id| !id.is_empty())
            .map(UserId::from)
    }

    /// Remembers the given [`UserId`] as the last used one.
    pub fn set_user_id(&self, id: &UserId) {
        self.0.set(USER_ID_KEY, &id.0);
    }

    /// Returns the chosen [`Theme`].
    pub fn theme(&self) -> Theme {
        self.0
            .get(THEME_KEY)
            .and_then(|t| t.parse().ok())
            .unwrap_or_default()
    }

    /// Remembers the chosen [`Theme`].
    ///
    /// [`Theme::System`] is the default, so it's not stored.
    pub fn set_theme(&self, theme: Theme) {
        if theme == Theme::System {
            self.0.remove(THEME_KEY);
        } else {
            self.0.set(THEME_KEY, &theme.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;

    #[test]
    fn defaults_on_absent_values() {
        let prefs = Preferences::new(Rc::new(MemoryStorage::default()));

        assert_eq!(prefs.user_id(), None);
        assert_eq!(prefs.theme(), Theme::System);
    }

    #[test]
    fn defaults_on_malformed_theme() {
        let mut storage = MockStorage::new();
        storage
            .expect_get()
            .with(eq(THEME_KEY))
            .return_const(Some("sepia".to_owned()));
        let prefs = Preferences::new(Rc::new(storage));

        assert_eq!(prefs.theme(), Theme::System);
    }

    #[test]
    fn stores_under_fixed_keys() {
        let mut storage = MockStorage::new();
        storage
            .expect_set()
            .with(eq(USER_ID_KEY), eq("alice"))
            .times(1)
            .return_const(());
        storage
            .expect_set()
            .with(eq(THEME_KEY), eq("dark"))
            .times(1)
            .return_const(());
        storage
            .expect_remove()
            .with(eq(THEME_KEY))
            .times(1)
            .return_const(());
        let prefs = Preferences::new(Rc::new(storage));

        prefs.set_user_id(&"alice".into());
        prefs.set_theme(Theme::Dark);
        prefs.set_theme(Theme::System);
    }

    #[test]
    fn round_trips_through_memory() {
        let prefs = Preferences::new(Rc::new(MemoryStorage::default()));
        prefs.set_user_id(&"bob".into());
        prefs.set_theme(Theme::Light);

        assert_eq!(prefs.user_id(), Some("bob".into()));
        assert_eq!(prefs.theme(), Theme::Light);
    }
}

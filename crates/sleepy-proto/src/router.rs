//! Reserved-key table.
//!
//! Maps a raw keypress to an [`Action`].  The table is partitioned into
//! terminating keys (one each for shutdown, quit, reselect and skip) and a
//! disjoint set of non-terminating side-effect keys.  Routing is pure; any
//! audible feedback for unknown keys is the caller's business.

use std::collections::BTreeMap;

use crate::config::{ConfigError, KeysConfig};
use crate::protocol::{Action, SideEffect};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRouter {
    table: BTreeMap<char, Action>,
}

impl ActionRouter {
    pub fn new(keys: &KeysConfig) -> Result<Self, ConfigError> {
        let mut table = BTreeMap::new();
        let mut bind = |key: char, action: Action| -> Result<(), ConfigError> {
            if let Some(existing) = table.insert(key, action) {
                return Err(ConfigError::DuplicateKey {
                    key,
                    first: existing,
                    second: action,
                });
            }
            Ok(())
        };

        bind(keys.shutdown, Action::Shutdown)?;
        bind(keys.quit, Action::Quit)?;
        bind(keys.reselect, Action::Reselect)?;
        bind(keys.skip, Action::Skip)?;
        for key in &keys.flag_download {
            bind(*key, Action::SkipWithSideEffect(SideEffect::Download))?;
        }

        Ok(Self { table })
    }

    pub fn route(&self, key: char) -> Option<Action> {
        self.table.get(&key).copied()
    }

    pub fn is_reserved(&self, key: char) -> bool {
        self.table.contains_key(&key)
    }

    pub fn terminating_keys(&self) -> Vec<char> {
        self.keys_where(|a| a.is_terminating())
    }

    pub fn non_terminating_keys(&self) -> Vec<char> {
        self.keys_where(|a| !a.is_terminating())
    }

    fn keys_where(&self, pred: impl Fn(&Action) -> bool) -> Vec<char> {
        self.table
            .iter()
            .filter(|(_, a)| pred(a))
            .map(|(k, _)| *k)
            .collect()
    }
}

impl Default for ActionRouter {
    fn default() -> Self {
        Self::new(&KeysConfig::default()).expect("default key table has no duplicates")
    }
}

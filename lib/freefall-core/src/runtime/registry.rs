use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, PoisonError, RwLock},
};

use snafu::Snafu;
use tracing::debug;

use super::process::Name;

/// Registry errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum RegistryError {
    /// The name is invalid.
    #[snafu(display("Invalid name for registered process: '{}'", name))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// Another handle is already registered under the name.
    #[snafu(display("A process is already registered as '{}'.", name))]
    AlreadyRegistered {
        /// The (sanitized) name that is already taken.
        name: String,
    },
}

/// A mapping from logical process names to handles.
///
/// Names are sanitized the same way as process names, so `my-counter` and `my_counter` refer to the same entry. The
/// registry is an ordinary value: clones share the same mapping, and there is no process-wide instance.
pub struct Registry<H> {
    entries: Arc<RwLock<HashMap<Name, H>>>,
}

impl<H> Registry<H>
where
    H: Clone,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers `handle` under `name`.
    ///
    /// # Errors
    ///
    /// If the name is invalid, or a handle is already registered under it, an error is returned and the registry is
    /// left unchanged.
    pub fn register(&self, name: &str, handle: H) -> Result<(), RegistryError> {
        let key = Name::root(name).ok_or_else(|| RegistryError::InvalidName { name: name.to_string() })?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.entry(key) {
            Entry::Occupied(entry) => Err(RegistryError::AlreadyRegistered {
                name: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                debug!(name = &**entry.key(), "Registered process.");
                entry.insert(handle);
                Ok(())
            }
        }
    }

    /// Removes the handle registered under `name`, returning it.
    pub fn unregister(&self, name: &str) -> Option<H> {
        let key = Name::root(name)?;
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        if removed.is_some() {
            debug!(name = &*key, "Unregistered process.");
        }
        removed
    }

    /// Removes the handle registered under `name`, but only if `predicate` returns `true` for it.
    ///
    /// This lets a process unregister itself without removing a newer registration that reused its name.
    pub fn unregister_if<F>(&self, name: &str, predicate: F) -> Option<H>
    where
        F: FnOnce(&H) -> bool,
    {
        let key = Name::root(name)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.entry(key) {
            Entry::Occupied(entry) => {
                if !predicate(entry.get()) {
                    return None;
                }
                debug!(name = &**entry.key(), "Unregistered process.");
                Some(entry.remove())
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Returns a clone of the handle registered under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<H> {
        let key = Name::root(name)?;
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    /// Returns every registered name, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

impl<H> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<H> Default for Registry<H>
where
    H: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_unregister() {
        let registry = Registry::new();
        registry.register("counter", 7u32).unwrap();

        assert_eq!(registry.lookup("counter"), Some(7));
        assert_eq!(registry.unregister("counter"), Some(7));
        assert_eq!(registry.lookup("counter"), None);
        assert_eq!(registry.unregister("counter"), None);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();
        registry.register("counter", 1u32).unwrap();

        let result = registry.register("counter", 2u32);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered { name }) if name == "counter"));
        assert_eq!(registry.lookup("counter"), Some(1));
    }

    #[test]
    fn names_are_sanitized() {
        let registry = Registry::new();
        registry.register("message-counter", 1u32).unwrap();

        assert_eq!(registry.lookup("message_counter"), Some(1));
        assert!(registry.register("message counter", 2u32).is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let registry = Registry::<u32>::new();
        assert!(matches!(registry.register("", 1), Err(RegistryError::InvalidName { .. })));
        assert!(matches!(registry.register("---", 1), Err(RegistryError::InvalidName { .. })));
        assert_eq!(registry.lookup(""), None);
    }

    #[test]
    fn conditional_unregister() {
        let registry = Registry::new();
        registry.register("counter", 2u32).unwrap();

        assert_eq!(registry.unregister_if("counter", |handle| *handle == 1), None);
        assert_eq!(registry.lookup("counter"), Some(2));
        assert_eq!(registry.unregister_if("counter", |handle| *handle == 2), Some(2));
        assert_eq!(registry.lookup("counter"), None);
    }

    #[test]
    fn clones_share_entries() {
        let registry = Registry::new();
        let other = registry.clone();
        registry.register("b", 2u32).unwrap();
        other.register("a", 1u32).unwrap();

        assert_eq!(registry.registered_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(other.lookup("b"), Some(2));
    }
}

//! Component registry for sharing cached values by name.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CompError, CompResult};

/// The cache cell of one component name.
///
/// The async lock is held across the computation so that concurrent callers
/// of the same name wait for the first one and then read its value.
pub type Slot<T> = Arc<tokio::sync::Mutex<Option<T>>>;

struct Entry {
    type_name: &'static str,
    slot: Arc<dyn Any + Send + Sync>,
}

/// A registry of component slots keyed by component name.
///
/// Each deployment run owns one registry; every handle resolved against it
/// with the same name observes the same cached value. Clones share the
/// underlying map.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    slots: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ComponentRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the slot for `name`, creating it on first use.
    ///
    /// A name is bound to the value type it was first requested with.
    /// Requesting it with another type is an error.
    pub fn slot<T>(&self, name: &str) -> CompResult<Slot<T>>
    where
        T: Send + Sync + 'static,
    {
        let mut slots = self.slots.lock();
        let entry = slots.entry(name.to_string()).or_insert_with(|| {
            debug!("Registering component slot: {}", name);
            Entry {
                type_name: type_name::<T>(),
                slot: Arc::new(tokio::sync::Mutex::new(None::<T>)),
            }
        });

        let registered = entry.type_name;
        Arc::clone(&entry.slot)
            .downcast::<tokio::sync::Mutex<Option<T>>>()
            .map_err(|_| CompError::TypeMismatch {
                name: name.to_string(),
                registered,
                requested: type_name::<T>(),
            })
    }

    /// Check if a slot exists for a name.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.lock().contains_key(name)
    }

    /// Get all registered component names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Forget a single name. Handles already holding its slot keep it.
    pub fn remove(&self, name: &str) -> bool {
        debug!("Removing component slot: {}", name);
        self.slots.lock().remove(name).is_some()
    }

    /// Reset the registry between independent runs.
    pub fn clear(&self) {
        debug!("Clearing component registry");
        self.slots.lock().clear();
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_name_shares_slot() {
        let registry = ComponentRegistry::new();
        let a = registry.slot::<u32>("vpc").unwrap();
        let b = registry.slot::<u32>("vpc").unwrap();

        *a.lock().await = Some(7);
        assert_eq!(*b.lock().await, Some(7));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_names() {
        let registry = ComponentRegistry::new();
        let a = registry.slot::<u32>("a").unwrap();
        let b = registry.slot::<u32>("b").unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_type_mismatch() {
        let registry = ComponentRegistry::new();
        registry.slot::<u32>("vpc").unwrap();

        let err = registry.slot::<String>("vpc").unwrap_err();
        match err {
            CompError::TypeMismatch { name, registered, requested } => {
                assert_eq!(name, "vpc");
                assert_eq!(registered, "u32");
                assert!(requested.contains("String"));
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_clear_and_remove() {
        let registry = ComponentRegistry::new();
        registry.slot::<u32>("a").unwrap();
        registry.slot::<u32>("b").unwrap();

        assert!(registry.remove("a"));
        assert!(!registry.contains("a"));
        assert!(!registry.remove("a"));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clones_share_map() {
        let registry = ComponentRegistry::new();
        let clone = registry.clone();
        clone.slot::<u32>("shared").unwrap();

        assert!(registry.contains("shared"));
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::SecureArea;

/// Registry of secure-area backends keyed by identifier.
///
/// Clones share the same registry. Lookups never fail; a missing identifier
/// yields `None`.
#[derive(Clone, Default)]
pub struct SecureAreaRepository {
    areas: Arc<RwLock<HashMap<String, Arc<dyn SecureArea>>>>,
}

impl SecureAreaRepository {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `area` under `identifier`, returning the backend it replaces.
    #[must_use = "a replaced backend is dropped silently"]
    pub fn register(
        &self,
        identifier: impl Into<String>,
        area: Arc<dyn SecureArea>,
    ) -> Option<Arc<dyn SecureArea>> {
        let identifier = identifier.into();
        log::debug!("registering secure area {identifier}");
        self.areas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier, area)
    }

    /// Registers `area` under its own identifier, replacing any backend
    /// registered there before.
    pub fn add(&self, area: Arc<dyn SecureArea>) {
        let identifier = area.identifier().to_string();
        if self.register(identifier.as_str(), area).is_some() {
            log::debug!("replaced secure area {identifier}");
        }
    }

    /// Returns the backend registered under `identifier`.
    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<Arc<dyn SecureArea>> {
        self.areas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    /// Registered identifiers, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self
            .areas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        identifiers.sort();
        identifiers
    }
}

impl fmt::Debug for SecureAreaRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureAreaRepository")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_area::SoftwareSecureArea;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_lookup_miss_is_none() {
        let repository = SecureAreaRepository::new();
        assert!(repository.lookup("missing").is_none());
        assert!(repository.identifiers().is_empty());
    }

    #[test]
    fn test_add_and_register() {
        let repository = SecureAreaRepository::new();
        let area: Arc<dyn SecureArea> =
            Arc::new(SoftwareSecureArea::new(Arc::new(MemoryStorage::new())));
        repository.add(Arc::clone(&area));
        assert!(repository.register("alias", Arc::clone(&area)).is_none());
        assert!(repository.register("alias", area).is_some());

        let shared = repository.clone();
        let found = shared.lookup("SoftwareSecureArea").expect("registered");
        assert_eq!(found.identifier(), "SoftwareSecureArea");
        assert_eq!(shared.identifiers(), vec!["SoftwareSecureArea", "alias"]);
    }
}

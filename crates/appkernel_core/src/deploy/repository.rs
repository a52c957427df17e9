//! Per-component configuration keyed by `(unit, component)`.

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Shared store of configuration fragments.
///
/// Storing a fragment for an existing key replaces it.
#[derive(Debug, Default)]
pub struct ConfigurationRepository {
    entries: RwLock<BTreeMap<(String, String), serde_json::Value>>,
}

impl ConfigurationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, unit: &str, component: &str, configuration: serde_json::Value) {
        self.entries
            .write()
            .insert((unit.to_string(), component.to_string()), configuration);
    }

    pub fn get(&self, unit: &str, component: &str) -> Option<serde_json::Value> {
        self.entries
            .read()
            .get(&(unit.to_string(), component.to_string()))
            .cloned()
    }

    /// Drops every fragment of `unit`; returns how many were removed.
    pub fn remove_unit(&self, unit: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(owner, _), _| owner != unit);
        before - entries.len()
    }

    /// Component names with a stored fragment for `unit`.
    pub fn components(&self, unit: &str) -> Vec<String> {
        self.entries
            .read()
            .keys()
            .filter(|(owner, _)| owner == unit)
            .map(|(_, component)| component.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigurationRepository;
    use serde_json::json;

    #[test]
    fn store_overwrites_and_remove_is_scoped_to_unit() {
        let repository = ConfigurationRepository::new();
        repository.store("billing", "store", json!({"size": 1}));
        repository.store("billing", "store", json!({"size": 2}));
        repository.store("billing", "api", json!({}));
        repository.store("crm", "store", json!({}));

        assert_eq!(repository.get("billing", "store"), Some(json!({"size": 2})));
        assert_eq!(repository.components("billing"), vec!["api", "store"]);
        assert_eq!(repository.remove_unit("billing"), 2);
        assert_eq!(repository.get("billing", "store"), None);
        assert!(repository.get("crm", "store").is_some());
    }
}

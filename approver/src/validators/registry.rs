//! Name-to-implementation binding for validators.

use std::collections::HashMap;
use std::sync::Arc;

use super::Validator;

/// Registry that resolves validator names from configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a validator under its own name, replacing any previous entry.
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        let name = validator.name().to_string();
        if self.validators.insert(name.clone(), validator).is_some() {
            tracing::debug!(validator = %name, "Replaced registered validator");
        }
    }

    /// Registers a validator under an explicit name.
    pub fn register_as(&mut self, name: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators.insert(name.into(), validator);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, validator: Arc<dyn Validator>) -> Self {
        self.register(validator);
        self
    }

    /// Looks up a validator by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(name).cloned()
    }

    /// Whether a validator is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::PassThroughValidator;

    #[test]
    fn test_register_and_lookup() {
        let registry = ValidatorRegistry::new()
            .with(Arc::new(PassThroughValidator::new("check_pincode")))
            .with(Arc::new(PassThroughValidator::new("check_email")));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("check_email"));
        assert_eq!(registry.get("check_email").unwrap().name(), "check_email");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["check_email", "check_pincode"]);
    }

    #[test]
    fn test_register_as_alias() {
        let mut registry = ValidatorRegistry::new();
        assert!(registry.is_empty());

        registry.register_as("email", Arc::new(PassThroughValidator::new("check_email")));
        assert!(registry.contains("email"));
        assert!(!registry.contains("check_email"));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ValidatorRegistry::new();
        registry.register(Arc::new(PassThroughValidator::new("a")));
        registry.register(Arc::new(PassThroughValidator::new("a")));
        assert_eq!(registry.len(), 1);
    }
}

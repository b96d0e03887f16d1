//! Builder backends by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bundle::BundleBuilder;
use crate::traits::{Builder, BuilderError};

/// Maps `core.builder` names to backends.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: BTreeMap<String, Arc<dyn Builder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the backends that ship with tableau.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BundleBuilder::new()));
        registry
    }

    /// Register a backend under its own name, replacing any previous one.
    pub fn register(&mut self, builder: Arc<dyn Builder>) {
        self.builders.insert(builder.name().to_string(), builder);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Builder>, BuilderError> {
        self.builders
            .get(name)
            .cloned()
            .ok_or_else(|| BuilderError::UnknownBuilder {
                name: name.to_string(),
                known: self.names().into_iter().map(String::from).collect(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }
}

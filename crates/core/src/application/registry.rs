// Adapter Registry
// Construction contract: `create(spec) -> Adapter`, keyed by adapter
// type name and parameterized by a single opaque string.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::ActionCatalog;
use crate::port::{Adapter, AdapterError};

/// Factory for one adapter type.
///
/// The registry is threaded through `create` so composite factories
/// (the mapper) can build nested children from their own spec strings
/// without holding a cyclic reference to the registry.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn create(
        &self,
        registry: &AdapterRegistry,
        param: &str,
        catalog: ActionCatalog,
    ) -> Result<Box<dyn Adapter>, AdapterError>;
}

/// Registry of adapter factories keyed by type name.
///
/// Spec strings have the form `kind(param)` - e.g.
/// `remote(./sut-adapter --flag)`, `mapper(/etc/testrig/top.conf)` -
/// or a bare `kind` for parameterless adapters.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<String, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(kind.into(), factory);
    }

    /// Split a spec string into (kind, param).
    ///
    /// # Errors
    /// - `AdapterError::Config` for an unbalanced or empty spec
    pub fn parse_spec(spec: &str) -> Result<(&str, &str), AdapterError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(AdapterError::Config("empty adapter spec".into()));
        }
        match spec.find('(') {
            None => Ok((spec, "")),
            Some(open) => {
                if !spec.ends_with(')') {
                    return Err(AdapterError::Config(format!(
                        "unbalanced adapter spec: {spec}"
                    )));
                }
                Ok((&spec[..open], &spec[open + 1..spec.len() - 1]))
            }
        }
    }

    /// Build an adapter from its spec string and the catalog for its
    /// boundary.
    ///
    /// # Errors
    /// - `AdapterError::Config` for unknown kinds or malformed specs
    /// - whatever the factory raises (spawn/handshake faults)
    pub async fn create(
        &self,
        spec: &str,
        catalog: ActionCatalog,
    ) -> Result<Box<dyn Adapter>, AdapterError> {
        let (kind, param) = Self::parse_spec(spec)?;
        let factory = self.factories.get(kind).ok_or_else(|| {
            AdapterError::Config(format!("unknown adapter type: {kind}"))
        })?;

        debug!(kind = %kind, actions = catalog.len(), "Creating adapter");
        factory.create(self, param, catalog).await
    }
}

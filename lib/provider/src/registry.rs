//! Provider factories and the registry the manager instantiates from.
//!
//! The registry is built once in `main` and passed down explicitly;
//! there is no process-global plugin table.

use crate::error::ProviderError;
use crate::provider::SourceProvider;
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds provider instances from a configuration mapping.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// The provider identity this factory constructs.
    fn provider_id(&self) -> &str;

    /// Constructs a provider instance.
    async fn create(
        &self,
        config: JsonMap<String, JsonValue>,
    ) -> Result<Box<dyn SourceProvider>, ProviderError>;
}

impl std::fmt::Debug for dyn ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("provider_id", &self.provider_id())
            .finish()
    }
}

/// The set of provider factories available to a manager process.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under its provider ID. The last registration
    /// for an ID wins.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_id().to_string(), factory);
    }

    /// Returns the factory for a provider ID.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if nothing is registered under the ID.
    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn ProviderFactory>, ProviderError> {
        self.factories
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider {
                provider_id: provider_id.to_string(),
            })
    }

    /// Returns the registered provider IDs, sorted.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the factories selected by an allowlist; an empty allowlist
    /// selects every registered factory.
    #[must_use]
    pub fn select(&self, allowlist: &[String]) -> Vec<Arc<dyn ProviderFactory>> {
        self.provider_ids()
            .into_iter()
            .filter(|id| allowlist.is_empty() || allowlist.contains(id))
            .filter_map(|id| self.factories.get(&id).cloned())
            .collect()
    }
}

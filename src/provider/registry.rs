//! Provider registry.
//!
//! Thread-safe name-to-adapter map with a denormalized model index built
//! from each adapter's declared models. Read-mostly; writes happen at
//! startup and on dynamic re-registration.

use super::Provider;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct RegistryInner {
    providers: HashMap<String, Arc<dyn Provider>>,
    /// model name -> provider name
    model_index: HashMap<String, String>,
}

#[derive(Default)]
pub struct ProviderRegistry {
    inner: RwLock<RegistryInner>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Re-registering a name overwrites the previous
    /// adapter and evicts its models from the index.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        let models = provider.models();
        let mut inner = self.inner.write().expect("registry lock poisoned");

        if inner.providers.contains_key(&name) {
            tracing::warn!(provider = %name, "provider already registered, overwriting");
            inner.model_index.retain(|_, owner| owner != &name);
        }

        for model in &models {
            inner.model_index.insert(model.clone(), name.clone());
        }
        inner.providers.insert(name.clone(), provider);
        tracing::info!(provider = %name, models = models.len(), "registered provider");
    }

    /// Look up by provider name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .providers
            .get(name)
            .cloned()
    }

    /// Look up which provider serves a model.
    pub fn get_for_model(&self, model: &str) -> Option<Arc<dyn Provider>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let name = inner.model_index.get(model)?;
        inner.providers.get(name).cloned()
    }

    /// Providers whose breakers currently admit calls.
    pub fn list_available(&self) -> Vec<Arc<dyn Provider>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .providers
            .values()
            .filter(|p| p.is_available())
            .cloned()
            .collect()
    }

    /// Every registered model name.
    pub fn list_models(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .model_index
            .keys()
            .cloned()
            .collect()
    }

    /// Every registered provider.
    pub fn list_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .providers
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .providers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .providers
            .contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::super::MockProvider;
    use super::*;

    fn provider(name: &str, models: &[&str]) -> Arc<dyn Provider> {
        Arc::new(MockProvider::new(
            name,
            models.iter().map(|m| m.to_string()).collect(),
        ))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ProviderRegistry::new();
        registry.register(provider("openai", &["gpt-4o", "gpt-4o-mini"]));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("openai"));
        assert!(registry.get("openai").is_some());
        assert!(registry.get("anthropic").is_none());
        assert_eq!(
            registry.get_for_model("gpt-4o").unwrap().name(),
            "openai"
        );
        assert!(registry.get_for_model("claude-3").is_none());
    }

    #[test]
    fn test_reregistration_evicts_old_models() {
        let registry = ProviderRegistry::new();
        registry.register(provider("openai", &["gpt-4o", "gpt-old"]));
        registry.register(provider("openai", &["gpt-4o"]));
        assert_eq!(registry.len(), 1);
        assert!(registry.get_for_model("gpt-old").is_none());
        assert!(registry.get_for_model("gpt-4o").is_some());
    }

    #[test]
    fn test_list_models_and_providers() {
        let registry = ProviderRegistry::new();
        registry.register(provider("a", &["m1"]));
        registry.register(provider("b", &["m2", "m3"]));
        let mut models = registry.list_models();
        models.sort();
        assert_eq!(models, vec!["m1", "m2", "m3"]);
        assert_eq!(registry.list_providers().len(), 2);
    }

    #[test]
    fn test_list_available_filters_open_breakers() {
        let registry = ProviderRegistry::new();
        // A provider whose breaker will trip on a single scripted failure.
        let broken = MockProvider::new("broken", vec![])
            .with_breaker(crate::breaker::CircuitBreaker::new(
                1,
                std::time::Duration::from_secs(300),
            ))
            .with_retry(crate::retry::RetryPolicy::new(
                1,
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(2),
            ));
        broken.push_outcome(super::super::MockOutcome::Unavailable);
        let broken: Arc<dyn Provider> = Arc::new(broken);
        registry.register(broken.clone());
        registry.register(provider("healthy", &["m"]));

        let request = crate::domain::ChatRequest::new(
            "m",
            vec![crate::domain::Message::new(crate::domain::Role::User, "hi")],
            crate::domain::ModelParameters::default(),
        );
        let _ = tokio_test::block_on(broken.complete(&request));

        let available = registry.list_available();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name(), "healthy");
    }
}

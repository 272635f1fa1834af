//! Ordered-fallback router.
//!
//! Resolves a model to an ordered provider chain and tries each provider in
//! turn, strictly sequentially. Providers whose breakers are open are
//! skipped (not errors); provider failures are recorded and the next in the
//! chain is tried. Only when the whole chain is exhausted does the caller
//! see an error.

use super::{ChunkSink, Provider, ProviderRegistry, StreamOutcome};
use crate::domain::{ChatRequest, ChatResponse};
use crate::error::{GatewayError, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Router {
    registry: Arc<ProviderRegistry>,
    /// model -> ordered provider names; `"*"` is the wildcard chain.
    fallback_chains: HashMap<String, Vec<String>>,
}

impl Router {
    pub fn new(registry: Arc<ProviderRegistry>, fallback_chains: HashMap<String, Vec<String>>) -> Self {
        Self {
            registry,
            fallback_chains,
        }
    }

    /// Resolve the ordered provider chain for a model: exact chain entry,
    /// then the `"*"` wildcard, then whichever single provider the registry
    /// maps the model to.
    fn resolve_chain(&self, model: &str) -> Vec<Arc<dyn Provider>> {
        let names = self
            .fallback_chains
            .get(model)
            .or_else(|| self.fallback_chains.get("*"));

        match names {
            None => self.registry.get_for_model(model).into_iter().collect(),
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let provider = self.registry.get(name);
                    if provider.is_none() {
                        tracing::warn!(provider = %name, "chained provider not in registry");
                    }
                    provider
                })
                .collect(),
        }
    }

    /// Route a completion through the fallback chain until one provider
    /// succeeds or the chain is exhausted.
    ///
    /// A chain where every provider is skipped (all breakers open) fails
    /// with `AllProvidersFailed` carrying an empty error list.
    pub async fn route(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let chain = self.resolve_chain(&request.model);
        if chain.is_empty() {
            return Err(GatewayError::NoProvider(request.model.clone()));
        }

        let mut errors: Vec<(String, GatewayError)> = Vec::new();
        for provider in chain {
            if !provider.is_available() {
                tracing::debug!(provider = provider.name(), "skipping, circuit breaker open");
                continue;
            }
            tracing::debug!(
                provider = provider.name(),
                model = %request.model,
                "attempting provider"
            );
            match provider.complete(request).await {
                Ok(response) => {
                    if !errors.is_empty() {
                        tracing::info!(
                            provider = provider.name(),
                            fallbacks = errors.len(),
                            "routed after fallback"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    tracing::warn!(
                        provider = provider.name(),
                        model = %request.model,
                        error = %err,
                        "provider failed"
                    );
                    errors.push((provider.name().to_string(), err));
                }
            }
        }
        Err(GatewayError::AllProvidersFailed(errors))
    }

    /// Stream a completion through the fallback chain.
    ///
    /// Failover applies only while nothing has been emitted: once a chunk
    /// has reached the sink, a provider failure is terminal, because
    /// already-delivered content cannot be replayed from another provider.
    pub async fn stream(&self, request: &ChatRequest, sink: ChunkSink<'_>) -> Result<StreamOutcome> {
        let chain = self.resolve_chain(&request.model);
        if chain.is_empty() {
            return Err(GatewayError::NoProvider(request.model.clone()));
        }

        let mut errors: Vec<(String, GatewayError)> = Vec::new();
        for provider in chain {
            if !provider.is_available() {
                tracing::debug!(provider = provider.name(), "skipping, circuit breaker open");
                continue;
            }
            let mut emitted = false;
            let result = {
                let mut forwarding = |chunk: String| {
                    emitted = true;
                    (sink)(chunk)
                };
                provider.stream(request, &mut forwarding).await
            };
            match result {
                Ok(outcome) => {
                    if !errors.is_empty() {
                        tracing::info!(
                            provider = provider.name(),
                            fallbacks = errors.len(),
                            "streamed after fallback"
                        );
                    }
                    return Ok(outcome);
                }
                Err(err) if emitted => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %err,
                        "provider failed mid-stream"
                    );
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        provider = provider.name(),
                        model = %request.model,
                        error = %err,
                        "provider failed before streaming"
                    );
                    errors.push((provider.name().to_string(), err));
                }
            }
        }
        Err(GatewayError::AllProvidersFailed(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{MockOutcome, MockProvider};
    use super::*;
    use crate::breaker::CircuitBreaker;
    use crate::domain::{Message, ModelParameters, Role};
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    fn request(model: &str) -> ChatRequest {
        ChatRequest::new(
            model,
            vec![Message::new(Role::User, "ping")],
            ModelParameters::default(),
        )
    }

    fn single_attempt_retry() -> RetryPolicy {
        RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn chain(model: &str, providers: &[&str]) -> HashMap<String, Vec<String>> {
        let mut chains = HashMap::new();
        chains.insert(
            model.to_string(),
            providers.iter().map(|p| p.to_string()).collect(),
        );
        chains
    }

    #[tokio::test]
    async fn test_no_provider_for_unknown_model() {
        let registry = Arc::new(ProviderRegistry::new());
        let router = Router::new(registry, HashMap::new());
        let result = router.route(&request("nope")).await;
        assert!(matches!(result, Err(GatewayError::NoProvider(model)) if model == "nope"));
    }

    #[tokio::test]
    async fn test_registry_fallback_single_provider_chain() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(
            MockProvider::new("only", vec!["m".to_string()]).with_reply("hi"),
        ));
        let router = Router::new(registry, HashMap::new());
        let response = router.route(&request("m")).await.unwrap();
        assert_eq!(response.provider, "only");
    }

    #[tokio::test]
    async fn test_wildcard_chain_applies() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(
            MockProvider::new("fallback", vec![]).with_reply("wild"),
        ));
        let mut chains = HashMap::new();
        chains.insert("*".to_string(), vec!["fallback".to_string()]);
        let router = Router::new(registry, chains);
        let response = router.route(&request("anything")).await.unwrap();
        assert_eq!(response.message.content, "wild");
    }

    #[tokio::test]
    async fn test_failover_to_second_provider() {
        let registry = Arc::new(ProviderRegistry::new());
        let a = MockProvider::new("a", vec![]).with_retry(single_attempt_retry());
        a.push_outcome(MockOutcome::Unavailable);
        registry.register(Arc::new(a));
        registry.register(Arc::new(MockProvider::new("b", vec![]).with_reply("from-b")));

        let router = Router::new(registry, chain("m", &["a", "b"]));
        let response = router.route(&request("m")).await.unwrap();
        assert_eq!(response.provider, "b");
        assert_eq!(response.message.content, "from-b");
    }

    #[tokio::test]
    async fn test_all_fail_collects_each_provider_once() {
        let registry = Arc::new(ProviderRegistry::new());
        for name in ["a", "b"] {
            let provider = MockProvider::new(name, vec![]).with_retry(single_attempt_retry());
            provider.push_outcome(MockOutcome::Unavailable);
            registry.register(Arc::new(provider));
        }
        let router = Router::new(registry, chain("m", &["a", "b"]));
        let err = router.route(&request("m")).await.unwrap_err();
        assert_eq!(err.failed_providers(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_open_breaker_skipped_not_recorded() {
        let registry = Arc::new(ProviderRegistry::new());
        let tripped = MockProvider::new("tripped", vec![])
            .with_breaker(CircuitBreaker::new(1, Duration::from_secs(300)))
            .with_retry(single_attempt_retry());
        tripped.push_outcome(MockOutcome::Unavailable);
        let tripped = Arc::new(tripped);
        // Trip the breaker with a direct failing call.
        let _ = tripped.complete(&request("m")).await;
        assert!(!tripped.is_available());

        registry.register(tripped);
        registry.register(Arc::new(MockProvider::new("b", vec![]).with_reply("ok")));
        let router = Router::new(registry, chain("m", &["tripped", "b"]));
        let response = router.route(&request("m")).await.unwrap();
        assert_eq!(response.provider, "b");
    }

    #[tokio::test]
    async fn test_all_skipped_is_empty_error_list() {
        let registry = Arc::new(ProviderRegistry::new());
        let tripped = MockProvider::new("only", vec![])
            .with_breaker(CircuitBreaker::new(1, Duration::from_secs(300)))
            .with_retry(single_attempt_retry());
        tripped.push_outcome(MockOutcome::Unavailable);
        let tripped = Arc::new(tripped);
        let _ = tripped.complete(&request("m")).await;
        registry.register(tripped);

        let router = Router::new(registry, chain("m", &["only"]));
        let err = router.route(&request("m")).await.unwrap_err();
        assert!(matches!(&err, GatewayError::AllProvidersFailed(errors) if errors.is_empty()));
    }

    #[tokio::test]
    async fn test_stream_failover_before_first_chunk() {
        let registry = Arc::new(ProviderRegistry::new());
        let a = MockProvider::new("a", vec![]).with_retry(single_attempt_retry());
        a.push_outcome(MockOutcome::Unavailable);
        registry.register(Arc::new(a));
        registry.register(Arc::new(
            MockProvider::new("b", vec![]).with_reply("streamed from b"),
        ));

        let router = Router::new(registry, chain("m", &["a", "b"]));
        let mut chunks = Vec::new();
        let outcome = router
            .stream(&request("m"), &mut |chunk| {
                chunks.push(chunk);
                true
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::Completed("streamed from b".to_string())
        );
        assert_eq!(chunks.join(""), "streamed from b");
    }

    #[tokio::test]
    async fn test_strict_order_no_overlap() {
        let registry = Arc::new(ProviderRegistry::new());
        let a = MockProvider::new("a", vec![]).with_retry(single_attempt_retry());
        a.push_outcome(MockOutcome::Unavailable);
        registry.register(Arc::new(a));
        let b = Arc::new(MockProvider::new("b", vec![]).with_reply("ok"));
        registry.register(b.clone());

        let router = Router::new(registry.clone(), chain("m", &["a", "b"]));
        router.route(&request("m")).await.unwrap();
        // B was called exactly once, and only after A's failure.
        assert_eq!(b.calls(), 1);
        assert_eq!(
            registry.get("a").unwrap().breaker_snapshot().failure_count,
            1
        );
    }
}

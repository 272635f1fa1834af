//! Process-scoped application state.
//!
//! Everything is constructed once at startup from [`Settings`] and shared
//! behind `Arc`s; there is no hidden module-level state. Stages whose
//! backing services are unavailable (no API key, no Redis, no embedder)
//! are simply absent and the pipeline skips them.

use crate::breaker::CircuitBreaker;
use crate::cache::ExactCache;
use crate::config::Settings;
use crate::embedding::HttpEmbedder;
use crate::error::Result;
use crate::judge::{JudgeEvaluator, JudgeRecorder};
use crate::kv::{KvStore, RedisKv};
use crate::metrics::MetricsCollector;
use crate::pipeline::Pipeline;
use crate::provider::{AnthropicProvider, OpenAiProvider, ProviderRegistry, Router};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::semantic_cache::SemanticCache;
use crate::shield::{InjectionDetector, PiiShield, RegexPiiDetector};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub metrics: Arc<MetricsCollector>,
    pub registry: Arc<ProviderRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub kv: Option<Arc<dyn KvStore>>,
    /// Server start, reset by `POST /metrics/reset` for clean test runs.
    pub start_time: Arc<Mutex<Instant>>,
}

impl AppState {
    /// Wire the whole gateway from configuration.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new());

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(settings.request_timeout)
            .build()?;

        let kv: Option<Arc<dyn KvStore>> = match RedisKv::connect(
            &settings.redis_host,
            settings.redis_port,
            settings.redis_socket_timeout,
        )
        .await
        {
            Ok(kv) => Some(Arc::new(kv)),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "KV store unreachable; exact cache, rate limiter, and judge recorder disabled"
                );
                None
            }
        };

        let breaker = || {
            CircuitBreaker::new(
                settings.circuit_failure_threshold,
                settings.circuit_recovery_timeout,
            )
            .with_metrics(metrics.clone())
        };
        let retry = RetryPolicy::new(
            settings.retry_max_attempts,
            settings.retry_base_delay,
            settings.retry_max_delay,
        );

        let registry = Arc::new(ProviderRegistry::new());
        if let Some(api_key) = &settings.openai_api_key {
            registry.register(Arc::new(OpenAiProvider::new(
                http.clone(),
                api_key.clone(),
                settings.openai_base_url.clone(),
                breaker(),
                retry.clone(),
            )));
        }
        if let Some(api_key) = &settings.anthropic_api_key {
            registry.register(Arc::new(AnthropicProvider::new(
                http.clone(),
                api_key.clone(),
                settings.anthropic_base_url.clone(),
                settings.anthropic_version.clone(),
                breaker(),
                retry.clone(),
            )));
        }
        if registry.is_empty() {
            tracing::warn!("no provider API keys configured; every request will see 404");
        }

        let router = Arc::new(Router::new(
            registry.clone(),
            settings.fallback_chains.clone(),
        ));

        let rate_limiter = kv.clone().map(|kv| {
            Arc::new(RateLimiter::new(
                kv,
                settings.rate_limit_max_requests,
                settings.rate_limit_window_seconds,
            ))
        });
        let exact_cache = kv.clone().map(|kv| Arc::new(ExactCache::new(kv)));

        let semantic_cache = settings.embedding_base_url.as_ref().map(|base_url| {
            let mut embedder = HttpEmbedder::new(
                http.clone(),
                base_url.clone(),
                settings.embedding_model.clone(),
                settings.embedding_dimension,
            );
            if let Some(key) = settings
                .embedding_api_key
                .as_ref()
                .or(settings.openai_api_key.as_ref())
            {
                embedder = embedder.with_api_key(key.clone());
            }
            Arc::new(SemanticCache::new(
                Arc::new(embedder),
                settings.semantic_cache_threshold,
            ))
        });

        let mut builder = Pipeline::builder(router.clone(), metrics.clone())
            .pii_shield(Arc::new(PiiShield::new(
                settings.pii_action,
                Arc::new(RegexPiiDetector::new()),
            )))
            .injection_detector(Arc::new(InjectionDetector::new(
                settings.injection_block_threshold,
                settings.injection_warn_threshold,
            )));
        if let Some(limiter) = &rate_limiter {
            builder = builder.rate_limiter(limiter.clone());
        }
        if let Some(cache) = &exact_cache {
            builder = builder.exact_cache(cache.clone());
        }
        if let Some(cache) = &semantic_cache {
            builder = builder.semantic_cache(cache.clone());
        }
        if settings.judge_enabled {
            let evaluator = Arc::new(JudgeEvaluator::new(
                router.clone(),
                settings.judge_model.clone(),
            ));
            let recorder = kv.clone().map(|kv| Arc::new(JudgeRecorder::new(kv)));
            builder = builder.judge(evaluator, recorder);
        }

        Ok(Self {
            settings: Arc::new(settings),
            metrics,
            registry,
            pipeline: Arc::new(builder.build()),
            rate_limiter,
            kv,
            start_time: Arc::new(Mutex::new(Instant::now())),
        })
    }
}

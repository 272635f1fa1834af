//! # LLM Gateway
//!
//! A gateway between chat-completion clients and upstream LLM providers,
//! enforcing a uniform request pipeline: rate limiting, PII shielding,
//! prompt-injection detection, semantic and exact caching, multi-provider
//! routing with failover, and asynchronous response quality evaluation.
//!
//! ## Request flow
//!
//! ```text
//! ingress ─► trace ─► rate limit ─► PII shield ─► injection detector
//!        ─► semantic cache ─► exact cache ─► router ─► provider
//!        ─► cache store ─► judge (fire-and-forget) ─► egress
//! ```
//!
//! Every provider adapter owns one [`breaker::CircuitBreaker`] and one
//! [`retry::RetryPolicy`]; the [`provider::Router`] walks an ordered
//! fallback chain, skipping providers whose breakers are open. Infrastructure
//! failures (KV store, embedder, judge) never fail a request; policy
//! failures (blocks, rate limits) do.
//!
//! ## Library use
//!
//! The pipeline composes from parts, so the whole stack runs against mocks:
//!
//! ```
//! use llm_gateway::domain::{ChatRequest, Message, ModelParameters, Role};
//! use llm_gateway::metrics::MetricsCollector;
//! use llm_gateway::pipeline::Pipeline;
//! use llm_gateway::provider::{MockProvider, ProviderRegistry, Router};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = Arc::new(ProviderRegistry::new());
//! registry.register(Arc::new(
//!     MockProvider::new("stub", vec!["demo-model".into()]).with_reply("pong"),
//! ));
//! let router = Arc::new(Router::new(registry, HashMap::new()));
//! let pipeline = Pipeline::builder(router, Arc::new(MetricsCollector::new())).build();
//!
//! let mut request = ChatRequest::new(
//!     "demo-model",
//!     vec![Message::new(Role::User, "ping")],
//!     ModelParameters::default(),
//! );
//! let reply = pipeline.execute(&mut request, "127.0.0.1").await.unwrap();
//! # let _ = reply;
//! # }
//! ```
//!
//! The server binary wires the same parts from environment configuration
//! (see [`config::Settings`] and [`state::AppState`]) behind an HTTP
//! surface ([`api`]).

pub mod api;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod judge;
pub mod kv;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod semantic_cache;
pub mod shield;
pub mod state;
pub mod trace;
pub mod vector_store;

pub use breaker::{CircuitBreaker, CircuitState};
pub use cache::ExactCache;
pub use config::Settings;
pub use domain::{ChatRequest, ChatResponse, FinishReason, Message, ModelParameters, Role};
pub use error::{GatewayError, Result};
pub use metrics::MetricsCollector;
pub use pipeline::{Pipeline, PipelineReply};
pub use provider::{Provider, ProviderRegistry, Router};
pub use retry::RetryPolicy;
pub use semantic_cache::SemanticCache;
pub use shield::{InjectionDetector, PiiShield};
pub use state::AppState;
pub use vector_store::VectorStore;

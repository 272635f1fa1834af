//! Semantic response cache.
//!
//! Serves responses to queries semantically close to a previously answered
//! query: embed the query, search the vector store, return the stored
//! response when the inner-product score clears the threshold. Embedding
//! failures degrade to a miss (lookup) or a dropped store.

use crate::embedding::Embedder;
use crate::vector_store::{EntryMetadata, VectorStore};
use chrono::Utc;
use std::sync::{Arc, Mutex};

/// A semantic cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub response: String,
    pub model: String,
    /// Inner-product similarity of the stored query to this one.
    pub score: f32,
}

pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    store: Mutex<VectorStore>,
}

impl SemanticCache {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        let store = VectorStore::new(embedder.dimension(), threshold);
        Self {
            embedder,
            store: Mutex::new(store),
        }
    }

    /// Look up a near-duplicate of `query`.
    pub async fn lookup(&self, query: &str) -> Option<SemanticHit> {
        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed, semantic lookup skipped");
                return None;
            }
        };
        let store = self.store.lock().expect("vector store lock poisoned");
        store
            .search(&embedding, None)
            .map(|(meta, score)| SemanticHit {
                response: meta.response.clone(),
                model: meta.model.clone(),
                score,
            })
    }

    /// Remember a served response for future near-duplicate queries.
    pub async fn store(&self, query: &str, response: &str, model: &str) {
        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed, response not cached");
                return;
            }
        };
        let mut store = self.store.lock().expect("vector store lock poisoned");
        if let Err(err) = store.add(
            embedding,
            EntryMetadata {
                response: response.to_string(),
                model: model.to_string(),
                created_at: Utc::now(),
            },
        ) {
            tracing::warn!(error = %err, "semantic cache store failed");
        }
    }

    pub fn size(&self) -> usize {
        self.store.lock().expect("vector store lock poisoned").size()
    }
}

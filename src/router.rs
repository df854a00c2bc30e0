//! Fans one request out to every collection a section draws from.
//!
//! Collections are queried concurrently. A collection that fails or times
//! out is recorded as degraded and left out of the result; only when every
//! queried collection fails does routing itself fail. If every failure was
//! the embedding provider, the error says so.

use std::{collections::BTreeMap, sync::Arc};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    collection::{Collection, RetrievalHit},
    config::{SectionSettings, Settings, Timeouts},
    embedding::Embedder,
    error::{Error, Result},
    text_util::render_template,
    vector_store::VectorStore,
};

/// Similarity bonus for hits carrying a collection's preferred tag.
pub const PREFERRED_TAG_BONUS: f32 = 0.05;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalRequest {
    pub section: String,
    pub requirement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub collection: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RoutedHits {
    /// Hits per responding collection, best first.
    pub hits: BTreeMap<String, Vec<RetrievalHit>>,
    pub degraded: Vec<Degradation>,
    /// Collections the section weights at zero; never queried.
    pub skipped: Vec<String>,
}

impl RoutedHits {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn total_hits(&self) -> usize {
        self.hits.values().map(Vec::len).sum()
    }
}

pub struct CollectionRouter {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    collections: Vec<Collection>,
    timeouts: Timeouts,
}

impl CollectionRouter {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            embedder,
            collections: settings.collections.clone(),
            timeouts: settings.timeouts.clone(),
        }
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// Query text sent to `collection` for `request`.
    pub fn shape_query(collection: &Collection, request: &RetrievalRequest) -> String {
        render_template(
            collection.query_template(),
            &request.section,
            request.requirement.trim(),
        )
    }

    pub async fn route(
        &self,
        request: &RetrievalRequest,
        section: &SectionSettings,
    ) -> Result<RoutedHits> {
        let mut routed = RoutedHits::default();
        let mut queried = Vec::new();
        for collection in &self.collections {
            if section.weight_for(collection) > 0.0 {
                queried.push(collection);
            } else {
                routed.skipped.push(collection.id.clone());
            }
        }

        if queried.is_empty() {
            debug!(section = %request.section, "section draws from no collections");
            return Ok(routed);
        }

        let results =
            join_all(queried.iter().map(|c| self.query_collection(c, request)))
                .await;

        let mut embedding_failures = 0;
        let mut embedding_error = None;
        for (collection, result) in queried.iter().zip(results) {
            match result {
                Ok(hits) => {
                    debug!(collection = %collection.id, hits = hits.len(), "collection responded");
                    routed.hits.insert(collection.id.clone(), hits);
                }
                Err(e) => {
                    warn!(
                        collection = %collection.id,
                        error = %e,
                        "collection degraded, continuing without it"
                    );
                    routed.degraded.push(Degradation {
                        collection: collection.id.clone(),
                        reason: e.to_string(),
                    });
                    if let Error::EmbeddingUnavailable(reason) = e {
                        embedding_failures += 1;
                        embedding_error.get_or_insert(reason);
                    }
                }
            }
        }

        if routed.hits.is_empty() {
            if embedding_failures == queried.len()
                && let Some(reason) = embedding_error
            {
                return Err(Error::EmbeddingUnavailable(reason));
            }
            return Err(Error::RetrievalUnavailable);
        }
        Ok(routed)
    }

    async fn query_collection(
        &self,
        collection: &Collection,
        request: &RetrievalRequest,
    ) -> Result<Vec<RetrievalHit>> {
        let query = Self::shape_query(collection, request);
        let vector = self
            .embedder
            .embed(&query, self.timeouts.embedding())
            .await?;

        let timeout = self.timeouts.retrieval();
        let scored = tokio::time::timeout(
            timeout,
            self.store
                .search(&collection.id, &vector, collection.top_k, timeout),
        )
        .await
        .map_err(|_| Error::CollectionUnavailable {
            collection: collection.id.clone(),
            reason: format!("search timed out after {}ms", timeout.as_millis()),
        })??;
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<_> = scored.iter().map(|s| s.id).collect();
        let chunks = tokio::time::timeout(
            timeout,
            self.store.load_chunks(&collection.id, &ids),
        )
        .await
        .map_err(|_| Error::CollectionUnavailable {
            collection: collection.id.clone(),
            reason: format!("chunk load timed out after {}ms", timeout.as_millis()),
        })??;

        let scores: BTreeMap<_, _> = scored.iter().map(|s| (s.id, s.score)).collect();
        let mut hits: Vec<RetrievalHit> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let mut score = *scores.get(&chunk.id)?;
                if let Some(tag) = &collection.prefer_tag
                    && chunk.has_tag(tag)
                {
                    score += PREFERRED_TAG_BONUS;
                }
                Some(RetrievalHit {
                    collection: collection.id.clone(),
                    chunk,
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk.id.cmp(&b.chunk.id)));
        Ok(hits)
    }
}

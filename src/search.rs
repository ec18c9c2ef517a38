//! Semantic search over stored chunk embeddings

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::embeddings::Embedder;
use crate::error::{LitukError, Result};
use crate::storage::Database;
use crate::utils::cosine_similarity;

const QUERY_CACHE_SIZE: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub document_name: String,
    pub text: String,
    pub score: f32,
}

#[derive(Clone)]
pub struct Searcher {
    db: Database,
    embedder: Arc<dyn Embedder>,
    cache: Arc<Mutex<LruCache<String, Vec<f32>>>>,
}

impl Searcher {
    pub fn new(db: Database, embedder: Arc<dyn Embedder>) -> Self {
        let cap = NonZeroUsize::new(QUERY_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            embedder,
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.cache.lock()
            && let Some(hit) = cache.get(query)
        {
            debug!("query embedding cache hit");
            return Ok(hit.clone());
        }
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| LitukError::Embedding {
                message: e.to_string(),
            })?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }

    /// Top `top_k` chunks by cosine similarity, best first, dropping scores below `min_score`
    pub async fn search(&self, query: &str, top_k: usize, min_score: f32) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LitukError::validation("search query must not be empty"));
        }
        let top_k = top_k.clamp(1, 50);
        let vector = self.query_embedding(query).await?;
        let candidates = self.db.embedded_chunks(vector.len())?;

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|c| {
                let score = cosine_similarity(&vector, &c.embedding);
                (score >= min_score).then(|| SearchHit {
                    chunk_id: c.id,
                    document_id: c.document_id,
                    document_name: c.document_name,
                    text: c.text,
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        debug!("search '{}' returned {} hits", query, hits.len());
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::FakeEmbedder;
    use crate::ingest::chunker::Chunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every text it is asked to embed
    struct RecordingEmbedder {
        inner: FakeEmbedder,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().extend(texts.iter().cloned());
            self.inner.embed_batch(texts).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn model(&self) -> &str {
            "recording"
        }
    }

    async fn seeded() -> Searcher {
        let db = Database::open_in_memory().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(None));
        let doc = db.create_document("handbook.pdf", "hash").unwrap();
        let texts = [
            "The Battle of Hastings took place in 1066",
            "Parliament meets at the Palace of Westminster",
            "Scotland has its own parliament in Edinburgh",
        ];
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                index: i,
                text: t.to_string(),
                char_start: 0,
                char_end: t.len(),
            })
            .collect();
        let stored = db.replace_chunks(&doc.id, &chunks).unwrap();
        for chunk in &stored {
            let v = embedder.embed(&chunk.text).await.unwrap();
            db.set_chunk_embedding(&chunk.id, &v, "fake-bow").unwrap();
        }
        Searcher::new(db, embedder)
    }

    #[tokio::test]
    async fn ranks_by_similarity() {
        let searcher = seeded().await;
        let hits = searcher
            .search("battle of hastings 1066", 2, -1.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].text.contains("Hastings"));
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].document_name, "handbook.pdf");
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let searcher = seeded().await;
        assert!(matches!(
            searcher.search("   ", 5, 0.0).await,
            Err(LitukError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn cache_is_keyed_on_the_embedded_text() {
        let embedder = Arc::new(RecordingEmbedder {
            inner: FakeEmbedder::new(None),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        });
        let searcher = Searcher::new(Database::open_in_memory().unwrap(), embedder.clone());
        searcher.search("Westminster", 3, 0.0).await.unwrap();
        searcher.search("  Westminster ", 3, 0.0).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        searcher.search("WESTMINSTER", 3, 0.0).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *embedder.seen.lock().unwrap(),
            vec!["Westminster".to_string(), "WESTMINSTER".to_string()]
        );
    }
}

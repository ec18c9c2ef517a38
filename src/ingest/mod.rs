//! PDF ingestion pipeline
//!
//! Turns an uploaded handbook into stored chunks with embeddings, then asks the
//! chat model to synthesize study topics and practice tests from them.
//!
//! Steps: hash → register document → extract + normalize → chunk → embed in
//! paced batches → topics call → tests call → persist → final status.
//!
//! A failed embedding batch is recorded on the document and the pipeline keeps
//! going; the document only ends up `failed` when both generation calls fail.

pub mod chunker;
pub mod generate;
pub mod pdf;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::embeddings::Embedder;
use crate::error::{LitukError, Result};
use crate::llm::{ChatModel, ResponseFormat};
use crate::storage::{
    Database, Document, DocumentStatus, NewQuestion, NewTest, NewTopic, StoredChunk,
};

/// Pipeline tuning, usually derived from `[ingest]` in lituk.toml
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub snap_window: usize,
    pub embed_batch_size: usize,
    pub batch_delay: Duration,
    pub llm_requests_per_minute: u32,
    pub generation_chunks: usize,
    pub duplicate_threshold: f64,
}

impl IngestSettings {
    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
            snap_window: cfg.snap_window,
            embed_batch_size: cfg.embed_batch_size.max(1),
            batch_delay: Duration::from_millis(cfg.batch_delay_ms),
            llm_requests_per_minute: cfg.llm_requests_per_minute,
            generation_chunks: cfg.generation_chunks.max(1),
            duplicate_threshold: cfg.duplicate_threshold,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&crate::config::Config::default().ingest)
    }
}

/// Outcome of one ingestion or reprocessing run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunks: usize,
    pub embedded: usize,
    pub failed_batches: usize,
    pub topics_created: usize,
    pub tests_created: usize,
    pub questions_created: usize,
    pub errors: Vec<String>,
    pub skipped: bool,
}

impl IngestReport {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            status: DocumentStatus::Processing,
            chunks: 0,
            embedded: 0,
            failed_batches: 0,
            topics_created: 0,
            tests_created: 0,
            questions_created: 0,
            errors: Vec::new(),
            skipped: false,
        }
    }
}

/// A registered document, and whether it is already up to date
#[derive(Debug, Clone)]
pub struct Prepared {
    pub document: Document,
    pub skip: bool,
}

#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    settings: IngestSettings,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl Pipeline {
    pub fn new(
        db: Database,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        settings: IngestSettings,
    ) -> Self {
        let per_minute = NonZeroU32::new(settings.llm_requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            db,
            embedder,
            chat,
            settings,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub async fn ingest_pdf_file(&self, path: &Path, force: bool) -> Result<IngestReport> {
        let bytes = tokio::fs::read(path).await.map_err(|e| LitukError::Pdf {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest_pdf_bytes(&name, bytes, force).await
    }

    pub async fn ingest_pdf_bytes(
        &self,
        name: &str,
        bytes: Vec<u8>,
        force: bool,
    ) -> Result<IngestReport> {
        let hash = content_hash(&bytes);
        let prepared = self.prepare(name, &hash, force)?;
        if prepared.skip {
            return Ok(skipped_report(&prepared.document));
        }
        self.process_pdf(&prepared.document, bytes).await
    }

    /// Ingest already-extracted text under a caller-supplied content hash
    pub async fn ingest_text(&self, name: &str, hash: &str, text: &str) -> Result<IngestReport> {
        let prepared = self.prepare(name, hash, false)?;
        if prepared.skip {
            return Ok(skipped_report(&prepared.document));
        }
        let doc = prepared.document;
        let outcome = self.process_text(&doc, &pdf::normalize_text(text)).await;
        self.finish(&doc, outcome)
    }

    /// Find or create the document row for `hash`.
    ///
    /// A completed document is left alone unless `force` is set; otherwise its
    /// previously generated chunks, topics and tests are cleared. A document
    /// another run is still working on is refused with a conflict.
    pub fn prepare(&self, name: &str, hash: &str, force: bool) -> Result<Prepared> {
        let Some(existing) = self.db.find_document_by_hash(hash)? else {
            let document = self.db.create_document(name, hash)?;
            info!("Registered document {} as {}", name, document.id);
            return Ok(Prepared {
                document,
                skip: false,
            });
        };
        if existing.status == DocumentStatus::Completed && !force {
            info!("Document {} already ingested as {}", name, existing.id);
            return Ok(Prepared {
                document: existing,
                skip: true,
            });
        }
        if !self.db.claim_document(&existing.id, DocumentStatus::Pending)? {
            return Err(busy(&existing));
        }
        let (topics, tests) = self.db.delete_generated_content(&existing.id)?;
        self.db.replace_chunks(&existing.id, &[])?;
        info!(
            "Re-ingesting {} ({}): removed {} topics and {} tests",
            name, existing.id, topics, tests
        );
        Ok(Prepared {
            document: self.db.get_document(&existing.id)?,
            skip: false,
        })
    }

    /// Extract, chunk, embed and generate for a prepared document
    pub async fn process_pdf(&self, doc: &Document, bytes: Vec<u8>) -> Result<IngestReport> {
        let outcome = async {
            self.db
                .set_document_status(&doc.id, DocumentStatus::Processing, &[])?;
            let raw = tokio::task::spawn_blocking(move || pdf::extract_text(&bytes))
                .await
                .map_err(|e| LitukError::Internal {
                    message: format!("PDF extraction task failed: {e}"),
                })??;
            let text = pdf::normalize_text(&raw);
            info!("Extracted {} chars from {}", text.chars().count(), doc.name);
            self.process_text(doc, &text).await
        }
        .await;
        self.finish(doc, outcome)
    }

    /// Re-run embedding (for chunks still missing one) and generation from stored chunks
    pub async fn reprocess(&self, document_id: &str) -> Result<IngestReport> {
        let doc = self.begin_reprocess(document_id)?;
        self.run_reprocess(&doc).await
    }

    /// Claim a document for reprocessing; it needs stored chunks and no run in flight
    pub fn begin_reprocess(&self, document_id: &str) -> Result<Document> {
        let doc = self.db.get_document(document_id)?;
        if self.db.chunks_for_document(&doc.id)?.is_empty() {
            return Err(LitukError::validation(format!(
                "document {} has no stored chunks; upload it again",
                doc.id
            )));
        }
        if !self.db.claim_document(&doc.id, DocumentStatus::Processing)? {
            return Err(busy(&doc));
        }
        self.db.get_document(&doc.id)
    }

    /// Reprocess a document already claimed by `begin_reprocess`
    pub async fn run_reprocess(&self, doc: &Document) -> Result<IngestReport> {
        let outcome = async {
            let chunks = self.db.chunks_for_document(&doc.id)?;
            self.db.delete_generated_content(&doc.id)?;
            let mut report = IngestReport::new(&doc.id);
            report.chunks = chunks.len();
            let pending: Vec<StoredChunk> =
                chunks.iter().filter(|c| c.embedding.is_none()).cloned().collect();
            report.embedded = chunks.len() - pending.len();
            self.embed_chunks(&pending, &mut report).await?;
            let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
            self.generate(doc, &texts, &mut report).await?;
            Ok(report)
        }
        .await;
        self.finish(doc, outcome)
    }

    async fn process_text(&self, doc: &Document, text: &str) -> Result<IngestReport> {
        self.db
            .set_document_status(&doc.id, DocumentStatus::Processing, &[])?;
        let chunks = chunker::chunk_text(
            text,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
            self.settings.snap_window,
        );
        if chunks.is_empty() {
            return Err(LitukError::Pdf {
                message: format!("{} contains no extractable text", doc.name),
            });
        }
        let stored = self.db.replace_chunks(&doc.id, &chunks)?;
        info!("Stored {} chunks for {}", stored.len(), doc.name);

        let mut report = IngestReport::new(&doc.id);
        report.chunks = stored.len();
        self.embed_chunks(&stored, &mut report).await?;

        let texts: Vec<String> = stored.into_iter().map(|c| c.text).collect();
        self.generate(doc, &texts, &mut report).await?;
        Ok(report)
    }

    /// Write the final status; hard failures mark the document failed
    fn finish(&self, doc: &Document, outcome: Result<IngestReport>) -> Result<IngestReport> {
        match outcome {
            Ok(report) => {
                self.db
                    .set_document_status(&doc.id, report.status, &report.errors)?;
                info!(
                    "Document {} {}: {} chunks, {} embedded, {} topics, {} tests, {} questions",
                    doc.name,
                    report.status.as_str(),
                    report.chunks,
                    report.embedded,
                    report.topics_created,
                    report.tests_created,
                    report.questions_created
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Ingestion of {} failed: {}", doc.name, e);
                if let Err(status_err) =
                    self.db
                        .set_document_status(&doc.id, DocumentStatus::Failed, &[e.to_string()])
                {
                    warn!("Could not mark {} failed: {}", doc.id, status_err);
                }
                Err(e)
            }
        }
    }

    async fn embed_chunks(&self, chunks: &[StoredChunk], report: &mut IngestReport) -> Result<()> {
        let batch_size = self.settings.embed_batch_size.max(1);
        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            if batch_no > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for (chunk, vector) in batch.iter().zip(&vectors) {
                        self.db
                            .set_chunk_embedding(&chunk.id, vector, self.embedder.model())?;
                    }
                    report.embedded += batch.len();
                }
                Ok(vectors) => {
                    let msg = format!(
                        "embedding batch {}: expected {} vectors, got {}",
                        batch_no,
                        batch.len(),
                        vectors.len()
                    );
                    warn!("{}", msg);
                    report.failed_batches += 1;
                    report.errors.push(msg);
                }
                Err(e) => {
                    let msg = format!("embedding batch {batch_no}: {e}");
                    warn!("{}", msg);
                    report.failed_batches += 1;
                    report.errors.push(msg);
                }
            }
        }
        Ok(())
    }

    async fn generate(&self, doc: &Document, texts: &[String], report: &mut IngestReport) -> Result<()> {
        let sample = sample_chunks(texts, self.settings.generation_chunks);

        self.limiter.until_ready().await;
        let topics = match self
            .chat
            .complete(&generate::topics_prompt(&sample), ResponseFormat::Json)
            .await
            .and_then(|reply| generate::parse_topics(&reply))
        {
            Ok(topics) => Some(topics),
            Err(e) => {
                warn!("Topic generation for {} failed: {}", doc.name, e);
                report.errors.push(format!("topic generation: {e}"));
                None
            }
        };

        let mut created_topics = Vec::new();
        for topic in topics.iter().flatten() {
            let new = NewTopic {
                title: topic.title.clone(),
                description: topic.description.clone(),
                content: topic.content.clone(),
                category: topic.category.clone(),
                difficulty: topic.difficulty.clone(),
            };
            created_topics.push(self.db.create_topic(&new, Some(&doc.id))?);
        }
        report.topics_created = created_topics.len();

        let titles: Vec<String> = created_topics.iter().map(|t| t.title.clone()).collect();
        self.limiter.until_ready().await;
        let tests = match self
            .chat
            .complete(&generate::tests_prompt(&sample, &titles), ResponseFormat::Json)
            .await
            .and_then(|reply| generate::parse_tests(&reply))
        {
            Ok(tests) => Some(tests),
            Err(e) => {
                warn!("Test generation for {} failed: {}", doc.name, e);
                report.errors.push(format!("test generation: {e}"));
                None
            }
        };

        let topic_id = created_topics.first().map(|t| t.id.clone());
        for test in tests.iter().flatten() {
            let questions =
                generate::dedupe_questions(test.questions.clone(), self.settings.duplicate_threshold);
            let stored = self.db.create_test(
                &NewTest {
                    title: test.title.clone(),
                    description: test.description.clone(),
                    topic_id: topic_id.clone(),
                    kind: "generated".to_string(),
                },
                Some(&doc.id),
            )?;
            report.tests_created += 1;
            for q in questions {
                let new = NewQuestion {
                    test_id: stored.id.clone(),
                    topic_id: topic_id.clone(),
                    text: q.text,
                    options: q.options,
                    correct_index: q.correct_index,
                    explanation: q.explanation,
                };
                match self.db.create_question(&new) {
                    Ok(_) => report.questions_created += 1,
                    Err(e) => {
                        warn!("Skipping question in {}: {}", stored.title, e);
                        report.errors.push(format!("question in '{}': {e}", stored.title));
                    }
                }
            }
        }

        report.status = if topics.is_none() && tests.is_none() {
            DocumentStatus::Failed
        } else {
            DocumentStatus::Completed
        };
        Ok(())
    }
}

/// BLAKE3 hex digest identifying a document's bytes
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Evenly spaced selection of at most `limit` chunk texts
fn sample_chunks(texts: &[String], limit: usize) -> Vec<String> {
    if texts.len() <= limit {
        return texts.to_vec();
    }
    (0..limit)
        .map(|i| texts[i * texts.len() / limit].clone())
        .collect()
}

fn busy(doc: &Document) -> LitukError {
    LitukError::Conflict {
        message: format!("document {} is already being processed", doc.id),
    }
}

fn skipped_report(doc: &Document) -> IngestReport {
    IngestReport {
        status: doc.status,
        chunks: doc.chunk_count,
        skipped: true,
        ..IngestReport::new(&doc.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_spreads_across_the_document() {
        let texts: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(sample_chunks(&texts, 20).len(), 10);
        assert_eq!(sample_chunks(&texts, 3), vec!["0", "3", "6"]);
    }

    #[test]
    fn settings_follow_config() {
        let mut cfg = crate::config::Config::default().ingest;
        cfg.embed_batch_size = 0;
        cfg.batch_delay_ms = 250;
        let settings = IngestSettings::from_config(&cfg);
        assert_eq!(settings.embed_batch_size, 1);
        assert_eq!(settings.batch_delay, Duration::from_millis(250));
    }
}

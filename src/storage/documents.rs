use rusqlite::{OptionalExtension, Row, params};

use super::{Database, Document, DocumentStatus, EmbeddedChunk, StoredChunk};
use crate::error::{LitukError, Result};
use crate::ingest::chunker::Chunk;
use crate::utils::{decode_vector, encode_vector, new_id, now_rfc3339};

const DOCUMENT_COLUMNS: &str =
    "id, name, content_hash, status, chunk_count, errors, created_at, updated_at";

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let status: String = row.get(3)?;
    let errors: String = row.get(5)?;
    Ok(Document {
        id: row.get(0)?,
        name: row.get(1)?,
        content_hash: row.get(2)?,
        status: DocumentStatus::parse(&status),
        chunk_count: row.get::<_, i64>(4)? as usize,
        errors: serde_json::from_str(&errors).unwrap_or_default(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl Database {
    pub fn create_document(&self, name: &str, content_hash: &str) -> Result<Document> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let doc = Document {
            id: new_id(),
            name: name.to_string(),
            content_hash: content_hash.to_string(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            errors: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        conn.execute(
            &format!(
                "INSERT INTO documents ({DOCUMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, 0, '[]', ?5, ?6)"
            ),
            params![
                doc.id,
                doc.name,
                doc.content_hash,
                doc.status.as_str(),
                doc.created_at,
                doc.updated_at
            ],
        )?;
        Ok(doc)
    }

    pub fn get_document(&self, id: &str) -> Result<Document> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![id],
            document_from_row,
        )
        .optional()?
        .ok_or_else(|| LitukError::not_found(format!("document {id}")))
    }

    pub fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let doc = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE content_hash = ?1"),
                params![content_hash],
                document_from_row,
            )
            .optional()?;
        Ok(doc)
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_at DESC"
        ))?;
        let docs = stmt
            .query_map([], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Move a document to a new status, replacing its error list
    pub fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        errors: &[String],
    ) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE documents SET status = ?1, errors = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                status.as_str(),
                serde_json::to_string(errors)?,
                now_rfc3339(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(LitukError::not_found(format!("document {id}")));
        }
        Ok(())
    }

    /// Move a document that no run is working on into `status`, clearing its errors.
    ///
    /// Returns false when the document is pending or processing, i.e. some
    /// ingestion run already holds it.
    pub fn claim_document(&self, id: &str, status: DocumentStatus) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE documents SET status = ?1, errors = '[]', updated_at = ?2
             WHERE id = ?3 AND status NOT IN ('pending', 'processing')",
            params![status.as_str(), now_rfc3339(), id],
        )?;
        Ok(changed == 1)
    }

    /// Mark documents left pending or processing by a previous run as failed
    pub fn fail_interrupted_documents(&self) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE documents SET status = 'failed', errors = ?1, updated_at = ?2
             WHERE status IN ('pending', 'processing')",
            params![
                serde_json::to_string(&["interrupted before completion"])?,
                now_rfc3339()
            ],
        )?)
    }

    /// Replace a document's chunks; returns the stored rows in order
    pub fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<Vec<StoredChunk>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        let mut stored = Vec::with_capacity(chunks.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, document_id, idx, text, char_start, char_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for chunk in chunks {
                let id = new_id();
                stmt.execute(params![
                    id,
                    document_id,
                    chunk.index as i64,
                    chunk.text,
                    chunk.char_start as i64,
                    chunk.char_end as i64
                ])?;
                stored.push(StoredChunk {
                    id,
                    document_id: document_id.to_string(),
                    index: chunk.index,
                    text: chunk.text.clone(),
                    char_start: chunk.char_start,
                    char_end: chunk.char_end,
                    embedding: None,
                });
            }
        }
        tx.execute(
            "UPDATE documents SET chunk_count = ?1, updated_at = ?2 WHERE id = ?3",
            params![chunks.len() as i64, now_rfc3339(), document_id],
        )?;
        tx.commit()?;
        Ok(stored)
    }

    pub fn set_chunk_embedding(&self, chunk_id: &str, embedding: &[f32], model: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE chunks SET embedding = ?1, embedding_dim = ?2, embedding_model = ?3 WHERE id = ?4",
            params![encode_vector(embedding), embedding.len() as i64, model, chunk_id],
        )?;
        Ok(())
    }

    pub fn chunks_for_document(&self, document_id: &str) -> Result<Vec<StoredChunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, idx, text, char_start, char_end, embedding
             FROM chunks WHERE document_id = ?1 ORDER BY idx",
        )?;
        let chunks = stmt
            .query_map(params![document_id], |row| {
                let blob: Option<Vec<u8>> = row.get(6)?;
                Ok(StoredChunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    index: row.get::<_, i64>(2)? as usize,
                    text: row.get(3)?,
                    char_start: row.get::<_, i64>(4)? as usize,
                    char_end: row.get::<_, i64>(5)? as usize,
                    embedding: blob.map(|b| decode_vector(&b)),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// All chunks embedded with the given dimension, for similarity search
    pub fn embedded_chunks(&self, dimensions: usize) -> Result<Vec<EmbeddedChunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.document_id, d.name, c.text, c.embedding
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE c.embedding IS NOT NULL AND c.embedding_dim = ?1",
        )?;
        let chunks = stmt
            .query_map(params![dimensions as i64], |row| {
                let blob: Vec<u8> = row.get(4)?;
                Ok(EmbeddedChunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    document_name: row.get(2)?,
                    text: row.get(3)?,
                    embedding: decode_vector(&blob),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// Document counts grouped by status
    pub fn documents_by_status(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status ORDER BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

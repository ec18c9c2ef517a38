//! SQLite persistence layer
//!
//! A single `Database` handle wraps one connection behind a mutex. Repository
//! methods live in the submodules as `impl Database` blocks, grouped by table.
//! None of them hold the lock across an `.await`.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::error::{LitukError, Result};

pub mod attempts;
pub mod chat;
pub mod content;
pub mod documents;
pub mod games;
pub mod models;
pub mod users;

pub use models::*;

/// Thread-safe database handle shared by the HTTP server, pipeline and CLI.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and run all migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| LitukError::Database {
                message: format!("Failed to create data directory: {e}"),
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        info!("Opened database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Fresh private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| LitukError::Database {
            message: format!("database lock poisoned: {e}"),
        })
    }

    /// Run schema migrations. Idempotent, safe to call on every launch.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        let version: i64 = conn
            .query_row(
                "SELECT COALESCE((SELECT value FROM _meta WHERE key = 'schema_version'), '0')",
                [],
                |row| row.get::<_, String>(0),
            )?
            .parse()
            .unwrap_or(0);

        if version < 1 {
            migrate_v1(&conn)?;
        }
        Ok(())
    }

    /// Row counts for `/info` and the `verify` command
    pub fn counts(&self) -> Result<Counts> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };
        Ok(Counts {
            users: count("SELECT COUNT(*) FROM users")?,
            documents: count("SELECT COUNT(*) FROM documents")?,
            chunks: count("SELECT COUNT(*) FROM chunks")?,
            embedded_chunks: count("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")?,
            topics: count("SELECT COUNT(*) FROM topics")?,
            tests: count("SELECT COUNT(*) FROM tests")?,
            questions: count("SELECT COUNT(*) FROM questions")?,
            attempts: count("SELECT COUNT(*) FROM attempts")?,
            games: count("SELECT COUNT(*) FROM games")?,
        })
    }
}

/// V1: users, tokens, documents, chunks, learning content, attempts, games, chat
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id             TEXT PRIMARY KEY,
            email          TEXT NOT NULL UNIQUE,
            display_name   TEXT NOT NULL DEFAULT '',
            password_hash  TEXT NOT NULL,
            role           TEXT NOT NULL DEFAULT 'user',
            created_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS auth_tokens (
            token_hash  TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            kind        TEXT NOT NULL,
            expires_at  TEXT NOT NULL,
            revoked     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tokens_session ON auth_tokens(session_id);

        CREATE TABLE IF NOT EXISTS documents (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            content_hash  TEXT NOT NULL UNIQUE,
            status        TEXT NOT NULL DEFAULT 'pending',
            chunk_count   INTEGER NOT NULL DEFAULT 0,
            errors        TEXT NOT NULL DEFAULT '[]',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            id               TEXT PRIMARY KEY,
            document_id      TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            idx              INTEGER NOT NULL,
            text             TEXT NOT NULL,
            char_start       INTEGER NOT NULL,
            char_end         INTEGER NOT NULL,
            embedding        BLOB,
            embedding_dim    INTEGER,
            embedding_model  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, idx);
        CREATE INDEX IF NOT EXISTS idx_chunks_dim ON chunks(embedding_dim);

        CREATE TABLE IF NOT EXISTS topics (
            id           TEXT PRIMARY KEY,
            title        TEXT NOT NULL,
            description  TEXT NOT NULL DEFAULT '',
            content      TEXT NOT NULL DEFAULT '',
            category     TEXT NOT NULL DEFAULT 'general',
            difficulty   TEXT NOT NULL DEFAULT 'medium',
            document_id  TEXT REFERENCES documents(id) ON DELETE SET NULL,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tests (
            id           TEXT PRIMARY KEY,
            title        TEXT NOT NULL,
            description  TEXT NOT NULL DEFAULT '',
            topic_id     TEXT REFERENCES topics(id) ON DELETE SET NULL,
            kind         TEXT NOT NULL DEFAULT 'practice',
            document_id  TEXT REFERENCES documents(id) ON DELETE SET NULL,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS questions (
            id             TEXT PRIMARY KEY,
            test_id        TEXT NOT NULL REFERENCES tests(id) ON DELETE CASCADE,
            topic_id       TEXT REFERENCES topics(id) ON DELETE SET NULL,
            position       INTEGER NOT NULL DEFAULT 0,
            text           TEXT NOT NULL,
            options        TEXT NOT NULL,
            correct_index  INTEGER NOT NULL,
            explanation    TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_questions_test ON questions(test_id, position);

        CREATE TABLE IF NOT EXISTS attempts (
            id            TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            kind          TEXT NOT NULL,
            test_id       TEXT REFERENCES tests(id) ON DELETE SET NULL,
            question_ids  TEXT NOT NULL,
            answers       TEXT NOT NULL DEFAULT '{}',
            started_at    TEXT NOT NULL,
            submitted_at  TEXT,
            score         INTEGER,
            total         INTEGER NOT NULL,
            percent       INTEGER,
            passed        INTEGER,
            timed_out     INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_attempts_user ON attempts(user_id, started_at);

        CREATE TABLE IF NOT EXISTS games (
            id          TEXT PRIMARY KEY,
            topic_id    TEXT REFERENCES topics(id) ON DELETE CASCADE,
            kind        TEXT NOT NULL,
            title       TEXT NOT NULL,
            payload     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_session ON chat_messages(session_id, created_at);

        INSERT OR REPLACE INTO _meta (key, value) VALUES ('schema_version', '1');
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let counts = db.counts().unwrap();
        assert_eq!(counts.topics, 0);
        assert_eq!(counts.users, 0);
    }
}

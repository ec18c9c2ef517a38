//! Row types shared by the repositories, services and HTTP layer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Stored token metadata (the token itself is never persisted)
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub session_id: String,
    pub user_id: String,
    pub kind: String,
    pub expires_at: String,
    pub revoked: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => DocumentStatus::Processing,
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub errors: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// Embedded chunk joined with its document name, as used by search
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub category: String,
    pub difficulty: String,
    pub document_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewTopic {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_difficulty() -> String {
    "medium".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: String,
    pub title: String,
    pub description: String,
    pub topic_id: Option<String>,
    pub kind: String,
    pub document_id: Option<String>,
    pub created_at: String,
    pub question_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewTest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default = "default_test_kind")]
    pub kind: String,
}

fn default_test_kind() -> String {
    "practice".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: String,
    pub test_id: String,
    pub topic_id: Option<String>,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: String,
}

impl Question {
    /// Learner-facing view without the answer key
    pub fn public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id.clone(),
            text: self.text.clone(),
            options: self.options.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewQuestion {
    pub test_id: String,
    #[serde(default)]
    pub topic_id: Option<String>,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    Practice,
    Mock,
}

impl AttemptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptKind::Practice => "practice",
            AttemptKind::Mock => "mock",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "mock" {
            AttemptKind::Mock
        } else {
            AttemptKind::Practice
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub user_id: String,
    pub kind: AttemptKind,
    pub test_id: Option<String>,
    pub question_ids: Vec<String>,
    pub answers: HashMap<String, usize>,
    pub started_at: String,
    pub submitted_at: Option<String>,
    pub score: Option<u32>,
    pub total: u32,
    pub percent: Option<u32>,
    pub passed: Option<bool>,
    pub timed_out: bool,
}

/// Outcome written back when an attempt is graded
#[derive(Debug, Clone)]
pub struct AttemptGrade {
    pub answers: HashMap<String, usize>,
    pub submitted_at: String,
    pub score: u32,
    pub percent: u32,
    pub passed: bool,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Flashcards,
    Matching,
}

impl GameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Flashcards => "flashcards",
            GameKind::Matching => "matching",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "flashcards" => Some(GameKind::Flashcards),
            "matching" => Some(GameKind::Matching),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub topic_id: Option<String>,
    pub kind: GameKind,
    pub title: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counts {
    pub users: u64,
    pub documents: u64,
    pub chunks: u64,
    pub embedded_chunks: u64,
    pub topics: u64,
    pub tests: u64,
    pub questions: u64,
    pub attempts: u64,
    pub games: u64,
}

//! lituk: backend for Life in the UK test preparation
//!
//! Practice tests, mock exams, games and a study chatbot over a question bank
//! that is partly synthesized from the official handbook by the PDF ingestion
//! pipeline.

pub mod auth;
pub mod chat;
pub mod config;
pub mod content;
pub mod embeddings;
pub mod error;
pub mod exams;
pub mod games;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod search;
pub mod storage;
pub mod utils;

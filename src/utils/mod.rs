//! Utility functions shared across the codebase

use chrono::{DateTime, SecondsFormat, Utc};

pub mod math;

// Re-export commonly used utilities
pub use math::{cosine_similarity, decode_vector, encode_vector};

/// Fixed-width RFC 3339 timestamp (microseconds, `Z`), so stored values sort lexically
pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_rfc3339() -> String {
    rfc3339(Utc::now())
}

/// Fresh random record id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

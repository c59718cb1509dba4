//! Task identifier generation and validation.
//!
//! Identifiers look like `task_20240131_142501_9f3a0c1e`: a UTC
//! timestamp plus eight random hex digits. Uniqueness is probabilistic;
//! the store's unique constraint is the real guarantee.

use chrono::Utc;

/// Prefix shared by every generated task identifier.
pub const TASK_ID_PREFIX: &str = "task_";

/// Upper bound on identifier length (matches the column width).
pub const MAX_TASK_ID_LEN: usize = 100;

/// Generate a fresh task identifier.
pub fn generate_task_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix: u32 = rand::random();
    format!("{TASK_ID_PREFIX}{timestamp}_{suffix:08x}")
}

/// Whether `id` is safe to use as a path component and store key.
///
/// Accepts ASCII alphanumerics, `_` and `-` only.
pub fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_TASK_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

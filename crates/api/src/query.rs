//! Shared query parameter types for API handlers.

use serde::Deserialize;

/// Pagination parameters for project listing (`?skip=&limit=`).
///
/// Values are clamped in the repository layer.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

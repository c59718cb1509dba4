//! Domain types shared by every Orthoflow crate.
//!
//! Nothing in here performs I/O. Statuses, the quality parameter table,
//! the bounded console buffer and task-id generation live here so the
//! store, the orchestrator and the HTTP layer agree on one vocabulary.

pub mod artifacts;
pub mod console;
pub mod error;
pub mod estimation;
pub mod naming;
pub mod progress;
pub mod quality;
pub mod status;
pub mod types;

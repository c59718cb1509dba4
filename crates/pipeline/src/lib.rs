//! Task orchestration for photogrammetry jobs.
//!
//! One [`TaskOrchestrator`] drives a single project from submission to a
//! terminal status: it polls the remote engine, persists progress through
//! a [`ProjectStore`] and fans progress events out through the shared
//! [`SubscriberRegistry`](orthoflow_events::SubscriberRegistry). The
//! [`OrchestratorSupervisor`] guarantees at most one orchestrator per task
//! id and stops them all on shutdown.

pub mod assets;
pub mod backoff;
pub mod config;
pub mod orchestrator;
pub mod results;
pub mod store;
pub mod supervisor;

pub use config::PipelineConfig;
pub use orchestrator::{RunOutcome, TaskOrchestrator};
pub use store::{MemoryProjectStore, PgProjectStore, ProjectStore, StoreError};
pub use supervisor::{OrchestratorSupervisor, SupervisorError};

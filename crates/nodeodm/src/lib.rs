//! NodeODM integration.
//!
//! - [`api`] is a thin REST client over the NodeODM HTTP endpoints.
//! - [`messages`] holds the JSON payloads those endpoints return.
//! - [`client`] defines the [`RemoteJobClient`] seam the pipeline drives and
//!   its NodeODM implementation.

pub mod api;
pub mod client;
pub mod messages;

pub use api::{NodeOdmApi, NodeOdmError};
pub use client::{
    EngineInfo, NodeOdmClient, NodeOdmConfig, RemoteJob, RemoteJobClient, RemoteJobError,
    RemoteState, RemoteStatus, BUNDLE_FILE_NAME,
};

//! Per-task progress fan-out.
//!
//! - [`ProgressEvent`] is the JSON document pushed to every subscriber of a
//!   task while its orchestrator runs.
//! - [`SubscriberRegistry`] maps task ids to the live subscriber channels
//!   and delivers events best-effort.
//!
//! The orchestrator only publishes; the WebSocket layer only subscribes.

pub mod event;
pub mod registry;

pub use event::ProgressEvent;
pub use registry::{SubscriberRegistry, Subscription, SubscriptionId};

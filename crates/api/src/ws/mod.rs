//! WebSocket progress subscriptions.
//!
//! Each connection subscribes to one task through the shared
//! [`SubscriberRegistry`](orthoflow_events::SubscriberRegistry) and
//! forwards its events as JSON text frames.

mod handler;

pub use handler::{ws_handler, HEARTBEAT_INTERVAL};

// ABOUTME: Root library module exposing the relay client, transport, and wire protocol.
// ABOUTME: Re-exports the platform-agnostic engine from huddle-core.

pub mod client;
pub mod protocol;
pub mod transport;

// Re-export platform-agnostic modules from huddle-core
pub use huddle_core::backoff;
pub use huddle_core::cache;
pub use huddle_core::config;
pub use huddle_core::dedup;
pub use huddle_core::dm;
pub use huddle_core::ingest;
pub use huddle_core::message;
pub use huddle_core::outbox;
pub use huddle_core::presence;
pub use huddle_core::thread;

// Re-export the types most consumers need directly
pub use client::{ClientEvent, RelayClient};
pub use huddle_core::{ChatMessage, Config, DeliveryState};
pub use protocol::SendKind;
pub use transport::{LinkState, RelayLink};

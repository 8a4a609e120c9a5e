// ABOUTME: Platform-agnostic message-stream reconstruction for the huddle relay client.
// ABOUTME: Pure derivations over a bounded message log; no sockets, no UI.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod dm;
pub mod ingest;
pub mod message;
pub mod outbox;
pub mod presence;
pub mod thread;

// Re-export the types nearly every consumer touches
pub use config::Config;
pub use dm::DmSession;
pub use ingest::{IngestContext, MessageLog};
pub use message::{ChatMessage, DeliveryState, BROADCAST_ADDR};
pub use outbox::Outbox;
pub use presence::{PresenceEntry, PresenceRoster, TypingIndicator};
pub use thread::{ThreadState, ThreadView};

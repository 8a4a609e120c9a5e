// ABOUTME: Canonical message record shared by every derivation in the engine.
// ABOUTME: Defines ChatMessage, DeliveryState, and the wildcard broadcast address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recipient address meaning "everyone in the workspace".
pub const BROADCAST_ADDR: &str = "*";

/// Delivery status of a locally originated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Sending,
    Acked,
    Failed,
}

/// A single canonical message record.
///
/// Every payload the relay delivers is normalized into this shape before any
/// derivation runs. Timestamps are not monotonic across records: the relay
/// may deliver out of order, and derivations must tolerate that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique within a session. Optimistic records use a `pending-` prefix.
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Either a parent message id (reply) or a free-form topic label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryState>,
}

impl ChatMessage {
    /// Plain record with no thread, flags, or delivery state.
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp,
            thread: None,
            broadcast: false,
            read: false,
            delivery: None,
        }
    }

    /// A message is a broadcast if its flag says so or it is addressed to
    /// the wildcard recipient.
    pub fn is_broadcast(&self) -> bool {
        self.broadcast || self.to == BROADCAST_ADDR
    }

    /// Records missing either endpoint are excluded from derivations.
    pub fn has_endpoints(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty()
    }

    pub fn first_content_line(&self) -> &str {
        self.content.lines().next().unwrap_or("")
    }
}

// =============================================================================
// Tests
// =============================================================================

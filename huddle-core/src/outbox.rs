// ABOUTME: Optimistic send staging and reconciliation against authoritative deliveries.
// ABOUTME: Pending records match their echo by a (from, to, content-prefix) fingerprint.

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::message::{ChatMessage, DeliveryState};

/// How much of the content participates in the fingerprint.
const FINGERPRINT_PREFIX_CHARS: usize = 100;

fn fingerprint(msg: &ChatMessage) -> String {
    let prefix: String = msg.content.chars().take(FINGERPRINT_PREFIX_CHARS).collect();
    format!("{}|{}|{}", msg.from, msg.to, prefix)
}

/// Locally synthesized records shown before the authoritative copy streams
/// back. A pending record is destroyed either by send failure or by a
/// fingerprint match against a recent authoritative record; there is no
/// reconcile timeout, so an echo that never arrives leaves the record pending
/// indefinitely (accepted tradeoff).
#[derive(Debug)]
pub struct Outbox {
    pending: Vec<ChatMessage>,
    window: usize,
}

impl Outbox {
    /// `window` bounds how many recent authoritative records each
    /// reconciliation pass fingerprints.
    pub fn new(window: usize) -> Self {
        Self {
            pending: Vec::new(),
            window: window.max(1),
        }
    }

    /// Synthesize a pending record and append it to the visible tail.
    /// The id is visually distinguishable from relay-assigned ids.
    pub fn stage(&mut self, from: &str, to: &str, content: &str) -> ChatMessage {
        let mut msg = ChatMessage::new(
            format!("pending-{}", Uuid::new_v4()),
            from,
            to,
            content,
            Utc::now(),
        );
        msg.delivery = Some(DeliveryState::Sending);
        self.pending.push(msg.clone());
        msg
    }

    /// Roll back a pending record after its send failed.
    pub fn fail(&mut self, id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|m| m.id != id);
        self.pending.len() != before
    }

    /// Drop every pending record whose fingerprint appears in the recent
    /// window of authoritative records. Returns how many reconciled.
    pub fn reconcile(&mut self, authoritative: &[ChatMessage]) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let start = authoritative.len().saturating_sub(self.window);
        let seen: HashSet<String> = authoritative[start..].iter().map(fingerprint).collect();

        let before = self.pending.len();
        self.pending.retain(|m| !seen.contains(&fingerprint(m)));
        before - self.pending.len()
    }

    pub fn pending(&self) -> &[ChatMessage] {
        &self.pending
    }

    /// Visible list = authoritative view with pending records at the tail.
    pub fn overlay(&self, mut visible: Vec<ChatMessage>) -> Vec<ChatMessage> {
        visible.extend(self.pending.iter().cloned());
        visible
    }
}

// =============================================================================
// Tests
// =============================================================================

// ABOUTME: Collapses multi-recipient broadcast deliveries into one visible record.
// ABOUTME: Keyed on sender + one-second time bucket + content; first occurrence wins.

use std::collections::HashSet;

use crate::message::ChatMessage;

/// Width of the temporal bucket, in milliseconds. Two broadcasts from the
/// same sender with identical content inside one bucket are indistinguishable;
/// that is a documented limitation of the heuristic, not an identity check.
const BUCKET_MS: i64 = 1000;

fn broadcast_key(msg: &ChatMessage) -> String {
    let bucket = msg.timestamp.timestamp_millis().div_euclid(BUCKET_MS);
    format!("{}|{}|{}", msg.from, bucket, msg.content)
}

/// Single forward scan over the delivery order: the first occurrence of each
/// broadcast key survives, later ones drop. Non-broadcast records always pass
/// through, and relative ordering is preserved.
pub fn collapse_broadcasts(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut seen: HashSet<String> = HashSet::new();
    messages
        .iter()
        .filter(|m| !m.is_broadcast() || seen.insert(broadcast_key(m)))
        .cloned()
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

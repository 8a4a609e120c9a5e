// ABOUTME: Normalizes heterogeneous relay payloads into canonical message records.
// ABOUTME: MessageLog keeps a bounded, redelivery-guarded history with oldest-first eviction.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::message::{ChatMessage, BROADCAST_ADDR};

/// Redelivery guard size. When the seen-id set grows past this it is cleared
/// wholesale; occasional reprocessing is the accepted trade for bounded memory.
const SEEN_IDS_MAX: usize = 8192;

/// Ambient context for normalization: who to attribute shapeless payloads to.
#[derive(Debug, Clone)]
pub struct IngestContext {
    /// Sender used when a payload carries no identity of its own.
    pub fallback_from: String,
}

impl IngestContext {
    pub fn new(fallback_from: impl Into<String>) -> Self {
        Self {
            fallback_from: fallback_from.into(),
        }
    }

    fn verbatim(&self, text: &str) -> ChatMessage {
        ChatMessage::new(
            synth_id(),
            self.fallback_from.clone(),
            BROADCAST_ADDR,
            text,
            Utc::now(),
        )
    }
}

fn synth_id() -> String {
    format!("m-{}", Uuid::new_v4())
}

/// Normalize one delivered payload into zero or more records.
///
/// Accepts every shape the relay is known to emit (bare text, log/output
/// frames, history batches, error frames, bare `lines` batches) and falls
/// back to verbatim text for anything unrecognized. Never fails: a malformed
/// payload becomes a text record, never a crash.
pub fn normalize(value: &Value, ctx: &IngestContext) -> Vec<ChatMessage> {
    match value {
        Value::String(text) => vec![ctx.verbatim(text)],
        Value::Object(map) => {
            let kind = map.get("type").and_then(Value::as_str);
            match kind {
                Some("history") | None if map.get("lines").is_some() => map
                    .get("lines")
                    .and_then(Value::as_array)
                    .map(|lines| lines.iter().flat_map(|l| normalize(l, ctx)).collect())
                    .unwrap_or_else(|| vec![ctx.verbatim(&value.to_string())]),
                Some("log") | Some("output") => vec![normalize_stream_frame(map, ctx)],
                Some("error") => vec![normalize_error_frame(map, ctx)],
                _ if looks_like_message(map) => vec![normalize_message_object(map)],
                _ => vec![ctx.verbatim(&value.to_string())],
            }
        }
        other => vec![ctx.verbatim(&other.to_string())],
    }
}

fn looks_like_message(map: &serde_json::Map<String, Value>) -> bool {
    map.contains_key("from")
        && (map.contains_key("content") || map.contains_key("body") || map.contains_key("text"))
}

/// `{type:"log"|"output", stream, content|data|message, timestamp?, agentName?}`
fn normalize_stream_frame(map: &serde_json::Map<String, Value>, ctx: &IngestContext) -> ChatMessage {
    let content = first_text(map, &["content", "data", "message"]).unwrap_or_default();
    let from = first_text(map, &["agentName", "agent"]).unwrap_or_else(|| ctx.fallback_from.clone());
    let timestamp = map
        .get("timestamp")
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);
    ChatMessage::new(synth_id(), from, BROADCAST_ADDR, content, timestamp)
}

/// `{type:"error", error, agent?}` is surfaced as a system record so the
/// stream keeps flowing instead of raising.
fn normalize_error_frame(map: &serde_json::Map<String, Value>, ctx: &IngestContext) -> ChatMessage {
    let error = first_text(map, &["error"]).unwrap_or_else(|| "unknown error".to_string());
    let from = first_text(map, &["agent"]).unwrap_or_else(|| ctx.fallback_from.clone());
    tracing::debug!(from = %from, "error frame from relay: {error}");
    ChatMessage::new(synth_id(), from, BROADCAST_ADDR, error, Utc::now())
}

/// A fully formed chat message object with sender, recipient, and content.
fn normalize_message_object(map: &serde_json::Map<String, Value>) -> ChatMessage {
    let id = first_text(map, &["id", "event_id", "messageId"]).unwrap_or_else(synth_id);
    let from = first_text(map, &["from"]).unwrap_or_default();
    let to = first_text(map, &["to", "target"]).unwrap_or_else(|| BROADCAST_ADDR.to_string());
    let content = first_text(map, &["content", "body", "text"]).unwrap_or_default();
    let timestamp = map
        .get("timestamp")
        .or_else(|| map.get("ts"))
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);
    let mut msg = ChatMessage::new(id, from, to, content, timestamp);
    msg.thread = first_text(map, &["thread", "thread_id", "threadId"]);
    msg.broadcast = map.get("broadcast").and_then(Value::as_bool).unwrap_or(false)
        || msg.to == BROADCAST_ADDR;
    msg.read = map.get("read").and_then(Value::as_bool).unwrap_or(false);
    msg
}

fn first_text(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Timestamps arrive as epoch milliseconds or RFC 3339 strings.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Bounded message history with oldest-first eviction and a seen-id guard
/// against relay redelivery (e.g. replays after a reconnect).
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<ChatMessage>,
    capacity: usize,
    seen_ids: HashSet<String>,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            seen_ids: HashSet::new(),
        }
    }

    /// Append a record. Returns false when the id was already delivered.
    pub fn push(&mut self, msg: ChatMessage) -> bool {
        if self.seen_ids.contains(&msg.id) {
            tracing::debug!(id = %msg.id, "skipping redelivered message");
            return false;
        }
        if self.seen_ids.len() >= SEEN_IDS_MAX {
            self.seen_ids.clear();
        }
        self.seen_ids.insert(msg.id.clone());

        self.entries.push_back(msg);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        true
    }

    /// Append a batch; returns how many records were new.
    pub fn extend(&mut self, msgs: impl IntoIterator<Item = ChatMessage>) -> usize {
        let mut added = 0;
        for msg in msgs {
            if self.push(msg) {
                added += 1;
            }
        }
        added
    }

    pub fn messages(&mut self) -> &[ChatMessage] {
        self.entries.make_contiguous();
        self.entries.as_slices().0
    }

    /// The `n` most recent records.
    pub fn recent(&mut self, n: usize) -> &[ChatMessage] {
        let all = self.messages();
        &all[all.len().saturating_sub(n)..]
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.read = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> IngestContext {
        IngestContext::new("relay")
    }

    #[test]
    fn test_bare_string_becomes_verbatim_record() {
        let records = normalize(&json!("hello there"), &ctx());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "hello there");
        assert_eq!(records[0].from, "relay");
        assert_eq!(records[0].to, BROADCAST_ADDR);
    }

    #[test]
    fn test_log_frame_with_content_field() {
        let records = normalize(
            &json!({"type": "log", "stream": "stdout", "content": "built ok", "agentName": "Builder"}),
            &ctx(),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].from, "Builder");
        assert_eq!(records[0].content, "built ok");
    }

    #[test]
    fn test_output_frame_falls_back_through_data_and_message() {
        let records = normalize(&json!({"type": "output", "data": "chunk"}), &ctx());
        assert_eq!(records[0].content, "chunk");
        let records = normalize(&json!({"type": "output", "message": "note"}), &ctx());
        assert_eq!(records[0].content, "note");
    }

    #[test]
    fn test_history_batch_flattens_lines() {
        let records = normalize(
            &json!({"type": "history", "lines": ["one", {"type": "log", "content": "two"}]}),
            &ctx(),
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "one");
        assert_eq!(records[1].content, "two");
    }

    #[test]
    fn test_bare_lines_batch_without_type() {
        let records = normalize(&json!({"lines": ["a", "b", "c"]}), &ctx());
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_error_frame_becomes_system_record() {
        let records = normalize(&json!({"type": "error", "error": "agent crashed", "agent": "Coder"}), &ctx());
        assert_eq!(records[0].from, "Coder");
        assert_eq!(records[0].content, "agent crashed");
    }

    #[test]
    fn test_full_message_object_keeps_fields() {
        let records = normalize(
            &json!({
                "id": "evt-1",
                "from": "alice",
                "to": "bob",
                "content": "hi",
                "thread": "evt-0",
                "timestamp": 1_700_000_000_000_i64,
            }),
            &ctx(),
        );
        let m = &records[0];
        assert_eq!(m.id, "evt-1");
        assert_eq!(m.from, "alice");
        assert_eq!(m.to, "bob");
        assert_eq!(m.thread.as_deref(), Some("evt-0"));
        assert_eq!(m.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert!(!m.is_broadcast());
    }

    #[test]
    fn test_wildcard_recipient_marks_broadcast() {
        let records = normalize(&json!({"from": "alice", "to": "*", "content": "all"}), &ctx());
        assert!(records[0].is_broadcast());
    }

    #[test]
    fn test_rfc3339_timestamp_parses() {
        let records = normalize(
            &json!({"from": "a", "to": "b", "content": "x", "timestamp": "2026-01-02T03:04:05Z"}),
            &ctx(),
        );
        assert_eq!(records[0].timestamp.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_unrecognized_shape_is_verbatim_not_panic() {
        let records = normalize(&json!({"weird": {"nested": [1, 2, 3]}}), &ctx());
        assert_eq!(records.len(), 1);
        assert!(records[0].content.contains("nested"));
        let records = normalize(&json!(42), &ctx());
        assert_eq!(records[0].content, "42");
        let records = normalize(&json!(null), &ctx());
        assert_eq!(records[0].content, "null");
    }

    #[test]
    fn test_log_capacity_evicts_oldest_first() {
        let mut log = MessageLog::new(3);
        for i in 0..5 {
            log.push(ChatMessage::new(
                format!("m{i}"),
                "a",
                "b",
                format!("msg {i}"),
                Utc::now(),
            ));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.messages()[0].content, "msg 2");
        assert_eq!(log.messages()[2].content, "msg 4");
    }

    #[test]
    fn test_log_rejects_redelivered_ids() {
        let mut log = MessageLog::new(10);
        let m = ChatMessage::new("dup", "a", "b", "hi", Utc::now());
        assert!(log.push(m.clone()));
        assert!(!log.push(m));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_recent_window() {
        let mut log = MessageLog::new(10);
        for i in 0..6 {
            log.push(ChatMessage::new(format!("m{i}"), "a", "b", "x", Utc::now()));
        }
        assert_eq!(log.recent(2).len(), 2);
        assert_eq!(log.recent(2)[0].id, "m4");
        assert_eq!(log.recent(100).len(), 6);
    }

    #[test]
    fn test_mark_read() {
        let mut log = MessageLog::new(10);
        log.push(ChatMessage::new("m1", "a", "b", "x", Utc::now()));
        assert!(log.mark_read("m1"));
        assert!(log.messages()[0].read);
        assert!(!log.mark_read("missing"));
    }
}

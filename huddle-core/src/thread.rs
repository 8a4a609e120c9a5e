// ABOUTME: Splits reply-chain messages from the main view and aggregates threads.
// ABOUTME: A thread value is overloaded: parent message id (hide reply) or topic label (keep).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::message::ChatMessage;

/// Thread display names are truncated to this many characters.
const LABEL_MAX_CHARS: usize = 30;

/// A fully derived view of one thread. Never stored; recomputed from the
/// message list on every ingest batch.
#[derive(Debug, Clone)]
pub struct ThreadView {
    pub id: String,
    pub display_name: String,
    pub participants: Vec<String>,
    pub message_count: usize,
    pub unread_count: usize,
    pub last_message: Option<ChatMessage>,
}

/// Tracks when each thread was last opened. Unread counting only considers
/// messages newer than the opened-at instant.
#[derive(Debug, Default)]
pub struct ThreadState {
    opened_at: HashMap<String, DateTime<Utc>>,
}

impl ThreadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record "now" as the moment the thread was selected.
    pub fn mark_opened(&mut self, thread_id: &str) {
        self.opened_at.insert(thread_id.to_string(), Utc::now());
    }

    pub fn opened_at(&self, thread_id: &str) -> Option<DateTime<Utc>> {
        self.opened_at.get(thread_id).copied()
    }
}

/// Keep a message in the main view unless its thread value resolves to some
/// *other* existing message's id; that makes it a reply, which lives only in
/// its thread. A thread value that matches no message id is a topic label and
/// the message stays visible.
pub fn main_view<'a>(messages: &'a [ChatMessage]) -> Vec<&'a ChatMessage> {
    let ids: HashSet<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    messages
        .iter()
        .filter(|m| match &m.thread {
            Some(parent) => parent == &m.id || !ids.contains(parent.as_str()),
            None => true,
        })
        .collect()
}

/// Group messages by thread value and derive per-thread aggregates.
/// Result is sorted by most-recent message, descending.
pub fn resolve_threads(
    messages: &[ChatMessage],
    viewer: &str,
    state: &ThreadState,
) -> Vec<ThreadView> {
    let by_id: HashMap<&str, &ChatMessage> =
        messages.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut grouped: HashMap<&str, Vec<&ChatMessage>> = HashMap::new();
    for msg in messages {
        if let Some(thread) = m_thread(msg) {
            grouped.entry(thread).or_default().push(msg);
        }
    }

    let mut views: Vec<ThreadView> = grouped
        .into_iter()
        .map(|(thread_id, members)| {
            let opened = state.opened_at(thread_id);
            let unread = members
                .iter()
                .filter(|m| m.from != viewer && !m.read)
                .filter(|m| opened.map_or(true, |t| m.timestamp > t))
                .count();

            let mut participants: Vec<String> = Vec::new();
            for m in &members {
                if !participants.iter().any(|p| p == &m.from) {
                    participants.push(m.from.clone());
                }
            }

            let last_message = members
                .iter()
                .max_by_key(|m| m.timestamp)
                .map(|m| (*m).clone());

            ThreadView {
                id: thread_id.to_string(),
                display_name: display_name(thread_id, &by_id),
                participants,
                message_count: members.len(),
                unread_count: unread,
                last_message,
            }
        })
        .collect();

    views.sort_by(|a, b| {
        let at = a.last_message.as_ref().map(|m| m.timestamp);
        let bt = b.last_message.as_ref().map(|m| m.timestamp);
        bt.cmp(&at)
    });
    views
}

fn m_thread(msg: &ChatMessage) -> Option<&str> {
    msg.thread.as_deref().filter(|t| !t.is_empty())
}

/// The topic label itself, or, when the id resolves to a message, that
/// message's first content line truncated with an ellipsis.
fn display_name(thread_id: &str, by_id: &HashMap<&str, &ChatMessage>) -> String {
    match by_id.get(thread_id) {
        Some(parent) => truncate_label(parent.first_content_line()),
        None => thread_id.to_string(),
    }
}

fn truncate_label(line: &str) -> String {
    if line.chars().count() <= LABEL_MAX_CHARS {
        line.to_string()
    } else {
        let head: String = line.chars().take(LABEL_MAX_CHARS).collect();
        format!("{head}…")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn msg(id: &str, from: &str, content: &str, thread: Option<&str>, ms: i64) -> ChatMessage {
        let mut m = ChatMessage::new(id, from, "general", content, at(ms));
        m.thread = thread.map(str::to_string);
        m
    }

    #[test]
    fn test_reply_hidden_from_main_view() {
        let messages = vec![
            msg("m1", "alice", "root", None, 1000),
            msg("m2", "bob", "reply", Some("m1"), 2000),
        ];
        let main = main_view(&messages);
        assert_eq!(main.len(), 1);
        assert_eq!(main[0].id, "m1");
    }

    #[test]
    fn test_topic_label_stays_in_main_view() {
        let messages = vec![
            msg("m1", "alice", "root", None, 1000),
            msg("m2", "bob", "tagged", Some("deploys"), 2000),
        ];
        assert_eq!(main_view(&messages).len(), 2);
    }

    #[test]
    fn test_self_referencing_thread_stays_visible() {
        let messages = vec![msg("m1", "alice", "odd", Some("m1"), 1000)];
        assert_eq!(main_view(&messages).len(), 1);
    }

    #[test]
    fn test_display_name_from_parent_content_truncated() {
        let long = "this is a very long first line that keeps going";
        let messages = vec![
            msg("m1", "alice", long, None, 1000),
            msg("m2", "bob", "reply", Some("m1"), 2000),
        ];
        let views = resolve_threads(&messages, "viewer", &ThreadState::new());
        assert_eq!(views.len(), 1);
        assert!(views[0].display_name.ends_with('…'));
        assert_eq!(views[0].display_name.chars().count(), 31);
    }

    #[test]
    fn test_display_name_is_label_when_unresolved() {
        let messages = vec![msg("m1", "alice", "x", Some("deploys"), 1000)];
        let views = resolve_threads(&messages, "viewer", &ThreadState::new());
        assert_eq!(views[0].display_name, "deploys");
    }

    #[test]
    fn test_unread_counts_exclude_own_and_read_messages() {
        let mut read = msg("m3", "bob", "seen", Some("t"), 3000);
        read.read = true;
        let messages = vec![
            msg("m1", "viewer", "mine", Some("t"), 1000),
            msg("m2", "bob", "unseen", Some("t"), 2000),
            read,
        ];
        let views = resolve_threads(&messages, "viewer", &ThreadState::new());
        assert_eq!(views[0].message_count, 3);
        assert_eq!(views[0].unread_count, 1);
    }

    #[test]
    fn test_opening_thread_clears_older_unread() {
        let mut state = ThreadState::new();
        let messages = vec![msg("m1", "bob", "before", Some("t"), 1000)];
        assert_eq!(resolve_threads(&messages, "viewer", &state)[0].unread_count, 1);

        state.mark_opened("t");
        assert_eq!(resolve_threads(&messages, "viewer", &state)[0].unread_count, 0);
    }

    #[test]
    fn test_messages_after_open_count_as_unread() {
        let mut state = ThreadState::new();
        state.mark_opened("t");
        let future = Utc::now() + chrono::Duration::seconds(60);
        let mut late = msg("m1", "bob", "after", Some("t"), 0);
        late.timestamp = future;
        let views = resolve_threads(&[late], "viewer", &state);
        assert_eq!(views[0].unread_count, 1);
    }

    #[test]
    fn test_threads_sorted_most_recent_first() {
        let messages = vec![
            msg("m1", "a", "x", Some("old"), 1000),
            msg("m2", "a", "y", Some("new"), 9000),
            msg("m3", "a", "z", Some("old"), 2000),
        ];
        let views = resolve_threads(&messages, "viewer", &ThreadState::new());
        assert_eq!(views[0].id, "new");
        assert_eq!(views[1].id, "old");
        assert_eq!(views[1].message_count, 2);
    }

    #[test]
    fn test_participants_in_order_of_appearance() {
        let messages = vec![
            msg("m1", "alice", "x", Some("t"), 1000),
            msg("m2", "bob", "y", Some("t"), 2000),
            msg("m3", "alice", "z", Some("t"), 3000),
        ];
        let views = resolve_threads(&messages, "viewer", &ThreadState::new());
        assert_eq!(views[0].participants, vec!["alice", "bob"]);
    }

    #[test]
    fn test_out_of_order_timestamps_do_not_break_aggregation() {
        let messages = vec![
            msg("m1", "a", "late", Some("t"), 9000),
            msg("m2", "b", "early", Some("t"), 1000),
        ];
        let views = resolve_threads(&messages, "viewer", &ThreadState::new());
        assert_eq!(views[0].last_message.as_ref().unwrap().id, "m1");
    }
}

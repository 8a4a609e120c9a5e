// ABOUTME: Online roster and ephemeral typing indicators for the workspace.
// ABOUTME: Typing entries expire after a TTL sweep to survive dropped stop-signals.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typing indicators older than this are evicted by the sweep, whether or not
/// an explicit stop-signal ever arrived.
pub const TYPING_TTL: Duration = Duration::from_secs(3);
/// How often the owner should call [`PresenceRoster::sweep`].
pub const TYPING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// One online user, as announced by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub username: String,
    #[serde(default, rename = "avatarUrl", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, rename = "connectedAt", skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// A live "user is typing" marker. Refreshed on every `isTyping=true`.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    pub username: String,
    pub avatar_url: Option<String>,
    pub started_at: Instant,
}

/// Roster plus typing state. All mutation happens in single-threaded event
/// callbacks; reads return snapshots.
#[derive(Debug)]
pub struct PresenceRoster {
    local_user: String,
    entries: BTreeMap<String, PresenceEntry>,
    typing: HashMap<String, TypingIndicator>,
}

impl PresenceRoster {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            entries: BTreeMap::new(),
            typing: HashMap::new(),
        }
    }

    /// `presence_list`: the relay's roster replaces ours wholesale.
    pub fn replace_all(&mut self, users: Vec<PresenceEntry>) {
        self.entries = users
            .into_iter()
            .map(|u| (u.username.clone(), u))
            .collect();
    }

    /// `presence_join`: upsert by username, replacing any stale entry.
    pub fn join(&mut self, user: PresenceEntry) {
        self.entries.insert(user.username.clone(), user);
    }

    /// `presence_leave`: drop the entry and any typing indicator it owned.
    pub fn leave(&mut self, username: &str) {
        self.entries.remove(username);
        self.typing.remove(username);
    }

    /// Apply a typing signal. Signals from the local viewer's own identity
    /// are ignored; the viewer already knows they are typing.
    pub fn set_typing(
        &mut self,
        username: &str,
        avatar_url: Option<String>,
        is_typing: bool,
        now: Instant,
    ) {
        if username == self.local_user {
            return;
        }
        if is_typing {
            self.typing.insert(
                username.to_string(),
                TypingIndicator {
                    username: username.to_string(),
                    avatar_url,
                    started_at: now,
                },
            );
        } else {
            self.typing.remove(username);
        }
    }

    /// Evict typing indicators older than [`TYPING_TTL`]. Guards against a
    /// dropped stop-signal. Returns how many were evicted.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.typing.len();
        self.typing
            .retain(|_, t| now.duration_since(t.started_at) < TYPING_TTL);
        before - self.typing.len()
    }

    pub fn online(&self) -> Vec<&PresenceEntry> {
        self.entries.values().collect()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    pub fn typing(&self) -> Vec<&TypingIndicator> {
        let mut list: Vec<&TypingIndicator> = self.typing.values().collect();
        list.sort_by(|a, b| a.username.cmp(&b.username));
        list
    }
}

// =============================================================================
// Tests
// =============================================================================

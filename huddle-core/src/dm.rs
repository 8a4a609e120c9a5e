// ABOUTME: Derives the visible participant set of a multi-party direct conversation.
// ABOUTME: One-hop closure from anchor/viewer/invited members over observed message flow.

use std::collections::{BTreeSet, HashSet};

use crate::message::ChatMessage;

/// Viewer identity used before a real one is assigned.
pub const LOCAL_VIEWER_FALLBACK: &str = "You";

/// A direct-conversation session: an anchor human identity plus explicit
/// invite/remove bookkeeping. The participant set is never stored: it is
/// derived fresh from message history on every call, so removal always wins
/// even when the agent remains re-derivable from history.
#[derive(Debug, Clone)]
pub struct DmSession {
    anchor: Option<String>,
    viewer: String,
    invited: BTreeSet<String>,
    removed: BTreeSet<String>,
}

impl DmSession {
    pub fn new(viewer: Option<&str>) -> Self {
        Self {
            anchor: None,
            viewer: viewer.unwrap_or(LOCAL_VIEWER_FALLBACK).to_string(),
            invited: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Select the human identity this conversation is anchored on.
    /// With no anchor the visibility filter is bypassed entirely (the
    /// default shared channel).
    pub fn set_anchor(&mut self, anchor: Option<&str>) {
        self.anchor = anchor.map(str::to_string);
    }

    pub fn anchor(&self) -> Option<&str> {
        self.anchor.as_deref()
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    pub fn invite(&mut self, agent: &str) {
        self.invited.insert(agent.to_string());
    }

    /// Removal takes precedence over both invitation and derivation.
    pub fn remove(&mut self, agent: &str) {
        self.removed.insert(agent.to_string());
    }

    /// Final participant set: (invited ∪ derived) − removed.
    ///
    /// Derivation is a single pass, one hop from the fixed core set
    /// {anchor, viewer} ∪ invited: a message between a core member and a
    /// known agent pulls that agent in. Derived members do not extend the
    /// core mid-scan, so chains deeper than one hop stay out. Identity
    /// matching is case-sensitive throughout.
    pub fn participants(
        &self,
        messages: &[ChatMessage],
        known_agents: &HashSet<String>,
    ) -> BTreeSet<String> {
        let mut result = self.invited.clone();

        if let Some(anchor) = &self.anchor {
            let mut core: HashSet<&str> = HashSet::new();
            core.insert(anchor.as_str());
            core.insert(self.viewer.as_str());
            core.extend(self.invited.iter().map(String::as_str));

            for msg in messages.iter().filter(|m| m.has_endpoints()) {
                if core.contains(msg.from.as_str()) && known_agents.contains(&msg.to) {
                    result.insert(msg.to.clone());
                }
                if core.contains(msg.to.as_str()) && known_agents.contains(&msg.from) {
                    result.insert(msg.from.clone());
                }
            }
        }

        for gone in &self.removed {
            result.remove(gone);
        }
        result
    }

    /// A message is visible iff both endpoints belong to
    /// {anchor, viewer} ∪ participants. No anchor → no filtering.
    pub fn filter<'a>(
        &self,
        messages: &'a [ChatMessage],
        known_agents: &HashSet<String>,
    ) -> Vec<&'a ChatMessage> {
        let Some(anchor) = &self.anchor else {
            return messages.iter().collect();
        };

        let participants = self.participants(messages, known_agents);
        let mut allowed: HashSet<&str> = HashSet::new();
        allowed.insert(anchor.as_str());
        allowed.insert(self.viewer.as_str());
        allowed.extend(participants.iter().map(String::as_str));

        messages
            .iter()
            .filter(|m| m.has_endpoints())
            .filter(|m| allowed.contains(m.from.as_str()) && allowed.contains(m.to.as_str()))
            .collect()
    }
}

impl Default for DmSession {
    fn default() -> Self {
        Self::new(None)
    }
}

// =============================================================================
// Tests
// =============================================================================

// ABOUTME: Wire frames exchanged with the relay over the WebSocket link.
// ABOUTME: Tagged-enum serde types outbound; tolerant classification inbound.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use huddle_core::presence::PresenceEntry;

/// What a send request means to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Message,
    ChannelJoin,
    ChannelLeave,
}

/// Frames this client writes to the relay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "message")]
    Message {
        to: String,
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thread: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[serde(rename = "channel_join")]
    ChannelJoin {
        to: String,
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thread: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[serde(rename = "channel_leave")]
    ChannelLeave {
        to: String,
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thread: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[serde(rename = "presence")]
    Presence {
        action: PresenceAction,
        user: String,
    },
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "isTyping")]
        is_typing: bool,
        username: String,
        #[serde(rename = "avatarUrl", skip_serializing_if = "Option::is_none")]
        avatar_url: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Join,
    Leave,
}

impl ClientFrame {
    pub fn send(
        kind: SendKind,
        to: impl Into<String>,
        body: impl Into<String>,
        thread: Option<String>,
        data: Option<Value>,
    ) -> Self {
        let (to, body) = (to.into(), body.into());
        match kind {
            SendKind::Message => ClientFrame::Message { to, body, thread, data },
            SendKind::ChannelJoin => ClientFrame::ChannelJoin { to, body, thread, data },
            SendKind::ChannelLeave => ClientFrame::ChannelLeave { to, body, thread, data },
        }
    }
}

/// Control frames the relay pushes that are not chat deliveries.
/// Anything that fails to classify falls through to the ingest normalizer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "presence_list")]
    PresenceList {
        #[serde(default)]
        users: Vec<PresenceEntry>,
    },
    #[serde(rename = "presence_join")]
    PresenceJoin {
        #[serde(flatten)]
        user: PresenceEntry,
    },
    #[serde(rename = "presence_leave")]
    PresenceLeave { username: String },
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "isTyping")]
        is_typing: bool,
        username: String,
        #[serde(rename = "avatarUrl", default)]
        avatar_url: Option<String>,
    },
    #[serde(rename = "subscribed")]
    Subscribed { agent: String },
}

/// Try to read a payload as a control frame. Chat deliveries and unknown
/// shapes return None and go through ingest instead.
pub fn classify(value: &Value) -> Option<ServerFrame> {
    serde_json::from_value(value.clone()).ok()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_frame_serializes_with_type_tag() {
        let frame = ClientFrame::send(SendKind::Message, "bob", "hi", None, None);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"message\""));
        assert!(json.contains("\"to\":\"bob\""));
        assert!(!json.contains("thread"));
    }

    #[test]
    fn test_channel_join_and_leave_tags() {
        let join = ClientFrame::send(SendKind::ChannelJoin, "general", "", None, None);
        assert!(serde_json::to_string(&join).unwrap().contains("\"type\":\"channel_join\""));
        let leave = ClientFrame::send(SendKind::ChannelLeave, "general", "", None, None);
        assert!(serde_json::to_string(&leave).unwrap().contains("\"type\":\"channel_leave\""));
    }

    #[test]
    fn test_thread_and_data_serialized_when_present() {
        let frame = ClientFrame::send(
            SendKind::Message,
            "bob",
            "hi",
            Some("evt-1".to_string()),
            Some(json!({"priority": 2})),
        );
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"thread\":\"evt-1\""));
        assert!(json.contains("\"priority\":2"));
    }

    #[test]
    fn test_presence_frame_wire_shape() {
        let frame = ClientFrame::Presence {
            action: PresenceAction::Join,
            user: "ops".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"presence\""));
        assert!(json.contains("\"action\":\"join\""));
    }

    #[test]
    fn test_typing_frame_uses_camel_case_keys() {
        let frame = ClientFrame::Typing {
            is_typing: true,
            username: "ops".to_string(),
            avatar_url: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"isTyping\":true"));
        assert!(!json.contains("avatarUrl"));
    }

    #[test]
    fn test_classify_presence_list() {
        let value = json!({"type": "presence_list", "users": [{"username": "alice"}]});
        match classify(&value) {
            Some(ServerFrame::PresenceList { users }) => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].username, "alice");
            }
            other => panic!("expected PresenceList, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_presence_join_flattens_entry() {
        let value = json!({"type": "presence_join", "username": "bob", "avatarUrl": "https://cdn/b.png"});
        match classify(&value) {
            Some(ServerFrame::PresenceJoin { user }) => {
                assert_eq!(user.username, "bob");
                assert_eq!(user.avatar_url.as_deref(), Some("https://cdn/b.png"));
            }
            other => panic!("expected PresenceJoin, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_typing() {
        let value = json!({"type": "typing", "isTyping": false, "username": "bob"});
        match classify(&value) {
            Some(ServerFrame::Typing { is_typing, username, .. }) => {
                assert!(!is_typing);
                assert_eq!(username, "bob");
            }
            other => panic!("expected Typing, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_delivery_does_not_classify() {
        assert!(classify(&json!({"type": "log", "content": "x"})).is_none());
        assert!(classify(&json!({"from": "a", "to": "b", "content": "hi"})).is_none());
        assert!(classify(&json!("bare text")).is_none());
    }
}

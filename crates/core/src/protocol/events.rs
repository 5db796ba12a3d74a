use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DeliveryStatus, PrincipalKind};

/// A chat message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: Uuid,
    pub user_id: i64,
    pub partner_id: i64,
    pub sender_role: PrincipalKind,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delivered_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub read_at: Option<DateTime<Utc>>,
}

/// One inbox row: the most recent message with a counterpart plus the
/// unread count and whatever display metadata the directory returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireInboxItem {
    pub counterpart_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub counterpart_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub counterpart_company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub counterpart_avatar: Option<String>,
    pub last_message: WireMessage,
    pub unread_count: i64,
}

/// The closed set of server-to-client events, both direct replies and
/// group broadcasts. One tagged union instead of stringly-typed event
/// names; every connection consumes these through a single dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        principal_type: PrincipalKind,
        principal_id: i64,
        display_name: String,
    },
    NewMessage {
        message: WireMessage,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    Typing {
        principal_type: PrincipalKind,
        principal_id: i64,
        is_typing: bool,
    },
    MessageStatus {
        user_id: i64,
        partner_id: i64,
        message_ids: Vec<Uuid>,
        status: DeliveryStatus,
    },
    Inbox {
        items: Vec<WireInboxItem>,
    },
    InboxUpdated {
        items: Vec<WireInboxItem>,
    },
    MessageHistory {
        messages: Vec<WireMessage>,
        page: i64,
        total_pages: i64,
    },
    ConversationRead {
        user_id: i64,
        partner_id: i64,
        message_ids: Vec<Uuid>,
    },
    PresenceStatus {
        principal_type: PrincipalKind,
        principal_id: i64,
        online: bool,
    },
    PresenceOnline {
        principal_type: PrincipalKind,
        principal_id: i64,
    },
    PresenceOffline {
        principal_type: PrincipalKind,
        principal_id: i64,
        last_seen: DateTime<Utc>,
    },
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serializes a success envelope: the tagged event fields plus a
/// server timestamp.
#[must_use]
pub fn success_frame(event: &ServerEvent) -> String {
    let mut value = match serde_json::to_value(event) {
        Ok(value) => value,
        Err(_) => return error_frame(super::ERR_CODE_INTERNAL, "failed to serialize event"),
    };
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "timestamp".to_owned(),
            serde_json::Value::String(now_rfc3339()),
        );
    }
    value.to_string()
}

/// Serializes an error envelope. The connection stays open; the client
/// may retry or send a different action.
#[must_use]
pub fn error_frame(code: u16, message: &str) -> String {
    serde_json::json!({
        "status": "error",
        "code": code,
        "message": message,
        "timestamp": now_rfc3339(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ERR_CODE_RATE_LIMITED;

    #[test]
    fn success_frame_carries_action_tag_and_timestamp() {
        let frame = success_frame(&ServerEvent::PresenceOnline {
            principal_type: PrincipalKind::User,
            principal_id: 12,
        });
        let value: serde_json::Value = serde_json::from_str(&frame).expect("valid json");
        assert_eq!(value["action"], "presence_online");
        assert_eq!(value["principal_id"], 12);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn error_frame_shape() {
        let frame = error_frame(ERR_CODE_RATE_LIMITED, "rate limit exceeded");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("valid json");
        assert_eq!(value["status"], "error");
        assert_eq!(value["code"], 429);
        assert_eq!(value["message"], "rate limit exceeded");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn optional_status_timestamps_are_omitted() {
        let message = WireMessage {
            id: Uuid::new_v4(),
            user_id: 1,
            partner_id: 2,
            sender_role: PrincipalKind::User,
            body: "hi".to_owned(),
            created_at: Utc::now(),
            is_delivered: false,
            delivered_at: None,
            is_read: false,
            read_at: None,
        };
        let frame = success_frame(&ServerEvent::NewMessage {
            message,
            correlation_id: None,
        });
        let value: serde_json::Value = serde_json::from_str(&frame).expect("valid json");
        assert!(value["message"].get("delivered_at").is_none());
        assert!(value.get("correlation_id").is_none());
    }
}

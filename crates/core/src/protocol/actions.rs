use serde::Deserialize;
use uuid::Uuid;

use super::PrincipalKind;
use crate::validation::DEFAULT_PAGE_SIZE;

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// The closed set of client actions. Adding an action is a
/// compile-time-checked change: the dispatcher matches exhaustively.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Authenticate {
        token: String,
        principal_type: PrincipalKind,
    },
    SendMessage {
        counterpart_id: i64,
        body: String,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    GetInbox {},
    GetMessages {
        counterpart_id: i64,
        #[serde(default = "default_page")]
        page: i64,
        #[serde(default = "default_page_size")]
        page_size: i64,
    },
    Typing {
        counterpart_id: i64,
        #[serde(default)]
        is_typing: bool,
    },
    MarkRead {
        counterpart_id: i64,
    },
    MessageDelivered {
        message_ids: Vec<Uuid>,
    },
    MessageRead {
        message_ids: Vec<Uuid>,
    },
    MessageSeen {
        counterpart_id: i64,
    },
    JoinPresenceGroup {
        principal_type: PrincipalKind,
        principal_id: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_parses_with_tag() {
        let action: ClientAction = serde_json::from_str(
            r#"{"action": "authenticate", "token": "tok-1", "principal_type": "partner"}"#,
        )
        .expect("parse authenticate");
        assert_eq!(
            action,
            ClientAction::Authenticate {
                token: "tok-1".to_owned(),
                principal_type: PrincipalKind::Partner,
            }
        );
    }

    #[test]
    fn get_messages_defaults_page_and_size() {
        let action: ClientAction =
            serde_json::from_str(r#"{"action": "get_messages", "counterpart_id": 4}"#)
                .expect("parse get_messages");
        assert_eq!(
            action,
            ClientAction::GetMessages {
                counterpart_id: 4,
                page: 1,
                page_size: 50,
            }
        );
    }

    #[test]
    fn send_message_correlation_id_is_optional() {
        let action: ClientAction = serde_json::from_str(
            r#"{"action": "send_message", "counterpart_id": 2, "body": "hello"}"#,
        )
        .expect("parse send_message");
        let ClientAction::SendMessage { correlation_id, .. } = action else {
            panic!("expected send_message");
        };
        assert_eq!(correlation_id, None);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result = serde_json::from_str::<ClientAction>(r#"{"action": "frobnicate"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_action_is_rejected() {
        let result = serde_json::from_str::<ClientAction>(r#"{"counterpart_id": 1}"#);
        assert!(result.is_err());
    }
}

use serde::{Deserialize, Serialize};

// Application error codes carried in error envelopes.
pub const ERR_CODE_PROTOCOL: u16 = 400;
pub const ERR_CODE_AUTH: u16 = 401;
pub const ERR_CODE_FORBIDDEN: u16 = 403;
pub const ERR_CODE_NOT_FOUND: u16 = 404;
pub const ERR_CODE_CONFLICT: u16 = 409;
pub const ERR_CODE_RATE_LIMITED: u16 = 429;
pub const ERR_CODE_INTERNAL: u16 = 500;

// WebSocket close codes. Handler errors never close the connection;
// these cover connection-establishment failures only.
pub const CLOSE_TOO_MANY_CONNECTIONS: u16 = 4003;
pub const CLOSE_CONNECTION_EXPIRED: u16 = 4001;

/// Which side of a conversation a principal (or a message sender) is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Partner,
}

impl PrincipalKind {
    #[must_use]
    pub fn counterpart(self) -> Self {
        match self {
            Self::User => Self::Partner,
            Self::Partner => Self::User,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Partner => "partner",
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity, resolved once per connection from a
/// session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub kind: PrincipalKind,
    pub id: i64,
    pub display_name: String,
}

impl Principal {
    /// The `(user_id, partner_id)` conversation key for this principal
    /// and the given counterpart.
    #[must_use]
    pub fn conversation_with(&self, counterpart_id: i64) -> (i64, i64) {
        match self.kind {
            PrincipalKind::User => (self.id, counterpart_id),
            PrincipalKind::Partner => (counterpart_id, self.id),
        }
    }
}

/// Delivery lattice position reported in `message_status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Read,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterpart_flips_kind() {
        assert_eq!(PrincipalKind::User.counterpart(), PrincipalKind::Partner);
        assert_eq!(PrincipalKind::Partner.counterpart(), PrincipalKind::User);
    }

    #[test]
    fn conversation_key_is_user_then_partner() {
        let user = Principal {
            kind: PrincipalKind::User,
            id: 7,
            display_name: "u".to_owned(),
        };
        let partner = Principal {
            kind: PrincipalKind::Partner,
            id: 3,
            display_name: "p".to_owned(),
        };
        assert_eq!(user.conversation_with(3), (7, 3));
        assert_eq!(partner.conversation_with(7), (7, 3));
    }
}

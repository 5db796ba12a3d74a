//! Broadcast group naming. Handlers never address another connection
//! directly, only one of these group names.

use crate::protocol::PrincipalKind;

/// Conversation group: every connection that has the thread open.
#[must_use]
pub fn conversation(user_id: i64, partner_id: i64) -> String {
    format!("chat.{user_id}.{partner_id}")
}

/// Personal inbox group: all of one principal's devices.
#[must_use]
pub fn inbox(kind: PrincipalKind, id: i64) -> String {
    format!("inbox.{kind}.{id}")
}

/// Presence group: the principal's own devices plus anyone watching
/// their online state.
#[must_use]
pub fn presence(kind: PrincipalKind, id: i64) -> String {
    format!("presence.{kind}.{id}")
}

/// Identity key used by the broker connection cap and the rate limiter.
#[must_use]
pub fn identity_key(kind: PrincipalKind, id: i64) -> String {
    format!("{kind}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names_are_distinct_per_identity() {
        assert_eq!(conversation(1, 2), "chat.1.2");
        assert_ne!(
            inbox(PrincipalKind::User, 5),
            inbox(PrincipalKind::Partner, 5)
        );
        assert_eq!(presence(PrincipalKind::Partner, 9), "presence.partner.9");
        assert_eq!(identity_key(PrincipalKind::User, 5), "user:5");
    }
}

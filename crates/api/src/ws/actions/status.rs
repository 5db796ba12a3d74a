use std::collections::BTreeMap;

use tandem_core::groups;
use tandem_core::protocol::{success_frame, DeliveryStatus, PrincipalKind, ServerEvent};
use tandem_storage::StatusRow;
use uuid::Uuid;

use super::{ActionContext, ActionError};
use crate::ws::realtime::ChatSession;

/// Acknowledges delivery of specific messages. Storage only transitions
/// rows where the acting principal is the recipient, so a client that
/// lists its own outgoing messages simply gets no updates.
pub(super) async fn message_delivered(
    ctx: &ActionContext,
    session: &ChatSession,
    message_ids: &[Uuid],
) -> Result<(), ActionError> {
    if message_ids.is_empty() {
        return Err(ActionError::Protocol("message_ids must not be empty".to_owned()));
    }
    let updated = ctx
        .storage
        .mark_delivered(message_ids, session.principal.kind, session.principal.id)
        .await?;
    broadcast_status(session, updated, DeliveryStatus::Delivered).await;
    Ok(())
}

/// Acknowledges reading of specific messages; storage also promotes
/// them to delivered so the status lattice never runs backwards.
pub(super) async fn message_read(
    ctx: &ActionContext,
    session: &ChatSession,
    message_ids: &[Uuid],
) -> Result<(), ActionError> {
    if message_ids.is_empty() {
        return Err(ActionError::Protocol("message_ids must not be empty".to_owned()));
    }
    let updated = ctx
        .storage
        .mark_read(message_ids, session.principal.kind, session.principal.id)
        .await?;
    let any_updated = !updated.is_empty();
    broadcast_status(session, updated, DeliveryStatus::Read).await;
    if any_updated {
        push_reader_inbox(ctx, session).await?;
    }
    Ok(())
}

/// Bulk-reads one whole conversation. The counterpart learns which
/// messages flipped via `conversation_read` on its presence group; the
/// reader's own devices get their unread counts refreshed.
pub(super) async fn mark_read(
    ctx: &ActionContext,
    session: &ChatSession,
    counterpart_id: i64,
) -> Result<(), ActionError> {
    let (user_id, partner_id) = session.principal.conversation_with(counterpart_id);
    let updated = ctx
        .storage
        .mark_conversation_read(user_id, partner_id, session.principal.kind)
        .await?;
    if updated.is_empty() {
        return Ok(());
    }

    let message_ids: Vec<Uuid> = updated.iter().map(|row| row.id).collect();
    let frame = success_frame(&ServerEvent::ConversationRead {
        user_id,
        partner_id,
        message_ids,
    });
    let counterpart_kind = session.principal.kind.counterpart();
    session
        .broadcast_all(&groups::presence(counterpart_kind, counterpart_id), &frame)
        .await;
    push_reader_inbox(ctx, session).await?;
    Ok(())
}

/// "I have this thread on screen": every undelivered counterpart
/// message becomes delivered in one sweep.
pub(super) async fn message_seen(
    ctx: &ActionContext,
    session: &ChatSession,
    counterpart_id: i64,
) -> Result<(), ActionError> {
    let (user_id, partner_id) = session.principal.conversation_with(counterpart_id);
    let updated = ctx
        .storage
        .mark_conversation_delivered(user_id, partner_id, session.principal.kind)
        .await?;
    broadcast_status(session, updated, DeliveryStatus::Delivered).await;
    Ok(())
}

/// Emits one `message_status` broadcast per conversation to the
/// *sender's* presence group, so the sender's devices see the receipt
/// whether or not they have the thread open. Acknowledged ids may span
/// several conversations; within one conversation every updated row
/// shares a sender (transitions are recipient-scoped).
pub(super) async fn broadcast_status(
    session: &ChatSession,
    updated: Vec<StatusRow>,
    status: DeliveryStatus,
) {
    let mut by_conversation: BTreeMap<(i64, i64), (PrincipalKind, Vec<Uuid>)> = BTreeMap::new();
    for row in updated {
        by_conversation
            .entry((row.user_id, row.partner_id))
            .or_insert_with(|| (row.sender_role, Vec::new()))
            .1
            .push(row.id);
    }

    for ((user_id, partner_id), (sender_role, message_ids)) in by_conversation {
        let sender_id = match sender_role {
            PrincipalKind::User => user_id,
            PrincipalKind::Partner => partner_id,
        };
        let frame = success_frame(&ServerEvent::MessageStatus {
            user_id,
            partner_id,
            message_ids,
            status,
        });
        session
            .broadcast_all(&groups::presence(sender_role, sender_id), &frame)
            .await;
    }
}

pub(super) async fn push_reader_inbox(
    ctx: &ActionContext,
    session: &ChatSession,
) -> Result<(), ActionError> {
    let own = &session.principal;
    let items = super::inbox_items(ctx.storage.as_ref(), own.kind, own.id).await?;
    let frame = success_frame(&ServerEvent::InboxUpdated { items });
    session
        .broadcast_all(&groups::inbox(own.kind, own.id), &frame)
        .await;
    Ok(())
}

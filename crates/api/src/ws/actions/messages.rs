use tandem_core::groups;
use tandem_core::protocol::{success_frame, ServerEvent};
use tandem_core::validation;

use super::{ensure_counterpart_exists, inbox_items, ActionContext, ActionError};
use crate::ws::realtime::{send_text, ChatSession};

/// Persists a message and fans it out. The sender gets a direct reply
/// echoing its correlation id; everyone else in the conversation group
/// gets the message without it. Both principals' inbox groups receive
/// refreshed summaries.
pub(super) async fn send_message(
    ctx: &ActionContext,
    session: &ChatSession,
    counterpart_id: i64,
    body: &str,
    correlation_id: Option<String>,
) -> Result<(), ActionError> {
    validation::validate_body(body).map_err(|reason| ActionError::Protocol(reason.to_owned()))?;
    ensure_counterpart_exists(ctx.storage.as_ref(), &session.principal, counterpart_id).await?;

    let (user_id, partner_id) = session.principal.conversation_with(counterpart_id);
    let stored = ctx
        .storage
        .create_message(user_id, partner_id, session.principal.kind, body)
        .await?;

    // Sending implies having the thread open.
    let conversation_group = groups::conversation(user_id, partner_id);
    session.join_groups(&[conversation_group.clone()]).await;

    let broadcast = success_frame(&ServerEvent::NewMessage {
        message: stored.clone().into(),
        correlation_id: None,
    });
    session
        .broadcast_others(&conversation_group, &broadcast)
        .await;
    send_text(
        &ctx.outbound,
        success_frame(&ServerEvent::NewMessage {
            message: stored.into(),
            correlation_id,
        }),
    )
    .await;

    push_inbox_updates(ctx, session, counterpart_id).await?;
    Ok(())
}

/// Refreshes inbox summaries for both sides of the acting principal's
/// conversation with `counterpart_id`.
pub(super) async fn push_inbox_updates(
    ctx: &ActionContext,
    session: &ChatSession,
    counterpart_id: i64,
) -> Result<(), ActionError> {
    let own = &session.principal;
    let counterpart_kind = own.kind.counterpart();

    let own_items = inbox_items(ctx.storage.as_ref(), own.kind, own.id).await?;
    let frame = success_frame(&ServerEvent::InboxUpdated { items: own_items });
    session
        .broadcast_all(&groups::inbox(own.kind, own.id), &frame)
        .await;

    let counterpart_items =
        inbox_items(ctx.storage.as_ref(), counterpart_kind, counterpart_id).await?;
    let frame = success_frame(&ServerEvent::InboxUpdated {
        items: counterpart_items,
    });
    session
        .broadcast_all(&groups::inbox(counterpart_kind, counterpart_id), &frame)
        .await;
    Ok(())
}

/// Typing is ephemeral: no persistence, no delivery guarantee, just a
/// fanout to whoever has the thread open right now.
pub(super) async fn typing(
    session: &ChatSession,
    counterpart_id: i64,
    is_typing: bool,
) -> Result<(), ActionError> {
    let (user_id, partner_id) = session.principal.conversation_with(counterpart_id);
    let frame = success_frame(&ServerEvent::Typing {
        principal_type: session.principal.kind,
        principal_id: session.principal.id,
        is_typing,
    });
    session
        .broadcast_others(&groups::conversation(user_id, partner_id), &frame)
        .await;
    Ok(())
}

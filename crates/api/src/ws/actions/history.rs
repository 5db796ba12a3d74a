use tandem_core::groups;
use tandem_core::protocol::{success_frame, DeliveryStatus, ServerEvent, WireMessage};
use tandem_core::validation;

use super::{ensure_counterpart_exists, status, ActionContext, ActionError};
use crate::ws::realtime::{send_text, ChatSession};

/// One page of conversation history, newest first (page 1 holds the
/// most recent messages). Requesting history subscribes the connection
/// to the conversation group, and viewing history implies reading:
/// every previously-unread counterpart message in the conversation is
/// marked read before the page is fetched, so the returned slice
/// reflects the new state.
pub(super) async fn get_messages(
    ctx: &ActionContext,
    session: &ChatSession,
    counterpart_id: i64,
    page: i64,
    page_size: i64,
) -> Result<(), ActionError> {
    validation::validate_page(page)
        .map_err(|reason| ActionError::Protocol(reason.to_owned()))?;
    let page_size = validation::clamp_page_size(page_size);
    ensure_counterpart_exists(ctx.storage.as_ref(), &session.principal, counterpart_id).await?;

    let (user_id, partner_id) = session.principal.conversation_with(counterpart_id);
    session
        .join_groups(&[groups::conversation(user_id, partner_id)])
        .await;

    let read = ctx
        .storage
        .mark_conversation_read(user_id, partner_id, session.principal.kind)
        .await?;

    let total = ctx
        .storage
        .conversation_message_count(user_id, partner_id)
        .await?;
    let total_pages = (total + page_size - 1) / page_size;
    let offset = (page - 1) * page_size;
    // Pages past the end are valid requests with an empty result.
    let messages: Vec<WireMessage> = if offset >= total {
        Vec::new()
    } else {
        ctx.storage
            .conversation_page(user_id, partner_id, offset, page_size)
            .await?
            .into_iter()
            .map(Into::into)
            .collect()
    };

    send_text(
        &ctx.outbound,
        success_frame(&ServerEvent::MessageHistory {
            messages,
            page,
            total_pages,
        }),
    )
    .await;

    if !read.is_empty() {
        status::broadcast_status(session, read, DeliveryStatus::Read).await;
        status::push_reader_inbox(ctx, session).await?;
    }
    Ok(())
}

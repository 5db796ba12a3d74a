use tandem_core::protocol::{success_frame, ServerEvent};

use super::{inbox_items, ActionContext, ActionError};
use crate::ws::realtime::{send_text, ChatSession};

pub(super) async fn get_inbox(
    ctx: &ActionContext,
    session: &ChatSession,
) -> Result<(), ActionError> {
    let items = inbox_items(
        ctx.storage.as_ref(),
        session.principal.kind,
        session.principal.id,
    )
    .await?;
    send_text(&ctx.outbound, success_frame(&ServerEvent::Inbox { items })).await;
    Ok(())
}

use tandem_core::groups;
use tandem_core::protocol::{success_frame, PrincipalKind, ServerEvent};

use super::{ActionContext, ActionError};
use crate::ws::realtime::{send_text, ChatSession};

/// Subscribes the connection to another principal's presence group and
/// replies with a current-state snapshot so the watcher does not have
/// to wait for the next edge.
pub(super) async fn join_presence_group(
    ctx: &ActionContext,
    session: &ChatSession,
    principal_type: PrincipalKind,
    principal_id: i64,
) -> Result<(), ActionError> {
    session
        .join_groups(&[groups::presence(principal_type, principal_id)])
        .await;

    let online = ctx.presence.is_online(principal_type, principal_id).await;
    send_text(
        &ctx.outbound,
        success_frame(&ServerEvent::PresenceStatus {
            principal_type,
            principal_id,
            online,
        }),
    )
    .await;
    Ok(())
}

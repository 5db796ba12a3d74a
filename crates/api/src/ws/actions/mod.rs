use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tandem_core::protocol::{ClientAction, Principal, PrincipalKind, WireInboxItem};
use tandem_realtime::broker::GroupBroker;
use tandem_storage::Storage;

use super::error::ActionError;
use super::realtime::{ChatSession, OutboundSender};
use super::PresenceRegistry;

mod authenticate;
mod history;
mod inbox;
mod messages;
mod presence;
mod status;

/// Everything a handler may touch for one connection. Built once per
/// connection and shared across the action loop.
pub(crate) struct ActionContext {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) broker: Arc<GroupBroker>,
    pub(crate) presence: Arc<PresenceRegistry>,
    pub(crate) outbound: OutboundSender,
    pub(crate) connection_id: String,
    pub(crate) closed: Arc<AtomicBool>,
}

/// Routes one parsed action to its handler. Every action other than
/// `authenticate` requires an established session; the match is
/// exhaustive so a new action variant fails to compile until it is
/// routed here.
pub(crate) async fn dispatch(
    ctx: &ActionContext,
    session: &mut Option<ChatSession>,
    action: ClientAction,
) -> Result<(), ActionError> {
    match action {
        ClientAction::Authenticate {
            token,
            principal_type,
        } => authenticate::authenticate(ctx, session, &token, principal_type).await,
        ClientAction::SendMessage {
            counterpart_id,
            body,
            correlation_id,
        } => {
            messages::send_message(ctx, require(session)?, counterpart_id, &body, correlation_id)
                .await
        }
        ClientAction::GetInbox {} => inbox::get_inbox(ctx, require(session)?).await,
        ClientAction::GetMessages {
            counterpart_id,
            page,
            page_size,
        } => history::get_messages(ctx, require(session)?, counterpart_id, page, page_size).await,
        ClientAction::Typing {
            counterpart_id,
            is_typing,
        } => messages::typing(require(session)?, counterpart_id, is_typing).await,
        ClientAction::MarkRead { counterpart_id } => {
            status::mark_read(ctx, require(session)?, counterpart_id).await
        }
        ClientAction::MessageDelivered { message_ids } => {
            status::message_delivered(ctx, require(session)?, &message_ids).await
        }
        ClientAction::MessageRead { message_ids } => {
            status::message_read(ctx, require(session)?, &message_ids).await
        }
        ClientAction::MessageSeen { counterpart_id } => {
            status::message_seen(ctx, require(session)?, counterpart_id).await
        }
        ClientAction::JoinPresenceGroup {
            principal_type,
            principal_id,
        } => {
            presence::join_presence_group(ctx, require(session)?, principal_type, principal_id)
                .await
        }
    }
}

fn require(session: &Option<ChatSession>) -> Result<&ChatSession, ActionError> {
    session
        .as_ref()
        .ok_or(ActionError::Auth("authentication required"))
}

/// Confirms the counterpart id names an existing principal on the
/// other side of the conversation.
pub(super) async fn ensure_counterpart_exists(
    storage: &dyn Storage,
    principal: &Principal,
    counterpart_id: i64,
) -> Result<(), ActionError> {
    let exists = match principal.kind {
        PrincipalKind::User => storage.partner_profile(counterpart_id).await?.is_some(),
        PrincipalKind::Partner => storage.user_profile(counterpart_id).await?.is_some(),
    };
    if exists {
        Ok(())
    } else {
        Err(ActionError::NotFound("unknown counterpart"))
    }
}

/// Inbox aggregation: one row per counterpart from storage, merged
/// with whatever display metadata the directory still has. A deleted
/// counterpart keeps its row, just without a name, and a failed
/// directory lookup degrades the same way rather than failing the
/// whole inbox.
pub(super) async fn inbox_items(
    storage: &dyn Storage,
    kind: PrincipalKind,
    id: i64,
) -> Result<Vec<WireInboxItem>, ActionError> {
    let rows = storage.inbox(kind, id).await?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let (name, company, avatar) = match kind {
            PrincipalKind::User => match storage.partner_profile(row.counterpart_id).await {
                Ok(Some(profile)) => (
                    Some(profile.display_name),
                    profile.company_name,
                    profile.logo_url,
                ),
                Ok(None) => (None, None, None),
                Err(error) => {
                    tracing::warn!(
                        counterpart_id = row.counterpart_id,
                        %error,
                        "directory lookup failed, serving inbox row without metadata"
                    );
                    (None, None, None)
                }
            },
            PrincipalKind::Partner => match storage.user_profile(row.counterpart_id).await {
                Ok(Some(profile)) => (Some(profile.display_name), None, profile.avatar_url),
                Ok(None) => (None, None, None),
                Err(error) => {
                    tracing::warn!(
                        counterpart_id = row.counterpart_id,
                        %error,
                        "directory lookup failed, serving inbox row without metadata"
                    );
                    (None, None, None)
                }
            },
        };
        items.push(WireInboxItem {
            counterpart_id: row.counterpart_id,
            counterpart_name: name,
            counterpart_company: company,
            counterpart_avatar: avatar,
            last_message: row.last_message.into(),
            unread_count: row.unread_count,
        });
    }
    Ok(items)
}

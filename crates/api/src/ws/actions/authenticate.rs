use std::sync::Arc;

use tandem_core::groups;
use tandem_core::protocol::{success_frame, Principal, PrincipalKind, ServerEvent};

use super::{ActionContext, ActionError};
use crate::ws::realtime::{self, send_text, ChatSession};

/// Resolves the token under the claimed principal type and binds the
/// connection to that identity. A token that resolves under both
/// directories is treated as a directory defect and rejected outright.
pub(super) async fn authenticate(
    ctx: &ActionContext,
    session: &mut Option<ChatSession>,
    token: &str,
    principal_type: PrincipalKind,
) -> Result<(), ActionError> {
    if session.is_some() {
        return Err(ActionError::Conflict("already authenticated"));
    }
    if token.is_empty() {
        return Err(ActionError::Auth("invalid token"));
    }

    let user = ctx.storage.resolve_user_token(token).await?;
    let partner = ctx.storage.resolve_partner_token(token).await?;
    if user.is_some() && partner.is_some() {
        tracing::warn!("token resolves under both directories, rejecting");
        return Err(ActionError::Auth("ambiguous token"));
    }

    let principal = match principal_type {
        PrincipalKind::User => user.map(|profile| Principal {
            kind: PrincipalKind::User,
            id: profile.id,
            display_name: profile.display_name,
        }),
        PrincipalKind::Partner => partner.map(|profile| Principal {
            kind: PrincipalKind::Partner,
            id: profile.id,
            display_name: profile.display_name,
        }),
    }
    .ok_or(ActionError::Auth("invalid token"))?;

    let new_session = realtime::register_session(
        Arc::clone(&ctx.broker),
        principal.clone(),
        &ctx.connection_id,
        ctx.outbound.clone(),
        Arc::clone(&ctx.closed),
    )
    .await
    .map_err(|_| ActionError::ConnectionLimit)?;

    // Online edge fires on the first connection only.
    if ctx.presence.register(principal.kind, principal.id).await {
        let frame = success_frame(&ServerEvent::PresenceOnline {
            principal_type: principal.kind,
            principal_id: principal.id,
        });
        new_session
            .broadcast_others(&groups::presence(principal.kind, principal.id), &frame)
            .await;
    }

    send_text(
        &ctx.outbound,
        success_frame(&ServerEvent::Authenticated {
            principal_type: principal.kind,
            principal_id: principal.id,
            display_name: principal.display_name.clone(),
        }),
    )
    .await;
    tracing::debug!(
        principal = %groups::identity_key(principal.kind, principal.id),
        "connection authenticated"
    );

    *session = Some(new_session);
    Ok(())
}

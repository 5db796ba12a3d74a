use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tandem_core::groups;
use tandem_core::protocol::{Principal, CLOSE_TOO_MANY_CONNECTIONS};
use tandem_realtime::broker::{BrokerError, GroupBroker, Subscriber, SubscriberId};
use tokio::sync::mpsc;

const OUTBOUND_CHANNEL_SIZE: usize = 64;

pub(crate) type OutboundSender = mpsc::Sender<OutboundFrame>;
pub(crate) type OutboundReceiver = mpsc::Receiver<OutboundFrame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CloseDirective {
    pub(crate) code: u16,
    pub(crate) reason: &'static str,
}

#[derive(Debug)]
pub(crate) enum OutboundFrame {
    Text(Arc<str>),
    Close(CloseDirective),
}

/// Broker handle for one authenticated connection. Frames are only
/// ever addressed to group names; this wraps the subscriber id and the
/// connection's exclude id so handlers cannot get the fanout wrong.
pub(crate) struct ChatSession {
    broker: Arc<GroupBroker>,
    subscriber_id: SubscriberId,
    connection_id: String,
    pub(crate) principal: Principal,
}

impl ChatSession {
    pub(crate) fn identity_key(&self) -> String {
        groups::identity_key(self.principal.kind, self.principal.id)
    }

    pub(crate) async fn join_groups(&self, group_names: &[String]) {
        let _ = self.broker.join_groups(self.subscriber_id, group_names).await;
    }

    /// Fans a frame out to the group, skipping this connection. Used
    /// when the acting connection gets its own direct reply.
    pub(crate) async fn broadcast_others(&self, group: &str, frame: &str) -> usize {
        self.broker.broadcast(group, &self.connection_id, frame).await
    }

    /// Fans a frame out to every member of the group, this connection
    /// included. Used for state the acting principal's other devices
    /// must see too.
    pub(crate) async fn broadcast_all(&self, group: &str, frame: &str) -> usize {
        self.broker.broadcast(group, "", frame).await
    }

    pub(crate) async fn unregister(&self) {
        let _ = self.broker.unregister_subscriber(self.subscriber_id).await;
    }
}

pub(crate) fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(OUTBOUND_CHANNEL_SIZE)
}

pub(crate) async fn send_close(outbound: &OutboundSender, close: CloseDirective) {
    let _ = outbound.send(OutboundFrame::Close(close)).await;
}

pub(crate) async fn send_text(outbound: &OutboundSender, frame: String) {
    let _ = outbound.send(OutboundFrame::Text(Arc::from(frame))).await;
}

/// Registers the connection with the broker under the principal's
/// identity, pre-joined to its personal inbox and presence groups.
pub(crate) async fn register_session(
    broker: Arc<GroupBroker>,
    principal: Principal,
    connection_id: &str,
    outbound: OutboundSender,
    closed: Arc<AtomicBool>,
) -> Result<ChatSession, CloseDirective> {
    let subscriber = Arc::new(ConnectionSubscriber {
        identity_key: groups::identity_key(principal.kind, principal.id),
        exclude_id: connection_id.to_owned(),
        outbound,
        closed,
    });
    let initial_groups = [
        groups::inbox(principal.kind, principal.id),
        groups::presence(principal.kind, principal.id),
    ];
    let subscriber_id = broker
        .register_subscriber(subscriber, &initial_groups)
        .await
        .map_err(map_register_error)?;

    Ok(ChatSession {
        broker,
        subscriber_id,
        connection_id: connection_id.to_owned(),
        principal,
    })
}

fn map_register_error(error: BrokerError) -> CloseDirective {
    match error {
        BrokerError::ConnectionCapExceeded => CloseDirective {
            code: CLOSE_TOO_MANY_CONNECTIONS,
            reason: "too many connections",
        },
        BrokerError::UnknownSubscriber => CloseDirective {
            code: CLOSE_TOO_MANY_CONNECTIONS,
            reason: "failed to register connection",
        },
    }
}

struct ConnectionSubscriber {
    identity_key: String,
    exclude_id: String,
    outbound: OutboundSender,
    closed: Arc<AtomicBool>,
}

impl Subscriber for ConnectionSubscriber {
    fn send(&self, payload: Arc<str>) -> bool {
        self.outbound.try_send(OutboundFrame::Text(payload)).is_ok()
    }

    fn exclude_id(&self) -> &str {
        &self.exclude_id
    }

    fn identity_key(&self) -> &str {
        &self.identity_key
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed) || self.outbound.is_closed()
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::broker::{BrokerConfig, BrokerError, Subscriber, SubscriberId};

/// Everything the broker tracks about one live connection.
struct Registration {
    subscriber: Arc<dyn Subscriber>,
    identity_key: String,
    groups: HashSet<String>,
}

#[derive(Default)]
struct BrokerState {
    registrations: HashMap<SubscriberId, Registration>,
    group_members: HashMap<String, HashSet<SubscriberId>>,
    identity_connections: HashMap<String, usize>,
}

impl BrokerState {
    /// Removes a registration together with its group memberships and
    /// identity slot. Returns false for an id that was never (or is no
    /// longer) registered.
    fn drop_registration(&mut self, subscriber_id: SubscriberId) -> bool {
        let Some(registration) = self.registrations.remove(&subscriber_id) else {
            return false;
        };
        for group in &registration.groups {
            if let Some(members) = self.group_members.get_mut(group) {
                members.remove(&subscriber_id);
                if members.is_empty() {
                    self.group_members.remove(group);
                }
            }
        }
        if let Some(count) = self.identity_connections.get_mut(&registration.identity_key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.identity_connections.remove(&registration.identity_key);
            }
        }
        true
    }
}

/// Named-group publish/subscribe fabric. Connections subscribe to
/// group names (conversation, inbox, presence); publishers only ever
/// name a group, never another connection.
pub struct GroupBroker {
    config: BrokerConfig,
    next_id: AtomicU64,
    state: RwLock<BrokerState>,
}

impl GroupBroker {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            state: RwLock::new(BrokerState::default()),
        }
    }

    pub async fn connection_count(&self, identity_key: &str) -> usize {
        let state = self.state.read().await;
        state
            .identity_connections
            .get(identity_key)
            .copied()
            .unwrap_or(0)
    }

    /// Registers a connection under its identity, pre-joined to
    /// `initial_groups`. Fails when the identity already holds
    /// `max_connections_per_identity` live connections.
    pub async fn register_subscriber(
        &self,
        subscriber: Arc<dyn Subscriber>,
        initial_groups: &[String],
    ) -> Result<SubscriberId, BrokerError> {
        let identity_key = subscriber.identity_key().to_owned();
        let mut state = self.state.write().await;
        let connections = state
            .identity_connections
            .get(&identity_key)
            .copied()
            .unwrap_or(0);
        if connections >= self.config.max_connections_per_identity {
            return Err(BrokerError::ConnectionCapExceeded);
        }

        let subscriber_id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let groups: HashSet<String> = initial_groups.iter().cloned().collect();
        for group in &groups {
            state
                .group_members
                .entry(group.clone())
                .or_default()
                .insert(subscriber_id);
        }
        state
            .identity_connections
            .insert(identity_key.clone(), connections + 1);
        state.registrations.insert(
            subscriber_id,
            Registration {
                subscriber,
                identity_key,
                groups,
            },
        );
        Ok(subscriber_id)
    }

    pub async fn unregister_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        if state.drop_registration(subscriber_id) {
            Ok(())
        } else {
            Err(BrokerError::UnknownSubscriber)
        }
    }

    /// Idempotent: joining a group the connection already belongs to is
    /// a no-op.
    pub async fn join_groups(
        &self,
        subscriber_id: SubscriberId,
        groups: &[String],
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        let newly_joined: Vec<String> = {
            let Some(registration) = state.registrations.get_mut(&subscriber_id) else {
                return Err(BrokerError::UnknownSubscriber);
            };
            groups
                .iter()
                .filter(|group| registration.groups.insert((*group).clone()))
                .cloned()
                .collect()
        };
        for group in newly_joined {
            state
                .group_members
                .entry(group)
                .or_default()
                .insert(subscriber_id);
        }
        Ok(())
    }

    pub async fn leave_groups(
        &self,
        subscriber_id: SubscriberId,
        groups: &[String],
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        let left: Vec<String> = {
            let Some(registration) = state.registrations.get_mut(&subscriber_id) else {
                return Err(BrokerError::UnknownSubscriber);
            };
            groups
                .iter()
                .filter(|group| registration.groups.remove(group.as_str()))
                .cloned()
                .collect()
        };
        for group in left {
            if let Some(members) = state.group_members.get_mut(&group) {
                members.remove(&subscriber_id);
                if members.is_empty() {
                    state.group_members.remove(&group);
                }
            }
        }
        Ok(())
    }

    pub async fn is_member(&self, subscriber_id: SubscriberId, group: &str) -> bool {
        let state = self.state.read().await;
        state
            .registrations
            .get(&subscriber_id)
            .is_some_and(|registration| registration.groups.contains(group))
    }

    /// Fans a frame out to every member of `group`, skipping the
    /// connection whose id equals `exclude_id` (pass "" to reach all
    /// members). Closed or backpressured connections are dropped; a
    /// disconnected member silently misses events already in flight.
    /// Returns the delivered count.
    pub async fn broadcast(&self, group: &str, exclude_id: &str, payload: &str) -> usize {
        let members: Vec<(SubscriberId, Arc<dyn Subscriber>)> = {
            let state = self.state.read().await;
            let Some(member_ids) = state.group_members.get(group) else {
                return 0;
            };
            member_ids
                .iter()
                .filter_map(|subscriber_id| {
                    state
                        .registrations
                        .get(subscriber_id)
                        .map(|registration| (*subscriber_id, Arc::clone(&registration.subscriber)))
                })
                .collect()
        };

        let shared_payload = Arc::<str>::from(payload);
        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (subscriber_id, subscriber) in members {
            if subscriber.is_closed() {
                dropped.push(subscriber_id);
                continue;
            }
            if !exclude_id.is_empty() && subscriber.exclude_id() == exclude_id {
                continue;
            }
            if subscriber.send(Arc::clone(&shared_payload)) {
                delivered += 1;
            } else {
                dropped.push(subscriber_id);
            }
        }

        if !dropped.is_empty() {
            let mut state = self.state.write().await;
            for subscriber_id in dropped {
                state.drop_registration(subscriber_id);
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use tandem_core::groups;
    use tandem_core::protocol::PrincipalKind;

    use super::GroupBroker;
    use crate::broker::{BrokerConfig, BrokerError, Subscriber, SubscriberId};

    /// One simulated device: records every frame it receives and can
    /// be flipped into a closed or backpressured state.
    struct Device {
        identity_key: String,
        connection_id: String,
        closed: AtomicBool,
        jammed: AtomicBool,
        frames: Mutex<Vec<String>>,
    }

    impl Device {
        fn new(kind: PrincipalKind, id: i64, connection_id: &str) -> Arc<Self> {
            Arc::new(Self {
                identity_key: groups::identity_key(kind, id),
                connection_id: connection_id.to_owned(),
                closed: AtomicBool::new(false),
                jammed: AtomicBool::new(false),
                frames: Mutex::new(Vec::new()),
            })
        }

        fn frame_count(&self) -> usize {
            self.frames.lock().expect("lock frames").len()
        }
    }

    impl Subscriber for Device {
        fn send(&self, payload: Arc<str>) -> bool {
            if self.jammed.load(Ordering::Relaxed) {
                return false;
            }
            self.frames
                .lock()
                .expect("lock frames")
                .push(payload.to_string());
            true
        }

        fn exclude_id(&self) -> &str {
            &self.connection_id
        }

        fn identity_key(&self) -> &str {
            &self.identity_key
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
    }

    async fn connect(
        broker: &GroupBroker,
        device: &Arc<Device>,
        initial_groups: &[String],
    ) -> SubscriberId {
        broker
            .register_subscriber(Arc::clone(device) as Arc<dyn Subscriber>, initial_groups)
            .await
            .expect("register device")
    }

    #[tokio::test]
    async fn extra_device_beyond_the_identity_cap_is_refused() {
        let broker = GroupBroker::new(BrokerConfig {
            max_connections_per_identity: 2,
        });
        let phone = Device::new(PrincipalKind::User, 1, "conn-phone");
        let laptop = Device::new(PrincipalKind::User, 1, "conn-laptop");
        let tablet = Device::new(PrincipalKind::User, 1, "conn-tablet");

        connect(&broker, &phone, &[groups::inbox(PrincipalKind::User, 1)]).await;
        connect(&broker, &laptop, &[groups::inbox(PrincipalKind::User, 1)]).await;
        let error = broker
            .register_subscriber(tablet, &[groups::inbox(PrincipalKind::User, 1)])
            .await
            .expect_err("third device should exceed the cap");
        assert_eq!(error, BrokerError::ConnectionCapExceeded);
        assert_eq!(broker.connection_count("user:1").await, 2);
    }

    #[tokio::test]
    async fn conversation_fanout_skips_the_sending_connection() {
        let broker = GroupBroker::new(BrokerConfig::default());
        let thread = groups::conversation(1, 2);
        let user = Device::new(PrincipalKind::User, 1, "conn-user");
        let partner = Device::new(PrincipalKind::Partner, 2, "conn-partner");
        let bystander = Device::new(PrincipalKind::Partner, 9, "conn-bystander");

        connect(&broker, &user, &[thread.clone()]).await;
        connect(&broker, &partner, &[thread.clone()]).await;
        connect(&broker, &bystander, &[groups::conversation(1, 9)]).await;

        let delivered = broker.broadcast(&thread, "conn-user", "{}").await;
        assert_eq!(delivered, 1);
        assert_eq!(user.frame_count(), 0);
        assert_eq!(partner.frame_count(), 1);
        assert_eq!(bystander.frame_count(), 0);
    }

    #[tokio::test]
    async fn inbox_fanout_reaches_every_device_of_the_identity() {
        let broker = GroupBroker::new(BrokerConfig::default());
        let inbox = groups::inbox(PrincipalKind::User, 1);
        let phone = Device::new(PrincipalKind::User, 1, "conn-phone");
        let laptop = Device::new(PrincipalKind::User, 1, "conn-laptop");

        connect(&broker, &phone, &[inbox.clone()]).await;
        connect(&broker, &laptop, &[inbox.clone()]).await;

        // An empty exclude id means even the acting device gets the
        // refreshed summary.
        let delivered = broker.broadcast(&inbox, "", "{}").await;
        assert_eq!(delivered, 2);
        assert_eq!(phone.frame_count(), 1);
        assert_eq!(laptop.frame_count(), 1);
    }

    #[tokio::test]
    async fn opening_and_leaving_a_thread_updates_fanout() {
        let broker = GroupBroker::new(BrokerConfig::default());
        let thread = groups::conversation(1, 2);
        let device = Device::new(PrincipalKind::User, 1, "conn-phone");
        let subscriber_id =
            connect(&broker, &device, &[groups::inbox(PrincipalKind::User, 1)]).await;

        assert!(!broker.is_member(subscriber_id, &thread).await);
        assert_eq!(broker.broadcast(&thread, "", "{}").await, 0);

        broker
            .join_groups(subscriber_id, &[thread.clone()])
            .await
            .expect("open thread");
        broker
            .join_groups(subscriber_id, &[thread.clone()])
            .await
            .expect("reopening is a no-op");
        assert!(broker.is_member(subscriber_id, &thread).await);
        assert_eq!(broker.broadcast(&thread, "", "{}").await, 1);

        broker
            .leave_groups(subscriber_id, &[thread.clone()])
            .await
            .expect("leave thread");
        assert_eq!(broker.broadcast(&thread, "", "{}").await, 0);
        assert_eq!(device.frame_count(), 1);
    }

    #[tokio::test]
    async fn closed_and_backpressured_devices_are_dropped_mid_broadcast() {
        let broker = GroupBroker::new(BrokerConfig::default());
        let presence = groups::presence(PrincipalKind::Partner, 2);
        let gone = Device::new(PrincipalKind::Partner, 2, "conn-gone");
        let stuck = Device::new(PrincipalKind::Partner, 2, "conn-stuck");
        gone.closed.store(true, Ordering::Relaxed);
        stuck.jammed.store(true, Ordering::Relaxed);

        connect(&broker, &gone, &[presence.clone()]).await;
        connect(&broker, &stuck, &[presence.clone()]).await;

        assert_eq!(broker.broadcast(&presence, "", "{}").await, 0);
        // Both registrations are gone, identity slots included.
        assert_eq!(broker.connection_count("partner:2").await, 0);
        assert_eq!(broker.broadcast(&presence, "", "{}").await, 0);
    }

    #[tokio::test]
    async fn disconnect_releases_the_identity_slot_and_group_memberships() {
        let broker = GroupBroker::new(BrokerConfig::default());
        let thread = groups::conversation(1, 2);
        let device = Device::new(PrincipalKind::User, 1, "conn-phone");
        let subscriber_id = connect(&broker, &device, &[thread.clone()]).await;

        broker
            .unregister_subscriber(subscriber_id)
            .await
            .expect("unregister device");
        assert_eq!(broker.connection_count("user:1").await, 0);
        assert_eq!(broker.broadcast(&thread, "", "{}").await, 0);

        let error = broker
            .unregister_subscriber(subscriber_id)
            .await
            .expect_err("second unregister should fail");
        assert_eq!(error, BrokerError::UnknownSubscriber);
    }
}

use std::collections::HashMap;

use tandem_core::groups;
use tandem_core::protocol::PrincipalKind;
use tokio::sync::RwLock;

/// Connection-count presence. A principal is online while at least one
/// of its WebSocket connections is registered; the online/offline edge
/// fires only on the 0→1 and 1→0 transitions so multi-device churn
/// stays silent.
pub struct PresenceRegistry {
    connections: RwLock<HashMap<String, usize>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Records one more connection for the principal. Returns true when
    /// this was the first connection, i.e. the principal just came
    /// online.
    pub async fn register(&self, kind: PrincipalKind, id: i64) -> bool {
        let key = groups::identity_key(kind, id);
        let mut state = self.connections.write().await;
        let count = state.entry(key).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Records one connection gone. Returns true when this was the last
    /// connection, i.e. the principal just went offline.
    pub async fn deregister(&self, kind: PrincipalKind, id: i64) -> bool {
        let key = groups::identity_key(kind, id);
        let mut state = self.connections.write().await;
        let Some(count) = state.get_mut(&key) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            state.remove(&key);
            true
        } else {
            false
        }
    }

    pub async fn is_online(&self, kind: PrincipalKind, id: i64) -> bool {
        let key = groups::identity_key(kind, id);
        self.connections.read().await.contains_key(&key)
    }

    pub async fn connection_count(&self, kind: PrincipalKind, id: i64) -> usize {
        let key = groups::identity_key(kind, id);
        self.connections
            .read()
            .await
            .get(&key)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

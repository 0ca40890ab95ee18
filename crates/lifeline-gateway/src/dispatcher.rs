use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use lifeline_types::events::GatewayEvent;

/// Broadcast channel depth; slow receivers past this lag and skip events.
const BROADCAST_CAPACITY: usize = 1024;

/// Manages all connected clients and fans out events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every broadcast and filters by audience.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Online users: user_id -> username
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish to all connections. Having no listeners is not an error.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. A newer connection replaces an
    /// older one. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if channels
            .get(&user_id)
            .is_some_and(|(stored, _)| *stored == conn_id)
        {
            channels.remove(&user_id);
        }
    }

    /// Deliver an event to one user's live connection. Returns false if the
    /// user is not connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let channels = self.inner.user_channels.read().await;
        match channels.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn user_online(&self, user_id: Uuid, username: String) {
        self.inner
            .online_users
            .write()
            .await
            .insert(user_id, username.clone());

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username,
            online: true,
        });
    }

    /// Mark a user offline. No-op if a newer connection owns the user.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels
                .get(&user_id)
                .is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            return;
        }

        let username = self
            .inner
            .online_users
            .write()
            .await
            .remove(&user_id)
            .unwrap_or_default();

        self.unregister_user_channel(user_id, conn_id).await;

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username,
            online: false,
        });
    }

    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.online_users.read().await.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn targeted_delivery_follows_latest_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, mut old_rx) = dispatcher.register_user_channel(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(user).await;

        let event = GatewayEvent::ProfileUpdated { profile_id: user };
        assert!(dispatcher.send_to_user(user, event).await);
        assert!(matches!(new_rx.recv().await, Some(GatewayEvent::ProfileUpdated { .. })));
        // The replaced connection's sender was dropped.
        assert!(old_rx.recv().await.is_none());

        // Stale connection cleanup must not evict the new one.
        dispatcher.unregister_user_channel(user, old_conn).await;
        assert!(
            dispatcher
                .send_to_user(user, GatewayEvent::ProfileUpdated { profile_id: user })
                .await
        );
    }

    #[tokio::test]
    async fn send_to_absent_user_reports_false() {
        let dispatcher = Dispatcher::new();
        let sent = dispatcher
            .send_to_user(Uuid::new_v4(), GatewayEvent::ProfileUpdated { profile_id: Uuid::new_v4() })
            .await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn presence_round_trip() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let user = Uuid::new_v4();
        let (conn, _user_rx) = dispatcher.register_user_channel(user).await;

        dispatcher.user_online(user, "sam".into()).await;
        assert!(dispatcher.is_online(user).await);
        match rx.recv().await.unwrap() {
            GatewayEvent::PresenceUpdate { online, username, .. } => {
                assert!(online);
                assert_eq!(username, "sam");
            }
            other => panic!("unexpected {other:?}"),
        }

        dispatcher.user_offline(user, conn).await;
        assert!(!dispatcher.is_online(user).await);
        assert!(matches!(
            rx.recv().await.unwrap(),
            GatewayEvent::PresenceUpdate { online: false, .. }
        ));
    }

    #[tokio::test]
    async fn offline_from_stale_connection_is_ignored() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (stale, _rx1) = dispatcher.register_user_channel(user).await;
        let (_fresh, _rx2) = dispatcher.register_user_channel(user).await;
        dispatcher.user_online(user, "sam".into()).await;

        dispatcher.user_offline(user, stale).await;
        assert!(dispatcher.is_online(user).await);
    }
}

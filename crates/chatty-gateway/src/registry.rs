use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use chatty_types::events::GatewayEvent;
use chatty_types::models::Role;

/// Authenticated principal bound to a connection for its lifetime.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub role: Role,
}

struct ConnectionHandle {
    user: SessionUser,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<String>,
}

/// Process-local session registry: connection → authenticated user →
/// joined rooms. Created at handshake, destroyed at disconnect, never
/// persisted. Room-scoped events are filtered per connection against the
/// membership set; events without a room go to everyone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Bind an authenticated user to a new connection. Returns the
    /// connection id and the targeted-event receiver.
    pub async fn register(
        &self,
        user: SessionUser,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionHandle {
                user,
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    pub async fn user_of(&self, conn_id: Uuid) -> Option<SessionUser> {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .map(|handle| handle.user.clone())
    }

    /// Idempotent join. Returns `true` when the membership is new.
    pub async fn join_room(&self, conn_id: Uuid, room_id: &str) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get_mut(&conn_id) {
            Some(handle) => handle.rooms.insert(room_id.to_string()),
            None => false,
        }
    }

    /// Returns `true` when a membership was actually removed.
    pub async fn leave_room(&self, conn_id: Uuid, room_id: &str) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get_mut(&conn_id) {
            Some(handle) => handle.rooms.remove(room_id),
            None => false,
        }
    }

    pub async fn room_count(&self, conn_id: Uuid) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .map(|handle| handle.rooms.len())
            .unwrap_or(0)
    }

    /// Whether this broadcast event should reach the given connection:
    /// room-scoped events require membership, global ones always pass.
    pub async fn should_deliver(&self, conn_id: Uuid, event: &GatewayEvent) -> bool {
        match event.room_id() {
            Some(room) => self
                .inner
                .connections
                .read()
                .await
                .get(&conn_id)
                .map(|handle| handle.rooms.contains(room))
                .unwrap_or(false),
            None => true,
        }
    }

    /// Subscribe to the broadcast stream. Each connection's send task
    /// applies `should_deliver` before forwarding.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event to all subscribed connections (room filtering
    /// happens at each receiver).
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Send a targeted event to a single connection.
    pub async fn send_to_conn(&self, conn_id: Uuid, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(handle) = connections.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

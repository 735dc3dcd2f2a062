//! Live connection bookkeeping: which sockets are subscribed to which room.

use filmhub_types::{Identity, RoomGroupKey};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Sender tag of one live connection, unique across the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A serialized outbound frame plus the routing facts recipients need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub payload: String,
    /// Connection whose action produced the frame, if any.
    pub origin: Option<ConnectionId>,
    /// Only the connection whose identity matches may deliver the frame.
    pub target: Option<String>,
}

impl Envelope {
    /// A frame every recipient delivers.
    pub fn to_all(payload: String) -> Self {
        Self {
            payload,
            origin: None,
            target: None,
        }
    }

    pub fn from_connection(payload: String, origin: ConnectionId) -> Self {
        Self {
            payload,
            origin: Some(origin),
            target: None,
        }
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target.filter(|t| !t.is_empty());
        self
    }

    /// Whether a connection holding `identity` should deliver this frame.
    /// Targeted frames never reach anonymous connections.
    pub fn is_addressed_to(&self, identity: &Identity) -> bool {
        match &self.target {
            None => true,
            Some(target) => identity.username() == Some(target.as_str()),
        }
    }
}

/// The registry's side of a connection: enough to route and push frames.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Identity,
    sender: mpsc::Sender<Arc<Envelope>>,
    lagged: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Creates a handle with a bounded outbound queue and the matching
    /// [`Outbox`] for the connection's writer.
    pub fn open(identity: Identity, capacity: usize) -> (Self, Outbox) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let lagged = Arc::new(AtomicBool::new(false));
        let handle = Self {
            id: ConnectionId::new(),
            identity: identity.clone(),
            sender,
            lagged: lagged.clone(),
        };
        let outbox = Outbox {
            identity,
            receiver,
            lagged,
        };
        (handle, outbox)
    }
}

/// Receiving end of a connection's outbound queue.
///
/// Applies unicast targeting at delivery time: envelopes addressed to some
/// other identity are dropped here.
#[derive(Debug)]
pub struct Outbox {
    identity: Identity,
    receiver: mpsc::Receiver<Arc<Envelope>>,
    lagged: Arc<AtomicBool>,
}

impl Outbox {
    /// Waits for the next frame this connection should write. Returns `None`
    /// once every handle to the connection is gone, or as soon as the
    /// connection has been evicted for falling behind.
    pub async fn next_frame(&mut self) -> Option<String> {
        loop {
            if self.is_evicted() {
                return None;
            }
            let envelope = self.receiver.recv().await?;
            if self.is_evicted() {
                return None;
            }
            if envelope.is_addressed_to(&self.identity) {
                return Some(envelope.payload.clone());
            }
        }
    }

    /// Non-blocking variant of [`Outbox::next_frame`].
    pub fn try_next_frame(&mut self) -> Option<String> {
        while !self.is_evicted() {
            let Ok(envelope) = self.receiver.try_recv() else {
                break;
            };
            if envelope.is_addressed_to(&self.identity) {
                return Some(envelope.payload.clone());
            }
        }
        None
    }

    /// Whether a broadcast found this connection's queue full. An evicted
    /// outbox yields nothing more, not even frames already queued, so the
    /// client never sees a stream with a hole in it.
    pub fn is_evicted(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }
}

type RoomMap = HashMap<RoomGroupKey, HashMap<ConnectionId, ConnectionHandle>>;

/// Maps each room key to the connections currently joined to it.
///
/// Broadcasts copy the recipient list under a read lock and push after the
/// lock is released, so a slow room never holds up joins elsewhere.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    rooms: Arc<RwLock<RoomMap>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection to a room. Re-joining replaces the old handle.
    ///
    /// Returns how many connections in the room, this one included, now share
    /// the handle's identity.
    pub async fn join(&self, key: &RoomGroupKey, handle: ConnectionHandle) -> usize {
        let mut rooms = self.rooms.write().await;
        let connections = rooms.entry(key.clone()).or_default();
        let identity = handle.identity.clone();
        connections.insert(handle.id, handle);
        count_identity(connections, &identity)
    }

    /// Unsubscribes a connection.
    ///
    /// Returns `None` if it was not joined, otherwise how many connections
    /// with the same identity remain in the room.
    pub async fn leave(&self, key: &RoomGroupKey, id: ConnectionId) -> Option<usize> {
        let mut rooms = self.rooms.write().await;
        let connections = rooms.get_mut(key)?;
        let removed = connections.remove(&id);
        let remaining = removed
            .as_ref()
            .map(|handle| count_identity(connections, &handle.identity));
        if connections.is_empty() {
            rooms.remove(key);
        }
        remaining
    }

    /// Pushes `envelope` to every connection in the room. Returns how many
    /// queues accepted it.
    pub async fn broadcast_all(&self, key: &RoomGroupKey, envelope: Envelope) -> usize {
        let recipients = self.snapshot(key, None).await;
        self.deliver(key, &recipients, envelope).await
    }

    /// Pushes `envelope` to every connection in the room except `excluded`.
    pub async fn broadcast_except(
        &self,
        key: &RoomGroupKey,
        envelope: Envelope,
        excluded: ConnectionId,
    ) -> usize {
        let recipients = self.snapshot(key, Some(excluded)).await;
        self.deliver(key, &recipients, envelope).await
    }

    /// Hands one shared envelope to each recipient queue. A closed queue only
    /// costs that recipient the frame. A full queue evicts the recipient: it
    /// is removed from the room and its outbox ends, so its session closes
    /// instead of carrying on with a gap.
    async fn deliver(
        &self,
        key: &RoomGroupKey,
        recipients: &[ConnectionHandle],
        envelope: Envelope,
    ) -> usize {
        let envelope = Arc::new(envelope);
        let mut delivered = 0;
        let mut lagging = Vec::new();
        for handle in recipients {
            if handle.lagged.load(Ordering::Acquire) {
                continue;
            }
            match handle.sender.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        room_key = %key,
                        connection_id = %handle.id,
                        "evicting slow consumer"
                    );
                    handle.lagged.store(true, Ordering::Release);
                    lagging.push(handle.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(
                        room_key = %key,
                        connection_id = %handle.id,
                        "skipping frame for closed connection"
                    );
                }
            }
        }
        if !lagging.is_empty() {
            self.evict(key, &lagging).await;
        }
        delivered
    }

    async fn evict(&self, key: &RoomGroupKey, ids: &[ConnectionId]) {
        let mut rooms = self.rooms.write().await;
        let Some(connections) = rooms.get_mut(key) else {
            return;
        };
        for id in ids {
            connections.remove(id);
        }
        if connections.is_empty() {
            rooms.remove(key);
        }
    }

    async fn snapshot(
        &self,
        key: &RoomGroupKey,
        excluded: Option<ConnectionId>,
    ) -> Vec<ConnectionHandle> {
        let rooms = self.rooms.read().await;
        rooms
            .get(key)
            .map(|connections| {
                connections
                    .values()
                    .filter(|handle| Some(handle.id) != excluded)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn connection_count(&self, key: &RoomGroupKey) -> usize {
        self.rooms.read().await.get(key).map_or(0, HashMap::len)
    }

    /// Number of rooms with at least one live connection.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Identities of the live connections in a room, one entry per connection.
    pub async fn members(&self, key: &RoomGroupKey) -> Vec<Identity> {
        self.rooms
            .read()
            .await
            .get(key)
            .map(|connections| connections.values().map(|h| h.identity.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of live connections in a room holding `identity`.
    pub async fn identity_count(&self, key: &RoomGroupKey, identity: &Identity) -> usize {
        self.rooms
            .read()
            .await
            .get(key)
            .map_or(0, |connections| count_identity(connections, identity))
    }
}

fn count_identity(
    connections: &HashMap<ConnectionId, ConnectionHandle>,
    identity: &Identity,
) -> usize {
    connections
        .values()
        .filter(|handle| &handle.identity == identity)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> RoomGroupKey {
        RoomGroupKey::from_room_name(name)
    }

    fn user(name: &str) -> Identity {
        Identity::Authenticated(name.to_string())
    }

    #[tokio::test]
    async fn broadcast_reaches_only_the_room() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_out) = ConnectionHandle::open(user("alice"), 8);
        let (b, mut b_out) = ConnectionHandle::open(user("bob"), 8);
        let (c, mut c_out) = ConnectionHandle::open(user("carol"), 8);
        registry.join(&key("one"), a).await;
        registry.join(&key("one"), b).await;
        registry.join(&key("two"), c).await;

        let delivered = registry
            .broadcast_all(&key("one"), Envelope::to_all("hello".into()))
            .await;

        assert_eq!(delivered, 2);
        assert_eq!(a_out.try_next_frame().as_deref(), Some("hello"));
        assert_eq!(b_out.try_next_frame().as_deref(), Some("hello"));
        assert_eq!(c_out.try_next_frame(), None);
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_origin_connection_only() {
        let registry = ConnectionRegistry::new();
        // Same user, two tabs.
        let (tab1, mut tab1_out) = ConnectionHandle::open(user("alice"), 8);
        let (tab2, mut tab2_out) = ConnectionHandle::open(user("alice"), 8);
        let origin = tab1.id;
        registry.join(&key("r"), tab1).await;
        registry.join(&key("r"), tab2).await;

        let delivered = registry
            .broadcast_except(
                &key("r"),
                Envelope::from_connection("seek".into(), origin),
                origin,
            )
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(tab1_out.try_next_frame(), None);
        assert_eq!(tab2_out.try_next_frame().as_deref(), Some("seek"));
    }

    #[tokio::test]
    async fn targeted_envelopes_are_filtered_by_the_receiver() {
        let registry = ConnectionRegistry::new();
        let (bob, mut bob_out) = ConnectionHandle::open(user("bob"), 8);
        let (carol, mut carol_out) = ConnectionHandle::open(user("carol"), 8);
        let (guest, mut guest_out) = ConnectionHandle::open(Identity::Anonymous, 8);
        for handle in [bob, carol, guest] {
            registry.join(&key("r"), handle).await;
        }

        let envelope = Envelope::to_all("offer".into()).with_target(Some("bob".into()));
        assert_eq!(registry.broadcast_all(&key("r"), envelope).await, 3);

        assert_eq!(bob_out.try_next_frame().as_deref(), Some("offer"));
        assert_eq!(carol_out.try_next_frame(), None);
        assert_eq!(guest_out.try_next_frame(), None);
    }

    #[test]
    fn empty_target_means_everyone() {
        let envelope = Envelope::to_all("x".into()).with_target(Some(String::new()));
        assert_eq!(envelope.target, None);
        assert!(envelope.is_addressed_to(&Identity::Anonymous));
    }

    #[tokio::test]
    async fn failed_recipient_does_not_abort_the_broadcast() {
        let registry = ConnectionRegistry::new();
        let (gone, gone_out) = ConnectionHandle::open(user("gone"), 8);
        let (full, _full_out) = ConnectionHandle::open(user("full"), 1);
        let (ok, mut ok_out) = ConnectionHandle::open(user("ok"), 8);
        drop(gone_out);
        registry.join(&key("r"), gone).await;
        registry.join(&key("r"), full).await;
        registry.join(&key("r"), ok).await;

        registry
            .broadcast_all(&key("r"), Envelope::to_all("first".into()))
            .await;
        let delivered = registry
            .broadcast_all(&key("r"), Envelope::to_all("second".into()))
            .await;

        assert_eq!(delivered, 1, "only the healthy queue takes the second frame");
        assert_eq!(ok_out.try_next_frame().as_deref(), Some("first"));
        assert_eq!(ok_out.try_next_frame().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn full_queue_evicts_the_connection_and_ends_its_outbox() {
        let registry = ConnectionRegistry::new();
        let (slow, mut slow_out) = ConnectionHandle::open(user("slow"), 1);
        let (ok, mut ok_out) = ConnectionHandle::open(user("ok"), 8);
        registry.join(&key("r"), slow).await;
        registry.join(&key("r"), ok).await;

        registry
            .broadcast_all(&key("r"), Envelope::to_all("first".into()))
            .await;
        assert!(!slow_out.is_evicted());
        registry
            .broadcast_all(&key("r"), Envelope::to_all("second".into()))
            .await;
        registry
            .broadcast_all(&key("r"), Envelope::to_all("third".into()))
            .await;

        assert_eq!(registry.connection_count(&key("r")).await, 1);
        assert_eq!(registry.members(&key("r")).await, vec![user("ok")]);
        assert!(slow_out.is_evicted());
        assert_eq!(slow_out.next_frame().await, None, "queued frames are not replayed");
        assert_eq!(slow_out.try_next_frame(), None);
        for expected in ["first", "second", "third"] {
            assert_eq!(ok_out.try_next_frame().as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_drops_empty_rooms() {
        let registry = ConnectionRegistry::new();
        let (a, _a_out) = ConnectionHandle::open(user("alice"), 8);
        let id = a.id;
        assert_eq!(registry.join(&key("r"), a).await, 1);
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.members(&key("r")).await, vec![user("alice")]);

        assert_eq!(registry.leave(&key("r"), id).await, Some(0));
        assert_eq!(registry.leave(&key("r"), id).await, None);
        assert_eq!(registry.leave(&key("never"), id).await, None);
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(registry.connection_count(&key("r")).await, 0);
    }

    #[tokio::test]
    async fn join_and_leave_count_connections_per_identity() {
        let registry = ConnectionRegistry::new();
        let (tab1, _tab1_out) = ConnectionHandle::open(user("alice"), 8);
        let (tab2, _tab2_out) = ConnectionHandle::open(user("alice"), 8);
        let (bob, _bob_out) = ConnectionHandle::open(user("bob"), 8);
        let (tab1_id, tab2_id) = (tab1.id, tab2.id);

        assert_eq!(registry.join(&key("r"), tab1).await, 1);
        assert_eq!(registry.join(&key("r"), bob).await, 1);
        assert_eq!(registry.join(&key("r"), tab2).await, 2);
        assert_eq!(registry.identity_count(&key("r"), &user("alice")).await, 2);

        assert_eq!(registry.leave(&key("r"), tab1_id).await, Some(1));
        assert_eq!(registry.leave(&key("r"), tab2_id).await, Some(0));
        assert_eq!(registry.identity_count(&key("r"), &user("alice")).await, 0);
        assert_eq!(registry.connection_count(&key("r")).await, 1);
    }
}

//! Lifecycle of one room connection.

use crate::collaborators::{offload, Collaborators};
use crate::config::HubConfig;
use crate::dispatch::{Dispatched, EventDispatcher};
use crate::emit::RoomBroadcaster;
use crate::frames::InboundFrame;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Outbox};
use filmhub_rooms::ParticipantChange;
use filmhub_types::{Identity, RoomGroupKey};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum interval between room activity writes caused by chat on one
/// connection.
const ACTIVITY_DEBOUNCE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Closed,
}

/// Binds one connection to one room: `Connecting -> Joined -> Closed`.
pub struct RoomSession {
    room_name: String,
    key: RoomGroupKey,
    identity: Identity,
    connection_id: ConnectionId,
    pending_handle: Option<ConnectionHandle>,
    state: SessionState,
    registry: ConnectionRegistry,
    broadcaster: RoomBroadcaster,
    dispatcher: EventDispatcher,
    collaborators: Collaborators,
    hub: Arc<HubConfig>,
    last_activity_touch: Option<Instant>,
}

impl RoomSession {
    /// Creates a session for `room_name` together with the outbox its writer
    /// drains. Nothing is registered until [`RoomSession::join`].
    pub fn new(
        room_name: String,
        identity: Identity,
        registry: ConnectionRegistry,
        collaborators: Collaborators,
        hub: Arc<HubConfig>,
    ) -> (Self, Outbox) {
        let key = RoomGroupKey::from_room_name(&room_name);
        let (handle, outbox) = ConnectionHandle::open(identity.clone(), hub.outbound_queue_capacity);
        let connection_id = handle.id;
        let broadcaster = RoomBroadcaster::new(registry.clone(), key.clone());
        let dispatcher = EventDispatcher::new(
            room_name.clone(),
            identity.clone(),
            connection_id,
            broadcaster.clone(),
            collaborators.clone(),
            hub.clone(),
        );

        let session = Self {
            room_name,
            key,
            identity,
            connection_id,
            pending_handle: Some(handle),
            state: SessionState::Connecting,
            registry,
            broadcaster,
            dispatcher,
            collaborators,
            hub,
            last_activity_touch: None,
        };
        (session, outbox)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Registers the connection and, for authenticated users, records the
    /// membership and announces the arrival to the whole room.
    ///
    /// A user already present through another connection (a second tab) is
    /// neither recorded nor announced again.
    pub async fn join(&mut self) {
        let Some(handle) = self.pending_handle.take() else {
            return;
        };
        let same_identity = self.registry.join(&self.key, handle).await;
        self.state = SessionState::Joined;
        tracing::info!(
            room = %self.room_name,
            connection_id = %self.connection_id,
            authenticated = self.identity.is_authenticated(),
            "connection joined room"
        );

        let Some(username) = self.identity.username().map(str::to_string) else {
            return;
        };
        if same_identity > 1 {
            tracing::debug!(
                room = %self.room_name,
                username = %username,
                connections = same_identity,
                "user already present through another connection"
            );
            self.touch_activity();
            return;
        }

        let directory = self.collaborators.directory.clone();
        let room = self.room_name.clone();
        let user = username.clone();
        match offload(move || directory.add_participant(&room, &user)).await {
            Ok(ParticipantChange::Added | ParticipantChange::AlreadyPresent) => {}
            Ok(ParticipantChange::RoomFull) => {
                tracing::warn!(
                    room = %self.room_name,
                    username = %username,
                    "room is full, membership not recorded"
                );
            }
            Ok(change) => {
                tracing::debug!(
                    room = %self.room_name,
                    username = %username,
                    ?change,
                    "membership not recorded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    room = %self.room_name,
                    username = %username,
                    "failed to record membership: {}",
                    e
                );
            }
        }

        self.broadcaster
            .system(&format!("{username} joined the room"))
            .await;
        self.touch_activity();
    }

    /// Handles one inbound text frame. Malformed frames are logged and
    /// dropped; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) -> Option<Dispatched> {
        if self.state != SessionState::Joined {
            tracing::debug!(connection_id = %self.connection_id, state = ?self.state, "frame outside joined state");
            return None;
        }

        let frame = match InboundFrame::parse(text)
            .and_then(|f| f.check_limits(self.hub.max_chat_message_len).map(|()| f))
        {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    room = %self.room_name,
                    connection_id = %self.connection_id,
                    "dropping inbound frame: {}",
                    e
                );
                return None;
            }
        };

        if matches!(frame, InboundFrame::Chat { .. })
            && self
                .last_activity_touch
                .map_or(true, |at| at.elapsed() >= ACTIVITY_DEBOUNCE)
        {
            self.touch_activity();
        }

        tracing::trace!(room = %self.room_name, kind = frame.kind(), "dispatching frame");
        Some(self.dispatcher.dispatch(frame).await)
    }

    /// Leaves the room. Idempotent; only the first call has effects.
    ///
    /// The membership is removed and the departure announced only when this
    /// was the user's last connection in the room.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if previous != SessionState::Joined {
            return;
        }

        let remaining = match self.registry.leave(&self.key, self.connection_id).await {
            Some(remaining) => remaining,
            // Already evicted by a broadcast that found the queue full.
            None => self.registry.identity_count(&self.key, &self.identity).await,
        };
        tracing::info!(
            room = %self.room_name,
            connection_id = %self.connection_id,
            "connection left room"
        );

        let Some(username) = self.identity.username().map(str::to_string) else {
            return;
        };
        if remaining > 0 {
            tracing::debug!(
                room = %self.room_name,
                username = %username,
                connections = remaining,
                "user still present through another connection"
            );
            return;
        }

        let directory = self.collaborators.directory.clone();
        let room = self.room_name.clone();
        let user = username.clone();
        if let Err(e) = offload(move || directory.remove_participant(&room, &user)).await {
            tracing::warn!(
                room = %self.room_name,
                username = %username,
                "failed to remove membership: {}",
                e
            );
        }

        self.broadcaster
            .system(&format!("{username} left the room"))
            .await;
    }

    fn touch_activity(&mut self) {
        self.last_activity_touch = Some(Instant::now());
        let directory = self.collaborators.directory.clone();
        let room = self.room_name.clone();
        tokio::spawn(async move {
            let lookup_room = room.clone();
            if let Err(e) = offload(move || directory.touch_activity(&lookup_room)).await {
                tracing::debug!(room = %room, "failed to touch room activity: {}", e);
            }
        });
    }
}

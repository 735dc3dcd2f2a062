//! Typed outbound frames pushed into one room.

use crate::frames::{OutgoingMessage, SignalFrame};
use crate::registry::{ConnectionId, ConnectionRegistry, Envelope};
use filmhub_types::{RoomGroupKey, SignalAction, VideoAction};
use serde::Serialize;
use serde_json::Value;

/// Formats each frame once and fans it out through the registry.
#[derive(Clone)]
pub struct RoomBroadcaster {
    registry: ConnectionRegistry,
    key: RoomGroupKey,
}

fn encode<T: Serialize>(frame: &T) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("failed to serialize outbound frame: {}", e);
            None
        }
    }
}

impl RoomBroadcaster {
    pub fn new(registry: ConnectionRegistry, key: RoomGroupKey) -> Self {
        Self { registry, key }
    }

    async fn to_all<T: Serialize>(&self, frame: &T) -> usize {
        let Some(json) = encode(frame) else {
            return 0;
        };
        self.registry
            .broadcast_all(&self.key, Envelope::to_all(json))
            .await
    }

    async fn to_others(&self, envelope: Envelope, origin: ConnectionId) -> usize {
        self.registry
            .broadcast_except(&self.key, envelope, origin)
            .await
    }

    /// Presence notice, delivered to the whole room including its subject.
    pub async fn system(&self, message: &str) -> usize {
        self.to_all(&OutgoingMessage::System { message }).await
    }

    pub async fn chat(&self, message: &str, username: &str, avatar: Option<&str>) -> usize {
        self.to_all(&OutgoingMessage::ChatMessage {
            message,
            username,
            avatar,
        })
        .await
    }

    /// Playback event for everyone but the connection that produced it.
    pub async fn video(&self, action: VideoAction, payload: &Value, origin: ConnectionId) -> usize {
        let Some(json) = encode(&OutgoingMessage::VideoEvent {
            action,
            data: payload,
        }) else {
            return 0;
        };
        self.to_others(Envelope::from_connection(json, origin), origin)
            .await
    }

    /// Call signal for everyone but the sender. With a target, only the
    /// matching identity delivers it.
    pub async fn signal(
        &self,
        action: SignalAction,
        sender: &str,
        payload: &Value,
        target: Option<String>,
        origin: ConnectionId,
    ) -> usize {
        let Some(json) = encode(&SignalFrame {
            action,
            sender,
            data: payload,
        }) else {
            return 0;
        };
        let envelope = Envelope::from_connection(json, origin).with_target(target);
        self.to_others(envelope, origin).await
    }

    pub async fn kick(&self, kicked_username: &str) -> usize {
        self.to_all(&OutgoingMessage::UserKicked { kicked_username })
            .await
    }
}

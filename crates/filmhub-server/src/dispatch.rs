//! Per-frame handling: who acts, which collaborator is consulted, and which
//! frame goes back out.

use crate::collaborators::{offload, Collaborators};
use crate::config::HubConfig;
use crate::emit::RoomBroadcaster;
use crate::frames::InboundFrame;
use crate::registry::ConnectionId;
use filmhub_types::{Identity, SignalAction, VideoAction};
use serde_json::Value;
use std::sync::Arc;

/// What a dispatched frame turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// A frame was handed to `recipients` outbound queues.
    Relayed { recipients: usize },
    /// The frame was valid but produced nothing (e.g. a kick from a non-owner).
    Ignored,
}

/// Returns `None` for the stock placeholder avatar.
pub fn normalize_avatar(url: Option<String>, placeholder_marker: &str) -> Option<String> {
    url.filter(|u| placeholder_marker.is_empty() || !u.contains(placeholder_marker))
}

/// Dispatches frames for one connection.
pub struct EventDispatcher {
    room_name: String,
    identity: Identity,
    connection_id: ConnectionId,
    broadcaster: RoomBroadcaster,
    collaborators: Collaborators,
    hub: Arc<HubConfig>,
}

impl EventDispatcher {
    pub fn new(
        room_name: String,
        identity: Identity,
        connection_id: ConnectionId,
        broadcaster: RoomBroadcaster,
        collaborators: Collaborators,
        hub: Arc<HubConfig>,
    ) -> Self {
        Self {
            room_name,
            identity,
            connection_id,
            broadcaster,
            collaborators,
            hub,
        }
    }

    /// The verified username, else the name the frame claims, else the guest
    /// label.
    fn acting_username(&self, claimed: Option<&str>) -> String {
        self.identity
            .username()
            .or(claimed.filter(|name| !name.is_empty()))
            .unwrap_or(self.hub.guest_label.as_str())
            .to_string()
    }

    pub async fn dispatch(&self, frame: InboundFrame) -> Dispatched {
        match frame {
            InboundFrame::Chat { message, username } => {
                self.handle_chat(message, username.as_deref()).await
            }
            InboundFrame::VideoSync { action, payload } => {
                self.handle_video(action, &payload).await
            }
            InboundFrame::CallSignal {
                action,
                target,
                username,
                payload,
            } => {
                self.handle_signal(action, target, username.as_deref(), &payload)
                    .await
            }
            InboundFrame::Kick { username } => self.handle_kick(&username).await,
        }
    }

    async fn handle_chat(&self, message: String, claimed: Option<&str>) -> Dispatched {
        let author = self.acting_username(claimed);

        let avatar = {
            let avatars = self.collaborators.avatars.clone();
            let author = author.clone();
            offload(move || avatars.resolve(&author))
        };
        let ((), avatar) = tokio::join!(self.persist_chat(&author, &message), avatar);

        let avatar = match avatar {
            Ok(url) => normalize_avatar(url, &self.hub.avatar_placeholder_marker),
            Err(e) => {
                tracing::debug!(username = %author, "avatar lookup failed: {}", e);
                None
            }
        };

        let recipients = self
            .broadcaster
            .chat(&message, &author, avatar.as_deref())
            .await;
        Dispatched::Relayed { recipients }
    }

    /// Appends the message to the room log, best effort. Anonymous chat is
    /// relayed but never stored: a claimed name is not an author.
    async fn persist_chat(&self, author: &str, message: &str) {
        if !self.identity.is_authenticated() {
            tracing::debug!(room = %self.room_name, "anonymous chat message not stored");
            return;
        }

        let store = self.collaborators.messages.clone();
        let room = self.room_name.clone();
        let user = author.to_string();
        let content = message.to_string();
        match offload(move || store.append(&room, &user, &content)).await {
            Ok(Some(saved)) => {
                tracing::debug!(room = %self.room_name, message_id = saved.id, "chat message stored");
            }
            Ok(None) => {
                tracing::debug!(
                    room = %self.room_name,
                    username = %author,
                    "chat message not stored, unknown room or author"
                );
            }
            Err(e) => {
                tracing::warn!(
                    room = %self.room_name,
                    username = %author,
                    "failed to store chat message: {}",
                    e
                );
            }
        }
    }

    async fn handle_video(&self, action: VideoAction, payload: &Value) -> Dispatched {
        let recipients = self
            .broadcaster
            .video(action, payload, self.connection_id)
            .await;
        tracing::trace!(room = %self.room_name, action = action.as_str(), recipients, "video event relayed");
        Dispatched::Relayed { recipients }
    }

    async fn handle_signal(
        &self,
        action: SignalAction,
        target: Option<String>,
        claimed: Option<&str>,
        payload: &Value,
    ) -> Dispatched {
        let sender = self.acting_username(claimed);
        let recipients = self
            .broadcaster
            .signal(action, &sender, payload, target, self.connection_id)
            .await;
        Dispatched::Relayed { recipients }
    }

    async fn handle_kick(&self, kicked: &str) -> Dispatched {
        let Some(actor) = self.identity.username().map(str::to_string) else {
            tracing::debug!(room = %self.room_name, "ignoring kick from anonymous connection");
            return Dispatched::Ignored;
        };

        let directory = self.collaborators.directory.clone();
        let room = self.room_name.clone();
        let lookup_actor = actor.clone();
        let is_owner = match offload(move || directory.is_owner(&room, &lookup_actor)).await {
            Ok(owner) => owner,
            Err(e) => {
                tracing::warn!(
                    room = %self.room_name,
                    username = %actor,
                    "owner lookup failed, treating as non-owner: {}",
                    e
                );
                false
            }
        };

        if !is_owner {
            tracing::debug!(room = %self.room_name, username = %actor, "ignoring kick from non-owner");
            return Dispatched::Ignored;
        }

        tracing::info!(room = %self.room_name, username = %actor, kicked = %kicked, "user kicked");
        let recipients = self.broadcaster.kick(kicked).await;
        Dispatched::Relayed { recipients }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_avatars_become_null() {
        assert_eq!(
            normalize_avatar(Some("/media/user_photos/default.png".into()), "default"),
            None
        );
        assert_eq!(
            normalize_avatar(Some("/media/user_photos/bob.png".into()), "default").as_deref(),
            Some("/media/user_photos/bob.png")
        );
        assert_eq!(normalize_avatar(None, "default"), None);
        assert_eq!(
            normalize_avatar(Some("/default.png".into()), "").as_deref(),
            Some("/default.png")
        );
    }
}

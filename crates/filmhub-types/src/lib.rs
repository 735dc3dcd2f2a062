//! Shared types for the Filmhub room hub.
//!
//! This crate holds the small vocabulary every other crate agrees on: who is
//! acting on a connection ([`Identity`]), how a room name is turned into a
//! transport-safe group key ([`RoomGroupKey`]), and the event kinds clients may
//! send over a room socket ([`VideoAction`], [`SignalAction`]).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Display name used for actions taken by connections that carry no identity.
pub const GUEST_LABEL: &str = "Guest";

/// The resolved identity behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// A user whose session was verified by the identity resolver.
    Authenticated(String),
    /// A connection without a verified session.
    Anonymous,
}

impl Identity {
    /// Returns the username for authenticated identities.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Authenticated(name) => Some(name),
            Self::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Group identifier derived from a room's display name.
///
/// Room names are untrusted and may contain any Unicode, so the key is a
/// SHA-256 digest of the UTF-8 name rather than an encoding of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomGroupKey(String);

impl RoomGroupKey {
    /// Derives the key for `room_name`.
    pub fn from_room_name(room_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(room_name.as_bytes());
        Self(format!("room_{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Playback synchronization actions relayed between room members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoAction {
    Play,
    Pause,
    Seek,
    Sync,
    ChangeVideo,
    RequestSync,
    ResponseSync,
}

impl VideoAction {
    /// Parses the frame `type` string of a playback event.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "play" => Some(Self::Play),
            "pause" => Some(Self::Pause),
            "seek" => Some(Self::Seek),
            "sync" => Some(Self::Sync),
            "change_video" => Some(Self::ChangeVideo),
            "request_sync" => Some(Self::RequestSync),
            "response_sync" => Some(Self::ResponseSync),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Seek => "seek",
            Self::Sync => "sync",
            Self::ChangeVideo => "change_video",
            Self::RequestSync => "request_sync",
            Self::ResponseSync => "response_sync",
        }
    }
}

/// Call negotiation actions relayed between room members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalAction {
    #[serde(rename = "webrtc_offer")]
    Offer,
    #[serde(rename = "webrtc_answer")]
    Answer,
    #[serde(rename = "webrtc_ice_candidate")]
    IceCandidate,
    #[serde(rename = "join_voice")]
    JoinVoice,
}

impl SignalAction {
    /// Parses the frame `type` string of a signaling event.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "webrtc_offer" => Some(Self::Offer),
            "webrtc_answer" => Some(Self::Answer),
            "webrtc_ice_candidate" => Some(Self::IceCandidate),
            "join_voice" => Some(Self::JoinVoice),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "webrtc_offer",
            Self::Answer => "webrtc_answer",
            Self::IceCandidate => "webrtc_ice_candidate",
            Self::JoinVoice => "join_voice",
        }
    }
}

//! Room, participant and chat persistence for Filmhub.
//!
//! This is the storage side of the room hub: looking rooms up by their
//! display name, mirroring live participants into the persisted participant
//! set, appending to the per-room chat log, resolving profile photos, and
//! sweeping rooms nobody has used in a while.
//!
//! Every function takes a borrowed `rusqlite::Connection` and blocks.

mod messages;
mod rooms;
mod users;

use thiserror::Error;

pub use messages::{append_message, list_messages, ChatMessage};
pub use rooms::{
    add_participant, create_room, delete_room, get_room_by_name, is_owner, list_participants,
    remove_participant, stale_rooms, touch_room_activity, CreateRoomParams, ParticipantChange,
    Room,
};
pub use users::{create_user, get_user_photo, set_user_photo, user_exists};

/// Errors raised by room storage operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("room not found: {0}")]
    NotFound(String),
    #[error("user not found: {0}")]
    UnknownUser(String),
}

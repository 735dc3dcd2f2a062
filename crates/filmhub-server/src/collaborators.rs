//! Storage collaborators used by the hub.
//!
//! The traits are synchronous; implementations may block and are always
//! driven through [`offload`].

use filmhub_db::DbPool;
use filmhub_rooms::{ChatMessage, ParticipantChange, Room, RoomError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("storage error: {0}")]
    Storage(#[from] RoomError),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub trait RoomDirectory: Send + Sync + 'static {
    fn find_by_name(&self, room_name: &str) -> Result<Option<Room>, CollaboratorError>;

    fn add_participant(
        &self,
        room_name: &str,
        username: &str,
    ) -> Result<ParticipantChange, CollaboratorError>;

    /// Returns whether a membership row was removed. Unknown rooms are a no-op.
    fn remove_participant(&self, room_name: &str, username: &str)
        -> Result<bool, CollaboratorError>;

    fn touch_activity(&self, room_name: &str) -> Result<bool, CollaboratorError>;

    /// A missing room has no owner.
    fn is_owner(&self, room_name: &str, username: &str) -> Result<bool, CollaboratorError> {
        Ok(self
            .find_by_name(room_name)?
            .is_some_and(|room| room.owner == username))
    }
}

pub trait MessageStore: Send + Sync + 'static {
    /// Appends to the room's chat log. `None` means the message was not kept
    /// (unknown room or author).
    fn append(
        &self,
        room_name: &str,
        username: &str,
        content: &str,
    ) -> Result<Option<ChatMessage>, CollaboratorError>;
}

pub trait AvatarLookup: Send + Sync + 'static {
    fn resolve(&self, username: &str) -> Result<Option<String>, CollaboratorError>;
}

/// The collaborator set a room session works against.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn RoomDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub avatars: Arc<dyn AvatarLookup>,
}

impl Collaborators {
    /// All three collaborators backed by one SQLite pool.
    pub fn sqlite(pool: DbPool) -> Self {
        let store = Arc::new(SqliteStore::new(pool));
        Self {
            directory: store.clone(),
            messages: store.clone(),
            avatars: store,
        }
    }
}

/// Runs a blocking collaborator call on the blocking thread pool.
pub async fn offload<T, F>(f: F) -> Result<T, CollaboratorError>
where
    F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// SQLite implementation of every collaborator, on top of `filmhub-rooms`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl RoomDirectory for SqliteStore {
    fn find_by_name(&self, room_name: &str) -> Result<Option<Room>, CollaboratorError> {
        let conn = self.pool.get()?;
        Ok(filmhub_rooms::get_room_by_name(&conn, room_name)?)
    }

    fn add_participant(
        &self,
        room_name: &str,
        username: &str,
    ) -> Result<ParticipantChange, CollaboratorError> {
        let conn = self.pool.get()?;
        Ok(filmhub_rooms::add_participant(&conn, room_name, username)?)
    }

    fn remove_participant(
        &self,
        room_name: &str,
        username: &str,
    ) -> Result<bool, CollaboratorError> {
        let conn = self.pool.get()?;
        Ok(filmhub_rooms::remove_participant(&conn, room_name, username)?)
    }

    fn touch_activity(&self, room_name: &str) -> Result<bool, CollaboratorError> {
        let conn = self.pool.get()?;
        Ok(filmhub_rooms::touch_room_activity(&conn, room_name)?)
    }

    fn is_owner(&self, room_name: &str, username: &str) -> Result<bool, CollaboratorError> {
        let conn = self.pool.get()?;
        match filmhub_rooms::is_owner(&conn, room_name, username) {
            Ok(owner) => Ok(owner),
            Err(RoomError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl MessageStore for SqliteStore {
    fn append(
        &self,
        room_name: &str,
        username: &str,
        content: &str,
    ) -> Result<Option<ChatMessage>, CollaboratorError> {
        let conn = self.pool.get()?;
        Ok(filmhub_rooms::append_message(
            &conn, room_name, username, content,
        )?)
    }
}

impl AvatarLookup for SqliteStore {
    fn resolve(&self, username: &str) -> Result<Option<String>, CollaboratorError> {
        let conn = self.pool.get()?;
        Ok(filmhub_rooms::get_user_photo(&conn, username)?)
    }
}

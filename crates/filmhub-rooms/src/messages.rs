use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::RoomError;

/// A persisted chat line. Immutable once written.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub id: i64,
    pub room: String,
    pub username: String,
    pub content: String,
    /// Server-assigned creation time (RFC 3339, UTC).
    pub created_at: String,
}

fn map_row_to_message(row: &Row) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        room: row.get(1)?,
        username: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Appends a message to the room's chat log.
///
/// Returns `Ok(None)` without writing anything when either the room or the
/// author is unknown; guests chat without leaving a trace in the log.
pub fn append_message(
    conn: &Connection,
    room_name: &str,
    username: &str,
    content: &str,
) -> Result<Option<ChatMessage>, RoomError> {
    let ids: Option<(i64, i64)> = conn
        .query_row(
            "SELECT r.id, u.id FROM rooms r, users u WHERE r.name = ?1 AND u.username = ?2",
            [room_name, username],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((room_id, user_id)) = ids else {
        return Ok(None);
    };

    conn.execute(
        "INSERT INTO messages (room_id, user_id, content) VALUES (?1, ?2, ?3)",
        params![room_id, user_id, content],
    )?;
    let id = conn.last_insert_rowid();

    let message = conn.query_row(
        "SELECT m.id, r.name, u.username, m.content, m.created_at
         FROM messages m
         JOIN rooms r ON r.id = m.room_id
         JOIN users u ON u.id = m.user_id
         WHERE m.id = ?1",
        [id],
        map_row_to_message,
    )?;
    Ok(Some(message))
}

/// Returns up to `limit` most recent messages of a room, oldest first.
pub fn list_messages(
    conn: &Connection,
    room_name: &str,
    limit: u32,
) -> Result<Vec<ChatMessage>, RoomError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM (
            SELECT m.id, r.name, u.username, m.content, m.created_at
            FROM messages m
            JOIN rooms r ON r.id = m.room_id
            JOIN users u ON u.id = m.user_id
            WHERE r.name = ?1
            ORDER BY m.id DESC
            LIMIT ?2
         ) ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![room_name, limit], map_row_to_message)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::RoomError;

/// Upper bound for idle thresholds, keeps the cutoff arithmetic in range.
const MAX_IDLE_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// A watch room as stored by the directory.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Room {
    pub id: i64,
    /// Human-readable, unique room name. Also the name used in socket paths.
    pub name: String,
    pub description: String,
    /// Username of the room owner.
    pub owner: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub max_participants: u32,
    /// Currently selected movie, if any.
    pub movie_id: Option<i64>,
    pub playback_position: f64,
    pub last_activity: String,
}

#[derive(Debug, Clone)]
pub struct CreateRoomParams {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub password: Option<String>,
    pub max_participants: u32,
    pub movie_id: Option<i64>,
}

/// Outcome of [`add_participant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    Added,
    AlreadyPresent,
    /// The room is at `max_participants`; nothing was recorded.
    RoomFull,
    UnknownRoom,
    UnknownUser,
}

const ROOM_COLUMNS: &str = "r.id, r.name, r.description, u.username, r.password,
    r.max_participants, r.movie_id, r.playback_position, r.last_activity";

fn map_row_to_room(row: &Row) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner: row.get(3)?,
        password: row.get(4)?,
        max_participants: row.get(5)?,
        movie_id: row.get(6)?,
        playback_position: row.get(7)?,
        last_activity: row.get(8)?,
    })
}

/// Creates a room owned by an existing user.
pub fn create_room(conn: &Connection, params: &CreateRoomParams) -> Result<Room, RoomError> {
    let owner_id: i64 = conn
        .query_row(
            "SELECT id FROM users WHERE username = ?1",
            [&params.owner],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| RoomError::UnknownUser(params.owner.clone()))?;

    conn.execute(
        "INSERT INTO rooms (name, description, max_participants, password, owner_id, movie_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            params.name,
            params.description,
            params.max_participants,
            params.password,
            owner_id,
            params.movie_id,
        ],
    )?;

    get_room_by_name(conn, &params.name)?.ok_or_else(|| RoomError::NotFound(params.name.clone()))
}

/// Looks a room up by its exact display name.
pub fn get_room_by_name(conn: &Connection, name: &str) -> Result<Option<Room>, RoomError> {
    let room = conn
        .query_row(
            &format!(
                "SELECT {ROOM_COLUMNS}
                 FROM rooms r JOIN users u ON u.id = r.owner_id
                 WHERE r.name = ?1"
            ),
            [name],
            map_row_to_room,
        )
        .optional()?;
    Ok(room)
}

/// Records `username` as a participant of `room_name`, respecting the room's
/// capacity. Re-adding an existing participant is a no-op.
pub fn add_participant(
    conn: &Connection,
    room_name: &str,
    username: &str,
) -> Result<ParticipantChange, RoomError> {
    let Some((room_id, max_participants)): Option<(i64, i64)> = conn
        .query_row(
            "SELECT id, max_participants FROM rooms WHERE name = ?1",
            [room_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    else {
        return Ok(ParticipantChange::UnknownRoom);
    };

    let Some(user_id): Option<i64> = conn
        .query_row("SELECT id FROM users WHERE username = ?1", [username], |row| {
            row.get(0)
        })
        .optional()?
    else {
        return Ok(ParticipantChange::UnknownUser);
    };

    // Capacity check and insert in one statement so concurrent joins cannot
    // overshoot the limit.
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO room_participants (room_id, user_id)
         SELECT ?1, ?2
         WHERE (SELECT COUNT(*) FROM room_participants WHERE room_id = ?1) < ?3",
        params![room_id, user_id, max_participants],
    )?;
    if inserted == 1 {
        return Ok(ParticipantChange::Added);
    }

    let present: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM room_participants WHERE room_id = ?1 AND user_id = ?2)",
        params![room_id, user_id],
        |row| row.get(0),
    )?;
    Ok(if present {
        ParticipantChange::AlreadyPresent
    } else {
        ParticipantChange::RoomFull
    })
}

/// Removes `username` from the participants of `room_name`.
///
/// Returns whether a participant row was removed. Unknown rooms and users are
/// not errors.
pub fn remove_participant(
    conn: &Connection,
    room_name: &str,
    username: &str,
) -> Result<bool, RoomError> {
    let removed = conn.execute(
        "DELETE FROM room_participants
         WHERE room_id = (SELECT id FROM rooms WHERE name = ?1)
           AND user_id = (SELECT id FROM users WHERE username = ?2)",
        [room_name, username],
    )?;
    Ok(removed > 0)
}

/// Lists participant usernames in join order.
pub fn list_participants(conn: &Connection, room_name: &str) -> Result<Vec<String>, RoomError> {
    let mut stmt = conn.prepare(
        "SELECT u.username
         FROM room_participants p
         JOIN rooms r ON r.id = p.room_id
         JOIN users u ON u.id = p.user_id
         WHERE r.name = ?1
         ORDER BY p.joined_at ASC, u.username ASC",
    )?;
    let rows = stmt.query_map([room_name], |row| row.get(0))?;
    let mut participants = Vec::new();
    for row in rows {
        participants.push(row?);
    }
    Ok(participants)
}

/// Checks whether `username` owns `room_name`.
///
/// A missing room is reported as [`RoomError::NotFound`] so callers can tell
/// it apart from "exists, but someone else owns it".
pub fn is_owner(conn: &Connection, room_name: &str, username: &str) -> Result<bool, RoomError> {
    let owner: String = conn
        .query_row(
            "SELECT u.username FROM rooms r JOIN users u ON u.id = r.owner_id WHERE r.name = ?1",
            [room_name],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| RoomError::NotFound(room_name.to_string()))?;
    Ok(owner == username)
}

/// Bumps `last_activity` to now. Returns `false` for unknown rooms.
pub fn touch_room_activity(conn: &Connection, room_name: &str) -> Result<bool, RoomError> {
    let updated = conn.execute(
        "UPDATE rooms SET last_activity = datetime('now') WHERE name = ?1",
        [room_name],
    )?;
    Ok(updated > 0)
}

/// Names of rooms whose last activity is older than `idle_secs`.
pub fn stale_rooms(conn: &Connection, idle_secs: u64) -> Result<Vec<String>, RoomError> {
    let idle = chrono::Duration::seconds(idle_secs.min(MAX_IDLE_SECS) as i64);
    let cutoff = (chrono::Utc::now() - idle)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    let mut stmt =
        conn.prepare("SELECT name FROM rooms WHERE last_activity < ?1 ORDER BY last_activity")?;
    let rows = stmt.query_map([cutoff], |row| row.get(0))?;
    let mut names = Vec::new();
    for row in rows {
        names.push(row?);
    }
    Ok(names)
}

/// Deletes a room together with its participants and chat log. A private
/// movie attached to the room goes with it.
///
/// Returns `false` if the room did not exist.
pub fn delete_room(conn: &Connection, room_name: &str) -> Result<bool, RoomError> {
    let tx = conn.unchecked_transaction()?;

    let Some((room_id, private_movie)): Option<(i64, Option<i64>)> = tx
        .query_row(
            "SELECT r.id, CASE WHEN m.is_private = 1 THEN m.id END
             FROM rooms r LEFT JOIN movies m ON m.id = r.movie_id
             WHERE r.name = ?1",
            [room_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    else {
        return Ok(false);
    };

    tx.execute("DELETE FROM rooms WHERE id = ?1", [room_id])?;
    if let Some(movie_id) = private_movie {
        tx.execute("DELETE FROM movies WHERE id = ?1", [movie_id])?;
        tracing::debug!(room = room_name, movie_id, "deleted private movie with room");
    }
    tx.commit()?;
    Ok(true)
}

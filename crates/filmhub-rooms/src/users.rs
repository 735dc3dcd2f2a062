use rusqlite::{params, Connection, OptionalExtension};

use crate::RoomError;

/// Inserts a user and returns its row id.
pub fn create_user(conn: &Connection, username: &str) -> Result<i64, RoomError> {
    conn.execute("INSERT INTO users (username) VALUES (?1)", [username])?;
    Ok(conn.last_insert_rowid())
}

pub fn user_exists(conn: &Connection, username: &str) -> Result<bool, RoomError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        [username],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Sets (or clears, with `None`) the profile photo URL of a user.
pub fn set_user_photo(
    conn: &Connection,
    username: &str,
    photo_url: Option<&str>,
) -> Result<(), RoomError> {
    let user_id: i64 = conn
        .query_row("SELECT id FROM users WHERE username = ?1", [username], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or_else(|| RoomError::UnknownUser(username.to_string()))?;

    conn.execute(
        "INSERT INTO user_profiles (user_id, photo_url) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO UPDATE SET photo_url = excluded.photo_url",
        params![user_id, photo_url],
    )?;
    Ok(())
}

/// Returns the stored profile photo URL, if the user has one.
///
/// Unknown users and users without a profile row both yield `None`.
pub fn get_user_photo(conn: &Connection, username: &str) -> Result<Option<String>, RoomError> {
    let photo: Option<Option<String>> = conn
        .query_row(
            "SELECT p.photo_url
             FROM users u JOIN user_profiles p ON p.user_id = u.id
             WHERE u.username = ?1",
            [username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(photo.flatten().filter(|url| !url.is_empty()))
}

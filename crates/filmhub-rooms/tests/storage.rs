use filmhub_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use filmhub_rooms::{
    add_participant, append_message, create_room, create_user, delete_room, get_room_by_name,
    get_user_photo, is_owner, list_messages, list_participants, remove_participant,
    set_user_photo, stale_rooms, touch_room_activity, CreateRoomParams, ParticipantChange,
    RoomError,
};

fn setup() -> (tempfile::NamedTempFile, DbPool) {
    let file = tempfile::NamedTempFile::new().expect("tempfile");
    let pool = create_pool(file.path().to_str().unwrap(), DbRuntimeSettings::default())
        .expect("pool");
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        create_user(&conn, "alice").unwrap();
        create_user(&conn, "bob").unwrap();
        create_user(&conn, "carol").unwrap();
        create_room(
            &conn,
            &CreateRoomParams {
                name: "movie-night".to_string(),
                description: "friday".to_string(),
                owner: "alice".to_string(),
                password: None,
                max_participants: 2,
                movie_id: None,
            },
        )
        .unwrap();
    }
    (file, pool)
}

#[test]
fn room_lookup_by_name() {
    let (_file, pool) = setup();
    let conn = pool.get().unwrap();

    let room = get_room_by_name(&conn, "movie-night").unwrap().expect("room");
    assert_eq!(room.owner, "alice");
    assert_eq!(room.max_participants, 2);
    assert!(get_room_by_name(&conn, "nope").unwrap().is_none());
}

#[test]
fn participants_respect_capacity_and_are_idempotent() {
    let (_file, pool) = setup();
    let conn = pool.get().unwrap();

    assert_eq!(
        add_participant(&conn, "movie-night", "alice").unwrap(),
        ParticipantChange::Added
    );
    assert_eq!(
        add_participant(&conn, "movie-night", "alice").unwrap(),
        ParticipantChange::AlreadyPresent
    );
    assert_eq!(
        add_participant(&conn, "movie-night", "bob").unwrap(),
        ParticipantChange::Added
    );
    assert_eq!(
        add_participant(&conn, "movie-night", "carol").unwrap(),
        ParticipantChange::RoomFull
    );
    assert_eq!(
        add_participant(&conn, "missing", "carol").unwrap(),
        ParticipantChange::UnknownRoom
    );
    assert_eq!(
        add_participant(&conn, "movie-night", "mallory").unwrap(),
        ParticipantChange::UnknownUser
    );

    assert_eq!(
        list_participants(&conn, "movie-night").unwrap(),
        vec!["alice".to_string(), "bob".to_string()]
    );

    assert!(remove_participant(&conn, "movie-night", "bob").unwrap());
    assert!(!remove_participant(&conn, "movie-night", "bob").unwrap());
    assert!(!remove_participant(&conn, "missing", "bob").unwrap());
    assert_eq!(
        list_participants(&conn, "movie-night").unwrap(),
        vec!["alice".to_string()]
    );
}

#[test]
fn ownership_check() {
    let (_file, pool) = setup();
    let conn = pool.get().unwrap();

    assert!(is_owner(&conn, "movie-night", "alice").unwrap());
    assert!(!is_owner(&conn, "movie-night", "bob").unwrap());
    assert!(matches!(
        is_owner(&conn, "missing", "alice"),
        Err(RoomError::NotFound(_))
    ));
}

#[test]
fn chat_log_appends_known_authors_only() {
    let (_file, pool) = setup();
    let conn = pool.get().unwrap();

    let saved = append_message(&conn, "movie-night", "bob", "popcorn?")
        .unwrap()
        .expect("persisted");
    assert_eq!(saved.room, "movie-night");
    assert_eq!(saved.username, "bob");
    assert!(saved.created_at.ends_with('Z'));

    assert!(append_message(&conn, "movie-night", "Guest", "hi").unwrap().is_none());
    assert!(append_message(&conn, "missing", "bob", "hi").unwrap().is_none());

    append_message(&conn, "movie-night", "alice", "yes").unwrap();
    append_message(&conn, "movie-night", "bob", "great").unwrap();

    let last_two: Vec<String> = list_messages(&conn, "movie-night", 2)
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(last_two, vec!["yes", "great"]);
}

#[test]
fn photos_resolve_per_user() {
    let (_file, pool) = setup();
    let conn = pool.get().unwrap();

    assert_eq!(get_user_photo(&conn, "alice").unwrap(), None);
    set_user_photo(&conn, "alice", Some("/media/user_photos/alice.png")).unwrap();
    assert_eq!(
        get_user_photo(&conn, "alice").unwrap().as_deref(),
        Some("/media/user_photos/alice.png")
    );
    set_user_photo(&conn, "alice", None).unwrap();
    assert_eq!(get_user_photo(&conn, "alice").unwrap(), None);
    assert_eq!(get_user_photo(&conn, "nobody").unwrap(), None);
    assert!(matches!(
        set_user_photo(&conn, "nobody", Some("x")),
        Err(RoomError::UnknownUser(_))
    ));
}

#[test]
fn stale_rooms_are_found_and_deleted_with_private_movies() {
    let (_file, pool) = setup();
    let conn = pool.get().unwrap();

    conn.execute_batch(
        "INSERT INTO movies (title, is_private) VALUES ('home video', 1);
         INSERT INTO movies (title, is_private) VALUES ('public film', 0);",
    )
    .unwrap();
    for (name, movie_id) in [("old-private", 1), ("old-public", 2)] {
        create_room(
            &conn,
            &CreateRoomParams {
                name: name.to_string(),
                description: String::new(),
                owner: "bob".to_string(),
                password: None,
                max_participants: 10,
                movie_id: Some(movie_id),
            },
        )
        .unwrap();
    }
    conn.execute(
        "UPDATE rooms SET last_activity = datetime('now', '-3 days') WHERE name LIKE 'old-%'",
        [],
    )
    .unwrap();

    let stale = stale_rooms(&conn, 24 * 60 * 60).unwrap();
    assert_eq!(stale.len(), 2);
    assert!(!stale.contains(&"movie-night".to_string()));

    assert!(touch_room_activity(&conn, "old-public").unwrap());
    assert_eq!(stale_rooms(&conn, 24 * 60 * 60).unwrap(), vec!["old-private"]);

    assert!(delete_room(&conn, "old-private").unwrap());
    assert!(!delete_room(&conn, "old-private").unwrap());

    let movies: i64 = conn
        .query_row("SELECT COUNT(*) FROM movies", [], |r| r.get(0))
        .unwrap();
    assert_eq!(movies, 1, "private movie is removed with its room");
}

use axum::body::Body;
use axum::http::{Request, StatusCode};
use filmhub_server::config::HubConfig;
use filmhub_server::identity::derive_token_secret;
use filmhub_server::registry::ConnectionHandle;
use filmhub_server::{app, AppState};
use filmhub_types::{Identity, RoomGroupKey};
use serde_json::Value;
use tower::ServiceExt;

#[tokio::test]
async fn health_reports_live_rooms() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let pool = filmhub_db::create_pool(
        file.path().to_str().unwrap(),
        filmhub_db::DbRuntimeSettings::default(),
    )
    .unwrap();
    filmhub_db::run_migrations(&pool.get().unwrap()).unwrap();

    let state = AppState::with_sqlite(pool, derive_token_secret(b"health"), HubConfig::default());
    let (handle, _outbox) = ConnectionHandle::open(Identity::Anonymous, 4);
    state
        .registry
        .join(&RoomGroupKey::from_room_name("lobby"), handle)
        .await;

    let response = app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["rooms"], 1);
}

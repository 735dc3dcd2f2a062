//! Background task that deletes rooms nobody has used in a while.

use crate::collaborators::{offload, CollaboratorError};
use crate::config::CleanupConfig;
use crate::registry::ConnectionRegistry;
use filmhub_db::DbPool;
use filmhub_types::RoomGroupKey;
use tokio::time::{sleep, Duration};

/// Deletes rooms idle for more than `idle_secs` that have no live connection.
/// Returns the number of rooms removed.
pub async fn sweep_stale_rooms(
    pool: &DbPool,
    registry: &ConnectionRegistry,
    idle_secs: u64,
) -> Result<usize, CollaboratorError> {
    let lookup_pool = pool.clone();
    let candidates = offload(move || {
        let conn = lookup_pool.get()?;
        Ok(filmhub_rooms::stale_rooms(&conn, idle_secs)?)
    })
    .await?;

    let mut doomed = Vec::with_capacity(candidates.len());
    for name in candidates {
        let live = registry
            .connection_count(&RoomGroupKey::from_room_name(&name))
            .await;
        if live > 0 {
            tracing::debug!(room = %name, live, "stale room still has connections, keeping it");
            continue;
        }
        doomed.push(name);
    }
    if doomed.is_empty() {
        return Ok(0);
    }

    let delete_pool = pool.clone();
    offload(move || {
        let conn = delete_pool.get()?;
        let mut deleted = 0;
        for name in &doomed {
            if filmhub_rooms::delete_room(&conn, name)? {
                tracing::info!(room = %name, "deleted stale room");
                deleted += 1;
            }
        }
        Ok(deleted)
    })
    .await
}

/// Starts the stale-room sweeper. Runs until the process exits.
pub async fn start_cleanup_task(pool: DbPool, registry: ConnectionRegistry, config: CleanupConfig) {
    if config.stale_room_after_secs == 0 || config.interval_secs == 0 {
        tracing::warn!("stale room cleanup disabled");
        return;
    }

    let interval = Duration::from_secs(config.interval_secs);
    tracing::info!(
        stale_room_after_secs = config.stale_room_after_secs,
        interval_secs = config.interval_secs,
        "starting stale room cleanup task"
    );

    loop {
        sleep(interval).await;

        match sweep_stale_rooms(&pool, &registry, config.stale_room_after_secs).await {
            Ok(0) => tracing::debug!("no stale rooms to delete"),
            Ok(count) => tracing::info!(count, "deleted stale rooms"),
            Err(e) => tracing::error!(error = %e, "stale room cleanup failed"),
        }
    }
}

use crate::{
    api::{with_conn, AppState},
    rooms,
};
use std::time::Instant;
use time::OffsetDateTime;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

const SWEEP_EVERY: Duration = Duration::from_secs(10);

/// Spawn the periodic cleanup task: presence timeouts, idle rooms, caches.
pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let mut tick = interval(SWEEP_EVERY);
        loop {
            tick.tick().await;
            sweep(&state).await;
        }
    });
}

/// One cleanup pass.
pub async fn sweep(state: &AppState) {
    let stale = state.presence.take_stale(Instant::now());
    for (room_id, participants) in stale {
        let id = room_id.clone();
        let marked =
            with_conn(&state.pool, move |conn| rooms::set_offline(conn, &id, &participants)).await;
        match marked {
            Ok(true) => debug!(room = %room_id, "participants marked offline"),
            Ok(false) => {}
            Err(crate::error::RoomError::NotFound) => {}
            Err(e) => warn!(room = %room_id, error = %e, "presence sweep failed"),
        }
    }

    let cutoff =
        OffsetDateTime::now_utc().unix_timestamp() - state.config.room_ttl.as_secs() as i64;
    match with_conn(&state.pool, move |conn| rooms::delete_idle_rooms(conn, cutoff)).await {
        Ok(0) => {}
        Ok(n) => info!(deleted = n, "idle rooms removed"),
        Err(e) => warn!(error = %e, "room cleanup failed"),
    }

    let purged = state.describer.purge_expired(Instant::now());
    if purged > 0 {
        debug!(purged, "description cache trimmed");
    }
    state.session_limiter.prune().await;
}

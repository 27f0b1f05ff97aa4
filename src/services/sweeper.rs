// Periodic deletion of expired session and invite rows

use std::time::Duration;
use tracing::{info, warn};

use crate::db::DieselPool;
use crate::models::invite::Invite;
use crate::models::session::Session;

/// Spawn the background sweeper; runs until the process exits
pub fn spawn_sweeper(pool: DieselPool, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(60)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let mut conn = match pool.get().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("sweeper could not get a connection: {}", e);
                    continue;
                },
            };

            let now = chrono::Utc::now();
            match Session::delete_expired_before(&mut conn, now).await {
                Ok(n) if n > 0 => info!("sweeper deleted {} expired sessions", n),
                Ok(_) => {},
                Err(e) => warn!("sweeper session pass failed: {}", e),
            }
            match Invite::delete_expired_before(&mut conn, now).await {
                Ok(n) if n > 0 => info!("sweeper deleted {} expired invites", n),
                Ok(_) => {},
                Err(e) => warn!("sweeper invite pass failed: {}", e),
            }
        }
    });
}

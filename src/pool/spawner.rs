//! Look-ahead connection spawner.
//!
//! Keeps a pool's ready queue topped up so steady traffic rarely waits on a
//! dial. Requests are served correctly without it.

use std::sync::Weak;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::Shutdown;
use crate::pool::Pool;

pub async fn run(pool: Weak<Pool>, interval: Duration, target: usize, shutdown: Shutdown) {
    let mut stop = shutdown.subscribe();
    if shutdown.is_triggered() {
        return;
    }

    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.recv() => break,
        }

        let Some(pool) = pool.upgrade() else {
            break;
        };
        let started = pool.top_up(target);
        if started > 0 {
            tracing::trace!(pool = %pool.name(), started = started, "Look-ahead dials started");
        }
    }

    tracing::debug!("Look-ahead spawner stopped");
}

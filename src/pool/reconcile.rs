//! Background node-file reconciliation loop.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

use crate::lifecycle::Shutdown;
use crate::pool::Pool;

/// Reconcile `pool` every `interval`, or sooner when woken.
///
/// Passes only run while the pool is enabled. The loop ends on shutdown or
/// once the pool has been dropped.
pub async fn run(pool: Weak<Pool>, wake: Arc<Notify>, interval: Duration, shutdown: Shutdown) {
    let mut stop = shutdown.subscribe();
    if shutdown.is_triggered() {
        return;
    }

    loop {
        {
            let Some(pool) = pool.upgrade() else {
                break;
            };
            if pool.is_enabled() {
                if let Err(e) = pool.reconcile().await {
                    tracing::error!(pool = %pool.name(), error = %e, "Reconciliation failed");
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wake.notified() => {}
            _ = stop.recv() => break,
        }
    }

    tracing::debug!("Reconciliation loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::control::Configurable;
    use std::io::Write;

    #[tokio::test]
    async fn enabling_triggers_a_pass() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.0.0.9:8080").unwrap();

        let settings = Arc::new(RuntimeConfig {
            reconcile_interval_secs: 3600,
            ..RuntimeConfig::default()
        });
        let shutdown = Shutdown::new();
        let pool = Pool::new("bg", settings, shutdown.clone());
        pool.set_node_file(file.path()).unwrap();
        assert_eq!(pool.generation(), 0);

        pool.enable().unwrap();
        for _ in 0..100 {
            if pool.generation() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.generation(), 1);
        assert_eq!(pool.backends()[0].addr(), "10.0.0.9:8080");

        shutdown.trigger();
    }
}

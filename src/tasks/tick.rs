//! Clock Tick Task
//!
//! Background task that refreshes the cache's time snapshot once per tick
//! and unloads static pages that have gone unused.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::PageCache;

/// Spawns a background task driving the cache's scheduling tick.
///
/// Each tick takes one clock snapshot shared by every staleness check until
/// the next tick, then unloads static pages idle for at least `static_idle`.
///
/// # Arguments
/// * `cache` - handle to the cache to drive
/// * `tick` - interval between snapshots
/// * `static_idle` - idle time after which a static page is unloaded
///
/// # Returns
/// A JoinHandle for the spawned task, aborted during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = PageCache::new(&Config::default());
/// let tick_handle = spawn_clock_task(cache.clone(), Duration::from_millis(100), Duration::from_secs(300));
/// // Later, during shutdown:
/// tick_handle.abort();
/// ```
pub fn spawn_clock_task(cache: PageCache, tick: Duration, static_idle: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting clock task with a tick of {}ms",
            tick.as_millis()
        );

        loop {
            // Sleep for the configured tick
            tokio::time::sleep(tick).await;

            cache.refresh_time();

            let evicted = cache.evict_idle_static(static_idle);
            if evicted > 0 {
                info!("Static cleanup: unloaded {} idle pages", evicted);
            } else {
                debug!("Static cleanup: no idle pages");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_clock_task_refreshes_time() {
        let cache = PageCache::new(&Config::default());
        let before = cache.time().monotonic();

        let handle = spawn_clock_task(cache.clone(), Duration::from_millis(20), Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.time().monotonic() > before, "clock should have advanced");
        handle.abort();
    }

    #[tokio::test]
    async fn test_clock_task_unloads_idle_static_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("favicon.ico");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        let cache = PageCache::new(&Config::default());
        cache.load_static_page(&path).unwrap();

        let handle = spawn_clock_task(cache.clone(), Duration::from_millis(20), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(cache.stats().static_evictions >= 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_clock_task_can_be_aborted() {
        let cache = PageCache::new(&Config::default());

        let handle = spawn_clock_task(cache, Duration::from_secs(1), Duration::from_secs(1));

        // Abort immediately
        handle.abort();

        // Wait a bit and verify task is finished
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}

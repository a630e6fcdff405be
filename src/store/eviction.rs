use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::disk::DiskStore;

/// One pass of the LRU policy: when occupancy exceeds `high`, remove
/// least-recently-accessed entries until it falls to `low`. Pinned entries
/// are skipped and retried on the next pass. Returns the bytes freed.
pub async fn run_eviction_pass(store: &DiskStore, high: u64, low: u64) -> u64 {
    let occupied = store.occupied_bytes();
    if occupied <= high {
        return 0;
    }

    tracing::info!(
        "Eviction pass: {} bytes occupied exceeds high watermark {}",
        occupied,
        high
    );

    let mut freed = 0u64;
    for (key, _, size) in store.lru_snapshot() {
        if store.occupied_bytes() <= low {
            break;
        }
        if store.is_pinned(&key) {
            tracing::debug!("Skipping pinned entry during eviction");
            continue;
        }
        match store.delete(&key).await {
            Ok(()) => {
                freed += size;
                tracing::debug!("Evicted entry ({} bytes)", size);
            }
            Err(e) => {
                tracing::warn!("Failed to evict entry: {}", e);
            }
        }
    }

    tracing::info!(
        "Eviction pass done: freed {} bytes, {} occupied",
        freed,
        store.occupied_bytes()
    );

    freed
}

/// Background eviction driver. Runs on its own schedule, never inside a
/// request path.
pub fn spawn_eviction_loop(
    store: Arc<DiskStore>,
    high: u64,
    low: u64,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            run_eviction_pass(&store, high, low).await;
        }
    })
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{now_ms, Engine, EngineError};
use crate::model::Ms;
use crate::observability::RESERVATIONS_PURGED_TOTAL;
use crate::store::{StoreError, WalStore};

const RETENTION_TICK: Duration = Duration::from_secs(60);
const COMPACTION_TICK: Duration = Duration::from_secs(5);

/// One retention pass: drop reservations that ended more than `retention`
/// before `now`.
pub async fn sweep_retention(engine: &Engine, retention: Duration, now: Ms) -> Result<usize, EngineError> {
    let cutoff = now.saturating_sub(retention.as_millis() as Ms);
    let purged = engine.purge_ended(cutoff).await?;
    metrics::counter!(RESERVATIONS_PURGED_TOTAL).increment(purged as u64);
    Ok(purged)
}

/// Background task that periodically purges past reservations.
pub async fn run_retention(engine: Arc<Engine>, retention: Duration) {
    info!("retention sweep enabled: {}ms", retention.as_millis());
    let mut interval = tokio::time::interval(RETENTION_TICK);
    loop {
        interval.tick().await;
        if let Err(e) = sweep_retention(&engine, retention, now_ms()).await {
            // Next tick retries whatever is left.
            warn!("retention sweep failed: {e}");
        }
    }
}

/// Rewrite the WAL once it has grown past `threshold` appends.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    debug!("compacting WAL after {appends} appends");
    store.compact().await?;
    Ok(true)
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACTION_TICK);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

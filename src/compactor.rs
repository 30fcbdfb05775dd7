use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::store::JournalStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task: rewrite the journal once it has grown by `threshold` appends.
pub async fn run_compactor(store: Arc<JournalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if compact_if_needed(&store, threshold).await {
            info!("journal compacted after reaching {threshold} appends");
        }
    }
}

/// Returns true if a compaction ran and succeeded.
pub async fn compact_if_needed(store: &JournalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => true,
        Err(e) => {
            error!("journal compaction failed: {e}");
            false
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::observability::WAL_COMPACTIONS_TOTAL;
use crate::store::Ledger;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that rewrites the ledger WAL once it has grown by
/// `threshold` appends since the last compaction.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&ledger, threshold).await;
    }
}

/// Spawn [`run_compactor`] for a durable ledger. `None` for an in-memory one.
pub fn spawn_compactor(ledger: Arc<Ledger>, config: &Config) -> Option<JoinHandle<()>> {
    if !ledger.is_durable() {
        return None;
    }
    Some(tokio::spawn(run_compactor(ledger, config.compact_threshold)))
}

/// One check. Returns true if the WAL was compacted.
pub async fn compact_if_needed(ledger: &Ledger, threshold: u64) -> bool {
    if !ledger.is_durable() {
        return false;
    }
    let appends = ledger.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return false;
    }
    match ledger.compact().await {
        Ok(()) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!(appends, "compacted ledger WAL");
            true
        }
        Err(e) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            warn!(error = %e, "WAL compaction failed");
            false
        }
    }
}

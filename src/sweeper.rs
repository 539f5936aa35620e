use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::Coordinator;
use crate::store::WalStore;

/// Background task that moves reservations of finished screenings to
/// Completed and drops their ledger entries.
pub async fn run_completer(coordinator: Arc<Coordinator>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        if let Err(e) = coordinator.complete_elapsed().await {
            tracing::warn!("completion sweep failed: {e}");
        }
    }
}

/// Background task that rewrites the log once enough records have been
/// appended since the last rewrite.
pub async fn run_compactor(
    store: Arc<WalStore>,
    threshold: u64,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        let appended = match store.appends_since_compact().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("compactor: {e}");
                continue;
            }
        };
        if appended < threshold {
            continue;
        }
        match store.compact().await {
            Ok(kept) => info!("compacted log after {appended} appends, {kept} records kept"),
            Err(e) => tracing::warn!("compaction failed: {e}"),
        }
    }
}

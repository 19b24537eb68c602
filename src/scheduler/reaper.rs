//! Periodic return of expired leases to `pending`.
//!
//! The store update is self-guarding (`lease_expires_at < now`), so the
//! reaper is idempotent and safe to run from multiple instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::store::Store;

pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs until `shutdown` fires, reaping every `interval`.
pub async fn run(store: Arc<dyn Store>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Reaper stopped");
                return;
            }
            _ = ticker.tick() => {
                match store.reap_expired_leases(Utc::now()).await {
                    Ok(reaped) => {
                        if !reaped.is_empty() {
                            tracing::info!(count = reaped.len(), "Returned expired leases to pending");
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Lease reap pass failed");
                    }
                }
            }
        }
    }
}

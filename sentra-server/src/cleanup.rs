//! Background cleanup: purge expired idempotency keys.

use crate::storage::{IdempotencyStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

pub fn spawn_cleanup_task(idempotency: Arc<dyn IdempotencyStore>) {
    tokio::spawn(async move {
        let mut interval = time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            run_cleanup(idempotency.as_ref());
        }
    });
}

fn run_cleanup(idempotency: &dyn IdempotencyStore) {
    match idempotency.purge_expired() {
        Ok(0) | Err(StoreError::NotConfigured) => {}
        Ok(n) => tracing::debug!("purged {} expired idempotency keys", n),
        Err(e) => tracing::error!("Cleanup error: {}", e),
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Days;
use tracing::{debug, warn};

use crate::engine::{AppointmentLedger, Engine};

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Periodic housekeeping: compact the WAL once enough appends pile up, and
/// forget per-day locks for days that can no longer be booked.
pub async fn run_compactor(
    engine: Arc<Engine>,
    ledger: Arc<AppointmentLedger>,
    threshold: u64,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every.max(MIN_PERIOD));
    loop {
        interval.tick().await;
        sweep(&engine, &ledger, threshold).await;
    }
}

async fn sweep(engine: &Engine, ledger: &AppointmentLedger, threshold: u64) {
    if ledger.appends_since_compact().await >= threshold
        && let Err(e) = ledger.compact().await
    {
        warn!("WAL compaction failed: {e}");
    }

    let yesterday = engine.now().date() - Days::new(1);
    let pruned = engine.prune_day_locks(yesterday);
    let channels = engine.notify.prune();
    if pruned > 0 || channels > 0 {
        debug!(pruned, channels, "pruned idle day locks and channels");
    }
}

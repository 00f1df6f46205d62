//! Background replenishment
//!
//! One task per running pool. It seeds the buffer from persisted blobs, then
//! wakes on whichever comes first: the done signal, a consumption feedback
//! signal, or the one-second tick. Below the low-water mark it asks the
//! authority for more and inserts the batch through the buffer's blocking
//! insertion path.
//!
//! Authority and parse failures never stop the task; the next wake retries.

use std::sync::Arc;
use std::time::Duration;

use tcert::TCert;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::pool::Shared;
use crate::telemetry;

/// Period of the fallback wake-up when no feedback arrives.
pub const REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// How many tcerts to request for the given occupancy, or `None` when the
/// buffer is at or above the low-water mark (`batch_size`).
///
/// From empty, only a tenth of capacity is requested (at least one) to avoid
/// a large burst fetch; otherwise the request tops the buffer up to capacity.
pub fn refill_quantity(occupancy: usize, batch_size: usize, capacity: usize) -> Option<usize> {
    if occupancy >= batch_size {
        return None;
    }
    if occupancy == 0 {
        Some((capacity / 10).max(1))
    } else {
        Some(capacity - occupancy)
    }
}

/// Run the filler until `done` fires (or its sender is dropped).
///
/// Returns tcerts that were fetched but could not be inserted before the done
/// signal, so the caller can persist them along with the drained buffer.
pub(crate) async fn run(
    shared: Arc<Shared>,
    seed: Vec<Vec<u8>>,
    mut done: oneshot::Receiver<()>,
) -> Vec<TCert> {
    seed_buffer(&shared, seed);

    let mut feedback = shared.feedback_rx.lock().await;
    let mut ticker = tokio::time::interval(REFILL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick, the seed pass just ran
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = &mut done => {
                debug!("done signal received");
                break;
            }
            _ = feedback.recv() => {
                debug!("feedback received, checking tcerts");
            }
            _ = ticker.tick() => {
                debug!("refill interval elapsed, checking tcerts");
            }
        }

        let buffered = shared.buffer.len();
        let Some(count) = refill_quantity(buffered, shared.batch_size, shared.buffer.capacity())
        else {
            continue;
        };

        debug!(buffered, count, "refilling tcert pool");
        telemetry::record_refill_requested(count);

        let fetched = tokio::select! {
            biased;
            _ = &mut done => {
                debug!("done signal received during fetch");
                break;
            }
            result = shared.authority.fetch_tcerts(count) => result,
        };

        match fetched {
            Ok(tcerts) => {
                if let Some(pending) = insert(&shared, tcerts, &mut done).await {
                    debug!(
                        pending = pending.len(),
                        "done signal received while inserting, handing back pending tcerts"
                    );
                    return pending;
                }
            }
            Err(e) => {
                warn!(error = %e, count, "failed getting tcerts from the authority, will retry next wake");
                telemetry::record_fetch_error();
            }
        }
    }

    debug!("tcert filler stopped");
    Vec::new()
}

/// Parse persisted blobs and push them without blocking.
///
/// Unparseable blobs are skipped. Once the buffer is full the remaining
/// blobs are dropped.
fn seed_buffer(shared: &Shared, blobs: Vec<Vec<u8>>) {
    debug!(count = blobs.len(), "found unused tcerts");

    let total = blobs.len();
    let mut seeded = 0usize;
    for (index, der) in blobs.iter().enumerate() {
        let tcert = match shared.authority.tcert_from_der(der) {
            Ok(tcert) => tcert,
            Err(e) => {
                error!(index, error = %e, "failed parsing persisted tcert, skipping");
                continue;
            }
        };
        if shared.buffer.try_push(tcert).is_err() {
            warn!(
                dropped = total - index,
                capacity = shared.buffer.capacity(),
                "tcert buffer full, dropping remaining persisted tcerts"
            );
            break;
        }
        seeded += 1;
    }

    telemetry::set_buffered(shared.buffer.len());
    debug!(seeded, "load unused tcerts done");
}

/// Insert a fetched batch, waiting for space as needed.
///
/// Returns `Some(pending)` if the done signal fired first; `pending` holds
/// every tcert from the batch that did not make it into the buffer.
async fn insert(
    shared: &Shared,
    tcerts: Vec<TCert>,
    done: &mut oneshot::Receiver<()>,
) -> Option<Vec<TCert>> {
    let fetched = tcerts.len();
    let mut tcerts = tcerts.into_iter();

    while let Some(tcert) = tcerts.next() {
        let slot = tokio::select! {
            biased;
            _ = &mut *done => {
                let mut pending = vec![tcert];
                pending.extend(tcerts);
                return Some(pending);
            }
            slot = shared.buffer.reserve() => slot,
        };
        slot.put(tcert);
    }

    let buffered = shared.buffer.len();
    telemetry::set_buffered(buffered);
    debug!(fetched, buffered, "tcerts received from the authority");
    None
}

//! Pool metrics
//!
//! Emitted through the `metrics` facade; without an installed recorder every
//! call is a no-op.
//!
//! - `tcert_pool_issued_total` (counter)
//! - `tcert_pool_exhausted_total` (counter): `EmptyPool` returned to a caller
//! - `tcert_pool_refill_requested_total` (counter): tcerts requested from the authority
//! - `tcert_pool_fetch_errors_total` (counter)
//! - `tcert_pool_buffered` (gauge)

pub(crate) fn record_issued() {
    metrics::counter!("tcert_pool_issued_total").increment(1);
}

pub(crate) fn record_exhausted() {
    metrics::counter!("tcert_pool_exhausted_total").increment(1);
}

pub(crate) fn record_refill_requested(count: usize) {
    metrics::counter!("tcert_pool_refill_requested_total").increment(count as u64);
}

pub(crate) fn record_fetch_error() {
    metrics::counter!("tcert_pool_fetch_errors_total").increment(1);
}

pub(crate) fn set_buffered(len: usize) {
    metrics::gauge!("tcert_pool_buffered").set(len as f64);
}

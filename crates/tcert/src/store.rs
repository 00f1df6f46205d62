//! Persistence seam for tcerts
//!
//! The store is shared: the pool holds an `Arc<dyn TCertStore>` and other
//! subsystems of the hosting client may use the same instance. Implementations
//! must be safe for concurrent calls from the issuing path and the drain path.

use std::future::Future;
use std::pin::Pin;

use crate::cert::TCert;
use crate::error::Result;

/// Durable home for tcerts across process restarts.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TCertStore>`).
pub trait TCertStore: Send + Sync {
    /// Raw DER blobs persisted by an earlier `store_unused_tcerts` call.
    ///
    /// Blobs already recorded through `store_used_tcert` are never returned.
    fn load_unused_tcerts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<u8>>>> + Send + '_>>;

    /// Persist the still-unused tcerts drained from the pool on shutdown.
    ///
    /// Replaces whatever unused set was persisted before.
    fn store_unused_tcerts<'a>(
        &'a self,
        tcerts: &'a [TCert],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Record a tcert as consumed. Must be durable when the future resolves.
    fn store_used_tcert<'a>(
        &'a self,
        tcert: &'a TCert,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

//! Supply seam for tcerts

use std::future::Future;
use std::pin::Pin;

use crate::cert::TCert;
use crate::error::Result;

/// Client of the transaction certificate authority.
///
/// The pool never inserts on the authority's behalf and the authority never
/// sees the pool: `fetch_tcerts` returns the batch and the caller decides
/// where it goes.
pub trait TCertAuthority: Send + Sync {
    /// Parse a raw blob (persisted or freshly fetched) into a tcert.
    fn tcert_from_der(&self, der: &[u8]) -> Result<TCert> {
        TCert::from_der(der)
    }

    /// Fetch up to `count` new tcerts from the authority.
    fn fetch_tcerts(&self, count: usize)
    -> Pin<Box<dyn Future<Output = Result<Vec<TCert>>> + Send + '_>>;
}

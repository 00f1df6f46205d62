//! In-memory `TCertStore`
//!
//! Same load/store semantics as `FileTCertStore` without the disk. Useful for
//! embedding the pool in short-lived processes and for tests.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::cert::{TCert, fingerprint_hex};
use crate::error::Result;
use crate::store::TCertStore;

#[derive(Default)]
struct MemoryState {
    unused: Vec<Vec<u8>>,
    used: HashSet<String>,
}

/// Thread-safe in-memory tcert store.
#[derive(Default)]
pub struct MemoryTCertStore {
    state: Mutex<MemoryState>,
}

impl MemoryTCertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with persisted unused blobs.
    pub fn with_unused(blobs: Vec<Vec<u8>>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                unused: blobs,
                used: HashSet::new(),
            }),
        }
    }

    /// Snapshot of the persisted unused blobs.
    pub fn unused(&self) -> Vec<Vec<u8>> {
        self.lock().unused.clone()
    }

    /// Whether the tcert has been recorded as used.
    pub fn is_used(&self, tcert: &TCert) -> bool {
        self.lock().used.contains(&tcert.fingerprint_hex())
    }

    /// Number of tcerts recorded as used.
    pub fn used_count(&self) -> usize {
        self.lock().used.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TCertStore for MemoryTCertStore {
    fn load_unused_tcerts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<u8>>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.lock();
            Ok(state
                .unused
                .iter()
                .filter(|der| !state.used.contains(&fingerprint_hex(der)))
                .cloned()
                .collect())
        })
    }

    fn store_unused_tcerts<'a>(
        &'a self,
        tcerts: &'a [TCert],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.unused = tcerts.iter().map(|t| t.der().to_vec()).collect();
            let fresh: HashSet<String> = tcerts.iter().map(TCert::fingerprint_hex).collect();
            state.used.retain(|fingerprint| fresh.contains(fingerprint));
            debug!(count = tcerts.len(), "stored unused tcerts in memory");
            Ok(())
        })
    }

    fn store_used_tcert<'a>(
        &'a self,
        tcert: &'a TCert,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.lock().used.insert(tcert.fingerprint_hex());
            Ok(())
        })
    }
}

//! Durable tcert storage in a JSON file
//!
//! Layout: `{ "unused": [base64 DER, ...], "used": [hex fingerprint, ...] }`.
//! All writes use atomic temp-file + rename so a crash never leaves a torn
//! file. A tokio Mutex serializes writes from the issuing path (mark used)
//! and the drain path (store unused).
//!
//! The used set is the crash guard: a tcert issued after startup is recorded
//! there before the caller sees it, so even if the process dies before the
//! next drain rewrites the unused list, the next load skips it. Each drain
//! replaces the unused list and drops the used marks that no longer match
//! any entry in it, so the file stays proportional to the pool.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cert::{TCert, fingerprint_hex};
use crate::error::{Error, Result};
use crate::store::TCertStore;

/// On-disk representation.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    unused: Vec<String>,
    #[serde(default)]
    used: BTreeSet<String>,
}

/// Thread-safe tcert file manager.
pub struct FileTCertStore {
    path: PathBuf,
    state: Mutex<StoreFile>,
}

impl FileTCertStore {
    /// Open the store at the given file path.
    ///
    /// If the file doesn't exist, creates it empty (cold start: the pool will
    /// fill from the authority).
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading tcert file: {e}")))?;
            let file: StoreFile = serde_json::from_str(&contents)
                .map_err(|e| Error::Persistence(format!("parsing tcert file: {e}")))?;
            info!(
                path = %path.display(),
                unused = file.unused.len(),
                used = file.used.len(),
                "opened tcert store"
            );
            file
        } else {
            info!(path = %path.display(), "tcert file not found, starting with empty store");
            let file = StoreFile::default();
            write_atomic(&path, &file).await?;
            file
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Number of persisted unused tcerts (including any later marked used).
    pub async fn unused_len(&self) -> usize {
        self.state.lock().await.unused.len()
    }

    /// Number of tcerts recorded as used.
    pub async fn used_len(&self) -> usize {
        self.state.lock().await.used.len()
    }
}

impl TCertStore for FileTCertStore {
    fn load_unused_tcerts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<u8>>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut blobs = Vec::with_capacity(state.unused.len());
            for (index, encoded) in state.unused.iter().enumerate() {
                let der = match STANDARD.decode(encoded) {
                    Ok(der) => der,
                    Err(e) => {
                        warn!(index, error = %e, "skipping undecodable persisted tcert");
                        continue;
                    }
                };
                if state.used.contains(&fingerprint_hex(&der)) {
                    debug!(index, "skipping persisted tcert already marked used");
                    continue;
                }
                blobs.push(der);
            }
            debug!(count = blobs.len(), "loaded unused tcerts");
            Ok(blobs)
        })
    }

    fn store_unused_tcerts<'a>(
        &'a self,
        tcerts: &'a [TCert],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.unused = tcerts.iter().map(|t| STANDARD.encode(t.der())).collect();
            // A used mark only guards a blob in the unused list it was issued from
            let fresh: BTreeSet<String> = tcerts.iter().map(TCert::fingerprint_hex).collect();
            let before = state.used.len();
            state.used.retain(|fingerprint| fresh.contains(fingerprint));
            debug!(
                count = tcerts.len(),
                pruned_used = before - state.used.len(),
                "storing unused tcerts"
            );
            write_atomic(&self.path, &state).await
        })
    }

    fn store_used_tcert<'a>(
        &'a self,
        tcert: &'a TCert,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let fingerprint = tcert.fingerprint_hex();
            state.used.insert(fingerprint.clone());
            debug!(fingerprint = %fingerprint, "marked tcert used");
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write the store file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets permissions to 0600 since unused tcerts are live
/// signing material.
async fn write_atomic(path: &Path, data: &StoreFile) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Persistence(format!("serializing tcert file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("tcert path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".tcerts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp tcert file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting tcert file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp tcert file: {e}")))?;

    debug!(path = %path.display(), "persisted tcerts");
    Ok(())
}

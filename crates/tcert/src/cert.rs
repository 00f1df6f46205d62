//! The transaction certificate value type
//!
//! `TCert` is immutable and fungible. Clones share the same DER allocation.
//! Two tcerts are equal when their DER bytes are equal.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// DER tag for a constructed SEQUENCE, the outer envelope of an X.509 certificate.
const DER_SEQUENCE: u8 = 0x30;

/// Long-form lengths longer than this are not accepted (4 GiB certificates are not a thing).
const MAX_LENGTH_OCTETS: usize = 4;

/// A single-use transaction certificate.
#[derive(Clone)]
pub struct TCert {
    der: Arc<[u8]>,
    fingerprint: [u8; 32],
}

impl TCert {
    /// Parse a raw blob into a tcert.
    ///
    /// Only the outer DER envelope is checked: a SEQUENCE tag followed by a
    /// definite length that exactly covers the rest of the blob. Certificate
    /// contents are not interpreted.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        check_envelope(der)?;
        Ok(Self {
            der: Arc::from(der),
            fingerprint: Sha256::digest(der).into(),
        })
    }

    /// Raw DER bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-256 of the DER bytes.
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// Lowercase hex SHA-256 of the DER bytes, as used in logs and the used set.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }
}

impl PartialEq for TCert {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for TCert {}

impl Hash for TCert {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl fmt::Debug for TCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TCert")
            .field("fingerprint", &self.fingerprint_hex())
            .field("len", &self.der.len())
            .finish()
    }
}

/// Hex fingerprint of an arbitrary blob, matching `TCert::fingerprint_hex`
/// for blobs that parse.
pub fn fingerprint_hex(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

fn check_envelope(der: &[u8]) -> Result<()> {
    let (&tag, rest) = der
        .split_first()
        .ok_or_else(|| Error::Parse("empty tcert blob".into()))?;
    if tag != DER_SEQUENCE {
        return Err(Error::Parse(format!(
            "expected SEQUENCE tag {DER_SEQUENCE:#04x}, found {tag:#04x}"
        )));
    }

    let (&first, rest) = rest
        .split_first()
        .ok_or_else(|| Error::Parse("missing DER length".into()))?;

    let (len, body) = if first & 0x80 == 0 {
        (first as usize, rest)
    } else {
        let octets = (first & 0x7f) as usize;
        if octets == 0 || octets > MAX_LENGTH_OCTETS {
            return Err(Error::Parse(format!(
                "unsupported DER length form ({octets} length octets)"
            )));
        }
        if rest.len() < octets {
            return Err(Error::Parse("truncated DER length".into()));
        }
        let (len_bytes, body) = rest.split_at(octets);
        let len = len_bytes
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, body)
    };

    if body.len() != len {
        return Err(Error::Parse(format!(
            "DER length mismatch: header says {len} bytes, found {}",
            body.len()
        )));
    }
    Ok(())
}

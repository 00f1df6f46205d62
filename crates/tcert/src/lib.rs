//! Transaction certificates and the collaborators that supply and persist them
//!
//! A `TCert` is a single-use transaction certificate: opaque DER bytes plus a
//! SHA-256 fingerprint used for logging and used-set bookkeeping. This crate
//! owns no pooling logic; it defines the two seams the pool talks through:
//!
//! 1. `TCertStore`: persists unused tcerts across restarts and records used ones
//! 2. `TCertAuthority`: parses raw DER and fetches fresh batches
//!
//! `FileTCertStore` is the durable implementation (atomic JSON file);
//! `MemoryTCertStore` keeps the same semantics in memory.

pub mod authority;
pub mod cert;
pub mod error;
pub mod file_store;
pub mod memory;
pub mod store;

pub use authority::TCertAuthority;
pub use cert::{TCert, fingerprint_hex};
pub use error::{Error, Result};
pub use file_store::FileTCertStore;
pub use memory::MemoryTCertStore;
pub use store::TCertStore;

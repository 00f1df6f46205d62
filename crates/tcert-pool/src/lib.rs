//! Live pool of single-use transaction certificates
//!
//! Keeps a bounded buffer of tcerts so that issuing a transaction never waits
//! on a round trip to the certificate authority. The pool is seeded from the
//! `TCertStore` at start, topped up in the background from the
//! `TCertAuthority`, and flushed back to the store on stop.
//!
//! Lifecycle: `Stopped → Running → Draining → Stopped`
//! 1. `Pool::start` loads persisted tcerts and spawns the filler task
//! 2. `Pool::get_next_tcert` pops one tcert, marks it used, wakes the filler
//! 3. `Pool::add_tcert` injects an out-of-band tcert (blocks while full)
//! 4. The filler wakes on feedback or every second and refills below the low-water mark
//! 5. `Pool::stop` halts the filler and persists every tcert still held

pub mod config;
pub mod error;
mod filler;
pub mod pool;
pub mod queue;
mod telemetry;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use filler::{REFILL_INTERVAL, refill_quantity};
pub use pool::{GET_ATTEMPT_TIMEOUT, GET_ATTEMPTS, Pool, PoolState};
pub use queue::{BoundedQueue, Slot};

//! Pool state machine and tcert issuance
//!
//! The pool owns the tcert buffer, the feedback channel, and the filler
//! task's done signal. The store and the authority are shared collaborators
//! held by `Arc`; the pool never assumes exclusive access to either.
//!
//! States:
//! - Stopped: no filler running (initial and terminal)
//! - Running: filler active, buffer live
//! - Draining: filler told to exit, buffer being flushed to the store

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tcert::{TCert, TCertAuthority, TCertStore};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::filler;
use crate::queue::BoundedQueue;
use crate::telemetry;

/// Attempts `get_next_tcert` makes before giving up.
pub const GET_ATTEMPTS: u32 = 3;

/// How long each attempt waits for the buffer to yield a tcert.
pub const GET_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle state of the pool.
///
/// Transitions:
/// - Stopped → Running (`start`)
/// - Running → Draining (`stop`, filler signalled)
/// - Draining → Stopped (unused tcerts persisted)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Stopped,
    Running,
    Draining,
}

impl PoolState {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            PoolState::Stopped => "stopped",
            PoolState::Running => "running",
            PoolState::Draining => "draining",
        }
    }
}

/// State shared between the pool handle and its filler task.
pub(crate) struct Shared {
    pub(crate) buffer: BoundedQueue<TCert>,
    pub(crate) feedback_tx: mpsc::Sender<()>,
    /// Held by the filler for its whole run; free again once it exits, so a
    /// stopped pool can be started again.
    pub(crate) feedback_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
    pub(crate) store: Arc<dyn TCertStore>,
    pub(crate) authority: Arc<dyn TCertAuthority>,
    pub(crate) batch_size: usize,
}

struct FillerHandle {
    done_tx: oneshot::Sender<()>,
    task: JoinHandle<Vec<TCert>>,
}

/// Bounded pool of ready-to-use tcerts.
///
/// `get_next_tcert` and `add_tcert` may be called concurrently from any
/// number of tasks. `start` and `stop` are meant for the single owner.
pub struct Pool {
    shared: Arc<Shared>,
    state: Mutex<PoolState>,
    filler: tokio::sync::Mutex<Option<FillerHandle>>,
}

impl Pool {
    /// Create a stopped pool. The buffer and feedback queue both hold
    /// `2 × batch_size` entries.
    pub fn new(
        config: PoolConfig,
        store: Arc<dyn TCertStore>,
        authority: Arc<dyn TCertAuthority>,
    ) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity();
        let (feedback_tx, feedback_rx) = mpsc::channel(capacity);
        info!(batch_size = config.batch_size, capacity, "tcert pool initialized");
        Ok(Self {
            shared: Arc::new(Shared {
                buffer: BoundedQueue::new(capacity),
                feedback_tx,
                feedback_rx: tokio::sync::Mutex::new(feedback_rx),
                store,
                authority,
                batch_size: config.batch_size,
            }),
            state: Mutex::new(PoolState::Stopped),
            filler: tokio::sync::Mutex::new(None),
        })
    }

    /// Load persisted tcerts and launch the filler.
    ///
    /// A store load failure is logged and the pool starts without the
    /// persisted tcerts. Seeding happens in the filler, so this returns
    /// without waiting for the buffer to fill.
    pub async fn start(&self) -> Result<()> {
        let mut filler = self.filler.lock().await;
        if filler.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let seed = match self.shared.store.load_unused_tcerts().await {
            Ok(blobs) => blobs,
            Err(e) => {
                warn!(error = %e, "failed loading unused tcerts, starting without them");
                Vec::new()
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn(filler::run(self.shared.clone(), seed, done_rx));
        *filler = Some(FillerHandle { done_tx, task });
        self.set_state(PoolState::Running);

        info!(
            batch_size = self.shared.batch_size,
            capacity = self.capacity(),
            "tcert pool started"
        );
        Ok(())
    }

    /// Stop the filler and persist every tcert the pool still holds.
    ///
    /// Blocks until the filler has exited. Persistence is best-effort: a
    /// failure is logged as a durability warning, not returned.
    ///
    /// On a pool that is not running, nothing is written unless tcerts were
    /// injected through `add_tcert`. Those are stored together with the
    /// tcerts already persisted, which this pool never loaded. If the
    /// persisted set cannot be read, the injected tcerts stay buffered.
    pub async fn stop(&self) {
        let mut filler = self.filler.lock().await;
        let mut tcerts = Vec::new();
        let mut persisted = Vec::new();

        match filler.take() {
            Some(handle) => {
                self.set_state(PoolState::Draining);
                // The receiver is gone only if the filler already died
                let _ = handle.done_tx.send(());
                match handle.task.await {
                    Ok(pending) => tcerts.extend(pending),
                    Err(e) => error!(error = %e, "tcert filler task failed"),
                }
            }
            None if self.shared.buffer.is_empty() => {
                debug!("stop on a stopped pool, nothing to persist");
                return;
            }
            None => {
                // The persisted set was never loaded into the buffer; storing
                // only the injected tcerts would replace it
                match self.persisted_tcerts().await {
                    Ok(loaded) => persisted = loaded,
                    Err(e) => {
                        error!(
                            buffered = self.shared.buffer.len(),
                            error = %e,
                            "failed loading persisted tcerts, keeping injected tcerts buffered"
                        );
                        return;
                    }
                }
            }
        }

        debug!("storing unused tcerts");
        tcerts.extend(self.shared.buffer.drain());
        if !persisted.is_empty() {
            let held: HashSet<TCert> = tcerts.iter().cloned().collect();
            tcerts.extend(persisted.into_iter().filter(|tcert| !held.contains(tcert)));
        }
        telemetry::set_buffered(self.shared.buffer.len());
        debug!(count = tcerts.len(), "found unused tcerts");

        match self.shared.store.store_unused_tcerts(&tcerts).await {
            Ok(()) => info!(count = tcerts.len(), "tcert pool stopped, unused tcerts stored"),
            Err(e) => error!(
                count = tcerts.len(),
                error = %e,
                "failed to persist unused tcerts, they will not survive a restart"
            ),
        }

        self.set_state(PoolState::Stopped);
    }

    /// Take the next tcert from the pool.
    ///
    /// Makes up to `GET_ATTEMPTS` attempts of `GET_ATTEMPT_TIMEOUT` each. The
    /// returned tcert is recorded as used in the store before this returns,
    /// so it is never issued again, even across a crash. Exhausting every
    /// attempt yields `EmptyPool`; nothing was consumed and the caller may retry.
    pub async fn get_next_tcert(&self) -> Result<TCert> {
        for attempt in 1..=GET_ATTEMPTS {
            debug!(attempt, attempts = GET_ATTEMPTS, "getting next tcert");
            match tokio::time::timeout(GET_ATTEMPT_TIMEOUT, self.shared.buffer.pop()).await {
                Ok(tcert) => return Ok(self.issue(tcert).await),
                Err(_) => error!(
                    attempt,
                    timeout_secs = GET_ATTEMPT_TIMEOUT.as_secs(),
                    "failed getting a new tcert, buffer is empty"
                ),
            }
        }

        let waited_secs = GET_ATTEMPT_TIMEOUT.as_secs() * u64::from(GET_ATTEMPTS);
        error!(attempts = GET_ATTEMPTS, waited_secs, "tcert pool exhausted");
        telemetry::record_exhausted();
        Err(Error::EmptyPool {
            attempts: GET_ATTEMPTS,
            waited_secs,
        })
    }

    /// Inject a tcert obtained out of band.
    ///
    /// Waits for as long as the buffer is full: tcerts are never dropped, so a
    /// caller adding into a saturated pool stalls until a consumer frees a slot.
    pub async fn add_tcert(&self, tcert: TCert) {
        debug!(fingerprint = %tcert.fingerprint_hex(), "new tcert added");
        self.shared.buffer.push(tcert).await;
        telemetry::set_buffered(self.shared.buffer.len());
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of buffered tcerts.
    pub fn len(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.buffer.is_empty()
    }

    /// Buffer capacity (`2 × batch_size`).
    pub fn capacity(&self) -> usize {
        self.shared.buffer.capacity()
    }

    pub fn batch_size(&self) -> usize {
        self.shared.batch_size
    }

    /// Pool health summary for the health endpoint.
    ///
    /// `low` is true while occupancy is below the refill threshold.
    pub fn health(&self) -> serde_json::Value {
        let buffered = self.len();
        serde_json::json!({
            "state": self.state().label(),
            "buffered": buffered,
            "capacity": self.capacity(),
            "batch_size": self.shared.batch_size,
            "low": buffered < self.shared.batch_size,
        })
    }

    /// Persisted unused tcerts that parse, for merging into a drain.
    async fn persisted_tcerts(&self) -> tcert::Result<Vec<TCert>> {
        let blobs = self.shared.store.load_unused_tcerts().await?;
        let mut tcerts = Vec::with_capacity(blobs.len());
        for (index, der) in blobs.iter().enumerate() {
            match self.shared.authority.tcert_from_der(der) {
                Ok(tcert) => tcerts.push(tcert),
                Err(e) => warn!(index, error = %e, "dropping unparseable persisted tcert"),
            }
        }
        Ok(tcerts)
    }

    /// Record the tcert as used, wake the filler, and hand it out.
    async fn issue(&self, tcert: TCert) -> TCert {
        let fingerprint = tcert.fingerprint_hex();
        debug!(fingerprint = %fingerprint, "issuing tcert");

        if let Err(e) = self.shared.store.store_used_tcert(&tcert).await {
            error!(
                fingerprint = %fingerprint,
                error = %e,
                "failed to record tcert as used, it may be reissued after a restart"
            );
        }

        // A full feedback queue already has a wake-up pending
        let _ = self.shared.feedback_tx.try_send(());

        telemetry::record_issued();
        telemetry::set_buffered(self.shared.buffer.len());
        tcert
    }

    fn set_state(&self, state: PoolState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU16, Ordering};
    use tcert::MemoryTCertStore;

    fn tcert(n: u16) -> TCert {
        let [hi, lo] = n.to_be_bytes();
        TCert::from_der(&[0x30, 0x02, hi, lo]).unwrap()
    }

    /// What the scripted authority hands back per fetch.
    #[derive(Clone, Copy)]
    enum Supply {
        Fail,
        Nothing,
        Exact,
        /// The requested count plus this many more
        Extra(usize),
    }

    struct ScriptedAuthority {
        supply: Supply,
        requests: std::sync::Mutex<Vec<usize>>,
        next_id: AtomicU16,
    }

    impl ScriptedAuthority {
        fn new(supply: Supply) -> Arc<Self> {
            Arc::new(Self {
                supply,
                requests: std::sync::Mutex::new(Vec::new()),
                next_id: AtomicU16::new(10_000),
            })
        }

        fn requests(&self) -> Vec<usize> {
            self.requests.lock().unwrap().clone()
        }

        fn mint(&self, count: usize) -> Vec<TCert> {
            (0..count)
                .map(|_| tcert(self.next_id.fetch_add(1, Ordering::Relaxed)))
                .collect()
        }
    }

    impl TCertAuthority for ScriptedAuthority {
        fn fetch_tcerts(
            &self,
            count: usize,
        ) -> Pin<Box<dyn Future<Output = tcert::Result<Vec<TCert>>> + Send + '_>> {
            self.requests.lock().unwrap().push(count);
            let result = match self.supply {
                Supply::Fail => Err(tcert::Error::Fetch("authority unreachable".into())),
                Supply::Nothing => Ok(Vec::new()),
                Supply::Exact => Ok(self.mint(count)),
                Supply::Extra(extra) => Ok(self.mint(count + extra)),
            };
            Box::pin(async move { result })
        }
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    impl TCertStore for BrokenStore {
        fn load_unused_tcerts(
            &self,
        ) -> Pin<Box<dyn Future<Output = tcert::Result<Vec<Vec<u8>>>> + Send + '_>> {
            Box::pin(async { Err(tcert::Error::Io("disk unavailable".into())) })
        }

        fn store_unused_tcerts<'a>(
            &'a self,
            _tcerts: &'a [TCert],
        ) -> Pin<Box<dyn Future<Output = tcert::Result<()>> + Send + 'a>> {
            Box::pin(async { Err(tcert::Error::Io("disk unavailable".into())) })
        }

        fn store_used_tcert<'a>(
            &'a self,
            _tcert: &'a TCert,
        ) -> Pin<Box<dyn Future<Output = tcert::Result<()>> + Send + 'a>> {
            Box::pin(async { Err(tcert::Error::Io("disk unavailable".into())) })
        }
    }

    fn test_pool(store: &Arc<MemoryTCertStore>, authority: &Arc<ScriptedAuthority>) -> Pool {
        Pool::new(PoolConfig::new(10), store.clone(), authority.clone()).unwrap()
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = Pool::new(
            PoolConfig::new(0),
            Arc::new(MemoryTCertStore::new()),
            ScriptedAuthority::new(Supply::Nothing),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn state_follows_start_and_stop() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = test_pool(&store, &authority);

        assert_eq!(pool.state(), PoolState::Stopped);
        pool.start().await.unwrap();
        assert_eq!(pool.state(), PoolState::Running);
        pool.stop().await;
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_but_restart_after_stop_works() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = test_pool(&store, &authority);

        pool.start().await.unwrap();
        assert!(matches!(pool.start().await, Err(Error::AlreadyRunning)));

        pool.stop().await;
        pool.start().await.unwrap();
        assert_eq!(pool.state(), PoolState::Running);

        // The restarted filler owns the feedback channel again
        pool.add_tcert(tcert(1)).await;
        pool.get_next_tcert().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!authority.requests().is_empty());
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn seeding_fills_to_capacity_and_discards_the_rest() {
        let mut blobs = vec![vec![0xff, 0x00]]; // unparseable, skipped
        blobs.extend((0..25).map(|n| tcert(n).der().to_vec()));
        let store = Arc::new(MemoryTCertStore::with_unused(blobs));
        let authority = ScriptedAuthority::new(Supply::Fail);
        let pool = test_pool(&store, &authority);

        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(pool.len(), pool.capacity());
        assert_eq!(pool.len(), 20);

        // Full buffer is above the low-water mark: no fetches
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(authority.requests().is_empty());

        // FIFO from the seed order
        assert_eq!(pool.get_next_tcert().await.unwrap(), tcert(0));
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_buffer_requests_warm_up_batch() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Fail);
        let pool = test_pool(&store, &authority);

        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(authority.requests(), vec![2]);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn partial_buffer_requests_top_up() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Fail);
        let pool = test_pool(&store, &authority);

        for n in 0..5 {
            pool.add_tcert(tcert(n)).await;
        }
        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(authority.requests(), vec![15]);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_request_at_or_above_batch_size() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Fail);
        let pool = test_pool(&store, &authority);

        for n in 0..10 {
            pool.add_tcert(tcert(n)).await;
        }
        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(authority.requests().is_empty());
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refills_to_capacity_over_two_ticks() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Exact);
        let pool = test_pool(&store, &authority);

        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        // Warm-up from empty, then top-up from 2
        assert_eq!(authority.requests(), vec![2, 18]);
        assert_eq!(pool.len(), 20);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn consumption_feedback_wakes_filler_before_tick() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Exact);
        let pool = test_pool(&store, &authority);

        for n in 0..10 {
            pool.add_tcert(tcert(n)).await;
        }
        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(authority.requests().is_empty());

        pool.get_next_tcert().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Well before the one-second tick
        assert_eq!(authority.requests(), vec![11]);
        assert_eq!(pool.len(), 20);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn issued_tcert_is_marked_used_before_return() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = test_pool(&store, &authority);

        pool.add_tcert(tcert(7)).await;
        let issued = pool.get_next_tcert().await.unwrap();

        assert_eq!(issued, tcert(7));
        assert!(store.is_used(&issued));
        assert_eq!(store.used_count(), 1);
        assert!(pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_fails_after_full_retry_budget() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Fail);
        let pool = test_pool(&store, &authority);
        pool.start().await.unwrap();

        let started = tokio::time::Instant::now();
        let err = pool.get_next_tcert().await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(
            matches!(
                err,
                Error::EmptyPool {
                    attempts: 3,
                    waited_secs: 90
                }
            ),
            "got: {err:?}"
        );
        assert!(elapsed >= Duration::from_secs(90), "gave up after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(91), "gave up after {elapsed:?}");
        assert_eq!(store.used_count(), 0);
        // The filler kept retrying once per tick
        assert!(authority.requests().len() >= 89);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_tcert_is_picked_up_by_a_later_attempt() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = Arc::new(test_pool(&store, &authority));

        let late = {
            let pool = pool.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(45)).await;
                pool.add_tcert(tcert(3)).await;
            })
        };

        let started = tokio::time::Instant::now();
        let issued = pool.get_next_tcert().await.unwrap();
        assert_eq!(issued, tcert(3));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(45), "issued after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(46), "issued after {elapsed:?}");
        late.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_gets_never_share_a_tcert() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = Arc::new(test_pool(&store, &authority));

        for n in 0..20 {
            pool.add_tcert(tcert(n)).await;
        }
        pool.start().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.get_next_tcert().await }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            let issued = h.await.unwrap().unwrap();
            assert!(seen.insert(issued.fingerprint_hex()), "tcert issued twice");
        }
        assert_eq!(seen.len(), 20);
        assert_eq!(store.used_count(), 20);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn add_waits_while_buffer_is_full() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = Arc::new(test_pool(&store, &authority));

        for n in 0..20 {
            pool.add_tcert(tcert(n)).await;
        }
        let blocked =
            tokio::time::timeout(Duration::from_secs(5), pool.add_tcert(tcert(99))).await;
        assert!(blocked.is_err(), "add into a full pool must wait");
        assert_eq!(pool.len(), 20);

        let producer = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.add_tcert(tcert(100)).await })
        };
        assert_eq!(pool.get_next_tcert().await.unwrap(), tcert(0));
        producer.await.unwrap();
        assert_eq!(pool.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_persists_exactly_the_buffered_tcerts() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Fail);
        let pool = test_pool(&store, &authority);

        let added: Vec<TCert> = (0..7).map(tcert).collect();
        for t in &added {
            pool.add_tcert(t.clone()).await;
        }
        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        pool.stop().await;

        let persisted = store.unused();
        assert_eq!(persisted.len(), 7);
        let expected: Vec<Vec<u8>> = added.iter().map(|t| t.der().to_vec()).collect();
        assert_eq!(persisted, expected);
        assert!(pool.is_empty());
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_persists_fetched_tcerts_that_did_not_fit() {
        let store = Arc::new(MemoryTCertStore::new());
        // Warm-up asks for 2, authority sends 22: the filler blocks on the 21st
        let authority = ScriptedAuthority::new(Supply::Extra(20));
        let pool = test_pool(&store, &authority);

        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(authority.requests(), vec![2]);
        assert_eq!(pool.len(), 20);

        pool.stop().await;

        let persisted = store.unused();
        assert_eq!(persisted.len(), 22);
        let unique: HashSet<_> = persisted.iter().collect();
        assert_eq!(unique.len(), 22);
    }

    #[tokio::test(start_paused = true)]
    async fn issued_seed_tcert_is_not_reloaded_after_restart() {
        let blobs = (0..3).map(|n| tcert(n).der().to_vec()).collect();
        let store = Arc::new(MemoryTCertStore::with_unused(blobs));
        let authority = ScriptedAuthority::new(Supply::Nothing);

        let pool = test_pool(&store, &authority);
        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let issued = pool.get_next_tcert().await.unwrap();
        pool.stop().await;

        let pool = test_pool(&store, &authority);
        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.len(), 2);

        let mut remaining = Vec::new();
        while let Some(t) = pool.shared.buffer.try_pop() {
            remaining.push(t);
        }
        assert!(!remaining.contains(&issued));
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn store_failures_are_absorbed() {
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = Pool::new(PoolConfig::new(10), Arc::new(BrokenStore), authority.clone()).unwrap();

        pool.start().await.unwrap();
        assert_eq!(pool.state(), PoolState::Running);

        pool.add_tcert(tcert(1)).await;
        assert_eq!(pool.get_next_tcert().await.unwrap(), tcert(1));

        pool.add_tcert(tcert(2)).await;
        pool.stop().await;
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_on_idle_pool_leaves_store_untouched() {
        let store = Arc::new(MemoryTCertStore::with_unused(vec![tcert(1).der().to_vec()]));
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = test_pool(&store, &authority);

        pool.stop().await;

        assert_eq!(store.unused(), vec![tcert(1).der().to_vec()]);
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_start_keeps_persisted_tcerts_alongside_added_ones() {
        let store = Arc::new(MemoryTCertStore::with_unused(vec![
            tcert(1).der().to_vec(),
            tcert(2).der().to_vec(),
        ]));
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = test_pool(&store, &authority);

        pool.add_tcert(tcert(3)).await;
        pool.add_tcert(tcert(2)).await;
        pool.stop().await;

        let persisted: HashSet<Vec<u8>> = store.unused().into_iter().collect();
        assert_eq!(
            persisted,
            HashSet::from([
                tcert(1).der().to_vec(),
                tcert(2).der().to_vec(),
                tcert(3).der().to_vec()
            ])
        );
        assert_eq!(store.unused().len(), 3);
        assert!(pool.is_empty());
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_start_keeps_added_tcerts_when_store_is_unreadable() {
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = Pool::new(PoolConfig::new(10), Arc::new(BrokenStore), authority).unwrap();

        pool.add_tcert(tcert(4)).await;
        pool.stop().await;

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_occupancy() {
        let store = Arc::new(MemoryTCertStore::new());
        let authority = ScriptedAuthority::new(Supply::Nothing);
        let pool = test_pool(&store, &authority);

        for n in 0..3 {
            pool.add_tcert(tcert(n)).await;
        }

        let health = pool.health();
        assert_eq!(health["state"], "stopped");
        assert_eq!(health["buffered"], 3);
        assert_eq!(health["capacity"], 20);
        assert_eq!(health["batch_size"], 10);
        assert_eq!(health["low"], true);
    }
}

//! # OCR Worker Pool Module
//!
//! Bounded pool of OCR engine instances shared by every concurrent image
//! in a batch. The pool is the admission-control mechanism of the pipeline:
//! callers beyond the number of engines wait, without spinning, in FIFO order.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::ocr::{calculate_retry_delay, display_name, validate_image_file, EngineFactory, OcrEngine, RawOcrResult};
use crate::ocr_config::{OcrConfig, RecognitionParams};
use crate::ocr_errors::OcrError;

/// An engine instance tagged with its slot id
pub struct EngineHandle {
    id: usize,
    engine: Box<dyn OcrEngine>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolStatus {
    Uninitialized,
    Initializing,
    Ready,
    Terminated,
}

impl PoolStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Uninitialized => "uninitialized",
            PoolStatus::Initializing => "initializing",
            PoolStatus::Ready => "ready",
            PoolStatus::Terminated => "terminated",
        }
    }
}

struct PoolState {
    workers: BTreeSet<usize>,
    available: VecDeque<EngineHandle>,
    busy: HashSet<usize>,
    pending: VecDeque<oneshot::Sender<EngineHandle>>,
    status: PoolStatus,
}

impl PoolState {
    fn publish_gauges(&self) {
        crate::observability::record_pool_state(
            self.workers.len(),
            self.available.len(),
            self.busy.len(),
            self.pending.len(),
        );
    }
}

struct PoolShared {
    factory: Arc<dyn EngineFactory>,
    config: OcrConfig,
    state: Mutex<PoolState>,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
}

impl PoolShared {
    /// Hand a returned handle to the oldest live waiter, or park it in
    /// `available`. A handle passed to a waiter stays in `busy`.
    fn release(&self, mut handle: EngineHandle) {
        let mut state = self.state.lock();

        if state.status != PoolStatus::Ready || !state.workers.contains(&handle.id) {
            // Pool terminated while the handle was out; the engine is disposed here
            state.busy.remove(&handle.id);
            debug!(engine = handle.id, "Dropping engine returned to a terminated pool");
            return;
        }

        while let Some(waiter) = state.pending.pop_front() {
            match waiter.send(handle) {
                Ok(()) => {
                    state.publish_gauges();
                    return;
                }
                // Waiter gave up before being served
                Err(returned) => handle = returned,
            }
        }

        state.busy.remove(&handle.id);
        state.available.push_back(handle);
        state.publish_gauges();
    }

    /// Replace an engine whose recognition call panicked
    fn recover_crashed(&self, handle: EngineHandle) {
        let id = handle.id;
        drop(handle);
        warn!(engine = id, "OCR engine crashed during recognition, recreating it");

        match self.factory.create(id) {
            Ok(engine) => self.release(EngineHandle { id, engine }),
            Err(err) => {
                error!(engine = id, error = %err, "Could not recreate crashed OCR engine, shrinking pool");
                let mut state = self.state.lock();
                state.workers.remove(&id);
                state.busy.remove(&id);
                if state.workers.is_empty() {
                    // Nobody could ever serve the waiters
                    state.pending.clear();
                    state.status = PoolStatus::Terminated;
                }
                state.publish_gauges();
            }
        }
    }
}

/// Exclusive use of one engine. Dropping the lease releases the engine, on
/// success, on error and during unwinding alike.
pub struct EngineLease {
    handle: Option<EngineHandle>,
    shared: Arc<PoolShared>,
}

impl EngineLease {
    /// Slot id of the leased engine
    pub fn engine_id(&self) -> Option<usize> {
        self.handle.as_ref().map(|h| h.id)
    }

    pub fn recognize(
        &mut self,
        image_path: &Path,
        params: &RecognitionParams,
    ) -> Result<RawOcrResult, OcrError> {
        match self.handle.as_mut() {
            Some(handle) => handle.engine.recognize(image_path, params),
            None => Err(OcrError::PoolTerminated("engine lease already released".to_string())),
        }
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.released_total.fetch_add(1, Ordering::SeqCst);
            if std::thread::panicking() {
                self.shared.recover_crashed(handle);
            } else {
                self.shared.release(handle);
            }
        }
    }
}

/// Waiting slot in the FIFO queue. If the caller abandons the wait after a
/// handle was already sent, the handle goes straight back to the pool.
struct PendingAcquire {
    receiver: oneshot::Receiver<EngineHandle>,
    shared: Arc<PoolShared>,
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        self.receiver.close();
        if let Ok(handle) = self.receiver.try_recv() {
            self.shared.release(handle);
        }
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub available_workers: usize,
    pub busy_workers: usize,
    pub queued_requests: usize,
    pub initialized: bool,
    pub status: &'static str,
    pub acquired_total: u64,
    pub released_total: u64,
}

/// Fixed-size pool of OCR engines with FIFO admission.
///
/// ## Lifecycle
///
/// ```text
/// new ──initialize()──► ready ──terminate()──► terminated
///                         ▲                        │
///                         └──────initialize()──────┘
/// ```
///
/// ## Initialization
///
/// Engines are created one slot at a time, never in parallel, to avoid the
/// memory spike of loading several language models at once. Each slot gets
/// `init_attempts` tries with jittered exponential backoff between them and a pause of
/// `engine_spawn_delay_ms` separates consecutive slots. Slots that never come
/// up are abandoned; the pool fails only when no slot succeeded.
///
/// ## Acquire / release
///
/// - `acquire()` takes an idle engine or enqueues the caller.
/// - Dropping the returned [`EngineLease`] hands the engine to the oldest
///   waiter (it stays busy) or returns it to the idle queue.
/// - All state lives behind one mutex, so at every quiescent point
///   `available ∩ busy = ∅` and `available ∪ busy = workers`.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(factory: Arc<dyn EngineFactory>, config: OcrConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                factory,
                config,
                state: Mutex::new(PoolState {
                    workers: BTreeSet::new(),
                    available: VecDeque::new(),
                    busy: HashSet::new(),
                    pending: VecDeque::new(),
                    status: PoolStatus::Uninitialized,
                }),
                acquired_total: AtomicU64::new(0),
                released_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &OcrConfig {
        &self.shared.config
    }

    /// Create the engines. Returns the number of workers that came up.
    pub async fn initialize(&self) -> Result<usize, OcrError> {
        {
            let mut state = self.shared.state.lock();
            match state.status {
                PoolStatus::Ready => return Ok(state.workers.len()),
                PoolStatus::Initializing => {
                    return Err(OcrError::PoolInitialization(
                        "initialization already in progress".to_string(),
                    ))
                }
                PoolStatus::Uninitialized | PoolStatus::Terminated => {
                    state.status = PoolStatus::Initializing;
                }
            }
        }

        let size = self.shared.config.pool_size;
        let spawn_delay = Duration::from_millis(self.shared.config.recovery.engine_spawn_delay_ms);
        info!("Initializing OCR worker pool with {} engines", size);

        let mut created = Vec::with_capacity(size);
        for slot in 0..size {
            match self.create_with_retry(slot).await {
                Ok(engine) => {
                    info!("OCR engine {}/{} ready", slot + 1, size);
                    created.push(EngineHandle { id: slot, engine });
                }
                Err(err) => {
                    error!(engine = slot, error = %err, "OCR engine slot abandoned after all attempts");
                }
            }

            if slot + 1 < size {
                tokio::time::sleep(spawn_delay).await;
            }
        }

        let mut state = self.shared.state.lock();
        if created.is_empty() {
            state.status = PoolStatus::Uninitialized;
            state.workers.clear();
            state.available.clear();
            state.busy.clear();
            return Err(OcrError::PoolInitialization(format!(
                "none of the {} OCR engines could be initialized",
                size
            )));
        }

        let count = created.len();
        if count < size {
            warn!("OCR worker pool degraded: {} of {} engines available", count, size);
        }
        state.workers = created.iter().map(|h| h.id).collect();
        state.available = created.into_iter().collect();
        state.busy.clear();
        state.status = PoolStatus::Ready;
        state.publish_gauges();
        info!("OCR worker pool ready with {} engines", count);

        Ok(count)
    }

    async fn create_with_retry(&self, slot: usize) -> Result<Box<dyn OcrEngine>, OcrError> {
        let attempts = self.shared.config.recovery.init_attempts.max(1);
        let mut last_error = OcrError::Initialization(format!("engine #{} was never attempted", slot));

        for attempt in 1..=attempts {
            let factory = Arc::clone(&self.shared.factory);
            let outcome = tokio::task::spawn_blocking(move || factory.create(slot))
                .await
                .map_err(|e| OcrError::Initialization(format!("engine #{} init task failed: {}", slot, e)))
                .and_then(|result| result);

            match outcome {
                Ok(engine) => return Ok(engine),
                Err(err) => {
                    if attempt < attempts {
                        let delay = Duration::from_millis(calculate_retry_delay(
                            attempt,
                            &self.shared.config.recovery,
                        ));
                        warn!(
                            "OCR engine #{} init attempt {}/{} failed: {}. Retrying in {}ms",
                            slot,
                            attempt,
                            attempts,
                            err,
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    /// Take an engine, waiting in FIFO order when all are busy
    pub async fn acquire(&self) -> Result<EngineLease, OcrError> {
        let receiver = {
            let mut state = self.shared.state.lock();
            if state.status != PoolStatus::Ready {
                return Err(OcrError::PoolTerminated(format!(
                    "OCR worker pool is {}",
                    state.status.as_str()
                )));
            }

            if let Some(handle) = state.available.pop_front() {
                state.busy.insert(handle.id);
                state.publish_gauges();
                return Ok(self.lease(handle));
            }

            let (sender, receiver) = oneshot::channel();
            state.pending.push_back(sender);
            state.publish_gauges();
            debug!(queued = state.pending.len(), "All OCR engines busy, request queued");
            receiver
        };

        let mut pending = PendingAcquire {
            receiver,
            shared: Arc::clone(&self.shared),
        };
        match (&mut pending.receiver).await {
            Ok(handle) => Ok(self.lease(handle)),
            Err(_) => Err(OcrError::PoolTerminated(
                "OCR worker pool terminated while waiting for an engine".to_string(),
            )),
        }
    }

    fn lease(&self, handle: EngineHandle) -> EngineLease {
        self.shared.acquired_total.fetch_add(1, Ordering::SeqCst);
        EngineLease {
            handle: Some(handle),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Recognize one image on a pooled engine.
    ///
    /// The engine is released exactly once whatever the outcome. Recognition
    /// runs on the blocking thread pool and owns the lease there. After
    /// `operation_timeout_secs` the caller gets [`OcrError::Timeout`] while the
    /// call runs on and releases the engine when it returns.
    pub async fn process(
        &self,
        image_path: &Path,
        params: &RecognitionParams,
    ) -> Result<RawOcrResult, OcrError> {
        let name = display_name(image_path);
        let mut lease = self.acquire().await?;
        debug!(engine = ?lease.engine_id(), file = %name, "OCR engine acquired");

        // Validation failures drop the lease here
        validate_image_file(image_path).await?;

        let path = image_path.to_path_buf();
        let call_params = params.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = lease.recognize(&path, &call_params);
            drop(lease);
            result
        });

        let timeout = Duration::from_secs(self.shared.config.recovery.operation_timeout_secs);
        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result.map_err(|e| e.with_file_name(&name))?,
            Ok(Err(join_error)) => {
                return Err(OcrError::Extraction(format!(
                    "{}: OCR engine crashed: {}",
                    name, join_error
                )))
            }
            Err(_) => {
                // The engine stays busy until the blocking call returns
                warn!(file = %name, timeout_secs = timeout.as_secs(), "OCR recognition timed out");
                return Err(OcrError::Timeout(format!("{} after {}s", name, timeout.as_secs())));
            }
        };

        if result.text.trim().is_empty() {
            return Err(OcrError::NoTextExtracted(name));
        }

        if result.is_low_confidence(self.shared.config.low_confidence_threshold) {
            let warning = OcrError::LowConfidence(format!(
                "{}: mean confidence {:.1}",
                name, result.overall_confidence
            ));
            warn!("{}", warning);
        }

        Ok(result)
    }

    /// Dispose every idle engine concurrently and refuse further work.
    /// Engines still leased are dropped when their lease ends.
    pub async fn terminate(&self) {
        let (idle, waiters) = {
            let mut state = self.shared.state.lock();
            state.status = PoolStatus::Terminated;
            state.workers.clear();
            state.busy.clear();
            let idle: Vec<EngineHandle> = state.available.drain(..).collect();
            let waiters = state.pending.len();
            state.pending.clear();
            state.publish_gauges();
            (idle, waiters)
        };

        let count = idle.len();
        let mut disposals = JoinSet::new();
        for handle in idle {
            disposals.spawn_blocking(move || drop(handle));
        }
        while let Some(joined) = disposals.join_next().await {
            if let Err(e) = joined {
                warn!("OCR engine disposal failed: {}", e);
            }
        }

        info!(
            "OCR worker pool terminated: {} engines disposed, {} waiters rejected",
            count, waiters
        );
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            total_workers: state.workers.len(),
            available_workers: state.available.len(),
            busy_workers: state.busy.len(),
            queued_requests: state.pending.len(),
            initialized: state.status == PoolStatus::Ready,
            status: state.status.as_str(),
            acquired_total: self.shared.acquired_total.load(Ordering::SeqCst),
            released_total: self.shared.released_total.load(Ordering::SeqCst),
        }
    }

    pub fn is_ready(&self) -> bool {
        let state = self.shared.state.lock();
        state.status == PoolStatus::Ready && !state.workers.is_empty()
    }

    /// Check `available ∩ busy = ∅` and `available ∪ busy = workers`
    pub fn is_consistent(&self) -> bool {
        let state = self.shared.state.lock();
        let available: HashSet<usize> = state.available.iter().map(|h| h.id).collect();
        if available.len() != state.available.len() {
            return false;
        }
        if !available.is_disjoint(&state.busy) {
            return false;
        }
        let union: BTreeSet<usize> = available.union(&state.busy).copied().collect();
        union == state.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{BoundingBox, WordBox};
    use crate::ocr_config::RecoveryConfig;

    struct EchoEngine;

    impl OcrEngine for EchoEngine {
        fn recognize(
            &mut self,
            image_path: &Path,
            _params: &RecognitionParams,
        ) -> Result<RawOcrResult, OcrError> {
            Ok(RawOcrResult {
                text: format!("Recibo de Pago {}", display_name(image_path)),
                words: vec![WordBox {
                    text: "Recibo".to_string(),
                    confidence: 90.0,
                    bounding_box: BoundingBox::new(0, 0, 10, 10),
                    line_index: 0,
                }],
                overall_confidence: 90.0,
            })
        }
    }

    struct EchoFactory;

    impl EngineFactory for EchoFactory {
        fn create(&self, _slot: usize) -> Result<Box<dyn OcrEngine>, OcrError> {
            Ok(Box::new(EchoEngine))
        }
    }

    fn fast_config(pool_size: usize) -> OcrConfig {
        OcrConfig {
            pool_size,
            recovery: RecoveryConfig {
                base_retry_delay_ms: 1,
                max_retry_delay_ms: 4,
                engine_spawn_delay_ms: 1,
                ..RecoveryConfig::default()
            },
            ..OcrConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_and_stats() {
        let pool = WorkerPool::new(Arc::new(EchoFactory), fast_config(2));
        assert!(!pool.is_ready());
        assert_eq!(pool.initialize().await, Ok(2));

        let stats = pool.stats();
        assert_eq!(stats.total_workers, 2);
        assert_eq!(stats.available_workers, 2);
        assert_eq!(stats.status, "ready");
        assert!(pool.is_consistent());
    }

    #[tokio::test]
    async fn test_acquire_before_initialize_fails() {
        let pool = WorkerPool::new(Arc::new(EchoFactory), fast_config(1));
        let err = pool.acquire().await.err().expect("pool not ready");
        assert_eq!(err.kind(), "PoolTerminated");
    }

    #[tokio::test]
    async fn test_lease_drop_returns_engine() {
        let pool = WorkerPool::new(Arc::new(EchoFactory), fast_config(1));
        pool.initialize().await.expect("init");

        let lease = pool.acquire().await.expect("acquire");
        assert_eq!(pool.stats().busy_workers, 1);
        assert!(pool.is_consistent());
        drop(lease);

        let stats = pool.stats();
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.available_workers, 1);
        assert_eq!(stats.acquired_total, stats.released_total);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_leak_engine() {
        let pool = WorkerPool::new(Arc::new(EchoFactory), fast_config(1));
        pool.initialize().await.expect("init");

        let lease = pool.acquire().await.expect("acquire");
        let waiting = tokio::time::timeout(std::time::Duration::from_millis(10), pool.acquire()).await;
        assert!(waiting.is_err(), "second acquire should still be waiting");

        drop(lease);
        let stats = pool.stats();
        assert_eq!(stats.available_workers, 1);
        assert_eq!(stats.queued_requests, 0);
        assert!(pool.is_consistent());
    }

    #[tokio::test]
    async fn test_terminate_rejects_waiters_and_new_work() {
        let pool = WorkerPool::new(Arc::new(EchoFactory), fast_config(1));
        pool.initialize().await.expect("init");
        let lease = pool.acquire().await.expect("acquire");

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire().await.map(|_| ()) });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        pool.terminate().await;
        let waited = waiter.await.expect("join");
        assert!(matches!(waited, Err(OcrError::PoolTerminated(_))));
        drop(lease);

        assert_eq!(pool.stats().total_workers, 0);
        assert!(pool.acquire().await.is_err());

        // Re-initialization is allowed after terminate
        assert_eq!(pool.initialize().await, Ok(1));
    }
}

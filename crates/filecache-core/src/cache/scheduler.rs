//! Background sweep scheduler

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::eviction::EvictionEngine;
use crate::config::DEFAULT_CLEANUP_INTERVAL;
use crate::error::CoreError;

/// Lifecycle of a [`SweepScheduler`]. Transitions only go forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SweepState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl SweepState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SweepState::Idle,
            1 => SweepState::Running,
            _ => SweepState::Stopped,
        }
    }
}

/// Periodically runs the eviction engine on a background task.
///
/// A stopped scheduler cannot be restarted; create a new one instead.
pub struct SweepScheduler {
    engine: Arc<EvictionEngine>,
    period: Duration,
    state: AtomicU8,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SweepScheduler {
    pub fn new(engine: Arc<EvictionEngine>, period: Duration) -> Self {
        let period = if period.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            period
        };

        Self {
            engine,
            period,
            state: AtomicU8::new(SweepState::Idle as u8),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SweepState {
        SweepState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start sweeping. Starting a running scheduler is a no-op; starting a
    /// stopped one fails with [`CoreError::Cancelled`].
    pub fn start(&self) -> Result<(), CoreError> {
        // Held until the handle is stored so a concurrent shutdown can't miss it
        let mut handle = self.handle.lock();

        match self.state.compare_exchange(
            SweepState::Idle as u8,
            SweepState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) => {
                return match SweepState::from_u8(current) {
                    SweepState::Running => {
                        debug!("Sweep scheduler already running");
                        Ok(())
                    }
                    _ => Err(CoreError::Cancelled),
                };
            }
        }

        info!(
            "Starting background cache cleanup task (interval: {:?})",
            self.period
        );

        *handle = Some(tokio::spawn(sweep_loop(
            self.engine.clone(),
            self.period,
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Signal the background task to stop.
    ///
    /// Returns `true` only for the call that moved the scheduler from
    /// running to stopped; every other call is a no-op.
    pub fn stop(&self) -> bool {
        let stopped = self
            .state
            .compare_exchange(
                SweepState::Running as u8,
                SweepState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if stopped {
            info!("Stopping background cache cleanup task");
            self.cancel.cancel();
        }
        stopped
    }

    /// Stop and wait for an in-flight sweep to finish
    pub async fn shutdown(&self) {
        self.stop();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Cache cleanup task ended abnormally: {}", e);
        }
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn sweep_loop(engine: Arc<EvictionEngine>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first tick (which fires immediately)
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // A sweep that has started always runs to completion
        debug!("Running scheduled cache maintenance");
        match engine.run().await {
            Ok(report) => {
                if report.removed() > 0 {
                    info!(
                        "Scheduled maintenance: {} expired removed, {} evicted, {} bytes freed",
                        report.expired, report.evicted, report.freed_bytes
                    );
                }
            }
            Err(e) => {
                metrics::counter!("filecache_sweep_failures_total").increment(1);
                warn!("Failed to clean cached files: {}", e);
            }
        }
    }

    debug!("Cache cleanup task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;
    use crate::lock::{InMemoryLockProvider, LockGateway};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use filecache_storage::{ByteStream, CacheEntry, LocalStorage, StorageBackend, StorageError};
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const TICK: Duration = Duration::from_millis(50);

    fn bytes_stream(data: &'static [u8]) -> ByteStream {
        let chunks: Vec<Result<Bytes, StorageError>> = vec![Ok(Bytes::from_static(data))];
        Box::pin(futures::stream::iter(chunks))
    }

    async fn setup(dir: &TempDir, locks: LockGateway) -> (Arc<LocalStorage>, Arc<EvictionEngine>) {
        let storage = Arc::new(
            LocalStorage::new(dir.path().join("cache"), Some(dir.path().join("tmp")))
                .await
                .unwrap(),
        );
        let engine = Arc::new(EvictionEngine::new(
            storage.clone(),
            locks,
            EvictionPolicy {
                max_ttl: Duration::from_secs(60),
                max_size: u64::MAX,
            },
        ));
        (storage, engine)
    }

    /// Holds the first listing until `release` is notified
    struct GatedStorage {
        inner: Arc<LocalStorage>,
        gated: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedStorage {
        fn new(inner: Arc<LocalStorage>) -> Self {
            Self {
                inner,
                gated: AtomicBool::new(true),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl StorageBackend for GatedStorage {
        async fn exists(&self, key: &str) -> Result<bool, StorageError> {
            self.inner.exists(key).await
        }

        async fn read(&self, key: &str) -> Result<ByteStream, StorageError> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, stream: ByteStream) -> Result<u64, StorageError> {
            self.inner.write(key, stream).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key).await
        }

        async fn touch(&self, key: &str, timestamp: DateTime<Utc>) -> Result<(), StorageError> {
            self.inner.touch(key, timestamp).await
        }

        async fn clear(&self) -> Result<(), StorageError> {
            self.inner.clear().await
        }

        async fn total_size(&self) -> Result<u64, StorageError> {
            self.inner.total_size().await
        }

        async fn list_entries(&self) -> Result<Vec<CacheEntry>, StorageError> {
            if self.gated.swap(false, Ordering::AcqRel) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.list_entries().await
        }
    }

    async fn write_expired(storage: &LocalStorage, key: &str) {
        storage.write(key, bytes_stream(b"ABC")).await.unwrap();
        storage
            .touch(key, Utc::now() - ChronoDuration::minutes(5))
            .await
            .unwrap();
    }

    async fn wait_until_gone(storage: &LocalStorage, key: &str) -> bool {
        for _ in 0..40 {
            if !storage.exists(key).await.unwrap() {
                return true;
            }
            tokio::time::sleep(TICK).await;
        }
        false
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let dir = TempDir::new().unwrap();
        let (_storage, engine) = setup(&dir, LockGateway::noop()).await;
        let scheduler = SweepScheduler::new(engine, TICK);

        assert_eq!(scheduler.state(), SweepState::Idle);
        assert!(!scheduler.stop());
        assert_eq!(scheduler.state(), SweepState::Idle);

        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SweepState::Running);
        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SweepState::Running);

        assert!(scheduler.stop());
        assert_eq!(scheduler.state(), SweepState::Stopped);
        assert!(!scheduler.stop());

        assert!(matches!(scheduler.start(), Err(CoreError::Cancelled)));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_period_uses_default() {
        let dir = TempDir::new().unwrap();
        let (_storage, engine) = setup(&dir, LockGateway::noop()).await;
        let scheduler = SweepScheduler::new(engine, Duration::ZERO);
        assert_eq!(scheduler.period(), DEFAULT_CLEANUP_INTERVAL);
    }

    #[tokio::test]
    async fn test_scheduled_sweep_evicts() {
        let dir = TempDir::new().unwrap();
        let (storage, engine) = setup(&dir, LockGateway::noop()).await;
        write_expired(&storage, "old").await;

        let scheduler = SweepScheduler::new(engine, TICK);
        scheduler.start().unwrap();

        assert!(wait_until_gone(&storage, "old").await);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_sweep_after_stop() {
        let dir = TempDir::new().unwrap();
        let (storage, engine) = setup(&dir, LockGateway::noop()).await;

        let scheduler = SweepScheduler::new(engine, TICK);
        scheduler.start().unwrap();
        scheduler.shutdown().await;
        assert_eq!(scheduler.state(), SweepState::Stopped);

        write_expired(&storage, "old").await;
        tokio::time::sleep(TICK * 4).await;
        assert!(storage.exists("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_scheduler_survives_failed_sweep() {
        let dir = TempDir::new().unwrap();
        let provider = InMemoryLockProvider::new();
        let locks = LockGateway::new(Arc::new(provider.clone()));
        let (storage, engine) = setup(&dir, locks.clone()).await;
        write_expired(&storage, "old").await;

        // Every sweep fails with contention while the global lock is held
        let held = locks.lock_global().await.unwrap();
        let scheduler = SweepScheduler::new(engine, TICK);
        scheduler.start().unwrap();

        tokio::time::sleep(TICK * 4).await;
        assert!(storage.exists("old").await.unwrap());
        assert_eq!(scheduler.state(), SweepState::Running);

        held.release();
        assert!(wait_until_gone(&storage, "old").await);

        scheduler.shutdown().await;
        assert_eq!(provider.held_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_lets_running_sweep_finish() {
        let dir = TempDir::new().unwrap();
        let provider = InMemoryLockProvider::new();
        let locks = LockGateway::new(Arc::new(provider.clone()));
        let (local, _) = setup(&dir, LockGateway::noop()).await;
        write_expired(&local, "old").await;

        let storage = Arc::new(GatedStorage::new(local.clone()));
        let engine = Arc::new(EvictionEngine::new(
            storage.clone(),
            locks,
            EvictionPolicy {
                max_ttl: Duration::from_secs(60),
                max_size: u64::MAX,
            },
        ));
        let scheduler = Arc::new(SweepScheduler::new(engine, TICK));
        scheduler.start().unwrap();

        // Sweep is now in progress, blocked inside the listing
        storage.entered.notified().await;
        assert!(scheduler.stop());
        assert_eq!(scheduler.state(), SweepState::Stopped);

        let waiter = scheduler.clone();
        let shutdown = tokio::spawn(async move { waiter.shutdown().await });
        tokio::time::sleep(TICK * 2).await;
        assert!(!shutdown.is_finished());
        assert!(local.exists("old").await.unwrap());

        storage.release.notify_one();
        shutdown.await.unwrap();

        assert!(!local.exists("old").await.unwrap());
        assert_eq!(provider.held_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_racing_start_leaves_no_task() {
        let dir = TempDir::new().unwrap();
        let (_storage, engine) = setup(&dir, LockGateway::noop()).await;

        for _ in 0..50 {
            let scheduler = Arc::new(SweepScheduler::new(engine.clone(), TICK));
            let starter = scheduler.clone();
            let stopper = scheduler.clone();

            let start = tokio::spawn(async move { starter.start() });
            let shutdown = tokio::spawn(async move { stopper.shutdown().await });
            start.await.unwrap().unwrap();
            shutdown.await.unwrap();

            // Shutdown finished before start: the scheduler is legitimately running
            if scheduler.state() == SweepState::Running {
                scheduler.shutdown().await;
            }
            assert_eq!(scheduler.state(), SweepState::Stopped);

            // Only this test and the scheduler still hold the engine
            assert_eq!(Arc::strong_count(&engine), 2);
        }
    }
}

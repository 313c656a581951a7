use crate::ingest::provider::{FetchError, RatingsSource};
use crate::storage::retry::RetryPolicy;
use crate::storage::stocks::{batch_upsert, ChunkWriter, UpsertError, DEFAULT_BATCH_SIZE};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub chunks: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("store failed: {0}")]
    Upsert(#[from] UpsertError),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Fetch(FetchError::Cancelled) | Self::Upsert(UpsertError::Cancelled)
        )
    }
}

/// Periodic fetch-then-upsert driver. A single loop runs one sync at a time and
/// waits for it before scheduling the next tick.
pub struct StockSyncTask {
    source: Arc<dyn RatingsSource>,
    writer: Arc<dyn ChunkWriter>,
    interval: Duration,
    batch_size: usize,
    retry: RetryPolicy,
    state: watch::Sender<SyncState>,
}

impl StockSyncTask {
    pub fn new(source: Arc<dyn RatingsSource>, writer: Arc<dyn ChunkWriter>) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            source,
            writer,
            interval: DEFAULT_SYNC_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            state,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub async fn sync_once(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let t0 = Instant::now();
        tracing::info!(source = self.source.source_name(), "syncing stocks from upstream");

        let records = self.source.fetch_all(cancel).await?;
        let chunks = batch_upsert(
            self.writer.as_ref(),
            cancel,
            &records,
            self.batch_size,
            &self.retry,
        )
        .await?;

        Ok(SyncReport {
            fetched: records.len(),
            chunks,
            elapsed_ms: t0.elapsed().as_millis(),
        })
    }

    /// Runs one sync immediately, then one per interval until `cancel` fires.
    /// Failed syncs are logged and the loop keeps going.
    pub async fn run(&self, cancel: CancellationToken) {
        self.state.send_replace(SyncState::Running);
        tracing::info!(interval_secs = self.interval.as_secs(), "stock sync task started");

        self.tick(&cancel).await;

        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(&cancel).await,
            }
        }

        self.state.send_replace(SyncState::Stopped);
        tracing::info!("stock sync task stopped");
    }

    async fn tick(&self, cancel: &CancellationToken) {
        match self.sync_once(cancel).await {
            Ok(report) => tracing::info!(
                fetched = report.fetched,
                chunks = report.chunks,
                elapsed_ms = report.elapsed_ms,
                "synced stocks"
            ),
            Err(err) if err.is_cancelled() => {
                tracing::info!("stock sync interrupted by shutdown");
            }
            Err(err) => tracing::error!(error = %err, "stock sync failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stock::fixtures::record;
    use crate::domain::stock::StockRecord;
    use crate::storage::memory::MemoryStockStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        records: Vec<StockRecord>,
    }

    impl FakeSource {
        fn new(records: Vec<StockRecord>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
                records,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl RatingsSource for FakeSource {
        fn source_name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_all(
            &self,
            cancel: &CancellationToken,
        ) -> Result<Vec<StockRecord>, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if self.fail_on.contains(&n) {
                return Err(FetchError::Status { status: 503 });
            }
            Ok(self.records.clone())
        }
    }

    #[tokio::test]
    async fn sync_once_persists_fetched_records() {
        let source = Arc::new(FakeSource::new(vec![
            record("AAPL", "UBS"),
            record("AAPL", "Barclays"),
            record("MSFT", "UBS"),
        ]));
        let store = Arc::new(MemoryStockStore::default());
        let task = StockSyncTask::new(source, store.clone()).with_batch_size(2);

        let report = task.sync_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.chunks, 2);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_store_untouched() {
        let mut source = FakeSource::new(vec![record("AAPL", "UBS")]);
        source.fail_on = vec![0];
        let store = Arc::new(MemoryStockStore::default());
        let task = StockSyncTask::new(Arc::new(source), store.clone());

        let err = task.sync_once(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(FetchError::Status { status: 503 })));
        assert!(!err.is_cancelled());
        assert_eq!(store.apply_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_immediately_then_every_interval_and_survives_failures() {
        let mut source = FakeSource::new(vec![record("AAPL", "UBS")]);
        source.fail_on = vec![1];
        let source = Arc::new(source);
        let store = Arc::new(MemoryStockStore::default());
        let task = Arc::new(
            StockSyncTask::new(source.clone(), store.clone())
                .with_interval(Duration::from_secs(60)),
        );
        assert_eq!(task.state(), SyncState::Idle);

        let cancel = CancellationToken::new();
        let handle = {
            let task = task.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { task.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(task.state(), SyncState::Running);
        // t=0, t=60 (fails), t=120
        assert_eq!(source.calls(), 3);
        assert_eq!(store.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(task.state(), SyncState::Stopped);
        assert_eq!(source.calls(), 3);
    }

    /// Requests shutdown during its second fetch, after moving the clock past
    /// the next tick, so the loop sees a due tick and a cancelled token together.
    struct ShutdownDuringSync {
        calls: AtomicUsize,
        cancel: CancellationToken,
        interval: Duration,
    }

    #[async_trait::async_trait]
    impl RatingsSource for ShutdownDuringSync {
        fn source_name(&self) -> &'static str {
            "shutdown-during-sync"
        }

        async fn fetch_all(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<Vec<StockRecord>, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                tokio::time::advance(self.interval + Duration::from_secs(1)).await;
                self.cancel.cancel();
            }
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_wins_over_a_due_tick() {
        let interval = Duration::from_secs(60);
        let cancel = CancellationToken::new();
        let source = Arc::new(ShutdownDuringSync {
            calls: AtomicUsize::new(0),
            cancel: cancel.clone(),
            interval,
        });
        let task = StockSyncTask::new(source.clone(), Arc::new(MemoryStockStore::default()))
            .with_interval(interval);

        task.run(cancel).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(task.state(), SyncState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_still_stops() {
        let source = Arc::new(FakeSource::new(vec![]));
        let task = StockSyncTask::new(source.clone(), Arc::new(MemoryStockStore::default()));
        let mut states = task.subscribe();

        let cancel = CancellationToken::new();
        cancel.cancel();
        task.run(cancel).await;

        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SyncState::Stopped);
        assert_eq!(source.calls(), 1);
    }
}

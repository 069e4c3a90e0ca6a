//! Batch coalescer
//!
//! Collects change events into a latest-event-per-path map and flushes them
//! to a processing callback when the map grows past the size threshold or
//! the flush interval elapses. A capacity-1 trigger channel bounds flush
//! concurrency: however many adds race, at most one immediate flush is
//! queued behind the one in progress.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lattice_core::ChangeEvent;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deliveries per event before it is dropped.
pub const MAX_RETRIES: u32 = 3;

pub type BoxedProcessFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Callback that processes one flushed batch. Called with the pending lock
/// released; only one batch is in flight at a time.
pub type ProcessFn = Arc<dyn Fn(Vec<ChangeEvent>) -> BoxedProcessFuture + Send + Sync>;

/// Monotonic flush statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchMetrics {
    pub total_batches: u64,
    pub total_changes: u64,
    pub errors: u64,
    pub average_batch_size: f64,
    pub processing_time_ms: u64,
}

struct PendingState {
    pending: HashMap<PathBuf, ChangeEvent>,
    last_flush: Instant,
}

pub struct BatchCoalescer {
    state: Mutex<PendingState>,
    batch_size: usize,
    flush_interval: Duration,
    process: ProcessFn,
    metrics: std::sync::Mutex<BatchMetrics>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl BatchCoalescer {
    pub fn new(batch_size: usize, flush_interval: Duration, process: ProcessFn) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        BatchCoalescer {
            state: Mutex::new(PendingState {
                pending: HashMap::new(),
                last_flush: Instant::now(),
            }),
            batch_size,
            flush_interval,
            process,
            metrics: std::sync::Mutex::new(BatchMetrics::default()),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        }
    }

    /// Store an event, overwriting any pending event for the same path.
    /// Crossing the size threshold signals an immediate flush.
    pub async fn add(&self, event: ChangeEvent) {
        let should_trigger = {
            let mut state = self.state.lock().await;
            state.pending.insert(event.path.clone(), event);
            state.pending.len() >= self.batch_size
        };
        if should_trigger {
            debug!(threshold = self.batch_size, "batch size reached, triggering flush");
            let _ = self.trigger_tx.try_send(());
        }
    }

    /// Request an immediate flush. Coalesces with an already-pending request.
    pub fn force_flush(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Run the flush loop until cancellation. On cancellation one final
    /// flush drains whatever is pending.
    pub async fn run(&self, token: CancellationToken) {
        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .await
            .take()
            .expect("coalescer run loop started twice");

        info!(
            size = self.batch_size,
            interval_ms = self.flush_interval.as_millis() as u64,
            "batch coalescer started"
        );

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_and_flush().await,
                Some(()) = trigger_rx.recv() => self.flush().await,
                _ = token.cancelled() => {
                    debug!("coalescer shutting down, final flush");
                    self.flush().await;
                    return;
                }
            }
        }
    }

    /// Time-based flush: only when something is pending and the interval has
    /// genuinely elapsed since the last flush.
    async fn check_and_flush(&self) {
        let due = {
            let state = self.state.lock().await;
            !state.pending.is_empty() && state.last_flush.elapsed() >= self.flush_interval
        };
        if due {
            self.flush().await;
        }
    }

    async fn flush(&self) {
        let batch: Vec<ChangeEvent> = {
            let mut state = self.state.lock().await;
            if state.pending.is_empty() {
                return;
            }
            state.last_flush = Instant::now();
            state.pending.drain().map(|(_, event)| event).collect()
        };

        debug!(size = batch.len(), "flushing batch");
        let started = Instant::now();
        let result = (self.process)(batch.clone()).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => self.update_metrics(batch.len(), elapsed, false),
            Err(e) => {
                warn!("batch processing failed: {e:#}");
                let size = batch.len();
                self.requeue_failed(batch).await;
                self.update_metrics(size, elapsed, true);
            }
        }
    }

    /// Put failed events back with their retry count bumped. An event that
    /// arrived for the same path while the batch was processing is newer and
    /// wins; events at the retry bound are dropped.
    async fn requeue_failed(&self, batch: Vec<ChangeEvent>) {
        let mut state = self.state.lock().await;
        let mut requeued = 0usize;
        let mut dropped = 0usize;
        for mut event in batch {
            event.retries += 1;
            if event.retries < MAX_RETRIES {
                state.pending.entry(event.path.clone()).or_insert(event);
                requeued += 1;
            } else {
                warn!(
                    path = %event.path.display(),
                    retries = event.retries,
                    "dropping change after retry bound"
                );
                dropped += 1;
            }
        }
        if requeued > 0 {
            debug!(requeued, "re-queued failed changes for retry");
        }
        if dropped > 0 {
            warn!(dropped, "dropped changes after max retries");
        }
    }

    fn update_metrics(&self, batch_size: usize, elapsed: Duration, errored: bool) {
        let mut metrics = self.metrics.lock().expect("batch metrics lock poisoned");
        metrics.total_batches += 1;
        metrics.total_changes += batch_size as u64;
        metrics.processing_time_ms += elapsed.as_millis() as u64;
        metrics.average_batch_size =
            metrics.total_changes as f64 / metrics.total_batches as f64;
        if errored {
            metrics.errors += 1;
        }
    }

    pub fn metrics(&self) -> BatchMetrics {
        self.metrics
            .lock()
            .expect("batch metrics lock poisoned")
            .clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::ChangeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    type BatchLog = Arc<std::sync::Mutex<Vec<Vec<ChangeEvent>>>>;

    fn recording_process(log: BatchLog) -> ProcessFn {
        Arc::new(move |batch| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(batch);
                Ok(())
            })
        })
    }

    fn failing_process(calls: Arc<AtomicUsize>) -> ProcessFn {
        Arc::new(move |_batch| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("sink unavailable")
            })
        })
    }

    #[tokio::test]
    async fn events_for_one_path_coalesce() {
        let log: BatchLog = Default::default();
        let coalescer = Arc::new(BatchCoalescer::new(
            100,
            Duration::from_secs(60),
            recording_process(log.clone()),
        ));

        let token = CancellationToken::new();
        let runner = {
            let coalescer = coalescer.clone();
            let token = token.clone();
            tokio::spawn(async move { coalescer.run(token).await })
        };

        for _ in 0..5 {
            coalescer
                .add(ChangeEvent::new("/p/a.ts", ChangeKind::Modify))
                .await;
        }
        coalescer.force_flush();
        sleep(Duration::from_millis(100)).await;
        token.cancel();
        runner.await.unwrap();

        let batches = log.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].path, PathBuf::from("/p/a.ts"));
    }

    #[tokio::test]
    async fn size_threshold_triggers_flush() {
        let log: BatchLog = Default::default();
        let coalescer = Arc::new(BatchCoalescer::new(
            3,
            Duration::from_secs(60),
            recording_process(log.clone()),
        ));

        let token = CancellationToken::new();
        let runner = {
            let coalescer = coalescer.clone();
            let token = token.clone();
            tokio::spawn(async move { coalescer.run(token).await })
        };

        for path in ["/p/a.ts", "/p/b.ts", "/p/c.ts"] {
            coalescer
                .add(ChangeEvent::new(path, ChangeKind::Modify))
                .await;
        }
        sleep(Duration::from_millis(100)).await;
        token.cancel();
        runner.await.unwrap();

        let batches = log.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);

        let metrics = coalescer.metrics();
        assert_eq!(metrics.total_batches, 1);
        assert_eq!(metrics.total_changes, 3);
        assert_eq!(metrics.errors, 0);
    }

    #[tokio::test]
    async fn failed_events_retry_up_to_the_bound() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coalescer = Arc::new(BatchCoalescer::new(
            100,
            Duration::from_secs(60),
            failing_process(calls.clone()),
        ));

        let token = CancellationToken::new();
        let runner = {
            let coalescer = coalescer.clone();
            let token = token.clone();
            tokio::spawn(async move { coalescer.run(token).await })
        };

        coalescer
            .add(ChangeEvent::new("/p/p.ts", ChangeKind::Modify))
            .await;

        // Each forced flush fails and re-queues until the bound is reached.
        for _ in 0..4 {
            coalescer.force_flush();
            sleep(Duration::from_millis(80)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES as usize);
        assert_eq!(coalescer.pending_len().await, 0);

        // A fresh event for the same path re-enters normally.
        coalescer
            .add(ChangeEvent::new("/p/p.ts", ChangeKind::Modify))
            .await;
        assert_eq!(coalescer.pending_len().await, 1);

        token.cancel();
        runner.await.unwrap();
        assert!(coalescer.metrics().errors >= MAX_RETRIES as u64);
    }

    #[tokio::test]
    async fn cancellation_flushes_pending_events() {
        let log: BatchLog = Default::default();
        let coalescer = Arc::new(BatchCoalescer::new(
            100,
            Duration::from_secs(60),
            recording_process(log.clone()),
        ));

        let token = CancellationToken::new();
        let runner = {
            let coalescer = coalescer.clone();
            let token = token.clone();
            tokio::spawn(async move { coalescer.run(token).await })
        };

        coalescer
            .add(ChangeEvent::new("/p/a.ts", ChangeKind::Modify))
            .await;
        sleep(Duration::from_millis(50)).await;
        token.cancel();
        runner.await.unwrap();

        let batches = log.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[tokio::test]
    async fn interval_flush_fires_without_trigger() {
        let log: BatchLog = Default::default();
        let coalescer = Arc::new(BatchCoalescer::new(
            100,
            Duration::from_millis(100),
            recording_process(log.clone()),
        ));

        let token = CancellationToken::new();
        let runner = {
            let coalescer = coalescer.clone();
            let token = token.clone();
            tokio::spawn(async move { coalescer.run(token).await })
        };

        coalescer
            .add(ChangeEvent::new("/p/a.ts", ChangeKind::Modify))
            .await;
        sleep(Duration::from_millis(350)).await;
        token.cancel();
        runner.await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
    }
}

//! The continuous synchronization engine
//!
//! Orchestrates watcher, revision-control scanner, change gate, parser,
//! differ, batcher, and sinks. All event sources funnel into one channel and
//! are handled serially by the event loop, which gives per-path ordering for
//! free. Background tasks hang off a single cancellation token.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use lattice_core::tracker::ChangeStatus;
use lattice_core::{
    is_supported_path, ChangeEvent, ChangeKind, DeltaAnalyzer, EngineConfig, EntityDelta,
    FileTracker, MetricsRecorder, ParsedFile, SourceParser, SyncEvent, SyncEventKind,
};
use lattice_sink::{EmbeddingSink, GraphSink};
use lattice_watcher::{FileWatcher, ScmStatus, WatchEvent};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{BatchCoalescer, BatchMetrics, ProcessFn};

/// Cadence of the monitored-file-count gauge refresh.
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Callback receiving control-plane events.
pub type EventSubscriber = Box<dyn Fn(SyncEvent) + Send + Sync>;

/// Aggregated statistics exposed through `stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub files_monitored: usize,
    pub files_processed: u64,
    pub changes_detected: u64,
    pub errors: u64,
    pub last_change: Option<DateTime<Utc>>,
    pub average_processing_time_ms: f64,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_metrics: Option<BatchMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<usize>,
}

/// Everything the per-path pipeline needs. The coalescer's process callback
/// captures this as a plain `Arc`, so the engine and the coalescer never
/// reference each other.
pub(crate) struct Pipeline {
    config: EngineConfig,
    parser: Arc<dyn SourceParser>,
    tracker: FileTracker,
    delta: Option<std::sync::Mutex<DeltaAnalyzer>>,
    graph: Arc<dyn GraphSink>,
    embeddings: Option<Arc<dyn EmbeddingSink>>,
    metrics: MetricsRecorder,
    paused: std::sync::RwLock<bool>,
    subscriber: std::sync::RwLock<Option<EventSubscriber>>,
}

impl Pipeline {
    pub(crate) fn is_paused(&self) -> bool {
        *self.paused.read().expect("pause lock poisoned")
    }

    fn set_paused(&self, paused: bool) {
        *self.paused.write().expect("pause lock poisoned") = paused;
    }

    pub(crate) fn publish(&self, event: SyncEvent) {
        let subscriber = self.subscriber.read().expect("subscriber lock poisoned");
        if let Some(subscriber) = subscriber.as_ref() {
            subscriber(event);
        }
    }

    /// Steps 3–9 of the pipeline for one path. `Err` means sink upserts
    /// failed; in batch mode that marks the whole batch as errored so the
    /// coalescer retries it. Parse and tracker failures are absorbed here.
    pub(crate) async fn process_path(&self, path: &Path) -> Result<()> {
        let started = Instant::now();

        // Change gate.
        let status = match self.tracker.has_changed(path) {
            Ok(status) => status,
            Err(e) => {
                warn!("failed to check {}: {e}", path.display());
                self.metrics.record_error();
                return Ok(());
            }
        };
        match status {
            ChangeStatus::Unchanged => {
                debug!("unchanged, skipping: {}", path.display());
                return Ok(());
            }
            ChangeStatus::Missing => {
                self.remove_path(path).await;
                return Ok(());
            }
            ChangeStatus::Changed => {}
        }
        self.metrics.record_change();

        let mut parse = match self.parser.parse(path) {
            Ok(parse) => parse,
            Err(e) => {
                warn!("failed to parse {}: {e}", path.display());
                self.metrics.record_error();
                return Ok(());
            }
        };

        // Rebase onto the root so sink identities are root-relative.
        let rel = path.strip_prefix(&self.config.root).unwrap_or(path);
        parse.rebase(&rel.to_string_lossy());

        let sink_errors = if let Some(analyzer) = &self.delta {
            let (delta, has_changes) = {
                let mut analyzer = analyzer.lock().expect("delta lock poisoned");
                analyzer.analyze(&path.to_string_lossy(), &parse)
            };
            if !has_changes {
                debug!("no structural changes in {}", parse.file_path);
                return Ok(());
            }
            debug!(entries = delta.len(), "applying delta for {}", parse.file_path);
            self.apply_delta(&parse, &delta).await
        } else {
            self.apply_full(&parse).await
        };

        // Embeddings always see the full parse, even in diff mode.
        if let Some(embeddings) = &self.embeddings {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    if let Err(e) = embeddings.process_file(&parse, &content).await {
                        warn!("embedding sink failed for {}: {e}", parse.file_path);
                        self.metrics.record_error();
                    }
                }
                Err(e) => {
                    warn!("failed to read {} for embeddings: {e}", path.display());
                    self.metrics.record_error();
                }
            }
        }

        if sink_errors > 0 {
            self.metrics.record_error();
            bail!(
                "{sink_errors} sink operation(s) failed for {}",
                path.display()
            );
        }

        // Fingerprint commit. Loss of durability here is not fatal; the
        // in-memory record is already correct.
        if let Err(e) = self.tracker.update_state(path) {
            warn!("failed to update fingerprint for {}: {e}", path.display());
        }

        self.metrics.record_processed(started.elapsed());
        debug!("processed {}", parse.file_path);
        Ok(())
    }

    /// File removal: forget the fingerprint and the cached parse. Entity
    /// removal from the sinks is deliberately not performed.
    pub(crate) async fn remove_path(&self, path: &Path) {
        debug!("handling removal of {}", path.display());
        self.tracker.remove_state(path);
        if let Some(analyzer) = &self.delta {
            let mut analyzer = analyzer.lock().expect("delta lock poisoned");
            analyzer.drop_file(&path.to_string_lossy());
        }
    }

    /// Full-file upsert: file node, then entities, then relationships.
    /// Returns the number of failed operations; a failed file node aborts
    /// the rest since edge endpoints would be missing.
    async fn apply_full(&self, parse: &ParsedFile) -> usize {
        if let Err(e) = self.graph.upsert_file(&parse.file_path, &parse.language).await {
            warn!("failed to upsert file {}: {e}", parse.file_path);
            return 1;
        }

        let mut errors = 0usize;
        macro_rules! apply {
            ($list:expr, $op:ident, $what:literal) => {
                for entity in &$list {
                    if let Err(e) = self.graph.$op(entity).await {
                        warn!(concat!("failed to upsert ", $what, ": {}"), e);
                        errors += 1;
                    }
                }
            };
        }

        apply!(parse.functions, upsert_function, "function");
        apply!(parse.imports, upsert_import, "import");
        apply!(parse.variables, upsert_variable, "variable");
        apply!(parse.types, upsert_type, "type");
        apply!(parse.interfaces, upsert_interface, "interface");
        apply!(parse.classes, upsert_class, "class");
        apply!(parse.constants, upsert_constant, "constant");
        apply!(parse.jsx_elements, upsert_jsx_element, "jsx element");
        apply!(parse.css_rules, upsert_css_rule, "css rule");
        apply!(parse.function_calls, upsert_function_call, "function call");
        apply!(parse.type_usages, upsert_type_usage, "type usage");
        apply!(parse.extends, upsert_extends, "extends");
        apply!(parse.implements, upsert_implements, "implements");
        apply!(parse.references, upsert_reference, "reference");
        errors
    }

    /// Delta upsert: added and modified entities only. Removed entities are
    /// logged; sink-side removal is out of scope.
    async fn apply_delta(&self, parse: &ParsedFile, delta: &EntityDelta) -> usize {
        if let Err(e) = self.graph.upsert_file(&parse.file_path, &parse.language).await {
            warn!("failed to upsert file {}: {e}", parse.file_path);
            return 1;
        }

        let mut errors = 0usize;
        macro_rules! apply_kind {
            ($kind:expr, $op:ident, $what:literal) => {
                for entity in $kind.added.iter().chain($kind.modified.iter()) {
                    if let Err(e) = self.graph.$op(entity).await {
                        warn!(concat!("failed to upsert ", $what, ": {}"), e);
                        errors += 1;
                    }
                }
                if !$kind.removed.is_empty() {
                    debug!(
                        count = $kind.removed.len(),
                        concat!("removed ", $what, " entries left in sink")
                    );
                }
            };
        }

        apply_kind!(delta.functions, upsert_function, "function");
        apply_kind!(delta.imports, upsert_import, "import");
        apply_kind!(delta.variables, upsert_variable, "variable");
        apply_kind!(delta.types, upsert_type, "type");
        apply_kind!(delta.interfaces, upsert_interface, "interface");
        apply_kind!(delta.classes, upsert_class, "class");
        apply_kind!(delta.constants, upsert_constant, "constant");
        apply_kind!(delta.jsx_elements, upsert_jsx_element, "jsx element");
        apply_kind!(delta.css_rules, upsert_css_rule, "css rule");
        apply_kind!(delta.function_calls, upsert_function_call, "function call");
        apply_kind!(delta.type_usages, upsert_type_usage, "type usage");
        apply_kind!(delta.extends, upsert_extends, "extends");
        apply_kind!(delta.implements, upsert_implements, "implements");
        apply_kind!(delta.references, upsert_reference, "reference");
        errors
    }

    /// Process one flushed batch serially. Any member failure marks the
    /// batch as errored so the coalescer re-queues it.
    pub(crate) async fn process_batch(&self, events: Vec<ChangeEvent>) -> Result<()> {
        debug!(size = events.len(), "processing batch");
        let mut failed = 0usize;
        for event in &events {
            match event.kind {
                ChangeKind::Create | ChangeKind::Modify => {
                    if self.process_path(&event.path).await.is_err() {
                        failed += 1;
                    }
                }
                ChangeKind::Remove => self.remove_path(&event.path).await,
            }
        }
        if failed > 0 {
            bail!("{failed} of {} batch member(s) failed", events.len());
        }
        Ok(())
    }
}

/// Dispatch one watch event: pause gate, support filter, then either the
/// coalescer or the inline pipeline. Publishes the control-plane event after
/// handling, like every other step that observes the raw event.
pub(crate) async fn handle_watch_event(
    pipeline: &Arc<Pipeline>,
    batcher: Option<&Arc<BatchCoalescer>>,
    watcher: &Arc<tokio::sync::Mutex<Option<FileWatcher>>>,
    event: WatchEvent,
) {
    match event {
        WatchEvent::DirCreated(path) => {
            if let Some(watcher) = watcher.lock().await.as_mut() {
                watcher.watch_new_directory(&path);
            }
            pipeline.publish(SyncEvent::for_path(SyncEventKind::CreateDir, &path));
        }
        WatchEvent::Created(path) => {
            dispatch_change(pipeline, batcher, &path, ChangeKind::Create).await;
            pipeline.publish(SyncEvent::for_path(SyncEventKind::Create, &path));
        }
        WatchEvent::Modified(path) => {
            dispatch_change(pipeline, batcher, &path, ChangeKind::Modify).await;
            pipeline.publish(SyncEvent::for_path(SyncEventKind::Modify, &path));
        }
        WatchEvent::Removed(path) => {
            dispatch_removal(pipeline, batcher, &path).await;
            pipeline.publish(SyncEvent::for_path(SyncEventKind::Remove, &path));
        }
        WatchEvent::Renamed(path) => {
            dispatch_removal(pipeline, batcher, &path).await;
            pipeline.publish(SyncEvent::for_path(SyncEventKind::Rename, &path));
        }
    }
}

async fn dispatch_change(
    pipeline: &Arc<Pipeline>,
    batcher: Option<&Arc<BatchCoalescer>>,
    path: &Path,
    kind: ChangeKind,
) {
    if pipeline.is_paused() {
        debug!("paused, dropping change for {}", path.display());
        return;
    }
    if !is_supported_path(path) {
        return;
    }
    match batcher {
        Some(batcher) => batcher.add(ChangeEvent::new(path, kind)).await,
        None => {
            if let Err(e) = pipeline.process_path(path).await {
                warn!("{e:#}");
            }
        }
    }
}

async fn dispatch_removal(
    pipeline: &Arc<Pipeline>,
    batcher: Option<&Arc<BatchCoalescer>>,
    path: &Path,
) {
    if pipeline.is_paused() {
        debug!("paused, dropping removal for {}", path.display());
        return;
    }
    match batcher {
        Some(batcher) => batcher.add(ChangeEvent::new(path, ChangeKind::Remove)).await,
        None => pipeline.remove_path(path).await,
    }
}

/// The engine. Public operations mirror the control surface; everything else
/// runs in background tasks owned by this struct.
pub struct SyncEngine {
    pipeline: Arc<Pipeline>,
    batcher: Option<Arc<BatchCoalescer>>,
    event_tx: mpsc::UnboundedSender<WatchEvent>,
    event_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<WatchEvent>>>,
    watcher: Arc<tokio::sync::Mutex<Option<FileWatcher>>>,
    token: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    started_at: std::sync::RwLock<Option<DateTime<Utc>>>,
}

impl SyncEngine {
    /// Build an engine. Fingerprint state is loaded eagerly; a corrupt or
    /// unreadable state file logs a warning and starts empty.
    pub fn new(
        config: EngineConfig,
        parser: Arc<dyn SourceParser>,
        graph: Arc<dyn GraphSink>,
        embeddings: Option<Arc<dyn EmbeddingSink>>,
    ) -> Self {
        let tracker = FileTracker::new(&config.root);
        if let Err(e) = tracker.load() {
            warn!("failed to load fingerprint state, starting empty: {e:#}");
        }

        let delta = config
            .enable_diff
            .then(|| std::sync::Mutex::new(DeltaAnalyzer::new()));

        let pipeline = Arc::new(Pipeline {
            config: config.clone(),
            parser,
            tracker,
            delta,
            graph,
            embeddings,
            metrics: MetricsRecorder::new(),
            paused: std::sync::RwLock::new(false),
            subscriber: std::sync::RwLock::new(None),
        });

        let batcher = config.enable_batching.then(|| {
            let pipeline = pipeline.clone();
            let process: ProcessFn = Arc::new(move |batch| {
                let pipeline = pipeline.clone();
                Box::pin(async move { pipeline.process_batch(batch).await })
            });
            Arc::new(BatchCoalescer::new(
                config.batch_size,
                config.batch_flush_interval,
                process,
            ))
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        SyncEngine {
            pipeline,
            batcher,
            event_tx,
            event_rx: tokio::sync::Mutex::new(Some(event_rx)),
            watcher: Arc::new(tokio::sync::Mutex::new(None)),
            token: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            started_at: std::sync::RwLock::new(None),
        }
    }

    /// Register watches and start all background tasks.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("engine already running");
        }

        let root = self.pipeline.config.root.clone();
        let mut watcher = FileWatcher::new(&root, self.event_tx.clone())
            .context("failed to create filesystem watcher")?;
        let watched = watcher
            .start()
            .context("failed to register filesystem watches")?;
        info!(dirs = watched, root = %root.display(), "watching source tree");
        *self.watcher.lock().await = Some(watcher);

        self.pipeline
            .metrics
            .set_files_monitored(self.pipeline.tracker.len());

        let mut tasks = self.tasks.lock().await;

        // Event loop: single consumer for watcher, scanner, and rescans.
        {
            let pipeline = self.pipeline.clone();
            let batcher = self.batcher.clone();
            let watcher = self.watcher.clone();
            let token = self.token.clone();
            let mut rx = self
                .event_rx
                .lock()
                .await
                .take()
                .context("engine event loop already consumed")?;
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = rx.recv() => {
                            let Some(event) = event else { break };
                            handle_watch_event(&pipeline, batcher.as_ref(), &watcher, event).await;
                        }
                    }
                }
            }));
        }

        if let Some(batcher) = &self.batcher {
            let batcher = batcher.clone();
            let token = self.token.clone();
            tasks.push(tokio::spawn(async move { batcher.run(token).await }));
        }

        if self.pipeline.config.enable_scm {
            match lattice_watcher::GitScanner::new(&root) {
                Ok(mut scanner) => {
                    let event_tx = self.event_tx.clone();
                    let token = self.token.clone();
                    let poll = self.pipeline.config.scm_poll_interval;
                    tasks.push(tokio::spawn(async move {
                        let mut ticker = tokio::time::interval(poll);
                        ticker.tick().await;
                        loop {
                            tokio::select! {
                                _ = token.cancelled() => break,
                                _ = ticker.tick() => {
                                    let changes = match scanner.changed_files() {
                                        Ok(changes) => changes,
                                        Err(e) => {
                                            warn!("revision scan failed: {e:#}");
                                            continue;
                                        }
                                    };
                                    if !changes.is_empty() {
                                        debug!(count = changes.len(), "revision scan found changes");
                                    }
                                    for change in changes {
                                        if !is_supported_path(&change.path) {
                                            continue;
                                        }
                                        let event = match change.status {
                                            ScmStatus::Added | ScmStatus::Modified => {
                                                WatchEvent::Modified(change.path)
                                            }
                                            ScmStatus::Removed => WatchEvent::Removed(change.path),
                                        };
                                        if event_tx.send(event).is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }));
                }
                Err(e) => warn!("revision-control scanning disabled: {e:#}"),
            }
        }

        // Periodic fingerprint save.
        {
            let pipeline = self.pipeline.clone();
            let token = self.token.clone();
            let interval = self.pipeline.config.state_save_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = pipeline.tracker.save() {
                                warn!("periodic fingerprint save failed: {e:#}");
                            }
                        }
                    }
                }
            }));
        }

        // Monitored-file gauge refresh.
        {
            let pipeline = self.pipeline.clone();
            let token = self.token.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(METRICS_REFRESH_INTERVAL);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            pipeline.metrics.set_files_monitored(pipeline.tracker.len());
                        }
                    }
                }
            }));
        }

        *self.started_at.write().expect("start time lock poisoned") = Some(Utc::now());
        info!("sync engine started");
        Ok(())
    }

    /// Orderly shutdown: cancel tasks, wait for them (the coalescer performs
    /// its final flush on the way out), save fingerprints, close sinks. Only
    /// the final save and sink close can fail.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("stopping sync engine");

        self.token.cancel();
        self.watcher.lock().await.take();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("background task panicked: {e}");
            }
        }
        drop(tasks);

        let save_result = self.pipeline.tracker.save();

        let close_result = self.pipeline.graph.close().await;
        if let Some(embeddings) = &self.pipeline.embeddings {
            if let Err(e) = embeddings.close().await {
                warn!("embedding sink close failed: {e}");
            }
        }

        save_result.context("final fingerprint save failed")?;
        close_result
            .map_err(|e| anyhow::anyhow!(e))
            .context("graph sink close failed")?;
        info!("sync engine stopped");
        Ok(())
    }

    pub fn pause(&self) {
        self.pipeline.set_paused(true);
        info!("engine paused");
    }

    pub fn resume(&self) {
        self.pipeline.set_paused(false);
        info!("engine resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.pipeline.is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read().expect("start time lock poisoned")
    }

    pub fn list_monitored(&self) -> Vec<String> {
        self.pipeline.tracker.paths()
    }

    pub fn is_monitored(&self, path: &Path) -> bool {
        self.pipeline.tracker.contains(path)
    }

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.pipeline.metrics.snapshot();
        EngineStats {
            files_monitored: snapshot.files_monitored,
            files_processed: snapshot.files_processed,
            changes_detected: snapshot.changes_detected,
            errors: snapshot.errors,
            last_change: snapshot.last_change,
            average_processing_time_ms: snapshot.average_processing_time_ms,
            uptime_secs: snapshot.uptime_secs,
            batch_metrics: self.batcher.as_ref().map(|b| b.metrics()),
            cache_size: self.pipeline.delta.as_ref().map(|analyzer| {
                analyzer.lock().expect("delta lock poisoned").len()
            }),
        }
    }

    pub fn set_event_subscriber(&self, subscriber: EventSubscriber) {
        let mut slot = self
            .pipeline
            .subscriber
            .write()
            .expect("subscriber lock poisoned");
        *slot = Some(subscriber);
    }

    /// Queue synthetic modify events for every supported file under the root
    /// (or a subtree of it). The change gate keeps this cheap for unchanged
    /// files. Returns the number of paths queued.
    pub fn rescan(&self, subpath: Option<&Path>) -> usize {
        let base = match subpath {
            Some(sub) => self.pipeline.config.root.join(sub),
            None => self.pipeline.config.root.clone(),
        };

        let mut queued = 0usize;
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(base);
        while let Some(dir) = queue.pop_front() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("rescan cannot read {}: {e}", dir.display());
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let name = entry.file_name();
                    if name
                        .to_str()
                        .map(lattice_core::is_skipped_dir)
                        .unwrap_or(false)
                    {
                        continue;
                    }
                    queue.push_back(path);
                } else if is_supported_path(&path) {
                    if self.event_tx.send(WatchEvent::Modified(path)).is_ok() {
                        queued += 1;
                    }
                }
            }
        }
        info!(queued, "rescan queued");
        queued
    }

    #[cfg(test)]
    pub(crate) fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &FileTracker {
        &self.pipeline.tracker
    }

    #[cfg(test)]
    pub(crate) fn batcher(&self) -> Option<&Arc<BatchCoalescer>> {
        self.batcher.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, event: WatchEvent) {
        let _ = self.event_tx.send(event);
    }
}

// Kept for callers that want to build paths for rescan without touching the
// config directly.
impl SyncEngine {
    pub fn root(&self) -> &PathBuf {
        &self.pipeline.config.root
    }
}

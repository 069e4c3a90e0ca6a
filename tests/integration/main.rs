//! End-to-end scenarios for the sync engine
//!
//! Each test stands up a real engine over a temp tree with the tree-sitter
//! parser and the in-memory graph sink, then drives it through rescans and
//! filesystem events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lattice_core::{EngineConfig, SyncEvent, SyncEventKind};
use lattice_parser::TreeSitterParser;
use lattice_sink::{EmbeddingSink, MemoryEmbeddingStore, MemoryGraphSink};
use lattice_sync::SyncEngine;
use tokio::time::sleep;

struct Harness {
    _dir: tempfile::TempDir,
    root: PathBuf,
    engine: Arc<SyncEngine>,
    sink: Arc<MemoryGraphSink>,
}

fn harness(configure: impl FnOnce(&mut EngineConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut config = EngineConfig::new(&root);
    configure(&mut config);

    let sink = Arc::new(MemoryGraphSink::new());
    let engine = Arc::new(SyncEngine::new(
        config,
        Arc::new(TreeSitterParser::new()),
        sink.clone(),
        None,
    ));

    Harness {
        _dir: dir,
        root,
        engine,
        sink,
    }
}

fn write(root: &Path, name: &str, content: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Rescan and give the event loop time to drain.
async fn rescan_and_settle(engine: &SyncEngine) -> usize {
    let queued = engine.rescan(None);
    sleep(Duration::from_millis(300)).await;
    queued
}

#[tokio::test]
async fn s1_unchanged_bytes_produce_no_work() {
    let h = harness(|_| {});
    write(&h.root, "a.ts", "export function f() {}\n");

    h.engine.start().await.unwrap();
    rescan_and_settle(&h.engine).await;

    let stats = h.engine.stats();
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.changes_detected, 1);

    // Touch with identical bytes: mtime bumps, nothing else happens.
    write(&h.root, "a.ts", "export function f() {}\n");
    rescan_and_settle(&h.engine).await;

    let stats = h.engine.stats();
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.changes_detected, 1);
    assert_eq!(stats.errors, 0);

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn s2_new_file_lands_in_the_sink() {
    let h = harness(|_| {});
    h.engine.start().await.unwrap();

    let path = write(&h.root, "b.ts", "export function f() {}\n");
    rescan_and_settle(&h.engine).await;

    assert!(h.sink.has_file("b.ts"));
    assert_eq!(h.sink.language_of("b.ts").unwrap(), "typescript");
    let f = h.sink.function("f", "b.ts").expect("function node");
    assert!(f.is_export);
    assert!(h.engine.is_monitored(&path));

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn s3_moved_function_updates_in_diff_mode() {
    let h = harness(|c| c.enable_diff = true);
    h.engine.start().await.unwrap();

    write(&h.root, "c.ts", "function g() {\n  return 1;\n}\n");
    rescan_and_settle(&h.engine).await;
    assert_eq!(h.sink.function("g", "c.ts").unwrap().start_line, 1);

    // Same signature, moved down four lines: a modification, not an add.
    write(&h.root, "c.ts", "\n\n\n\nfunction g() {\n  return 1;\n}\n");
    rescan_and_settle(&h.engine).await;

    let g = h.sink.function("g", "c.ts").unwrap();
    assert_eq!(g.start_line, 5);
    assert_eq!(h.sink.count_label("Function"), 1);

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn s4_batched_changes_flush_once() {
    let h = harness(|c| {
        c.enable_batching = true;
        c.batch_size = 3;
        c.batch_flush_interval = Duration::from_secs(10);
    });
    h.engine.start().await.unwrap();

    for name in ["x.ts", "y.ts", "z.ts"] {
        write(&h.root, name, "export function f() {}\n");
    }
    rescan_and_settle(&h.engine).await;

    let stats = h.engine.stats();
    let batch = stats.batch_metrics.expect("batching enabled");
    assert_eq!(batch.total_batches, 1);
    assert_eq!(batch.total_changes, 3);
    assert_eq!(stats.files_processed, 3);

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn s6_removal_is_forgotten_and_published() {
    let h = harness(|c| c.enable_diff = true);

    let events: Arc<std::sync::Mutex<Vec<SyncEvent>>> = Default::default();
    let log = events.clone();
    h.engine
        .set_event_subscriber(Box::new(move |event| log.lock().unwrap().push(event)));

    h.engine.start().await.unwrap();
    let path = write(&h.root, "a.ts", "export function f() {}\n");
    rescan_and_settle(&h.engine).await;
    assert!(h.engine.is_monitored(&path));

    std::fs::remove_file(&path).unwrap();
    sleep(Duration::from_millis(500)).await;

    assert!(!h.engine.is_monitored(&path));
    assert_eq!(h.engine.stats().cache_size, Some(0));
    // Sink contents stay; removal from the graph is out of scope.
    assert!(h.sink.has_file("a.ts"));

    let kinds: Vec<SyncEventKind> = events.lock().unwrap().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&SyncEventKind::Remove) || kinds.contains(&SyncEventKind::Rename));

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn restart_with_intact_state_is_quiescent() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    write(&root, "a.ts", "export function f() {}\n");

    {
        let engine = SyncEngine::new(
            EngineConfig::new(&root),
            Arc::new(TreeSitterParser::new()),
            Arc::new(MemoryGraphSink::new()),
            None,
        );
        engine.start().await.unwrap();
        engine.rescan(None);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.stats().files_processed, 1);
        engine.stop().await.unwrap();
    }

    // Fresh engine, intact state file, unchanged tree: nothing reprocesses.
    let engine = SyncEngine::new(
        EngineConfig::new(&root),
        Arc::new(TreeSitterParser::new()),
        Arc::new(MemoryGraphSink::new()),
        None,
    );
    engine.start().await.unwrap();
    engine.rescan(None);
    sleep(Duration::from_millis(300)).await;

    let stats = engine.stats();
    assert_eq!(stats.files_processed, 0);
    assert_eq!(stats.changes_detected, 0);
    assert_eq!(engine.list_monitored().len(), 1);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn watch_expansion_covers_new_directories() {
    let h = harness(|_| {});
    h.engine.start().await.unwrap();

    // Directory created after start, then a file inside it.
    std::fs::create_dir(h.root.join("features")).unwrap();
    sleep(Duration::from_millis(400)).await;
    write(&h.root, "features/login.ts", "export function login() {}\n");
    sleep(Duration::from_millis(600)).await;

    assert!(h.sink.function("login", "features/login.ts").is_some());

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn css_files_flow_through_end_to_end() {
    let h = harness(|_| {});
    h.engine.start().await.unwrap();

    write(
        &h.root,
        "theme.css",
        ".btn { color: red; }\n:root { --accent: #00ff00; }\n",
    );
    rescan_and_settle(&h.engine).await;

    assert_eq!(h.sink.language_of("theme.css").unwrap(), "css");
    assert!(h.sink.count_label("CssRule") >= 2);

    h.engine.stop().await.unwrap();
}

#[tokio::test]
async fn embeddings_receive_full_parse_in_diff_mode() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut config = EngineConfig::new(&root);
    config.enable_diff = true;

    let store = Arc::new(MemoryEmbeddingStore::new());
    let engine = SyncEngine::new(
        config,
        Arc::new(TreeSitterParser::new()),
        Arc::new(MemoryGraphSink::new()),
        Some(store.clone() as Arc<dyn EmbeddingSink>),
    );
    engine.start().await.unwrap();

    write(&root, "a.ts", "export function f() {}\nexport function g() {}\n");
    engine.rescan(None);
    sleep(Duration::from_millis(300)).await;

    // Both functions chunked even though the sink saw them as a delta.
    assert_eq!(store.chunks_for("a.ts").len(), 2);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn pause_blocks_processing_until_resume() {
    let h = harness(|_| {});
    h.engine.start().await.unwrap();
    h.engine.pause();

    write(&h.root, "a.ts", "export function f() {}\n");
    rescan_and_settle(&h.engine).await;
    assert_eq!(h.engine.stats().files_processed, 0);

    h.engine.resume();
    rescan_and_settle(&h.engine).await;
    assert_eq!(h.engine.stats().files_processed, 1);

    h.engine.stop().await.unwrap();
}

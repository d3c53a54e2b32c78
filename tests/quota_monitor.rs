//! Quota monitor running against shared storage.

use async_trait::async_trait;
use delta_store::storage::{
    ConfirmPrompt, MemoryPersistence, QuotaConfig, QuotaMonitor, SetOptions, StorageEvent,
};
use delta_store::{Storage, StorageConfig};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct AlwaysConfirm {
    asked: AtomicUsize,
}

#[async_trait]
impl ConfirmPrompt for AlwaysConfirm {
    async fn confirm(&self, message: &str) -> bool {
        assert!(!message.is_empty());
        self.asked.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn populated(limit: u64) -> (Arc<MemoryPersistence>, Arc<Storage>) {
    let persistence = Arc::new(MemoryPersistence::with_limit(limit));
    let storage = Storage::new(
        persistence.clone(),
        StorageConfig::default().with_check_quota_on_write(false),
    );
    for i in 0..6 {
        storage
            .set(&format!("img_{}", i), json!({"bytes": i}), SetOptions::new())
            .unwrap();
    }
    (persistence, Arc::new(storage))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_prompts_on_warning_then_evicts() {
    init_tracing();
    let (persistence, storage) = populated(10_000);
    persistence.override_size(Some(9_000));

    let prompt = Arc::new(AlwaysConfirm {
        asked: AtomicUsize::new(0),
    });
    let handle = QuotaMonitor::spawn(
        storage.clone(),
        QuotaConfig::default().with_check_interval(Duration::from_millis(20)),
        Some(prompt.clone()),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop().await;

    assert!(prompt.asked.load(Ordering::SeqCst) >= 1);
    assert!(storage.keys().unwrap().len() <= 3);
}

#[tokio::test]
async fn test_monitor_quiet_below_threshold() {
    init_tracing();
    let (_, storage) = populated(1024 * 1024);
    let events = storage.subscribe();

    let handle = QuotaMonitor::spawn(
        storage.clone(),
        QuotaConfig::default().with_check_interval(Duration::from_millis(10)),
        None,
    );
    tokio::time::sleep(Duration::from_millis(40)).await;
    handle.stop().await;

    assert!(events.drain().is_empty());
    assert_eq!(storage.keys().unwrap().len(), 6);
}

#[tokio::test]
async fn test_stop_ends_task_before_next_tick() {
    let (persistence, storage) = populated(1000);
    persistence.override_size(Some(1000));
    let events = storage.subscribe();

    let handle = QuotaMonitor::spawn(
        storage.clone(),
        QuotaConfig::default().with_check_interval(Duration::from_secs(60)),
        None,
    );
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.stop().await;

    // Only the immediate first tick ran.
    let critical = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, StorageEvent::QuotaCritical { .. }))
        .count();
    assert_eq!(critical, 1);
    assert_eq!(storage.keys().unwrap().len(), 3);
}

//! Integration tests for the cancellation protocol.

mod helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobrelay_worker::manager::AbortSummary;
use jobrelay_worker::task::FnSubtask;
use jobrelay_worker::JobManager;

#[tokio::test]
async fn test_abort_before_start_is_noop() {
    let mut manager = JobManager::with_max_workers(1).expect("manager");
    manager.add_subtask(helpers::value_subtask("one", 1));
    manager.add_subtask(helpers::value_subtask("two", 2));

    assert_eq!(manager.abort(None).await, AbortSummary::default());
    assert_eq!(manager.pending_jobs(), 2);
}

// Single-threaded runtime: no worker can pick anything up until the test
// yields, so `abort` right after `start` sees every job still queued.
#[tokio::test]
async fn test_abort_right_after_start_cancels_everything() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut manager = JobManager::with_max_workers(1).expect("manager");
    for name in ["first", "second"] {
        let ran = Arc::clone(&ran);
        manager.add_subtask(Arc::new(FnSubtask::new(name, move |_| {
            ran.store(true, Ordering::SeqCst);
            Ok(Some(serde_json::json!(1)))
        })));
    }

    manager.start().expect("start");
    let summary = manager.abort(None).await;
    assert_eq!(
        summary,
        AbortSummary {
            cancelled: 2,
            waited: 0
        }
    );
    assert!(!manager.is_active());
    assert!(!manager.has_outstanding());

    let results = manager.collect_results(None).await;
    assert!(results.is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!ran.load(Ordering::SeqCst));
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_waits_for_running_job() {
    let gated = helpers::Gated::new("running", 1);
    let mut manager = JobManager::with_max_workers(1).expect("manager");
    manager.add_subtask(Arc::clone(&gated.subtask));
    manager.add_subtask(helpers::value_subtask("queued", 2));
    manager.start().expect("start");

    gated.wait_started();
    let release = gated.release.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        let _ = release.send(());
    });

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let summary = manager
        .abort(Some(Box::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        })))
        .await;

    assert_eq!(
        summary,
        AbortSummary {
            cancelled: 1,
            waited: 1
        }
    );
    let reports = reports.lock().unwrap();
    assert_eq!(reports.last(), Some(&(1, 1)));
    assert!(reports.iter().all(|&(_, total)| total == 1));
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_flushes_messages_of_running_job() {
    let (sink, seen) = helpers::recording_sink();
    let gated = helpers::Gated::new("talker", 1);
    let mut manager = JobManager::with_max_workers(1)
        .expect("manager")
        .with_sink(sink);
    manager.add_subtask(Arc::clone(&gated.subtask));
    manager.start().expect("start");

    gated.wait_started();
    gated.release();
    manager.abort(None).await;

    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|(_, text)| text == "waiting for release"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_results_after_abort_are_empty() {
    let gated = helpers::Gated::new("slow", 1);
    let mut manager = JobManager::with_max_workers(1).expect("manager");
    manager.add_subtask(Arc::clone(&gated.subtask));
    manager.start().expect("start");

    gated.wait_started();
    gated.release();
    manager.abort(None).await;

    assert!(manager.collect_results(None).await.is_empty());
    manager.shutdown().await;
}

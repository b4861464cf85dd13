//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use serde_json::json;

use jobrelay_worker::relay::{MessageEntry, SharedSink};
use jobrelay_worker::task::{FnSubtask, SubtaskRef};
use jobrelay_worker::SubtaskError;

/// A subtask returning `value`.
pub fn value_subtask(name: &str, value: i64) -> SubtaskRef {
    Arc::new(FnSubtask::new(name, move |_| Ok(Some(json!(value)))))
}

/// A subtask that succeeds without a result.
pub fn silent_subtask(name: &str) -> SubtaskRef {
    Arc::new(FnSubtask::new(name, |_| Ok(None)))
}

/// A subtask that always fails.
pub fn failing_subtask(name: &str, message: &'static str) -> SubtaskRef {
    Arc::new(FnSubtask::new(name, move |_| Err(SubtaskError::failed(message))))
}

/// A subtask that blocks its worker until released.
pub struct Gated {
    pub subtask: SubtaskRef,
    pub started: Receiver<()>,
    pub release: Sender<()>,
}

impl Gated {
    pub fn new(name: &str, value: i64) -> Self {
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let subtask: SubtaskRef = Arc::new(FnSubtask::new(name, move |log| {
            let _ = started_tx.send(());
            log.log("waiting for release");
            let _ = release_rx.lock().unwrap().recv();
            Ok(Some(json!(value)))
        }));

        Self {
            subtask,
            started: started_rx,
            release: release_tx,
        }
    }

    /// Block until the worker has picked the job up. Multi-thread
    /// runtimes only.
    pub fn wait_started(&self) {
        tokio::task::block_in_place(|| self.started.recv()).expect("gated subtask started");
    }

    /// Let the worker finish.
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// A sink collecting `(source, text)` pairs.
pub fn recording_sink() -> (SharedSink, Arc<Mutex<Vec<(Option<String>, String)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink: SharedSink = Arc::new(move |entry: &MessageEntry| {
        sink_seen
            .lock()
            .unwrap()
            .push((entry.source.clone(), entry.text.clone()));
    });
    (sink, seen)
}

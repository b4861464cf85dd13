//! Minimal publish/subscribe for progress and status values.
//!
//! Only types implementing [`Observer`] can subscribe; anything else is
//! rejected at compile time:
//!
//! ```compile_fail
//! use jobrelay_worker::observer::Subject;
//! use std::sync::Arc;
//!
//! let subject: Subject<u32> = Subject::new();
//! subject.subscribe(Arc::new(42_u32));
//! ```

use std::sync::{Arc, Mutex};

use crate::manager::{Progress, ProgressCallback};

/// Receives values published by a [`Subject`].
pub trait Observer<T>: Send + Sync {
    /// Called once per notification, with the published value if any.
    fn emit(&self, value: Option<&T>);
}

impl<T, F> Observer<T> for F
where
    F: Fn(Option<&T>) + Send + Sync,
{
    fn emit(&self, value: Option<&T>) {
        self(value)
    }
}

/// An ordered, duplicate-free set of observers.
pub struct Subject<T> {
    observers: Mutex<Vec<Arc<dyn Observer<T>>>>,
}

impl<T> Subject<T> {
    /// Create a subject with no observers.
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Add an observer. Returns `false` if that exact observer is already
    /// subscribed.
    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        observers.push(observer);
        true
    }

    /// Remove an observer. Removing one that is not subscribed does nothing.
    pub fn unsubscribe(&self, observer: &Arc<dyn Observer<T>>) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.retain(|o| !same_observer(o, observer));
    }

    /// Number of subscribed observers.
    pub fn len(&self) -> usize {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `value` to every observer, in subscription order.
    pub fn notify(&self, value: Option<T>) {
        let observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        for observer in observers.iter() {
            observer.emit(value.as_ref());
        }
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.len())
            .finish()
    }
}

impl Subject<Progress> {
    /// A progress callback for the job manager that republishes every
    /// report to this subject's observers.
    pub fn progress_callback(&self) -> ProgressCallback<'_> {
        Box::new(move |completed, total| self.notify(Some(Progress { completed, total })))
    }
}

fn same_observer<T>(a: &Arc<dyn Observer<T>>, b: &Arc<dyn Observer<T>>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// src/ingest/flush_coordinator.rs
//! Fan-out of flush callbacks on teardown
//!
//! Components register a callback returning a future of `Result<()>`. The
//! coordinator binds once to the host lifecycle and runs every callback on
//! teardown or when the host becomes hidden. A failing or panicking callback
//! is recorded in the [`FlushReport`] and never stops the others.

use crate::ingest::lifecycle::{Lifecycle, LifecycleSignal};
use crate::utils::errors::{EngineError, Result};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

type FlushCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlushHandle(u64);

/// Aggregated result of a fan-out
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Callbacks invoked
    pub attempted: usize,

    /// Callbacks still running in the background (fire-and-forget only)
    pub pending: usize,

    /// Callbacks that failed or panicked
    pub failures: Vec<(FlushHandle, EngineError)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct CoordinatorInner {
    lifecycle: Lifecycle,
    callbacks: Mutex<Vec<(FlushHandle, FlushCallback)>>,
    next_id: AtomicU64,
    bound: AtomicBool,
}

/// Registry of flush callbacks bound to the host lifecycle
#[derive(Clone)]
pub struct FlushCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl FlushCoordinator {
    pub fn new(lifecycle: Lifecycle) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                lifecycle,
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                bound: AtomicBool::new(false),
            }),
        }
    }

    /// Register a callback; the first registration binds to the lifecycle
    pub fn register<F, Fut>(&self, callback: F) -> FlushHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = FlushHandle(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let callback: FlushCallback = Arc::new(move || callback().boxed());
        self.inner.callbacks.lock().push((handle, callback));

        self.bind_once();
        handle
    }

    /// Remove a callback; returns whether it was registered
    pub fn unregister(&self, handle: FlushHandle) -> bool {
        let mut callbacks = self.inner.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(h, _)| *h != handle);
        callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_bound(&self) -> bool {
        self.inner.bound.load(Ordering::SeqCst)
    }

    fn bind_once(&self) {
        if self.inner.bound.load(Ordering::SeqCst) {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available; lifecycle binding deferred");
            return;
        };

        if self.inner.bound.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut signals = self.inner.lifecycle.subscribe();
        let weak: Weak<CoordinatorInner> = Arc::downgrade(&self.inner);

        handle.spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(LifecycleSignal::Teardown) | Ok(LifecycleSignal::Hidden) => {
                        let Some(inner) = weak.upgrade() else { break };
                        let report = FlushCoordinator { inner }.flush_all();
                        debug!(
                            "Lifecycle flush ran {} callbacks ({} failed)",
                            report.attempted,
                            report.failures.len()
                        );
                    }
                    Ok(LifecycleSignal::Visible) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Lifecycle listener skipped {} signals", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    fn snapshot(&self) -> Vec<(FlushHandle, FlushCallback)> {
        self.inner.callbacks.lock().clone()
    }

    /// Run every callback without waiting for asynchronous work
    ///
    /// Callbacks that complete on first poll are reported here; the rest are
    /// spawned and report their failures through the log.
    pub fn flush_all(&self) -> FlushReport {
        let mut report = FlushReport::default();

        for (handle, callback) in self.snapshot() {
            report.attempted += 1;

            let Some(future) = invoke(handle, &callback, &mut report) else {
                continue;
            };

            let mut guarded = AssertUnwindSafe(future).catch_unwind().boxed();
            match (&mut guarded).now_or_never() {
                Some(result) => record(handle, flatten(result), &mut report),
                None => match tokio::runtime::Handle::try_current() {
                    Ok(rt) => {
                        report.pending += 1;
                        rt.spawn(async move {
                            if let Err(e) = flatten(guarded.await) {
                                warn!("Flush callback {:?} failed: {}", handle, e);
                            }
                        });
                    }
                    Err(_) => record(
                        handle,
                        Err(EngineError::CallbackFailed(
                            "callback needs a runtime to complete".to_string(),
                        )),
                        &mut report,
                    ),
                },
            }
        }

        report
    }

    /// Run every callback and wait for all of them
    pub async fn flush_async(&self) -> FlushReport {
        let mut report = FlushReport::default();
        let mut running = Vec::new();

        for (handle, callback) in self.snapshot() {
            report.attempted += 1;
            if let Some(future) = invoke(handle, &callback, &mut report) {
                running.push(async move {
                    (handle, flatten(AssertUnwindSafe(future).catch_unwind().await))
                });
            }
        }

        for (handle, result) in join_all(running).await {
            record(handle, result, &mut report);
        }

        report
    }
}

/// Call a callback, containing a panic raised before it returns its future
fn invoke(
    handle: FlushHandle,
    callback: &FlushCallback,
    report: &mut FlushReport,
) -> Option<BoxFuture<'static, Result<()>>> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| callback())) {
        Ok(future) => Some(future),
        Err(_) => {
            record(
                handle,
                Err(EngineError::CallbackFailed("callback panicked".to_string())),
                report,
            );
            None
        }
    }
}

fn flatten(result: std::thread::Result<Result<()>>) -> Result<()> {
    match result {
        Ok(inner) => inner,
        Err(_) => Err(EngineError::CallbackFailed("callback panicked".to_string())),
    }
}

fn record(handle: FlushHandle, result: Result<()>, report: &mut FlushReport) {
    if let Err(e) = result {
        warn!("Flush callback {:?} failed: {}", handle, e);
        report.failures.push((handle, e));
    }
}

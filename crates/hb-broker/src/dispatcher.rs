//! Bounded background execution of accepted operations
//!
//! Work handed to the dispatcher runs on its own task: it is not awaited by
//! the caller and not cancelled when the caller goes away. A semaphore caps
//! how many operations run at once; the rest wait for a permit. On shutdown
//! the dispatcher drains what is in flight.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn, Instrument};

use hb_common::OperationId;

/// Callback invoked with the operation ID whenever work is dispatched
pub type DispatchHook = Arc<dyn Fn(&OperationId) + Send + Sync>;

/// Default cap on concurrently running operations
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 16;

/// Count of dispatched work, signalling when it drops to zero
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements [`Pending`] when the work finishes or is dropped
struct PendingGuard(Arc<Pending>);

impl PendingGuard {
    fn enter(pending: Arc<Pending>) -> Self {
        pending.count.fetch_add(1, Ordering::SeqCst);
        Self(pending)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Bounded pool for background operation work
#[derive(Clone)]
pub struct TaskDispatcher {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    pending: Arc<Pending>,
    hook: Option<DispatchHook>,
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_OPERATIONS)
    }
}

impl TaskDispatcher {
    /// Create a dispatcher running at most `max_concurrent` operations at once
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            pending: Arc::new(Pending::default()),
            hook: None,
        }
    }

    /// Install a hook called synchronously each time work is dispatched
    pub fn with_hook(mut self, hook: DispatchHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Run `work` in the background for `operation_id`
    pub fn dispatch<F>(&self, operation_id: OperationId, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(hook) = &self.hook {
            hook(&operation_id);
        }
        if self.tracker.is_closed() {
            warn!(operation_id = %operation_id, "work dispatched while shutting down");
        }

        let permits = self.permits.clone();
        let guard = PendingGuard::enter(self.pending.clone());
        let span = info_span!("operation", operation_id = %operation_id);
        self.tracker.spawn(
            async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else {
                    warn!("dispatcher semaphore closed, dropping operation");
                    return;
                };
                work.await;
            }
            .instrument(span),
        );
    }

    /// Number of operations queued or running
    pub fn in_flight(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until no dispatched operation is queued or running.
    ///
    /// The dispatcher keeps accepting work; shutdown state is untouched.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Close the tracker and drain in-flight work.
    ///
    /// Returns `false` when work was still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "draining background operations");
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("background operations drained");
                true
            }
            Err(_) => {
                warn!(
                    in_flight = self.tracker.len(),
                    "shutdown timeout elapsed with operations still running"
                );
                false
            }
        }
    }
}

//! Periodic background flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::OfflineQueue;
use crate::clock::Clock;
use crate::remote::MutationApi;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::storage::DurableStore;
use crate::telemetry::TelemetrySink;

struct Shared<Sch> {
    scheduler: Sch,
    interval: Duration,
    stopped: AtomicBool,
    next: Mutex<Option<TaskHandle>>,
}

/// Flushes a queue every `interval` until stopped or dropped.
///
/// The next tick is armed only after the previous flush finishes, so ticks
/// never pile up behind a slow backend.
pub struct AutoFlush<Sch: Scheduler> {
    shared: Arc<Shared<Sch>>,
}

impl<Sch: Scheduler> AutoFlush<Sch> {
    pub fn start<S, A, C, T>(
        queue: Arc<OfflineQueue<S, A, C, T>>,
        scheduler: Sch,
        interval: Duration,
    ) -> Self
    where
        S: DurableStore,
        A: MutationApi,
        C: Clock,
        T: TelemetrySink,
    {
        let shared = Arc::new(Shared {
            scheduler,
            interval,
            stopped: AtomicBool::new(false),
            next: Mutex::new(None),
        });
        tracing::debug!(interval_ms = interval.as_millis(), "starting periodic queue flush");
        arm(queue, Arc::clone(&shared));
        Self { shared }
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.shared.next.lock().ok().and_then(|mut next| next.take());
        if let Some(handle) = pending {
            self.shared.scheduler.cancel(handle);
        }
        tracing::debug!("stopped periodic queue flush");
    }
}

impl<Sch: Scheduler> Drop for AutoFlush<Sch> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn arm<S, A, C, T, Sch>(queue: Arc<OfflineQueue<S, A, C, T>>, shared: Arc<Shared<Sch>>)
where
    S: DurableStore,
    A: MutationApi,
    C: Clock,
    T: TelemetrySink,
    Sch: Scheduler,
{
    if shared.stopped.load(Ordering::SeqCst) {
        return;
    }

    let tick_shared = Arc::clone(&shared);
    let handle = shared.scheduler.schedule(
        shared.interval,
        Box::new(move || {
            if tick_shared.stopped.load(Ordering::SeqCst) {
                return;
            }
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!("no async runtime available, periodic flush halted");
                return;
            };
            runtime.spawn(async move {
                let report = queue.flush().await;
                if report.attempted > 0 {
                    tracing::debug!(
                        attempted = report.attempted,
                        synced = report.synced,
                        retrying = report.retrying,
                        failed = report.failed,
                        "periodic flush finished"
                    );
                }
                arm(queue, tick_shared);
            });
        }),
    );

    if let Ok(mut next) = shared.next.lock() {
        *next = Some(handle);
    }
}

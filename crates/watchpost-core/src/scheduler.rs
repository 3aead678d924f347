//! Delayed callback scheduling.
//!
//! Retry chains never sleep inline. They hand a task to a [`Scheduler`] and
//! keep the returned [`TaskHandle`] so the task can be cancelled when the
//! owner is torn down.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;

/// Boxed one-shot task.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation token for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub const fn id(self) -> u64 {
        self.0
    }
}

pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Cancel a task that has not run yet. Unknown or finished handles are ignored.
    fn cancel(&self, handle: TaskHandle);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        (**self).schedule(delay, task)
    }

    fn cancel(&self, handle: TaskHandle) {
        (**self).cancel(handle);
    }
}

/// Scheduler backed by `tokio::time::sleep` on the current runtime.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    next_id: Arc<AtomicU64>,
    // `None` until the spawned task's abort handle is known.
    tasks: Arc<Mutex<HashMap<u64, Option<AbortHandle>>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks that are scheduled and have not yet fired.
    pub fn pending(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(id, None);
        }

        let tasks = Arc::clone(&self.tasks);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_scheduled = tasks
                .lock()
                .map(|mut tasks| tasks.remove(&id).is_some())
                .unwrap_or(false);
            if still_scheduled {
                task();
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(slot) = tasks.get_mut(&id) {
                *slot = Some(join.abort_handle());
            }
        }
        TaskHandle(id)
    }

    fn cancel(&self, handle: TaskHandle) {
        let removed = self
            .tasks
            .lock()
            .ok()
            .and_then(|mut tasks| tasks.remove(&handle.0))
            .flatten();
        if let Some(abort) = removed {
            abort.abort();
        }
    }
}

struct PendingTask {
    due_ms: u64,
    delay: Duration,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now_ms: u64,
    next_id: u64,
    pending: BTreeMap<u64, PendingTask>,
    history: Vec<Duration>,
}

/// Virtual-time scheduler. Tasks only run when [`ManualScheduler::advance`]
/// moves time past their due point.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.state.lock().map(|state| state.now_ms).unwrap_or(0)
    }

    pub fn pending(&self) -> usize {
        self.state.lock().map(|state| state.pending.len()).unwrap_or(0)
    }

    /// Delays of every task ever scheduled, in scheduling order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }

    /// Delay of the earliest pending task.
    pub fn next_delay(&self) -> Option<Duration> {
        let state = self.state.lock().ok()?;
        state
            .pending
            .values()
            .min_by_key(|pending| pending.due_ms)
            .map(|pending| pending.delay)
    }

    /// Move virtual time forward, running due tasks in due order.
    ///
    /// Tasks scheduled by a running task are eligible in the same call if
    /// they fall due before the new time. Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = {
            let Ok(state) = self.state.lock() else {
                return 0;
            };
            state.now_ms.saturating_add(duration_ms(by))
        };

        let mut ran = 0;
        loop {
            let next = {
                let Ok(mut state) = self.state.lock() else {
                    break;
                };
                let due = state
                    .pending
                    .iter()
                    .filter(|(_, pending)| pending.due_ms <= target)
                    .min_by_key(|(id, pending)| (pending.due_ms, **id))
                    .map(|(id, _)| *id);
                match due.and_then(|id| state.pending.remove(&id)) {
                    Some(pending) => {
                        state.now_ms = state.now_ms.max(pending.due_ms);
                        Some(pending.task)
                    }
                    None => {
                        state.now_ms = target;
                        None
                    }
                }
            };
            // Lock released before running so tasks can reschedule.
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Run every pending task regardless of its delay.
    pub fn run_all(&self) -> usize {
        let furthest = self
            .state
            .lock()
            .ok()
            .and_then(|state| {
                state
                    .pending
                    .values()
                    .map(|pending| pending.due_ms.saturating_sub(state.now_ms))
                    .max()
            })
            .unwrap_or(0);
        self.advance(Duration::from_millis(furthest))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let Ok(mut state) = self.state.lock() else {
            return TaskHandle(u64::MAX);
        };
        let id = state.next_id;
        state.next_id += 1;
        let due_ms = state.now_ms.saturating_add(duration_ms(delay));
        state.history.push(delay);
        state.pending.insert(
            id,
            PendingTask {
                due_ms,
                delay,
                task,
            },
        );
        TaskHandle(id)
    }

    fn cancel(&self, handle: TaskHandle) {
        if let Ok(mut state) = self.state.lock() {
            state.pending.remove(&handle.0);
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_scheduler_runs_tasks_when_due() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_millis(1_000), counter_task(&counter));

        assert_eq!(scheduler.advance(Duration::from_millis(999)), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.now_ms(), 1_000);
    }

    #[test]
    fn manual_scheduler_cancel_prevents_run() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.schedule(Duration::from_millis(10), counter_task(&counter));
        scheduler.cancel(handle);

        assert_eq!(scheduler.run_all(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn manual_scheduler_runs_rescheduled_tasks_within_window() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let inner_scheduler = scheduler.clone();
        let inner_counter = Arc::clone(&counter);
        scheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                inner_counter.fetch_add(1, Ordering::SeqCst);
                inner_scheduler.schedule(Duration::from_millis(100), counter_task(&inner_counter));
            }),
        );

        assert_eq!(scheduler.advance(Duration::from_millis(250)), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(
            scheduler.scheduled_delays(),
            vec![Duration::from_millis(100), Duration::from_millis(100)]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn tokio_scheduler_fires_and_cancels() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_millis(50), counter_task(&fired));
        let cancelled = scheduler.schedule(Duration::from_millis(50), counter_task(&fired));
        scheduler.cancel(cancelled);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }
}

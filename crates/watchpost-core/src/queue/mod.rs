//! Offline operation queue.
//!
//! Mutations that failed to reach the backend are persisted here and replayed
//! with doubling backoff. Every change to the queue is a single
//! read-modify-write of the whole record list under one store key, so two
//! overlapping flushes or an enqueue racing a flush never lose each other's
//! writes.

mod auto_flush;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::models::{OperationId, OperationKind, OperationPayload, QueuedOperation, SyncStatus};
use crate::remote::{MutationApi, ReplayFailure};
use crate::retry::RetryPolicy;
use crate::state::SyncState;
use crate::storage::DurableStore;
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};

pub use auto_flush::AutoFlush;

/// Store key holding the serialized queue
pub const QUEUE_STORE_KEY: &str = "offline-operation-queue";

/// Store key collecting queue entries that could not be deserialized
pub const QUEUE_CORRUPT_KEY: &str = "offline-operation-queue.corrupt";

/// Retry behaviour of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct QueuePolicy {
    pub backoff: RetryPolicy,
    /// Transient failures tolerated before an operation is marked failed
    pub max_retries: u32,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            backoff: RetryPolicy::new(1_000, 30_000),
            max_retries: 5,
        }
    }
}

impl QueuePolicy {
    /// Wait required after the `retry_count`-th consecutive failure.
    pub fn delay_after_failures(&self, retry_count: u32) -> u64 {
        self.backoff
            .delay_ms_for_attempt(retry_count.saturating_sub(1))
    }
}

/// Pending/failed totals for status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: usize,
    pub failed: usize,
}

impl QueueCounts {
    fn from_operations(operations: &[QueuedOperation]) -> Self {
        operations
            .iter()
            .fold(Self::default(), |mut counts, op| {
                match op.sync_status {
                    SyncStatus::Pending => counts.pending += 1,
                    SyncStatus::Failed => counts.failed += 1,
                    SyncStatus::Synced => {}
                }
                counts
            })
    }

    /// Summarize for the shared sync indicator.
    pub const fn sync_state(&self, online: bool) -> SyncState {
        if !online {
            SyncState::Offline
        } else if self.failed > 0 {
            SyncState::Error
        } else if self.pending > 0 {
            SyncState::Syncing
        } else {
            SyncState::Synced
        }
    }
}

/// What a single flush did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// The client was offline and nothing was attempted
    pub skipped_offline: bool,
    /// The store could not be read; nothing was replayed or results were
    /// not persisted
    pub store_unavailable: bool,
    pub attempted: usize,
    pub synced: usize,
    /// Transient failures that will be retried
    pub retrying: usize,
    /// Operations that became failed during this flush
    pub failed: usize,
}

/// Notified after an operation is replayed successfully.
pub trait QueueListener: Send + Sync + 'static {
    fn on_replayed(&self, operation: &QueuedOperation);
}

impl<F> QueueListener for F
where
    F: Fn(&QueuedOperation) + Send + Sync + 'static,
{
    fn on_replayed(&self, operation: &QueuedOperation) {
        self(operation);
    }
}

pub struct OfflineQueue<S, A, C = SystemClock, T = TracingTelemetry> {
    store: S,
    api: A,
    clock: C,
    telemetry: T,
    policy: QueuePolicy,
    online: AtomicBool,
    mirror: Mutex<Mirror>,
    store_lock: tokio::sync::Mutex<()>,
    flush_lock: tokio::sync::Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn QueueListener>>>,
}

/// In-memory view of the queue.
#[derive(Default)]
struct Mirror {
    operations: Vec<QueuedOperation>,
    /// Operations accepted while the store could not be read or written.
    /// Merged into the next durable read until a write succeeds.
    unsaved: Vec<QueuedOperation>,
    /// Set once the store has been read successfully.
    hydrated: bool,
}

/// Result of reading the queue record.
struct Loaded {
    operations: Vec<QueuedOperation>,
    /// False when `operations` came from memory and must not be written back.
    durable: bool,
}

/// Queue record split into readable operations and raw entries that failed
/// to deserialize.
struct DecodedRecord {
    operations: Vec<QueuedOperation>,
    rejected: Vec<Value>,
}

impl DecodedRecord {
    fn parse(raw: &str) -> Self {
        let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) else {
            return Self {
                operations: Vec::new(),
                rejected: vec![Value::String(raw.to_string())],
            };
        };

        let mut operations = Vec::with_capacity(items.len());
        let mut rejected = Vec::new();
        for item in items {
            match serde_json::from_value::<QueuedOperation>(item.clone()) {
                Ok(operation) => operations.push(operation),
                Err(error) => {
                    tracing::warn!("Unreadable queued operation: {}", error);
                    rejected.push(item);
                }
            }
        }
        Self {
            operations,
            rejected,
        }
    }
}

impl<S: DurableStore, A: MutationApi> OfflineQueue<S, A> {
    /// Create a queue and load what an earlier session persisted.
    pub async fn open(store: S, api: A, policy: QueuePolicy) -> Self {
        Self::open_with_parts(store, api, SystemClock, TracingTelemetry, policy).await
    }
}

impl<S, A, C, T> OfflineQueue<S, A, C, T>
where
    S: DurableStore,
    A: MutationApi,
    C: Clock,
    T: TelemetrySink,
{
    pub async fn open_with_parts(
        store: S,
        api: A,
        clock: C,
        telemetry: T,
        policy: QueuePolicy,
    ) -> Self {
        let queue = Self::with_parts(store, api, clock, telemetry, policy);
        queue.hydrate().await;
        queue
    }

    fn with_parts(store: S, api: A, clock: C, telemetry: T, policy: QueuePolicy) -> Self {
        Self {
            store,
            api,
            clock,
            telemetry,
            policy,
            online: AtomicBool::new(true),
            mirror: Mutex::new(Mirror::default()),
            store_lock: tokio::sync::Mutex::new(()),
            flush_lock: tokio::sync::Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub const fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Reload persisted operations into memory. Returns `None` when the
    /// store could not be read.
    pub async fn hydrate(&self) -> Option<QueueCounts> {
        let _guard = self.store_lock.lock().await;
        let loaded = self.read_all().await;
        loaded
            .durable
            .then(|| QueueCounts::from_operations(&loaded.operations))
    }

    /// Whether the store has been read at least once.
    pub fn is_hydrated(&self) -> bool {
        self.mirror
            .lock()
            .map(|mirror| mirror.hydrated)
            .unwrap_or(false)
    }

    /// Register a listener for successful replays.
    pub fn subscribe(&self, listener: Arc<dyn QueueListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record a network transition. Coming back online triggers a flush.
    pub async fn set_online(&self, online: bool) -> Option<FlushReport> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            tracing::info!("network back online, flushing offline queue");
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Pending and failed totals from the in-memory mirror. Only operations
    /// accepted in this session are counted until the queue is hydrated.
    pub fn counts(&self) -> QueueCounts {
        self.mirror
            .lock()
            .map(|mirror| QueueCounts::from_operations(&mirror.operations))
            .unwrap_or_default()
    }

    pub fn sync_state(&self) -> SyncState {
        if !self.is_hydrated() {
            return SyncState::Unknown;
        }
        self.counts().sync_state(self.is_online())
    }

    /// Current operations, re-read from the store.
    pub async fn operations(&self) -> Vec<QueuedOperation> {
        let _guard = self.store_lock.lock().await;
        self.read_all().await.operations
    }

    /// Persist a new pending operation and return its id.
    ///
    /// When the store cannot be read the operation is held in memory only,
    /// leaving the persisted record untouched.
    pub async fn enqueue(&self, kind: OperationKind, payload: OperationPayload) -> OperationId {
        let operation = QueuedOperation::new(kind, payload, self.clock.now_ms());
        let id = operation.id;

        {
            let _guard = self.store_lock.lock().await;
            let mut loaded = self.read_all().await;
            if loaded.durable {
                loaded.operations.push(operation.clone());
                if !self.write_all(loaded.operations).await {
                    self.hold_unsaved(operation);
                }
            } else {
                tracing::warn!(operation_id = %id, "queue store unreadable, holding operation in memory");
                if let Ok(mut mirror) = self.mirror.lock() {
                    mirror.operations.push(operation.clone());
                }
                self.hold_unsaved(operation);
            }
        }

        self.telemetry.record(TelemetryEvent::OperationQueued {
            operation_id: id.to_string(),
            kind: kind.as_str(),
        });
        id
    }

    /// Drop an operation regardless of its status.
    ///
    /// While the store is unreadable only operations held in memory can be
    /// removed.
    pub async fn remove(&self, id: &OperationId) -> bool {
        let _guard = self.store_lock.lock().await;
        let dropped_unsaved = self.mirror.lock().is_ok_and(|mut mirror| {
            let before = mirror.unsaved.len();
            mirror.unsaved.retain(|operation| operation.id != *id);
            mirror.unsaved.len() != before
        });

        let mut loaded = self.read_all().await;
        if !loaded.durable {
            if dropped_unsaved {
                if let Ok(mut mirror) = self.mirror.lock() {
                    mirror.operations.retain(|operation| operation.id != *id);
                }
            }
            return dropped_unsaved;
        }

        let before = loaded.operations.len();
        loaded.operations.retain(|operation| operation.id != *id);
        let removed = loaded.operations.len() != before;
        if removed || dropped_unsaved {
            self.write_all(loaded.operations).await;
            tracing::debug!(operation_id = %id, "removed queued operation");
        }
        removed || dropped_unsaved
    }

    /// Reset every failed operation to pending and flush.
    pub async fn retry_failed(&self) -> FlushReport {
        {
            let _guard = self.store_lock.lock().await;
            let mut loaded = self.read_all().await;
            if loaded.durable {
                let mut reset = 0usize;
                for operation in loaded.operations.iter_mut().filter(|op| op.is_failed()) {
                    operation.reset();
                    reset += 1;
                }
                if reset > 0 {
                    tracing::info!(reset, "reset failed operations to pending");
                    self.write_all(loaded.operations).await;
                }
            }
        }
        self.flush().await
    }

    /// Replay every due pending operation.
    ///
    /// Overlapping calls run one after another; the later call re-reads the
    /// store and finds the operations the earlier one touched either removed
    /// or still inside their backoff window. Nothing is replayed while the
    /// store cannot be read.
    pub async fn flush(&self) -> FlushReport {
        let _flush_guard = self.flush_lock.lock().await;

        if !self.is_online() {
            tracing::debug!("skipping flush while offline");
            return FlushReport {
                skipped_offline: true,
                ..FlushReport::default()
            };
        }

        let due: Vec<QueuedOperation> = {
            let _guard = self.store_lock.lock().await;
            let now = self.clock.now_ms();
            let loaded = self.read_all().await;
            if !loaded.durable {
                tracing::warn!("skipping flush, queue store unreadable");
                return FlushReport {
                    store_unavailable: true,
                    ..FlushReport::default()
                };
            }
            loaded
                .operations
                .into_iter()
                .filter(|operation| self.is_due(operation, now))
                .collect()
        };

        if due.is_empty() {
            return FlushReport::default();
        }

        let mut attempts = Vec::with_capacity(due.len());
        for operation in due {
            let attempted_at = self.clock.now_ms();
            let result = self.api.replay(&operation).await;
            attempts.push((operation.id, attempted_at, result));
        }

        let mut report = FlushReport {
            attempted: attempts.len(),
            ..FlushReport::default()
        };
        let mut replayed = Vec::new();

        {
            let _guard = self.store_lock.lock().await;
            let mut loaded = self.read_all().await;
            for (id, attempted_at, result) in attempts {
                // Removed or reset by the user while the request was in flight.
                let Some(operation) = loaded
                    .operations
                    .iter_mut()
                    .find(|operation| operation.id == id && operation.is_pending())
                else {
                    continue;
                };
                operation.last_retry_at = attempted_at;
                match result {
                    Ok(()) => {
                        operation.sync_status = SyncStatus::Synced;
                        operation.last_error = None;
                        report.synced += 1;
                        replayed.push(operation.clone());
                    }
                    Err(failure) => {
                        if self.record_failure(operation, &failure) {
                            report.failed += 1;
                        } else {
                            report.retrying += 1;
                        }
                    }
                }
            }
            if loaded.durable {
                loaded
                    .operations
                    .retain(|operation| operation.sync_status != SyncStatus::Synced);
                self.write_all(loaded.operations).await;
            } else {
                // Outcomes are replayed again once the store is readable.
                tracing::warn!("queue store unreadable, flush results not persisted");
                report.store_unavailable = true;
            }
        }

        for operation in &replayed {
            self.telemetry.record(TelemetryEvent::OperationReplayed {
                operation_id: operation.id.to_string(),
                attempts: operation.retry_count + 1,
            });
        }
        self.notify(&replayed);
        report
    }

    fn is_due(&self, operation: &QueuedOperation, now: i64) -> bool {
        if !operation.is_pending() {
            return false;
        }
        if operation.last_retry_at == 0 {
            return true;
        }
        let wait = i64::try_from(self.policy.delay_after_failures(operation.retry_count))
            .unwrap_or(i64::MAX);
        now.saturating_sub(operation.last_retry_at) >= wait
    }

    /// Apply a failed attempt. Returns true when the operation became failed.
    fn record_failure(&self, operation: &mut QueuedOperation, failure: &ReplayFailure) -> bool {
        operation.last_error = Some(failure.to_string());

        if failure.is_terminal() {
            operation.sync_status = SyncStatus::Failed;
            self.telemetry.record(TelemetryEvent::OperationFailed {
                operation_id: operation.id.to_string(),
                retry_count: operation.retry_count,
                reason: failure.to_string(),
            });
            return true;
        }

        operation.retry_count += 1;
        if operation.retry_count >= self.policy.max_retries {
            operation.sync_status = SyncStatus::Failed;
            self.telemetry.record(TelemetryEvent::OperationFailed {
                operation_id: operation.id.to_string(),
                retry_count: operation.retry_count,
                reason: format!("retries exhausted: {failure}"),
            });
            return true;
        }

        self.telemetry.record(TelemetryEvent::ReplayRetryScheduled {
            operation_id: operation.id.to_string(),
            retry_count: operation.retry_count,
            delay_ms: self.policy.delay_after_failures(operation.retry_count),
            status: failure.status,
        });
        false
    }

    fn notify(&self, replayed: &[QueuedOperation]) {
        if replayed.is_empty() {
            return;
        }
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for operation in replayed {
            for listener in &listeners {
                listener.on_replayed(operation);
            }
        }
    }

    async fn read_all(&self) -> Loaded {
        match self.store.get(QUEUE_STORE_KEY).await {
            Ok(Some(raw)) => {
                let decoded = DecodedRecord::parse(&raw);
                if decoded.rejected.is_empty() {
                    return self.loaded_from_store(decoded.operations);
                }
                match self.quarantine(decoded.rejected, &decoded.operations).await {
                    Ok(()) => self.loaded_from_store(decoded.operations),
                    Err(error) => self.fallback(format!("queue record is unreadable: {error}")),
                }
            }
            Ok(None) => self.loaded_from_store(Vec::new()),
            Err(error) => self.fallback(error.to_string()),
        }
    }

    /// Merge operations held only in memory into what the store returned.
    fn loaded_from_store(&self, mut operations: Vec<QueuedOperation>) -> Loaded {
        if let Ok(mut mirror) = self.mirror.lock() {
            for operation in &mirror.unsaved {
                if !operations.iter().any(|stored| stored.id == operation.id) {
                    operations.push(operation.clone());
                }
            }
            mirror.operations.clone_from(&operations);
            mirror.hydrated = true;
        }
        Loaded {
            operations,
            durable: true,
        }
    }

    fn fallback(&self, message: String) -> Loaded {
        tracing::warn!("Falling back to in-memory queue: {}", message);
        self.telemetry
            .record(TelemetryEvent::PersistenceFault { message });
        let operations = self
            .mirror
            .lock()
            .map(|mirror| mirror.operations.clone())
            .unwrap_or_default();
        Loaded {
            operations,
            durable: false,
        }
    }

    /// Move entries that no longer deserialize to [`QUEUE_CORRUPT_KEY`] and
    /// rewrite the queue record without them.
    async fn quarantine(
        &self,
        rejected: Vec<Value>,
        readable: &[QueuedOperation],
    ) -> crate::Result<()> {
        let mut kept = match self.store.get(QUEUE_CORRUPT_KEY).await? {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Array(items)) => items,
                Ok(other) => vec![other],
                Err(_) => vec![Value::String(raw)],
            },
            None => Vec::new(),
        };
        let count = rejected.len();
        kept.extend(rejected);
        self.store
            .set(QUEUE_CORRUPT_KEY, &serde_json::to_string(&kept)?)
            .await?;
        self.store
            .set(QUEUE_STORE_KEY, &serde_json::to_string(readable)?)
            .await?;

        let message = format!("moved {count} unreadable queue entries to {QUEUE_CORRUPT_KEY}");
        tracing::warn!("{}", message);
        self.telemetry
            .record(TelemetryEvent::PersistenceFault { message });
        Ok(())
    }

    /// Replace the stored record. Returns false when the write failed; the
    /// mirror still reflects `operations`.
    async fn write_all(&self, operations: Vec<QueuedOperation>) -> bool {
        let serialized = serde_json::to_string(&operations);
        if let Ok(mut mirror) = self.mirror.lock() {
            mirror.operations = operations;
        }

        let result = match serialized {
            Ok(raw) => self.store.set(QUEUE_STORE_KEY, &raw).await,
            Err(error) => Err(error.into()),
        };
        match result {
            Ok(()) => {
                if let Ok(mut mirror) = self.mirror.lock() {
                    mirror.unsaved.clear();
                }
                true
            }
            Err(error) => {
                tracing::warn!("Failed to persist offline queue: {}", error);
                self.telemetry.record(TelemetryEvent::PersistenceFault {
                    message: error.to_string(),
                });
                false
            }
        }
    }

    fn hold_unsaved(&self, operation: QueuedOperation) {
        if let Ok(mut mirror) = self.mirror.lock() {
            mirror.unsaved.push(operation);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::models::QueuedOperation;
    use crate::remote::{MutationApi, ReplayFailure};

    /// Mutation API answering from a script; `Ok(())` once the script runs out.
    #[derive(Default)]
    pub struct ScriptedApi {
        responses: Mutex<VecDeque<Result<(), ReplayFailure>>>,
        calls: Mutex<Vec<QueuedOperation>>,
    }

    impl ScriptedApi {
        pub fn new(responses: impl IntoIterator<Item = Result<(), ReplayFailure>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<QueuedOperation> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl MutationApi for ScriptedApi {
        async fn replay(&self, operation: &QueuedOperation) -> Result<(), ReplayFailure> {
            self.calls.lock().unwrap().push(operation.clone());
            self.responses.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedApi;
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use crate::telemetry::RecordingTelemetry;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    const T0: i64 = 1_700_000_000_000;

    type TestQueue = OfflineQueue<MemoryStore, Arc<ScriptedApi>, ManualClock, RecordingTelemetry>;

    struct Harness {
        queue: Arc<TestQueue>,
        store: MemoryStore,
        api: Arc<ScriptedApi>,
        clock: ManualClock,
        telemetry: RecordingTelemetry,
    }

    fn harness(responses: Vec<Result<(), ReplayFailure>>) -> Harness {
        let store = MemoryStore::new();
        let api = Arc::new(ScriptedApi::new(responses));
        let clock = ManualClock::new(T0);
        let telemetry = RecordingTelemetry::new();
        let queue = Arc::new(OfflineQueue::with_parts(
            store.clone(),
            Arc::clone(&api),
            clock.clone(),
            telemetry.clone(),
            QueuePolicy::default(),
        ));
        Harness {
            queue,
            store,
            api,
            clock,
            telemetry,
        }
    }

    fn recording_payload() -> OperationPayload {
        OperationPayload::for_target("cam-1").with_field("isRecording", true)
    }

    fn stored(store: &MemoryStore) -> Vec<QueuedOperation> {
        store
            .raw(QUEUE_STORE_KEY)
            .map(|raw| serde_json::from_str(&raw).unwrap())
            .unwrap_or_default()
    }

    fn retry_delays(telemetry: &RecordingTelemetry) -> Vec<u64> {
        telemetry
            .events()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::ReplayRetryScheduled { delay_ms, .. } => Some(delay_ms),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn enqueue_writes_through_to_store() {
        let h = harness(vec![]);
        let id = h
            .queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;

        let records = stored(&h.store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].sync_status, SyncStatus::Pending);
        assert_eq!(records[0].retry_count, 0);
        assert_eq!(records[0].queued_at, T0);
        assert_eq!(h.queue.counts(), QueueCounts { pending: 1, failed: 0 });
    }

    #[tokio::test]
    async fn two_server_errors_then_success_syncs_and_removes() {
        let h = harness(vec![
            Err(ReplayFailure::http(503, "unavailable")),
            Err(ReplayFailure::http(503, "unavailable")),
            Ok(()),
        ]);
        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;

        let first = h.queue.flush().await;
        assert_eq!((first.attempted, first.retrying), (1, 1));
        assert_eq!(stored(&h.store)[0].retry_count, 1);
        assert_eq!(stored(&h.store)[0].last_retry_at, T0);

        // Not due yet.
        h.clock.advance_ms(999);
        assert_eq!(h.queue.flush().await.attempted, 0);

        h.clock.advance_ms(1);
        let second = h.queue.flush().await;
        assert_eq!(second.retrying, 1);
        assert_eq!(stored(&h.store)[0].retry_count, 2);

        h.clock.advance_ms(1_999);
        assert_eq!(h.queue.flush().await.attempted, 0);
        h.clock.advance_ms(1);
        let third = h.queue.flush().await;
        assert_eq!(third.synced, 1);

        assert!(stored(&h.store).is_empty());
        assert_eq!(h.api.calls().len(), 3);
        assert_eq!(retry_delays(&h.telemetry), vec![1_000, 2_000]);
        assert_eq!(h.queue.counts(), QueueCounts::default());
    }

    #[tokio::test]
    async fn forbidden_fails_after_single_attempt() {
        let h = harness(vec![Err(ReplayFailure::http(403, "forbidden"))]);
        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;

        let report = h.queue.flush().await;
        assert_eq!(report.failed, 1);

        let records = stored(&h.store);
        assert_eq!(records[0].sync_status, SyncStatus::Failed);
        assert_eq!(records[0].retry_count, 0);
        assert_eq!(records[0].last_error.as_deref(), Some("HTTP 403: forbidden"));

        // Failed operations are never replayed automatically.
        h.clock.advance_ms(60_000);
        assert_eq!(h.queue.flush().await.attempted, 0);
        assert_eq!(h.api.calls().len(), 1);
        assert_eq!(h.queue.counts(), QueueCounts { pending: 0, failed: 1 });
    }

    #[tokio::test]
    async fn transient_failures_follow_backoff_until_cap() {
        let failures = (0..5)
            .map(|_| Err(ReplayFailure::network("connection reset")))
            .collect();
        let h = harness(failures);
        h.queue
            .enqueue(OperationKind::EntityUpdate, recording_payload())
            .await;

        for expected_count in 1..=5u32 {
            let report = h.queue.flush().await;
            assert_eq!(report.attempted, 1, "attempt {expected_count}");
            assert_eq!(stored(&h.store)[0].retry_count, expected_count);
            h.clock.advance_ms(30_000);
        }

        let records = stored(&h.store);
        assert_eq!(records[0].sync_status, SyncStatus::Failed);
        assert_eq!(retry_delays(&h.telemetry), vec![1_000, 2_000, 4_000, 8_000]);
        assert_eq!(h.queue.flush().await.attempted, 0);
    }

    #[tokio::test]
    async fn back_to_back_flushes_replay_once() {
        let h = harness(vec![Err(ReplayFailure::http(500, "boom"))]);
        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;
        h.queue
            .enqueue(OperationKind::StatusChange, OperationPayload::for_target("cam-2"))
            .await;

        let (first, second) = tokio::join!(h.queue.flush(), h.queue.flush());
        assert_eq!(first.attempted + second.attempted, 2);
        assert_eq!(h.api.calls().len(), 2);
    }

    #[tokio::test]
    async fn offline_flush_is_a_noop_and_reconnect_flushes() {
        let h = harness(vec![]);
        assert_eq!(h.queue.set_online(false).await, None);
        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;

        assert!(h.queue.flush().await.skipped_offline);
        assert!(h.api.calls().is_empty());
        assert_eq!(h.queue.sync_state(), SyncState::Offline);

        let report = h.queue.set_online(true).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(h.queue.sync_state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn retry_failed_resets_and_replays() {
        let h = harness(vec![Err(ReplayFailure::http(409, "conflict"))]);
        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;
        h.queue.flush().await;
        assert_eq!(h.queue.sync_state(), SyncState::Error);

        let report = h.queue.retry_failed().await;
        assert_eq!(report.synced, 1);
        assert!(stored(&h.store).is_empty());
    }

    #[tokio::test]
    async fn remove_drops_any_status() {
        let h = harness(vec![Err(ReplayFailure::http(422, "invalid"))]);
        let failed = h
            .queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;
        h.queue.flush().await;
        let pending = h
            .queue
            .enqueue(OperationKind::StatusChange, OperationPayload::for_target("cam-3"))
            .await;

        assert!(h.queue.remove(&failed).await);
        assert!(!h.queue.remove(&failed).await);
        let remaining = h.queue.operations().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, pending);
    }

    #[tokio::test]
    async fn listener_hears_successful_replays() {
        let h = harness(vec![Ok(()), Err(ReplayFailure::http(503, "busy"))]);
        let heard = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&heard);
        h.queue.subscribe(Arc::new(move |_: &QueuedOperation| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;
        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;
        h.queue.flush().await;

        assert_eq!(heard.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_write_failure_keeps_operation_in_memory() {
        let h = harness(vec![]);
        h.store.fail_writes(true);
        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;

        assert!(h.store.raw(QUEUE_STORE_KEY).is_none());
        assert_eq!(h.queue.counts().pending, 1);
        assert!(h
            .telemetry
            .events()
            .iter()
            .any(|event| matches!(event, TelemetryEvent::PersistenceFault { .. })));
    }

    fn reopen(store: &MemoryStore, clock: &ManualClock) -> TestQueue {
        OfflineQueue::with_parts(
            store.clone(),
            Arc::new(ScriptedApi::default()),
            clock.clone(),
            RecordingTelemetry::new(),
            QueuePolicy::default(),
        )
    }

    fn stored_targets(store: &MemoryStore) -> Vec<String> {
        stored(store)
            .into_iter()
            .map(|operation| operation.payload.target_id)
            .collect()
    }

    #[tokio::test]
    async fn open_restores_persisted_operations() {
        let h = harness(vec![]);
        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;

        let reopened = OfflineQueue::open_with_parts(
            h.store.clone(),
            Arc::new(ScriptedApi::default()),
            h.clock.clone(),
            RecordingTelemetry::new(),
            QueuePolicy::default(),
        )
        .await;
        assert!(reopened.is_hydrated());
        assert_eq!(reopened.counts(), QueueCounts { pending: 1, failed: 0 });
        assert_eq!(reopened.sync_state(), SyncState::Syncing);
    }

    #[tokio::test]
    async fn sync_state_is_unknown_until_store_is_read() {
        let h = harness(vec![]);
        h.store.set(QUEUE_STORE_KEY, "[]").await.unwrap();
        h.store.fail_reads(true);

        let queue = OfflineQueue::open_with_parts(
            h.store.clone(),
            Arc::new(ScriptedApi::default()),
            h.clock.clone(),
            RecordingTelemetry::new(),
            QueuePolicy::default(),
        )
        .await;
        assert!(!queue.is_hydrated());
        assert_eq!(queue.sync_state(), SyncState::Unknown);

        h.store.fail_reads(false);
        assert_eq!(queue.hydrate().await, Some(QueueCounts::default()));
        assert_eq!(queue.sync_state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn read_failure_never_overwrites_persisted_operations() {
        let h = harness(vec![]);
        for target in ["cam-1", "cam-2"] {
            h.queue
                .enqueue(OperationKind::ToggleFlag, OperationPayload::for_target(target))
                .await;
        }

        let reopened = reopen(&h.store, &h.clock);
        h.store.fail_reads(true);
        let held = reopened
            .enqueue(OperationKind::ToggleFlag, OperationPayload::for_target("cam-3"))
            .await;

        assert_eq!(stored_targets(&h.store), vec!["cam-1", "cam-2"]);
        assert_eq!(reopened.counts().pending, 1);

        h.store.fail_reads(false);
        reopened
            .enqueue(OperationKind::ToggleFlag, OperationPayload::for_target("cam-4"))
            .await;
        assert_eq!(
            stored_targets(&h.store),
            vec!["cam-1", "cam-2", "cam-3", "cam-4"]
        );
        assert!(stored(&h.store).iter().any(|operation| operation.id == held));
        assert_eq!(reopened.counts().pending, 4);
    }

    #[tokio::test]
    async fn flush_and_remove_leave_store_alone_while_unreadable() {
        let h = harness(vec![]);
        let persisted = h
            .queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;
        h.store.fail_reads(true);
        let held = h
            .queue
            .enqueue(OperationKind::StatusChange, OperationPayload::for_target("cam-2"))
            .await;

        let report = h.queue.flush().await;
        assert!(report.store_unavailable);
        assert_eq!(report.attempted, 0);
        assert!(h.api.calls().is_empty());

        assert!(!h.queue.remove(&persisted).await);
        assert!(h.queue.remove(&held).await);
        assert_eq!(stored(&h.store).len(), 1);

        h.store.fail_reads(false);
        let report = h.queue.flush().await;
        assert_eq!(report.synced, 1);
        assert_eq!(h.api.calls()[0].id, persisted);
    }

    #[tokio::test]
    async fn unreadable_entries_are_moved_aside() {
        let h = harness(vec![]);
        let good = QueuedOperation::new(
            OperationKind::ToggleFlag,
            OperationPayload::for_target("cam-1"),
            T0,
        );
        let record = serde_json::json!([
            good,
            { "id": "not-a-uuid", "type": "delete", "payload": {} }
        ]);
        h.store
            .set(QUEUE_STORE_KEY, &record.to_string())
            .await
            .unwrap();

        let reopened = reopen(&h.store, &h.clock);
        reopened
            .enqueue(OperationKind::ToggleFlag, OperationPayload::for_target("cam-2"))
            .await;

        assert_eq!(stored_targets(&h.store), vec!["cam-1", "cam-2"]);
        let corrupt: Vec<serde_json::Value> =
            serde_json::from_str(&h.store.raw(QUEUE_CORRUPT_KEY).unwrap()).unwrap();
        assert_eq!(corrupt.len(), 1);
        assert_eq!(corrupt[0]["type"], "delete");
    }

    #[tokio::test]
    async fn unparseable_record_is_preserved_before_reuse() {
        let h = harness(vec![]);
        h.store.set(QUEUE_STORE_KEY, "{truncated").await.unwrap();

        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;

        assert_eq!(stored_targets(&h.store), vec!["cam-1"]);
        assert_eq!(
            h.store.raw(QUEUE_CORRUPT_KEY).as_deref(),
            Some(r#"["{truncated"]"#)
        );
    }

    #[tokio::test]
    async fn unreadable_record_stays_put_when_it_cannot_be_moved() {
        let h = harness(vec![]);
        h.store.set(QUEUE_STORE_KEY, "{truncated").await.unwrap();
        h.store.fail_writes(true);

        h.queue
            .enqueue(OperationKind::ToggleFlag, recording_payload())
            .await;

        assert_eq!(h.store.raw(QUEUE_STORE_KEY).as_deref(), Some("{truncated"));
        assert_eq!(h.queue.counts().pending, 1);
    }

    #[test]
    fn counts_map_to_sync_state() {
        assert_eq!(QueueCounts::default().sync_state(true), SyncState::Synced);
        assert_eq!(
            QueueCounts { pending: 2, failed: 0 }.sync_state(true),
            SyncState::Syncing
        );
        assert_eq!(
            QueueCounts { pending: 0, failed: 1 }.sync_state(true),
            SyncState::Error
        );
        assert_eq!(QueueCounts::default().sync_state(false), SyncState::Offline);
    }
}

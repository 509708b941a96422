use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use docstream_core::models::{IngestionQueueItem, QueueItemStatus};

/// Heap key ordering: priority descending, then created-at ascending so
/// equal-priority items drain in submission order.
#[derive(Debug, PartialEq, Eq)]
struct QueueKey {
    priority: i32,
    created_at: DateTime<Utc>,
    id: Uuid,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl QueueKey {
    fn of(item: &IngestionQueueItem) -> Self {
        Self {
            priority: item.priority.as_i32(),
            created_at: item.created_at,
            id: item.id,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

struct QueueState {
    heap: BinaryHeap<QueueKey>,
    items: HashMap<Uuid, IngestionQueueItem>,
}

/// In-memory priority queue over ingestion items. Keys in the heap may go
/// stale (cancel, re-queue); claims drop them lazily by re-checking the
/// item's current status.
pub struct IngestionQueue {
    state: Mutex<QueueState>,
}

impl Default for IngestionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                items: HashMap::new(),
            }),
        }
    }

    pub async fn insert(&self, item: IngestionQueueItem) {
        let mut state = self.state.lock().await;
        state.heap.push(QueueKey::of(&item));
        state.items.insert(item.id, item);
    }

    /// Claims the highest-priority due item, marking it Processing. Items
    /// whose `next_retry_at` lies in the future are skipped, not dropped.
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Option<IngestionQueueItem> {
        let mut state = self.state.lock().await;
        let mut not_due = Vec::new();
        let mut claimed = None;

        while let Some(key) = state.heap.pop() {
            let ready = match state.items.get(&key.id) {
                Some(item) if item.status == QueueItemStatus::Queued => item.is_retry_due(now),
                // Stale key: cancelled, already claimed, or re-queued under
                // a fresh key.
                _ => continue,
            };
            if !ready {
                not_due.push(key);
                continue;
            }
            if let Some(item) = state.items.get_mut(&key.id) {
                item.status = QueueItemStatus::Processing;
                item.updated_at = now;
                claimed = Some(item.clone());
            }
            break;
        }

        for key in not_due {
            state.heap.push(key);
        }
        claimed
    }

    /// Defers the next due item by `until` without claiming it; used while
    /// the circuit breaker is open or the rate limiter has no token.
    pub async fn defer_next(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> Option<Uuid> {
        let mut state = self.state.lock().await;
        let mut not_due = Vec::new();
        let mut deferred = None;

        while let Some(key) = state.heap.pop() {
            let ready = match state.items.get(&key.id) {
                Some(item) if item.status == QueueItemStatus::Queued => item.is_retry_due(now),
                _ => continue,
            };
            if !ready {
                not_due.push(key);
                continue;
            }
            if let Some(item) = state.items.get_mut(&key.id) {
                item.next_retry_at = Some(until);
                item.updated_at = now;
                deferred = Some(item.id);
            }
            not_due.push(key);
            break;
        }

        for key in not_due {
            state.heap.push(key);
        }
        deferred
    }

    /// Whether any Queued item is due now. Cheap pre-check so the drain loop
    /// does not burn rate-limiter tokens on an empty queue.
    pub async fn has_due(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().await;
        state
            .items
            .values()
            .any(|item| item.status == QueueItemStatus::Queued && item.is_retry_due(now))
    }

    pub async fn get(&self, id: Uuid) -> Option<IngestionQueueItem> {
        let state = self.state.lock().await;
        state.items.get(&id).cloned()
    }

    /// Replaces the stored item; a Queued status gets a fresh heap key so
    /// retried items become claimable again.
    pub async fn update(&self, item: IngestionQueueItem) {
        let mut state = self.state.lock().await;
        if item.status == QueueItemStatus::Queued {
            state.heap.push(QueueKey::of(&item));
        }
        state.items.insert(item.id, item);
    }

    /// Items in priority order, optionally filtered to one owner.
    pub async fn snapshot(&self, owner: Option<Uuid>) -> Vec<IngestionQueueItem> {
        let state = self.state.lock().await;
        let mut items: Vec<IngestionQueueItem> = state
            .items
            .values()
            .filter(|item| owner.map(|user_id| item.user_id == user_id).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.priority
                .as_i32()
                .cmp(&a.priority.as_i32())
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        items
    }

    /// All items currently in the given status.
    pub async fn in_status(&self, status: QueueItemStatus) -> Vec<IngestionQueueItem> {
        let state = self.state.lock().await;
        state
            .items
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect()
    }

    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for item in state.items.values() {
            match item.status {
                QueueItemStatus::Queued => counts.queued += 1,
                QueueItemStatus::Processing => counts.processing += 1,
                QueueItemStatus::Retrying => counts.retrying += 1,
                QueueItemStatus::Completed => counts.completed += 1,
                QueueItemStatus::Failed => counts.failed += 1,
                QueueItemStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

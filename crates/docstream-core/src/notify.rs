//! Progress notifier
//!
//! Bounded fan-out of progress events to per-user subscribers. Hot paths
//! publish with `try_send` so they never block; a dedicated drain task moves
//! events from the intake queue onto per-user broadcast channels. When the
//! intake queue is full the event is dropped and counted, which keeps
//! backpressure visible instead of spawning unbounded tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::events::ProgressEvent;

const SUBSCRIBER_BUFFER: usize = 64;

type SubscriberMap = Arc<RwLock<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>>;

#[derive(Clone)]
pub struct ProgressNotifier {
    intake: mpsc::Sender<ProgressEvent>,
    subscribers: SubscriberMap,
    dropped: Arc<AtomicU64>,
}

impl ProgressNotifier {
    /// Creates the notifier and spawns its drain task. Must be called from
    /// within a tokio runtime.
    pub fn new(intake_capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(intake_capacity);
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let notifier = Self {
            intake: tx,
            subscribers: subscribers.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let handle = tokio::spawn(drain_loop(rx, subscribers));
        (notifier, handle)
    }

    /// Non-blocking publish. Drops the event when the intake queue is full.
    pub fn publish(&self, event: ProgressEvent) {
        if let Err(err) = self.intake.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                dropped_total = total,
                error = %err,
                "Progress event dropped, intake queue full or closed"
            );
        }
    }

    /// Subscribes to the given user's event stream.
    pub async fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_BUFFER).0)
            .subscribe()
    }

    /// Total events dropped at the intake since startup.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn drain_loop(mut rx: mpsc::Receiver<ProgressEvent>, subscribers: SubscriberMap) {
    while let Some(event) = rx.recv().await {
        let user_id = event.user_id();
        let mut stale = false;
        {
            let map = subscribers.read().await;
            if let Some(sender) = map.get(&user_id) {
                // Err means every receiver is gone; channel is stale.
                stale = sender.send(event).is_err();
            }
        }
        if stale {
            let mut map = subscribers.write().await;
            if let Some(sender) = map.get(&user_id) {
                if sender.receiver_count() == 0 {
                    map.remove(&user_id);
                }
            }
        }
    }
    tracing::debug!("Progress notifier drain loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UploadProgressEvent;
    use crate::models::FileUploadStatus;
    use chrono::Utc;

    fn upload_event(user_id: Uuid) -> ProgressEvent {
        ProgressEvent::Upload {
            user_id,
            event: UploadProgressEvent {
                session_id: Uuid::new_v4(),
                file_id: Uuid::new_v4(),
                status: FileUploadStatus::Uploading,
                progress_percentage: 10,
                uploaded_bytes: 10,
                total_bytes: 100,
                speed: 1.0,
                timestamp: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let (notifier, _handle) = ProgressNotifier::new(16);
        let user_id = Uuid::new_v4();
        let mut rx = notifier.subscribe(user_id).await;

        notifier.publish(upload_event(user_id));

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.user_id(), user_id);
    }

    #[tokio::test]
    async fn events_for_other_users_are_not_delivered() {
        let (notifier, _handle) = ProgressNotifier::new(16);
        let subscriber = Uuid::new_v4();
        let mut rx = notifier.subscribe(subscriber).await;

        notifier.publish(upload_event(Uuid::new_v4()));
        notifier.publish(upload_event(subscriber));

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.user_id(), subscriber);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_intake_increments_dropped_counter() {
        let (notifier, handle) = ProgressNotifier::new(1);
        // Stop the drain loop so the queue cannot empty.
        handle.abort();
        let _ = handle.await;

        let user_id = Uuid::new_v4();
        notifier.publish(upload_event(user_id));
        notifier.publish(upload_event(user_id));
        notifier.publish(upload_event(user_id));

        assert!(notifier.dropped_events() >= 2);
    }
}

use super::PlaybackProgress;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::info;

type SubscriptionId = u64;

struct Subscription {
    tx: tokio_mpsc::UnboundedSender<PlaybackProgress>,
}

type Subscriptions = Arc<Mutex<HashMap<SubscriptionId, Subscription>>>;

/// Handle for subscribing to playback progress updates
#[derive(Clone)]
pub struct PlaybackProgressHandle {
    subscriptions: Subscriptions,
    next_id: Arc<AtomicU64>,
}

impl PlaybackProgressHandle {
    /// Create a new progress handle and spawn background task to fan progress out
    pub fn new(
        mut progress_rx: tokio_mpsc::UnboundedReceiver<PlaybackProgress>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));
        let subscriptions_clone = subscriptions.clone();

        runtime_handle.spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                dispatch(&subscriptions_clone, progress);
            }
            info!("Playback progress channel closed, exiting");
        });

        Self {
            subscriptions,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to all playback progress updates.
    /// The subscription is removed once the receiver is dropped.
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackProgress> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.insert(id, Subscription { tx });
        }
        rx
    }
}

fn dispatch(subscriptions: &Subscriptions, progress: PlaybackProgress) {
    let Ok(mut subs) = subscriptions.lock() else {
        return;
    };
    // A failed send means the receiver was dropped
    subs.retain(|_, subscription| subscription.tx.send(progress.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let handle = PlaybackProgressHandle::new(rx, tokio::runtime::Handle::current());
        let mut first = handle.subscribe_all();
        let mut second = handle.subscribe_all();

        let progress = PlaybackProgress::PlaybackFailed {
            source_id: "https://example.com/a.mp3".to_string(),
            error: "blocked".to_string(),
        };
        tx.send(progress.clone()).unwrap();

        assert_eq!(first.recv().await, Some(progress.clone()));
        assert_eq!(second.recv().await, Some(progress));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_removed() {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let handle = PlaybackProgressHandle::new(rx, tokio::runtime::Handle::current());
        let dropped = handle.subscribe_all();
        let mut kept = handle.subscribe_all();
        drop(dropped);

        let progress = PlaybackProgress::PlaybackFailed {
            source_id: "a".to_string(),
            error: "e".to_string(),
        };
        tx.send(progress.clone()).unwrap();
        assert_eq!(kept.recv().await, Some(progress));
        assert_eq!(handle.subscriptions.lock().unwrap().len(), 1);
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use onemore_types::events::{ChangeEvent, ChangeStream, FeedFilter, FeedItem};

const BROADCAST_CAPACITY: usize = 1024;
const SUBSCRIPTION_BUFFER: usize = 256;

/// Fans change notifications out to every subscription whose filter
/// matches. Delivery is in publish order per subscription; nothing is
/// promised across subscriptions.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscription forwarder listens here and filters on its own side
    broadcast_tx: broadcast::Sender<ChangeEvent>,

    /// Live forwarder tasks
    subscribers: AtomicUsize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(BROADCAST_CAPACITY)
    }

    /// `capacity` bounds how far a slow subscriber may fall behind before
    /// it is told it lagged.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                subscribers: AtomicUsize::new(0),
            }),
        }
    }

    /// Publish a change to all current subscribers.
    pub fn broadcast(&self, event: ChangeEvent) {
        trace!(
            table = event.table().as_str(),
            kind = ?event.kind,
            session_id = %event.session_id(),
            "Publishing change"
        );
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Open a filtered subscription. Must be called inside a tokio runtime:
    /// a forwarder task moves matching events into the returned stream and
    /// exits as soon as the stream is dropped.
    pub fn subscribe(&self, filter: FeedFilter) -> ChangeStream {
        let mut broadcast_rx = self.inner.broadcast_tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let inner = self.inner.clone();
        inner.subscribers.fetch_add(1, Ordering::SeqCst);

        let channel = filter.channel_name();
        debug!(channel = %channel, "Subscription opened");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    result = broadcast_rx.recv() => {
                        let item = match result {
                            Ok(event) if filter.matches(&event) => FeedItem::Change(event),
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(channel = %channel, "Subscription lagged by {} changes", n);
                                FeedItem::Lagged(n)
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                }
            }

            inner.subscribers.fetch_sub(1, Ordering::SeqCst);
            debug!(channel = %channel, "Subscription closed");
        });

        ChangeStream::new(rx)
    }

    /// Number of subscriptions whose forwarder is still running.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.load(Ordering::SeqCst)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use onemore_types::events::{Record, Table};
    use onemore_types::models::{Delta, DrinkEvent, Participant};
    use std::time::Duration;
    use uuid::Uuid;

    fn drink_event(session_id: Uuid) -> ChangeEvent {
        ChangeEvent::insert(Record::DrinkEvent(DrinkEvent {
            id: Uuid::new_v4(),
            session_id,
            actor_user_id: Uuid::new_v4(),
            target_participant_id: Uuid::new_v4(),
            drink_type_id: Uuid::new_v4(),
            delta: Delta::Increment,
            created_at: Utc::now(),
        }))
    }

    fn participant(session_id: Uuid) -> ChangeEvent {
        ChangeEvent::insert(Record::Participant(Participant {
            id: Uuid::new_v4(),
            session_id,
            display_name: "Panda".into(),
            claimed_by_user_id: None,
            color_index: Some(0),
            created_at: Utc::now(),
        }))
    }

    async fn wait_for_subscribers(dispatcher: &Dispatcher, expected: usize) {
        for _ in 0..100 {
            if dispatcher.subscriber_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} subscribers, have {}", expected, dispatcher.subscriber_count());
    }

    #[tokio::test]
    async fn delivers_only_matching_changes_in_order() {
        let dispatcher = Dispatcher::new();
        let session = Uuid::new_v4();
        let mut stream = dispatcher.subscribe(FeedFilter::session(Table::DrinkEvents, session));

        let first = drink_event(session);
        let second = drink_event(session);
        dispatcher.broadcast(drink_event(Uuid::new_v4()));
        dispatcher.broadcast(participant(session));
        dispatcher.broadcast(first.clone());
        dispatcher.broadcast(second.clone());

        assert_eq!(stream.next().await, Some(FeedItem::Change(first)));
        assert_eq!(stream.next().await, Some(FeedItem::Change(second)));
    }

    #[tokio::test]
    async fn dropping_the_stream_ends_the_forwarder() {
        let dispatcher = Dispatcher::new();
        let stream = dispatcher.subscribe(FeedFilter::table(Table::Participants));
        let other = dispatcher.subscribe(FeedFilter::table(Table::DrinkTypes));
        assert_eq!(dispatcher.subscriber_count(), 2);

        drop(stream);
        wait_for_subscribers(&dispatcher, 1).await;
        drop(other);
        wait_for_subscribers(&dispatcher, 0).await;
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_it_lagged() {
        let dispatcher = Dispatcher::with_capacity(4);
        let session = Uuid::new_v4();
        let mut stream = dispatcher.subscribe(FeedFilter::session(Table::DrinkEvents, session));

        // Fill the forwarder's outgoing buffer so it stops draining the
        // broadcast channel, then overflow the broadcast channel.
        for _ in 0..(SUBSCRIPTION_BUFFER + 64) {
            dispatcher.broadcast(drink_event(session));
            tokio::task::yield_now().await;
        }

        let mut lagged = false;
        while let Ok(Some(item)) =
            tokio::time::timeout(Duration::from_millis(200), stream.next()).await
        {
            if matches!(item, FeedItem::Lagged(_)) {
                lagged = true;
                break;
            }
        }
        assert!(lagged);
    }
}

//! ABOUTME: Typed publish/subscribe channel for component notifications
//! ABOUTME: Thin broadcast wrapper; publishing never fails or blocks

use tokio::sync::broadcast;

/// Default channel capacity; slow subscribers lag rather than block
/// publishers.
const DEFAULT_CAPACITY: usize = 256;

/// Typed publish/subscribe channel.
///
/// Components own one `Broadcast` per notification kind (state changes,
/// alerts, metric samples, optimization results). Publishing with no
/// live subscribers is not an error; the event is simply dropped.
#[derive(Debug, Clone)]
pub struct Broadcast<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Broadcast<T> {
    /// Create a channel with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a channel with an explicit capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: T) {
        // A send error only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus: Broadcast<u32> = Broadcast::new();
        let mut rx = bus.subscribe();

        bus.publish(7);
        assert_eq!(rx.recv().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus: Broadcast<String> = Broadcast::new();
        // No subscribers; must not panic or error
        bus.publish("dropped".to_string());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus: Broadcast<&'static str> = Broadcast::with_capacity(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish("event");

        assert_eq!(a.recv().await.unwrap(), "event");
        assert_eq!(b.recv().await.unwrap(), "event");
    }
}

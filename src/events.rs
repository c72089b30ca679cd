//! In-process publish/subscribe channel for dashboard live updates.
//!
//! Fire-and-forget: publishing with no connected subscribers is not an
//! error, and a lagging subscriber simply misses events.

use tokio::sync::broadcast;

/// Events pushed to connected dashboard clients.
#[derive(Debug, Clone)]
pub enum Event {
    /// A new scrape record was persisted. Payload is the envelope as JSON.
    ScrapeUpdate(serde_json::Value),
    /// An alert flipped active/inactive. Payload is the alert as JSON.
    AlertUpdate(serde_json::Value),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScrapeUpdate(_) => "scrape_update",
            Self::AlertUpdate(_) => "alert_update",
        }
    }
}

/// Broadcast bus shared by the scheduler jobs and the request-serving layer.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: Event) {
        // SendError only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(Event::ScrapeUpdate(serde_json::json!({"status": "success"})));
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::AlertUpdate(serde_json::json!({"id": 1})));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "alert_update");
    }
}

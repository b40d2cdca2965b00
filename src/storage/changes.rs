use serde::Serialize;
use tokio::sync::broadcast;

/// Tables that publish change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    HealthMetrics,
    RiskAssessments,
    Alerts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A committed write to one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub user_id: String,
    pub row_id: String,
}

impl ChangeEvent {
    pub fn insert(table: Table, user_id: &str, row_id: &str) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            user_id: user_id.to_string(),
            row_id: row_id.to_string(),
        }
    }

    pub fn update(table: Table, user_id: &str, row_id: &str) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            user_id: user_id.to_string(),
            row_id: row_id.to_string(),
        }
    }
}

type Predicate = Box<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// Fan-out of change events to any number of subscribers.
///
/// Delivery is best-effort: a subscriber that falls more than the channel
/// capacity behind skips the events it missed.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        log::trace!("change: {:?} {:?} {}", event.table, event.kind, event.row_id);
        let _ = self.tx.send(event);
    }

    pub fn subscribe<F>(&self, predicate: F) -> Subscription
    where
        F: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    {
        Subscription {
            rx: self.tx.subscribe(),
            predicate: Box::new(predicate),
        }
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    predicate: Predicate,
}

impl Subscription {
    /// Wait for the next event matching the predicate. Returns `None` once
    /// the feed is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.predicate)(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Change subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_predicate_filters_events() {
        let feed = ChangeFeed::new(16);
        let mut sub = feed.subscribe(|e| e.user_id == "alice");

        feed.publish(ChangeEvent::insert(Table::HealthMetrics, "bob", "m1"));
        feed.publish(ChangeEvent::insert(Table::HealthMetrics, "alice", "m2"));

        let event = sub.next().await.unwrap();
        assert_eq!(event.row_id, "m2");
        assert_eq!(event.kind, ChangeKind::Insert);
    }

    #[tokio::test]
    async fn test_closed_feed_ends_subscription() {
        let feed = ChangeFeed::new(4);
        let mut sub = feed.subscribe(|_| true);
        drop(feed);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_receiving() {
        let feed = ChangeFeed::new(2);
        let mut sub = feed.subscribe(|_| true);
        for i in 0..5 {
            feed.publish(ChangeEvent::update(Table::Alerts, "u", &format!("a{i}")));
        }
        // The oldest events were dropped; the newest are still delivered.
        let event = sub.next().await.unwrap();
        assert_eq!(event.row_id, "a3");
        assert_eq!(sub.next().await.unwrap().row_id, "a4");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = ChangeFeed::new(4);
        feed.publish(ChangeEvent::insert(Table::Alerts, "u", "a1"));
    }
}

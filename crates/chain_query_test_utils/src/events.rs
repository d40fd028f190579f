use std::{sync::Arc, time::Duration};

use chain_query::{QueryEvent, SubscriptionEvent};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Records the events delivered to a subscription.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<QueryEvent>>>,
    notify: Arc<Notify>,
}

impl EventLog {
    /// Constructs an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a subscription callback that records into this log.
    pub fn callback(&self) -> impl Fn(SubscriptionEvent) + Send + Sync + 'static {
        let log = self.clone();
        move |event: SubscriptionEvent| {
            log.events.lock().push(event.event);
            log.notify.notify_waiters();
        }
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<QueryEvent> {
        self.events.lock().clone()
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events were recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Waits until at least `count` events were recorded. Panics after five
    /// seconds.
    pub async fn wait_for(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };

        let result = tokio::time::timeout(Duration::from_secs(5), wait).await;
        assert!(
            result.is_ok(),
            "Timed out waiting for {count} events, received {:?}",
            self.events()
        );
    }
}

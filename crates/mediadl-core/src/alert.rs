//! User-visible alerts

use mediadl_types::{Alert, CoreEvent};
use tokio::sync::broadcast;
use tracing::debug;

pub trait Alerter: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Publishes alerts on the core event channel
#[derive(Clone)]
pub struct EventAlerter {
    event_tx: broadcast::Sender<CoreEvent>,
}

impl EventAlerter {
    pub fn new(event_tx: broadcast::Sender<CoreEvent>) -> Self {
        Self { event_tx }
    }
}

impl Alerter for EventAlerter {
    fn alert(&self, alert: Alert) {
        debug!(title = alert.title_key(), "Alert: {}", alert.message());
        // No subscribers is fine
        let _ = self.event_tx.send(CoreEvent::Alert(alert));
    }
}

use tokio::sync::mpsc;
use tracing::debug;

use super::event::Event;

/// Receives every event a session manager emits, in sequence order.
///
/// Observers run while the session lock is held. They must return quickly
/// and must not call back into the manager.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> Observer for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Observer for ChannelObserver {
    fn on_event(&self, event: &Event) {
        if self.tx.send(event.clone()).is_err() {
            debug!("Event receiver dropped, discarding event {}", event.sequence);
        }
    }
}

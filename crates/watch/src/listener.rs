//! Listener contract and the shipped implementations.

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{info, warn};

use stackspark_core::WatchEvent;

/// Called once per dispatched event, in stream order, on the watcher's task.
///
/// Implementations should return quickly; the next read waits for the callback.
pub trait EventsListener: Send + Sync {
    fn on_event(&self, event: &WatchEvent);
}

impl<F> EventsListener for F
where
    F: Fn(&WatchEvent) + Send + Sync,
{
    fn on_event(&self, event: &WatchEvent) {
        self(event)
    }
}

/// Logs every event with its JSON payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventsListener;

impl EventsListener for LogEventsListener {
    fn on_event(&self, event: &WatchEvent) {
        let payload = serde_json::to_string(&event.payload).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        info!(
            event = %event.event_type,
            app = %event.app_name,
            phase = %event.phase,
            payload = %payload,
            "watch: event received"
        );
    }
}

/// Forwards events into a bounded channel. Drops when the receiver lags.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::Sender<WatchEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::Sender<WatchEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(cap: usize) -> (Self, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel(cap.max(1));
        (Self { tx }, rx)
    }
}

impl EventsListener for ChannelListener {
    fn on_event(&self, event: &WatchEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                counter!("watch_listener_dropped_total", 1u64);
                warn!(app = %ev.app_name, event = %ev.event_type, "watch: listener channel full; event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

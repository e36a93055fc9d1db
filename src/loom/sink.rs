//! Event delivery from a run to its client.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::LoomEvent;

/// Default channel capacity
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Sending half of a run's event channel.
///
/// Bounded, so a slow reader applies backpressure. When the reader goes away
/// the run's cancellation token is fired.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<LoomEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<LoomEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Create a sink and its receiver
    pub fn channel(buffer: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<LoomEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx, cancel), rx)
    }

    /// Deliver one event. Returns false if it was not delivered.
    pub async fn emit(&self, event: LoomEvent) -> bool {
        log::trace!("emit {}", event.event_type());
        let sent = tokio::select! {
            biased;
            sent = self.tx.send(event) => sent.is_ok(),
            _ = self.cancel.cancelled() => false,
        };

        if !sent && !self.cancel.is_cancelled() {
            log::info!("Event receiver dropped, cancelling run");
            self.cancel.cancel();
        }
        sent
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

//! Shutdown coordination for the pipeline service.

use tokio::sync::broadcast;

/// Broadcast used to stop the HTTP server and long-running tasks.
///
/// `subscribe` before spawning; `trigger` fans the signal out to every
/// live receiver.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver for one task; resolves when `trigger` runs.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal every subscriber to wind down.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

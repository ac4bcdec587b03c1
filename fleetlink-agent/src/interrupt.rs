//! Interrupt signal coordination.
//!
//! The enrollment retry loop must abandon everything, including an
//! in-flight cycle or backoff sleep, the moment an interrupt arrives.
//! The coordinator lives
//! in the binary (fed by Ctrl-C); engines hold cloneable signals. The
//! interrupt latches: a signal awaited after the fact still resolves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Interrupt signal that can be cloned and awaited.
#[derive(Clone)]
pub struct InterruptSignal {
    sender: broadcast::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl InterruptSignal {
    /// Wait for the interrupt. Resolves immediately if it already fired.
    pub async fn recv(&self) {
        if self.fired.load(Ordering::SeqCst) {
            return;
        }
        let mut receiver = self.sender.subscribe();
        // The interrupt may have fired between the check and the
        // subscription; re-check before parking.
        if self.fired.load(Ordering::SeqCst) {
            return;
        }
        let _ = receiver.recv().await;
    }
}

/// Owner side: fires the interrupt.
pub struct InterruptCoordinator {
    sender: broadcast::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl InterruptCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a signal receiver.
    pub fn signal(&self) -> InterruptSignal {
        InterruptSignal {
            sender: self.sender.clone(),
            fired: Arc::clone(&self.fired),
        }
    }

    /// Fire the interrupt. Every outstanding and future signal resolves.
    pub fn interrupt(&self) {
        self.fired.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }
}

impl Default for InterruptCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// src/bot/shutdown.rs - Shutdown fan-out for background tasks

use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

/// Cloneable shutdown signal. Every background loop subscribes and exits
/// once the signal fires.
#[derive(Clone)]
pub struct ShutdownSignal {
    notifier: broadcast::Sender<()>,
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(4);
        Self {
            notifier,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notifier.subscribe()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Fire the signal. Only the first call notifies subscribers.
    pub fn trigger(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown requested");
        let _ = self.notifier.send(());
    }

    /// Resolve once shutdown has been requested, even if it already was
    pub async fn wait(&self) {
        let mut receiver = self.subscribe();
        if self.is_requested() {
            return;
        }
        let _ = receiver.recv().await;
    }

    /// Trigger the signal on Ctrl-C
    pub fn listen_for_ctrl_c(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C");
                    shutdown.trigger();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

//! Coordinated shutdown of background tasks and open streams.
//!
//! Every long-lived task holds a [`Receiver`]. [`Sender::shutdown`] notifies
//! them all and then waits until each one has been dropped.

use tokio::sync::{mpsc, watch};
use tracing::info;

#[derive(Debug)]
pub struct Sender {
    notify: watch::Sender<()>,
    process_tx: mpsc::Sender<()>,
    process_rx: mpsc::Receiver<()>,
}

impl Sender {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(());
        let (process_tx, process_rx) = mpsc::channel(1);

        Self {
            notify,
            process_tx,
            process_rx,
        }
    }

    pub fn subscribe(&self) -> Receiver {
        Receiver {
            notify: self.notify.subscribe(),
            _handle: self.process_tx.clone(),
        }
    }

    /// Notify every receiver and wait until all of them are gone.
    pub async fn shutdown(mut self) {
        let _ = self.notify.send(());

        drop(self.process_tx);
        let _ = self.process_rx.recv().await;
    }
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once shutdown begins. Holding one delays the end of
/// [`Sender::shutdown`].
#[derive(Clone, Debug)]
pub struct Receiver {
    notify: watch::Receiver<()>,
    _handle: mpsc::Sender<()>,
}

impl Receiver {
    pub async fn recv(&mut self) {
        let _ = self.notify.changed().await;
    }
}

/// Wait for SIGINT or, on unix, SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

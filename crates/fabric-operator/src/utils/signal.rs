use snafu::{ResultExt, Snafu};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

#[derive(Debug, Snafu)]
#[snafu(display("failed to construct signal watcher"))]
pub struct SignalError {
    source: std::io::Error,
}

/// Watches for a shutdown signal and hands it out to any number of handles.
///
/// Every controller of the operator gets its own handle, so all of them drain
/// in-flight reconciliations before the process exits.
pub struct SignalWatcher {
    watch_rx: watch::Receiver<()>,
}

impl SignalWatcher {
    /// Watches `SIGTERM`.
    pub fn sigterm() -> Result<Self, SignalError> {
        let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;

        Ok(Self::new(async move {
            sigterm.recv().await;
        }))
    }

    /// Watches the provided `signal`.
    pub fn new<F>(signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (watch_tx, watch_rx) = watch::channel(());

        tokio::spawn(async move {
            signal.await;
            watch_tx.send(())
        });

        Self { watch_rx }
    }

    /// Acquire a new handle which completes once the signal is received.
    pub fn handle(&self) -> impl Future<Output = ()> + use<> {
        let mut watch_rx = self.watch_rx.clone();

        async move {
            watch_rx.changed().await.ok();
        }
    }
}

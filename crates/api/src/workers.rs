//! Payment consumer and expiry sweep running next to the HTTP server.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::context::AppContext;

/// Running background workers and the channel that stops them.
pub struct BackgroundWorkers {
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl BackgroundWorkers {
    /// Starts the payment event consumer and the payment expiry sweep.
    pub fn spawn(ctx: &AppContext, config: &Config) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let consumer = ctx.payment_consumer(config.consumer_settings());
        let consumer_rx = shutdown_rx.clone();
        let consumer = tokio::spawn(async move { consumer.run(consumer_rx).await });

        let sweep = ctx.expiry_sweep(config.sweep_settings());
        let sweep = tokio::spawn(async move { sweep.run(shutdown_rx).await });

        Self {
            shutdown,
            consumer,
            sweep,
        }
    }

    /// Signals both workers to stop and waits for them to finish.
    pub async fn shutdown(self) {
        // Only fails when every receiver is gone, i.e. both workers already exited.
        if self.shutdown.send(true).is_err() {
            tracing::debug!("background workers stopped before the shutdown signal");
        }
        if let Err(err) = self.consumer.await {
            tracing::error!(error = %err, "payment consumer task failed");
        }
        if let Err(err) = self.sweep.await {
            tracing::error!(error = %err, "expiry sweep task failed");
        }
    }

    /// Whether both workers have exited.
    pub fn is_finished(&self) -> bool {
        self.consumer.is_finished() && self.sweep.is_finished()
    }
}

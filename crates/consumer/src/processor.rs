//! Partitioned payment event consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::broker::{Delivery, EventSource};
use crate::handler::PaymentOutcomeHandler;

/// Consumer tunables.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Pause before a failed message is redelivered.
    pub retry_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Consumes `payment.completed` and `payment.failed` events.
///
/// One task per partition processes messages strictly in offset order, so
/// events of the same order (same key, same partition) are applied in the
/// order they were published. A message is committed only once handled;
/// a retryable failure rewinds the partition and the message is delivered
/// again after `retry_backoff`.
pub struct PaymentEventConsumer {
    source: Arc<dyn EventSource>,
    handler: PaymentOutcomeHandler,
    settings: ConsumerSettings,
}

impl PaymentEventConsumer {
    pub fn new(
        source: Arc<dyn EventSource>,
        handler: PaymentOutcomeHandler,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            source,
            handler,
            settings,
        }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let partitions = self.source.partitions();
        tracing::info!(partitions, "payment event consumer started");

        let mut workers = JoinSet::new();
        for partition in 0..partitions {
            let worker = PartitionWorker {
                source: self.source.clone(),
                handler: self.handler.clone(),
                retry_backoff: self.settings.retry_backoff,
                partition,
            };
            workers.spawn(worker.run(shutdown.clone()));
        }

        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "partition worker aborted");
            }
        }
        tracing::info!("payment event consumer stopped");
    }
}

struct PartitionWorker {
    source: Arc<dyn EventSource>,
    handler: PaymentOutcomeHandler,
    retry_backoff: Duration,
    partition: usize,
}

impl PartitionWorker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                polled = self.source.poll(self.partition) => polled,
            };

            let delivery = match polled {
                Ok(delivery) => delivery,
                Err(err) => {
                    tracing::error!(partition = self.partition, error = %err, "poll failed");
                    if !self.pause(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if !self.process(delivery, &mut shutdown).await {
                break;
            }
        }
        tracing::debug!(partition = self.partition, "partition worker stopped");
    }

    /// Handles one message. Returns `false` when shutdown was requested
    /// while waiting to retry.
    async fn process(&self, delivery: Delivery, shutdown: &mut watch::Receiver<bool>) -> bool {
        if delivery.is_redelivery() {
            metrics::counter!("payment_events_redelivered_total").increment(1);
        }

        let outcome = match self.handler.handle_delivery(&delivery).await {
            Ok(outcome) => outcome.as_str(),
            Err(err) if !err.is_retryable() => {
                tracing::error!(
                    topic = %delivery.topic,
                    offset = delivery.offset,
                    error = %err,
                    "dropping malformed payment event"
                );
                "rejected"
            }
            Err(err) => {
                metrics::counter!(
                    "payment_events_processed_total",
                    "topic" => delivery.topic.clone(),
                    "outcome" => "retry"
                )
                .increment(1);
                tracing::warn!(
                    topic = %delivery.topic,
                    key = %delivery.key,
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    error = %err,
                    "payment event not acknowledged, will be redelivered"
                );
                let keep_running = self.pause(shutdown).await;
                if let Err(err) = self.source.seek_to_committed(self.partition).await {
                    tracing::error!(partition = self.partition, error = %err, "seek failed");
                }
                return keep_running;
            }
        };

        metrics::counter!(
            "payment_events_processed_total",
            "topic" => delivery.topic.clone(),
            "outcome" => outcome
        )
        .increment(1);

        if let Err(err) = self.source.commit(&delivery).await {
            // Not committing means the message comes back; handling it is idempotent.
            tracing::error!(offset = delivery.offset, error = %err, "commit failed");
            if let Err(err) = self.source.seek_to_committed(self.partition).await {
                tracing::error!(partition = self.partition, error = %err, "seek failed");
            }
        }
        true
    }

    /// Sleeps for the retry backoff. Returns `false` if shutdown was
    /// requested meanwhile.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.retry_backoff) => true,
            changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        }
    }
}

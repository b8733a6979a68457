use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::queue::QueueItem;

use super::{
    envelope::{Envelope, Operation},
    Engine,
};

impl Engine {
    /// Processes queued envelopes one at a time until `stop` fires or the
    /// queue shuts down.
    pub async fn run_worker(&self, mut stop: watch::Receiver<bool>) {
        info!("Starting worker...");

        while !*stop.borrow() && !self.queue.is_shutting_down() {
            let envelope = tokio::select! {
                _ = stop.changed() => break,
                envelope = self.queue.get() => envelope,
            };

            match envelope {
                Some(envelope) => self.process(envelope).await,
                None => break,
            }
        }

        info!("Worker stopped!");
    }

    async fn process(&self, envelope: Envelope) {
        let key = envelope.key().to_owned();

        let resolved = self.dispatch(envelope).await;
        self.queue.done(&key);

        if resolved && self.queue.is_empty() {
            if let Err(err) = self.dispatcher.configure_controllers().await {
                warn!("Couldn't configure controllers! {err}");
            }
        }
    }

    /// Returns `false` when the lookup failed and the envelope was either
    /// put back for a retry or dropped.
    async fn dispatch(&self, envelope: Envelope) -> bool {
        let key = envelope.key.as_str();

        let object = match self.lookup.get_by_key(key) {
            Ok(object) => object,
            Err(err) => {
                if self.queue.num_requeues(key) < self.config.max_retries {
                    warn!("Couldn't look up '{key}', retrying! {err}");
                    self.queue.add_rate_limited(envelope);
                } else {
                    self.queue.forget(key);
                    error!("Dropping '{key}' out of the queue! {err}");
                }
                return false;
            }
        };

        let result = match (object, envelope.operation) {
            (None, Operation::Delete) => {
                self.dispatcher
                    .object_deleted(key, &envelope.delta)
                    .await
            }
            (Some(object), Operation::Create) => self.dispatcher.object_created(&object).await,
            (Some(object), Operation::Update) => {
                self.dispatcher
                    .object_updated(&object, &envelope.delta)
                    .await
            }
            (object, operation) => {
                debug!(
                    "Skipping {operation} of '{key}', cached: {}",
                    object.is_some()
                );
                Ok(())
            }
        };

        if let Err(err) = result {
            warn!("Dispatching {} of '{key}' failed! {err}", envelope.operation);
        }

        self.queue.forget(key);

        true
    }
}

//! Fan-out of execution results to every live subscriber.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tilecast_core::config::LiveConfig;
use tilecast_core::{DeliveryError, ExecutionResult};

use crate::cache::ResultCache;
use crate::message::{ClientMessage, LiveMessage};
use crate::registry::{SubscriberRegistry, send_with_timeout};
use crate::traits::{Subscriber, SubscriberId};

/// Outcome of one [`BroadcastHub::broadcast`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: Vec<SubscriberId>,
}

/// Serializes results into wire messages and delivers them to the members
/// of a [`SubscriberRegistry`].
///
/// Delivery is at-most-once and best-effort: a failed or timed-out send
/// removes that subscriber and is never retried.
pub struct BroadcastHub {
    registry: Arc<SubscriberRegistry>,
    cache: Arc<ResultCache>,
    send_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(registry: Arc<SubscriberRegistry>, cache: Arc<ResultCache>, config: &LiveConfig) -> Self {
        Self {
            registry,
            cache,
            send_timeout: config.send_timeout(),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Deliver one result to every registered subscriber.
    ///
    /// The message is serialized once. Sends run concurrently, each bounded
    /// by the send timeout, so one slow subscriber does not hold up the rest.
    pub async fn broadcast(&self, result: &ExecutionResult) -> BroadcastReport {
        let text = match LiveMessage::from(result).to_json() {
            Ok(t) => t,
            Err(e) => {
                warn!(template_id = result.template_id, error = %e, "cannot encode result, not broadcasting");
                return BroadcastReport::default();
            }
        };

        let text = text.as_str();
        let timeout = self.send_timeout;
        let fan_out = self
            .registry
            .for_each(move |s| async move { send_with_timeout(&*s, text, timeout).await })
            .await;

        let report = BroadcastReport {
            delivered: fan_out.succeeded,
            removed: fan_out.removed,
        };
        debug!(
            template_id = result.template_id,
            delivered = report.delivered,
            removed = report.removed.len(),
            "broadcast result"
        );
        report
    }

    /// Send one message per result to a single subscriber.
    ///
    /// On the first failure the subscriber is removed from the registry and
    /// the remaining messages are skipped. Returns the number of messages sent.
    pub async fn send_snapshot(
        &self,
        subscriber: &dyn Subscriber,
        results: &[Arc<ExecutionResult>],
    ) -> Result<usize, DeliveryError> {
        for (sent, result) in results.iter().enumerate() {
            let outcome = match LiveMessage::from(result.as_ref()).to_json() {
                Ok(text) => send_with_timeout(subscriber, &text, self.send_timeout).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                if self.registry.remove(subscriber.id()) {
                    info!(subscriber = %subscriber.id(), error = %e, "dropping subscriber during snapshot");
                }
                debug!(subscriber = %subscriber.id(), sent, "snapshot aborted");
                return Err(e);
            }
        }
        Ok(results.len())
    }

    /// Register a new subscriber and catch it up with the current cache.
    pub async fn connect(&self, subscriber: Arc<dyn Subscriber>) -> Result<usize, DeliveryError> {
        let id = subscriber.id();
        if !self.registry.add(subscriber.clone()) {
            debug!(subscriber = %id, "subscriber already connected");
        }
        let snapshot = self.cache.snapshot();
        let sent = self.send_snapshot(subscriber.as_ref(), &snapshot).await?;
        info!(subscriber = %id, snapshot = sent, total = self.registry.len(), "subscriber connected");
        Ok(sent)
    }

    pub fn disconnect(&self, id: SubscriberId) {
        if self.registry.remove(id) {
            info!(subscriber = %id, total = self.registry.len(), "subscriber disconnected");
        }
    }

    /// React to an inbound frame from a subscriber. `pong`, `ping` and
    /// `request_results` have an effect; anything else is ignored.
    pub async fn handle_inbound(&self, id: SubscriberId, text: &str) {
        match ClientMessage::parse(text) {
            Some(ClientMessage::Pong) => self.registry.mark_alive(id),
            Some(ClientMessage::Ping { timestamp }) => {
                self.registry.mark_alive(id);
                let Some(subscriber) = self.registry.get(id) else {
                    return;
                };
                let outcome = match (LiveMessage::Pong { timestamp }).to_json() {
                    Ok(text) => send_with_timeout(subscriber.as_ref(), &text, self.send_timeout).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = outcome {
                    if self.registry.remove(id) {
                        info!(subscriber = %id, error = %e, "dropping subscriber after failed pong");
                    }
                }
            }
            Some(ClientMessage::RequestResults) => {
                self.registry.mark_alive(id);
                let Some(subscriber) = self.registry.get(id) else {
                    debug!(subscriber = %id, "results requested by unknown subscriber");
                    return;
                };
                let snapshot = self.cache.snapshot();
                if let Ok(sent) = self.send_snapshot(subscriber.as_ref(), &snapshot).await {
                    debug!(subscriber = %id, sent, "sent requested results");
                }
            }
            None => {}
        }
    }
}

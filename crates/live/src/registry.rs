//! Set of live subscribers shared by the broadcast hub, the health monitor
//! and the connection handlers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info};

use tilecast_core::DeliveryError;

use crate::traits::{Subscriber, SubscriberId};

/// Outcome of one [`SubscriberRegistry::for_each`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Members in the snapshot the pass ran over.
    pub attempted: usize,
    pub succeeded: usize,
    /// Members this pass removed after a failure.
    pub removed: Vec<SubscriberId>,
}

struct Member {
    subscriber: Arc<dyn Subscriber>,
    /// Last connect or pong.
    last_seen: Instant,
}

/// Thread-safe set of live subscriber handles.
///
/// All membership changes and iteration go through the internal mutex; the
/// lock is never held while a send is in flight.
#[derive(Default)]
pub struct SubscriberRegistry {
    members: Mutex<HashMap<SubscriberId, Member>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Returns `false` if it was already present.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        let id = subscriber.id();
        let mut members = self.members.lock().expect("registry lock poisoned");
        if members.contains_key(&id) {
            return false;
        }
        members.insert(
            id,
            Member {
                subscriber,
                last_seen: Instant::now(),
            },
        );
        debug!(subscriber = %id, total = members.len(), "subscriber registered");
        true
    }

    /// Drop a subscriber. Removing an unknown id is a no-op.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut members = self.members.lock().expect("registry lock poisoned");
        let removed = members.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, total = members.len(), "subscriber removed");
        }
        removed
    }

    pub fn get(&self, id: SubscriberId) -> Option<Arc<dyn Subscriber>> {
        self.members
            .lock()
            .expect("registry lock poisoned")
            .get(&id)
            .map(|m| m.subscriber.clone())
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members.lock().expect("registry lock poisoned").contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a liveness signal (e.g. an inbound pong).
    pub fn mark_alive(&self, id: SubscriberId) {
        if let Some(m) = self.members.lock().expect("registry lock poisoned").get_mut(&id) {
            m.last_seen = Instant::now();
        }
    }

    /// Ids of members with no liveness signal within `max_silence`.
    pub fn silent_for(&self, max_silence: Duration) -> Vec<SubscriberId> {
        let now = Instant::now();
        self.members
            .lock()
            .expect("registry lock poisoned")
            .iter()
            .filter(|(_, m)| now.duration_since(m.last_seen) > max_silence)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Point-in-time list of members, taken under a single lock.
    pub fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        self.members
            .lock()
            .expect("registry lock poisoned")
            .values()
            .map(|m| m.subscriber.clone())
            .collect()
    }

    /// Apply `f` to every member of a snapshot, concurrently, then remove each
    /// member for which `f` failed.
    ///
    /// A member removed by another caller mid-iteration still gets `f`
    /// applied from this snapshot; its removal here is then a no-op.
    pub async fn for_each<F, Fut>(&self, f: F) -> FanOut
    where
        F: Fn(Arc<dyn Subscriber>) -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
    {
        let snapshot = self.snapshot();
        let outcomes = join_all(snapshot.into_iter().map(|s| {
            let id = s.id();
            let fut = f(s);
            async move { (id, fut.await) }
        }))
        .await;

        let mut fan_out = FanOut {
            attempted: outcomes.len(),
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => fan_out.succeeded += 1,
                Err(e) => {
                    if self.remove(id) {
                        info!(subscriber = %id, error = %e, "dropping subscriber after failed send");
                        fan_out.removed.push(id);
                    }
                }
            }
        }
        fan_out
    }
}

/// Send `text` to one subscriber, treating a send slower than `timeout` as
/// a failure.
pub async fn send_with_timeout(
    subscriber: &dyn Subscriber,
    text: &str,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    match tokio::time::timeout(timeout, subscriber.send(text)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout(timeout.as_millis() as u64)),
    }
}

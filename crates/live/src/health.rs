//! Periodic liveness probing of subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use tilecast_core::config::LiveConfig;

use crate::lifecycle::{Lifecycle, LoopState};
use crate::message::LiveMessage;
use crate::registry::{SubscriberRegistry, send_with_timeout};
use crate::traits::SubscriberId;

/// Outcome of one probe round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub probed: usize,
    /// Removed because the ping send failed or timed out.
    pub failed: Vec<SubscriberId>,
    /// Removed because no pong arrived within the pong timeout.
    pub silent: Vec<SubscriberId>,
}

struct MonitorInner {
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
    probe_timeout: Duration,
    pong_timeout: Option<Duration>,
}

/// Pings every subscriber on a fixed interval, independent of the refresh
/// cycle, and drops the ones that fail to take the ping.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    lifecycle: Lifecycle,
}

impl HealthMonitor {
    pub fn new(registry: Arc<SubscriberRegistry>, config: &LiveConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                registry,
                interval: config.health_interval(),
                probe_timeout: config.probe_timeout(),
                pong_timeout: config.pong_timeout(),
            }),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.lifecycle.state()
    }

    /// Spawn the probe loop. No-op unless stopped.
    pub fn start(&self) -> bool {
        let inner = self.inner.clone();
        let started = self.lifecycle.start(move |shutdown| run_loop(inner, shutdown));
        if started {
            info!(interval = ?self.inner.interval, "health monitor started");
        }
        started
    }

    /// Stop the probe loop and wait for it to exit.
    pub async fn stop(&self) {
        if self.lifecycle.stop().await {
            info!("health monitor stopped");
        }
    }

    /// Run one probe round now.
    pub async fn probe_once(&self) -> ProbeReport {
        self.inner.probe_once().await
    }
}

impl MonitorInner {
    async fn probe_once(&self) -> ProbeReport {
        let probed = self.registry.len();
        if probed == 0 {
            return ProbeReport::default();
        }

        let mut report = ProbeReport {
            probed,
            ..Default::default()
        };

        if let Ok(ping) = LiveMessage::Ping.to_json() {
            let ping = ping.as_str();
            let timeout = self.probe_timeout;
            let fan_out = self
                .registry
                .for_each(move |s| async move { send_with_timeout(&*s, ping, timeout).await })
                .await;
            report.probed = fan_out.attempted;
            report.failed = fan_out.removed;
        }

        if let Some(max_silence) = self.pong_timeout {
            for id in self.registry.silent_for(max_silence) {
                if self.registry.remove(id) {
                    info!(subscriber = %id, "dropping subscriber: no pong within {:?}", max_silence);
                    report.silent.push(id);
                }
            }
        }

        if !report.failed.is_empty() || !report.silent.is_empty() {
            info!(
                probed = report.probed,
                failed = report.failed.len(),
                silent = report.silent.len(),
                "health probe removed subscribers"
            );
        } else {
            debug!(probed = report.probed, "health probe complete");
        }
        report
    }
}

async fn run_loop(inner: Arc<MonitorInner>, shutdown: Arc<Notify>) {
    let mut ticker = tokio::time::interval(inner.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick; new subscribers were just greeted.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                inner.probe_once().await;
            }
            _ = shutdown.notified() => {
                break;
            }
        }
    }
}

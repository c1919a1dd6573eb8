//! Health monitor: ping probes, probe timeouts and pong-based liveness.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tilecast_live::{HealthMonitor, LoopState, Subscriber, SubscriberRegistry};

use common::*;

#[tokio::test]
async fn probe_removes_broken_subscribers_and_pings_the_rest() {
    let registry = Arc::new(SubscriberRegistry::new());
    let ok = RecordingSubscriber::healthy();
    let broken = RecordingSubscriber::new(Behaviour::Broken);
    registry.add(ok.clone());
    registry.add(broken.clone());

    let monitor = HealthMonitor::new(registry.clone(), &live_config());
    let report = monitor.probe_once().await;

    assert_eq!(report.probed, 2);
    assert_eq!(report.failed, vec![broken.id()]);
    assert!(registry.contains(ok.id()));
    assert!(!registry.contains(broken.id()));
    assert_eq!(ok.messages(), vec![serde_json::json!({"type": "ping"})]);
}

#[tokio::test]
async fn unresponsive_probe_counts_as_failure() {
    let registry = Arc::new(SubscriberRegistry::new());
    let stalled = RecordingSubscriber::new(Behaviour::Stalled);
    registry.add(stalled.clone());

    let monitor = HealthMonitor::new(registry.clone(), &live_config());
    let report = tokio::time::timeout(WAIT, monitor.probe_once()).await.unwrap();

    assert_eq!(report.failed, vec![stalled.id()]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn probe_of_empty_registry_is_noop() {
    let monitor = HealthMonitor::new(Arc::new(SubscriberRegistry::new()), &live_config());
    let report = monitor.probe_once().await;
    assert_eq!(report.probed, 0);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn silent_subscribers_are_dropped_when_pong_required() {
    let registry = Arc::new(SubscriberRegistry::new());
    let chatty = RecordingSubscriber::healthy();
    let silent = RecordingSubscriber::healthy();
    registry.add(chatty.clone());
    registry.add(silent.clone());

    let mut config = live_config();
    config.pong_timeout_secs = 1;
    let monitor = HealthMonitor::new(registry.clone(), &config);

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    registry.mark_alive(chatty.id());

    let report = monitor.probe_once().await;
    assert_eq!(report.silent, vec![silent.id()]);
    assert!(registry.contains(chatty.id()));
    assert!(!registry.contains(silent.id()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_monitor_purges_dead_subscribers() {
    let registry = Arc::new(SubscriberRegistry::new());
    let ok = RecordingSubscriber::healthy();
    let dying = RecordingSubscriber::healthy();
    registry.add(ok.clone());
    registry.add(dying.clone());

    let monitor = HealthMonitor::new(registry.clone(), &live_config());
    assert!(monitor.start());
    assert!(!monitor.start());
    assert_eq!(monitor.state(), LoopState::Running);

    dying.set_behaviour(Behaviour::Broken);
    assert!(eventually(|| !registry.contains(dying.id())).await);
    assert!(registry.contains(ok.id()));
    assert!(!ok.of_type("ping").is_empty());

    tokio::time::timeout(WAIT, monitor.stop()).await.expect("stop must be prompt");
    assert_eq!(monitor.state(), LoopState::Stopped);
}

#[tokio::test]
async fn client_ping_counts_as_liveness() {
    let hub = hub();
    let pinger = RecordingSubscriber::healthy();
    let silent = RecordingSubscriber::healthy();
    hub.registry().add(pinger.clone());
    hub.registry().add(silent.clone());

    let mut config = live_config();
    config.pong_timeout_secs = 1;
    let monitor = HealthMonitor::new(hub.registry().clone(), &config);

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    hub.handle_inbound(pinger.id(), r#"{"type":"ping","timestamp":5}"#).await;
    monitor.probe_once().await;

    assert!(hub.registry().contains(pinger.id()));
    assert!(!hub.registry().contains(silent.id()));
}

//! Broadcast hub: fan-out, failure isolation, snapshots on connect and
//! inbound requests.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use tilecast_core::{ExecutionResult, TemplateDescriptor};
use tilecast_live::Subscriber;

use common::*;

fn result(id: i64, rows: serde_json::Value) -> ExecutionResult {
    let t = TemplateDescriptor::new(id, format!("t{}", id), format!("q{}", id), 60);
    ExecutionResult::success(&t, at(0), rows)
}

#[tokio::test]
async fn failing_subscriber_is_removed_and_others_still_receive() {
    let hub = hub();
    let subs: Vec<_> = (0..4).map(|_| RecordingSubscriber::healthy()).collect();
    let broken = RecordingSubscriber::new(Behaviour::Broken);
    for s in &subs {
        hub.registry().add(s.clone());
    }
    hub.registry().add(broken.clone());

    let report = hub.broadcast(&result(1, json!([1]))).await;
    assert_eq!(report.delivered, 4);
    assert_eq!(report.removed, vec![broken.id()]);
    assert_eq!(hub.registry().len(), 4);
    for s in &subs {
        assert_eq!(s.of_type("template_result").len(), 1);
    }

    // The removed subscriber is never tried again.
    let attempts = broken.attempts();
    hub.broadcast(&result(2, json!([2]))).await;
    assert_eq!(broken.attempts(), attempts);
    for s in &subs {
        assert_eq!(s.of_type("template_result").len(), 2);
    }
}

#[tokio::test]
async fn stalled_subscriber_does_not_delay_the_rest() {
    let hub = hub();
    let fast = RecordingSubscriber::healthy();
    let stalled = RecordingSubscriber::new(Behaviour::Stalled);
    hub.registry().add(stalled.clone());
    hub.registry().add(fast.clone());

    let started = Instant::now();
    let report = hub.broadcast(&result(1, json!([]))).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(fast.of_type("template_result").len(), 1);
    assert_eq!(report.removed, vec![stalled.id()]);
    assert!(!hub.registry().contains(stalled.id()));
}

#[tokio::test]
async fn new_subscriber_is_caught_up_from_cache() {
    let hub = hub();
    for id in 1..=3 {
        hub.cache().put(Arc::new(result(id, json!([id]))));
    }

    let sub = RecordingSubscriber::healthy();
    let sent = hub.connect(sub.clone()).await.unwrap();

    assert_eq!(sent, 3);
    assert!(hub.registry().contains(sub.id()));
    let mut ids: Vec<_> = sub
        .of_type("template_result")
        .iter()
        .map(|m| m["template_id"].as_i64().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn connect_with_empty_cache_sends_nothing() {
    let hub = hub();
    let sub = RecordingSubscriber::healthy();
    assert_eq!(hub.connect(sub.clone()).await.unwrap(), 0);
    assert!(sub.messages().is_empty());
    assert_eq!(hub.registry().len(), 1);
}

#[tokio::test]
async fn broken_subscriber_is_dropped_during_snapshot() {
    let hub = hub();
    hub.cache().put(Arc::new(result(1, json!([]))));
    let sub = RecordingSubscriber::new(Behaviour::Broken);

    assert!(hub.connect(sub.clone()).await.is_err());
    assert!(hub.registry().is_empty());
}

#[tokio::test]
async fn failing_template_reaches_every_subscriber_as_error() {
    let store = MemoryStore::with(vec![TemplateDescriptor::new(3, "orders", "q3", 60)]);
    let executor = ScriptedExecutor::new().script("q3", Script::Fail("timeout"));
    let hub = hub();
    let a = RecordingSubscriber::healthy();
    let b = RecordingSubscriber::healthy();
    hub.connect(a.clone()).await.unwrap();
    hub.connect(b.clone()).await.unwrap();

    let sched = scheduler(store, executor, hub.clone(), scheduler_config());
    sched.run_cycle_at(at(0)).await.unwrap();

    for sub in [&a, &b] {
        let msgs = sub.of_type("template_result");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["template_id"], 3);
        assert_eq!(msgs[0]["result"]["error"], "timeout");
        assert!(msgs[0]["result"]["data"].is_null());
        assert_eq!(msgs[0]["result"]["template_info"]["name"], "orders");
    }
}

#[tokio::test]
async fn request_results_resends_snapshot_to_one_subscriber() {
    let hub = hub();
    hub.cache().put(Arc::new(result(1, json!([]))));
    hub.cache().put(Arc::new(result(2, json!([]))));
    let asker = RecordingSubscriber::healthy();
    let other = RecordingSubscriber::healthy();
    hub.connect(asker.clone()).await.unwrap();
    hub.connect(other.clone()).await.unwrap();

    hub.handle_inbound(asker.id(), r#"{"type":"request_results"}"#).await;

    assert_eq!(asker.of_type("template_result").len(), 4);
    assert_eq!(other.of_type("template_result").len(), 2);
}

#[tokio::test]
async fn unknown_inbound_messages_are_ignored() {
    let hub = hub();
    let sub = RecordingSubscriber::healthy();
    hub.connect(sub.clone()).await.unwrap();

    hub.handle_inbound(sub.id(), "garbage").await;
    hub.handle_inbound(sub.id(), r#"{"type":"pong"}"#).await;
    hub.handle_inbound(sub.id(), r#"{"type":"subscribe","topic":"x"}"#).await;

    assert!(hub.registry().contains(sub.id()));
    assert!(sub.messages().is_empty());
}

#[tokio::test]
async fn client_ping_is_answered_with_pong() {
    let hub = hub();
    let pinger = RecordingSubscriber::healthy();
    let bystander = RecordingSubscriber::healthy();
    hub.registry().add(pinger.clone());
    hub.registry().add(bystander.clone());

    hub.handle_inbound(pinger.id(), r#"{"type":"ping","timestamp":1700000000000}"#).await;
    hub.handle_inbound(pinger.id(), r#"{"type":"ping"}"#).await;

    let pongs = pinger.of_type("pong");
    assert_eq!(pongs.len(), 2);
    assert_eq!(pongs[0], json!({"type": "pong", "timestamp": 1700000000000i64}));
    assert_eq!(pongs[1], json!({"type": "pong"}));
    assert!(bystander.messages().is_empty());
}

#[tokio::test]
async fn ping_from_broken_subscriber_drops_it() {
    let hub = hub();
    let broken = RecordingSubscriber::new(Behaviour::Broken);
    hub.registry().add(broken.clone());

    hub.handle_inbound(broken.id(), r#"{"type":"ping","timestamp":1}"#).await;

    assert_eq!(broken.attempts(), 1);
    assert!(!hub.registry().contains(broken.id()));
}

#[tokio::test]
async fn delivered_counts_only_successful_sends() {
    let hub = hub();
    let healthy: Vec<_> = (0..3).map(|_| RecordingSubscriber::healthy()).collect();
    for s in &healthy {
        hub.registry().add(s.clone());
    }
    let stalled = RecordingSubscriber::new(Behaviour::Stalled);
    hub.registry().add(stalled.clone());

    // Another caller drops the stalled member while its send is pending,
    // so the broadcast neither delivers to it nor removes it.
    let other = hub.clone();
    let stalled_id = stalled.id();
    let dropper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        other.disconnect(stalled_id);
    });
    let report = hub.broadcast(&result(1, json!([1]))).await;
    dropper.await.unwrap();

    assert_eq!(report.delivered, healthy.len());
    assert!(report.removed.is_empty());
    assert!(!hub.registry().contains(stalled_id));
}

#[tokio::test]
async fn disconnect_stops_delivery() {
    let hub = hub();
    let sub = RecordingSubscriber::healthy();
    hub.connect(sub.clone()).await.unwrap();
    hub.disconnect(sub.id());
    hub.disconnect(sub.id());

    hub.broadcast(&result(1, json!([]))).await;
    assert_eq!(sub.attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn churn_during_broadcast_is_safe() {
    let hub = hub();
    let steady: Vec<_> = (0..8).map(|_| RecordingSubscriber::healthy()).collect();
    for s in &steady {
        hub.registry().add(s.clone());
    }

    let churn_hub = hub.clone();
    let churn = tokio::spawn(async move {
        for _ in 0..200 {
            let s = RecordingSubscriber::healthy();
            churn_hub.registry().add(s.clone());
            tokio::task::yield_now().await;
            churn_hub.disconnect(s.id());
        }
    });

    for i in 0..50 {
        hub.broadcast(&result(i, json!([i]))).await;
    }
    churn.await.unwrap();

    for s in &steady {
        assert_eq!(s.of_type("template_result").len(), 50);
    }
    assert_eq!(hub.registry().len(), steady.len());
}

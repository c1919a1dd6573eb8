//! Shared in-memory collaborators for the live integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tilecast_core::config::{LiveConfig, SchedulerConfig};
use tilecast_core::{DeliveryError, ExecutionError, StoreError, TemplateDescriptor, TemplateId};
use tilecast_live::{
    BroadcastHub, QueryExecutor, RefreshScheduler, ResultCache, Subscriber, SubscriberId, SubscriberRegistry,
    TemplateStore,
};

pub const WAIT: Duration = Duration::from_secs(5);

// ── Template store ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    templates: Mutex<Vec<TemplateDescriptor>>,
    /// Number of upcoming `list_schedulable` calls that fail.
    pub fail_lists: AtomicUsize,
    pub fail_records: AtomicBool,
    pub list_calls: AtomicUsize,
    pub records: Mutex<Vec<(TemplateId, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn with(templates: Vec<TemplateDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            templates: Mutex::new(templates),
            ..Default::default()
        })
    }

    pub fn last_executed(&self, id: TemplateId) -> Option<DateTime<Utc>> {
        self.templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .and_then(|t| t.last_executed_at)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn insert(&self, template: TemplateDescriptor) {
        self.templates.lock().unwrap().push(template);
    }

    pub fn delete(&self, id: TemplateId) {
        self.templates.lock().unwrap().retain(|t| t.id != id);
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn list_schedulable(&self) -> Result<Vec<TemplateDescriptor>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.fail_lists.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_lists.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(self.templates.lock().unwrap().clone())
    }

    async fn record_execution(&self, template_id: TemplateId, at: DateTime<Utc>) -> Result<(), StoreError> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read-only replica".into()));
        }
        self.records.lock().unwrap().push((template_id, at));
        let mut templates = self.templates.lock().unwrap();
        match templates.iter_mut().find(|t| t.id == template_id) {
            Some(t) => {
                t.last_executed_at = Some(at);
                Ok(())
            }
            None => Err(StoreError::NotFound(template_id)),
        }
    }
}

// ── Query executor ──────────────────────────────────────────────────

pub enum Script {
    Rows(serde_json::Value),
    Fail(&'static str),
    Hang,
    Panic,
}

/// Executor answering by query text. Unknown queries return `[]`.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, Arc<Script>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(self: &Arc<Self>, query: &str, script: Script) -> Arc<Self> {
        self.scripts.lock().unwrap().insert(query.to_string(), Arc::new(script));
        self.clone()
    }

    pub fn calls(&self, query: &str) -> usize {
        self.calls.lock().unwrap().get(query).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &str) -> Result<serde_json::Value, ExecutionError> {
        *self.calls.lock().unwrap().entry(query.to_string()).or_insert(0) += 1;
        let script = self.scripts.lock().unwrap().get(query).cloned();
        match script.as_deref() {
            Some(Script::Rows(v)) => Ok(v.clone()),
            Some(Script::Fail(msg)) => Err(ExecutionError::Query(msg.to_string())),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(serde_json::Value::Null)
            }
            Some(Script::Panic) => panic!("executor blew up"),
            None => Ok(serde_json::json!([])),
        }
    }
}

// ── Subscriber ──────────────────────────────────────────────────────

pub enum Behaviour {
    Healthy,
    Broken,
    Stalled,
}

pub struct RecordingSubscriber {
    id: SubscriberId,
    behaviour: Mutex<Behaviour>,
    pub attempts: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl RecordingSubscriber {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            behaviour: Mutex::new(behaviour),
            attempts: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::new(Behaviour::Healthy)
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }

    /// Received messages of the given `type`.
    pub fn of_type(&self, kind: &str) -> Vec<serde_json::Value> {
        self.messages().into_iter().filter(|m| m["type"] == kind).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let stalled = match *self.behaviour.lock().unwrap() {
            Behaviour::Healthy => false,
            Behaviour::Broken => return Err(DeliveryError::Closed),
            Behaviour::Stalled => true,
        };
        if stalled {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

pub fn live_config() -> LiveConfig {
    LiveConfig {
        send_timeout_ms: 200,
        health_interval_secs: 1,
        probe_timeout_ms: 200,
        pong_timeout_secs: 0,
        outbound_buffer: 16,
    }
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        check_interval_secs: 1,
        error_backoff_secs: 0,
        max_concurrent: 4,
        result_max_age_secs: 0,
        run_immediately: true,
        execute_timeout_secs: 1,
    }
}

pub fn hub() -> Arc<BroadcastHub> {
    Arc::new(BroadcastHub::new(
        Arc::new(SubscriberRegistry::new()),
        Arc::new(ResultCache::new()),
        &live_config(),
    ))
}

pub fn scheduler(
    store: Arc<MemoryStore>,
    executor: Arc<ScriptedExecutor>,
    hub: Arc<BroadcastHub>,
    config: SchedulerConfig,
) -> RefreshScheduler {
    RefreshScheduler::new(store, executor, hub, config)
}

/// Poll `cond` every 20ms until it holds or `WAIT` elapses.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

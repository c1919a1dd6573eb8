//! Due-check loop that re-executes templates on their own cadence.
//!
//! Every check interval the scheduler:
//!
//! 1. reads the template set from the [`TemplateStore`],
//! 2. picks the templates that are due,
//! 3. executes them (bounded concurrency, optional timeout),
//! 4. replaces each template's entry in the [`ResultCache`],
//! 5. writes the execution time back to the store, success or not,
//! 6. broadcasts the result through the [`BroadcastHub`].
//!
//! A failing query becomes a failing result and waits a full interval like
//! any other. A failing store puts the loop into backoff; the loop itself
//! only ends on [`RefreshScheduler::stop`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tilecast_core::config::SchedulerConfig;
use tilecast_core::{ExecutionError, ExecutionResult, StoreError, TemplateDescriptor, TemplateId};

use crate::cache::ResultCache;
use crate::hub::BroadcastHub;
use crate::lifecycle::{Lifecycle, LoopState};
use crate::traits::{QueryExecutor, TemplateStore};

/// Summary of one due-check cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Templates seen in the store.
    pub templates: usize,
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Executions whose timestamp could not be written back.
    pub store_errors: usize,
    pub evicted: usize,
}

/// Result of the per-template step.
#[derive(Debug)]
pub struct TemplateRun {
    pub result: Arc<ExecutionResult>,
    pub recorded: Result<(), StoreError>,
}

struct SchedulerInner {
    store: Arc<dyn TemplateStore>,
    executor: Arc<dyn QueryExecutor>,
    cache: Arc<ResultCache>,
    hub: Arc<BroadcastHub>,
    config: SchedulerConfig,
    /// Last execution per template as seen by this process. Guards against
    /// re-running a template whose store write failed.
    last_run: Mutex<HashMap<TemplateId, DateTime<Utc>>>,
}

/// Drives due-template execution on a fixed tick.
///
/// Construct one per process (or per test) with its collaborators; there is
/// no global instance.
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
    lifecycle: Lifecycle,
}

impl RefreshScheduler {
    /// The result cache is taken from `hub`, so broadcasts and snapshots
    /// see the same entries the scheduler writes.
    pub fn new(
        store: Arc<dyn TemplateStore>,
        executor: Arc<dyn QueryExecutor>,
        hub: Arc<BroadcastHub>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                executor,
                cache: hub.cache().clone(),
                hub,
                config,
                last_run: Mutex::new(HashMap::new()),
            }),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.lifecycle.state()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    /// Spawn the tick loop. Idempotent: returns `false` if not stopped.
    pub fn start(&self) -> bool {
        let inner = self.inner.clone();
        let started = self.lifecycle.start(move |shutdown| run_loop(inner, shutdown));
        if started {
            info!(
                check_interval = ?self.inner.config.check_interval(),
                run_immediately = self.inner.config.run_immediately,
                "refresh scheduler started"
            );
        }
        started
    }

    /// Signal the loop to exit and wait for it. The current cycle finishes
    /// first when an execute timeout bounds it; otherwise it is cancelled.
    pub async fn stop(&self) {
        if self.lifecycle.stop().await {
            info!("refresh scheduler stopped");
        }
    }

    /// Run exactly one due-check cycle as of `now`.
    ///
    /// Fails only when the template set cannot be read; every due template
    /// produces exactly one result otherwise.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        self.inner.run_cycle_at(now).await
    }

    /// Execute one template unconditionally, as the scheduler would when it
    /// is due: cache, record, broadcast.
    pub async fn run_template(&self, template: TemplateDescriptor, now: DateTime<Utc>) -> TemplateRun {
        self.inner.run_template(template, now).await
    }
}

impl SchedulerInner {
    fn last_executed(&self, template: &TemplateDescriptor) -> Option<DateTime<Utc>> {
        let local = self
            .last_run
            .lock()
            .expect("last_run lock poisoned")
            .get(&template.id)
            .copied();
        match (template.last_executed_at, local) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        let templates = self.store.list_schedulable().await?;

        let mut report = CycleReport {
            templates: templates.len(),
            ..Default::default()
        };

        let known: HashSet<TemplateId> = templates.iter().map(|t| t.id).collect();
        self.last_run
            .lock()
            .expect("last_run lock poisoned")
            .retain(|id, _| known.contains(id));
        if let Some(max_age) = self.config.result_max_age() {
            report.evicted = self.cache.evict_orphans_older_than_at(max_age, now, &known);
        }

        let due: Vec<TemplateDescriptor> = templates
            .into_iter()
            .filter(|t| t.is_due_at(self.last_executed(t), now))
            .collect();
        report.due = due.len();

        if due.is_empty() {
            return Ok(report);
        }

        let runs: Vec<TemplateRun> = stream::iter(due)
            .map(|t| self.run_template(t, now))
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        for run in &runs {
            if run.result.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            if run.recorded.is_err() {
                report.store_errors += 1;
            }
        }
        Ok(report)
    }

    async fn run_template(&self, template: TemplateDescriptor, now: DateTime<Utc>) -> TemplateRun {
        let outcome = self.execute(&template).await;
        if let Err(e) = &outcome {
            warn!(template_id = template.id, name = %template.info.name, error = %e, "template execution failed");
        }

        let result = Arc::new(ExecutionResult::from_execution(&template, now, outcome));
        self.cache.put(result.clone());
        self.last_run
            .lock()
            .expect("last_run lock poisoned")
            .insert(template.id, now);

        let recorded = self.store.record_execution(template.id, now).await;
        if let Err(e) = &recorded {
            error!(template_id = template.id, error = %e, "failed to record execution time");
        }

        self.hub.broadcast(&result).await;
        TemplateRun { result, recorded }
    }

    /// Run the query on its own task so a panicking or hung executor cannot
    /// take the tick loop down with it.
    async fn execute(&self, template: &TemplateDescriptor) -> Result<serde_json::Value, ExecutionError> {
        let executor = self.executor.clone();
        let query = template.query.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move { executor.execute(&query).await }));

        let joined = match self.config.execute_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut task.0).await {
                Ok(joined) => joined,
                Err(_) => return Err(ExecutionError::Timeout(limit.as_secs())),
            },
            None => (&mut task.0).await,
        };

        joined.unwrap_or_else(|e| Err(ExecutionError::Other(format!("executor task failed: {}", e))))
    }
}

/// Aborts the executor task when the cycle is cancelled or times out.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_loop(inner: Arc<SchedulerInner>, shutdown: Arc<Notify>) {
    let interval = inner.config.check_interval();
    let backoff = inner.config.error_backoff().max(interval);

    if !inner.config.run_immediately {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => return,
        }
    }

    // Cycles run to completion only when an execute timeout bounds them.
    let cancel_on_stop = inner.config.execute_timeout().is_none();

    loop {
        let cycle = inner.run_cycle_at(Utc::now());
        let outcome = if cancel_on_stop {
            tokio::select! {
                outcome = cycle => outcome,
                _ = shutdown.notified() => {
                    info!("refresh cycle cancelled by shutdown");
                    break;
                }
            }
        } else {
            cycle.await
        };

        let pause = match outcome {
            Ok(report) if report.store_errors > 0 => {
                warn!(
                    store_errors = report.store_errors,
                    "could not record {} execution(s), backing off {:?}",
                    report.store_errors,
                    backoff
                );
                backoff
            }
            Ok(report) => {
                if report.due > 0 {
                    info!(
                        due = report.due,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "refresh cycle complete"
                    );
                } else {
                    debug!(templates = report.templates, "refresh tick: nothing due");
                }
                interval
            }
            Err(e) => {
                error!(error = %e, "template store unavailable, retrying in {:?}", backoff);
                backoff
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown.notified() => break,
        }
    }
}

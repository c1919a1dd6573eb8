//! Latest execution result per template.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use tilecast_core::{ExecutionResult, TemplateId};

/// Keyed store of the most recent [`ExecutionResult`] per template.
///
/// Entries are replaced whole (`Arc` swap under the write lock), so readers
/// see either the previous result or the new one. The write lock is only
/// held for a single map operation and never across an await point.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<TemplateId, Arc<ExecutionResult>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `result.template_id`. Returns the
    /// previous entry, if any.
    pub fn put(&self, result: Arc<ExecutionResult>) -> Option<Arc<ExecutionResult>> {
        self.entries
            .write()
            .expect("result cache lock poisoned")
            .insert(result.template_id, result)
    }

    pub fn get(&self, template_id: TemplateId) -> Option<Arc<ExecutionResult>> {
        self.entries
            .read()
            .expect("result cache lock poisoned")
            .get(&template_id)
            .cloned()
    }

    pub fn remove(&self, template_id: TemplateId) -> Option<Arc<ExecutionResult>> {
        self.entries
            .write()
            .expect("result cache lock poisoned")
            .remove(&template_id)
    }

    /// Point-in-time copy of every entry, ordered by template id.
    pub fn snapshot(&self) -> Vec<Arc<ExecutionResult>> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .expect("result cache lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|r| r.template_id);
        all
    }

    /// Remove entries executed more than `max_age` ago.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        self.evict_older_than_at(max_age, Utc::now())
    }

    /// Same as [`evict_older_than`](Self::evict_older_than) with an explicit
    /// reference instant.
    pub fn evict_older_than_at(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        self.evict_orphans_older_than_at(max_age, now, &HashSet::new())
    }

    /// Remove stale entries whose template is not in `keep`. Results of
    /// templates that still exist stay cached however old they are.
    pub fn evict_orphans_older_than_at(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
        keep: &HashSet<TemplateId>,
    ) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut entries = self.entries.write().expect("result cache lock poisoned");
        let before = entries.len();
        entries.retain(|id, r| keep.contains(id) || now.signed_duration_since(r.executed_at) <= max_age);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted stale cached results");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("result cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

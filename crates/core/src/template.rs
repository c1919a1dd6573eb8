use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable template key (primary key of the template table).
pub type TemplateId = i64;

/// Display metadata carried alongside every result.
///
/// A copy is taken at execution time, so renaming or deleting a template
/// never rewrites results that were already delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub name: String,
    pub description: Option<String>,
    /// Refresh cadence in seconds.
    pub refresh_rate: i64,
    /// Preferred rendering (`table`, `line_chart`, `bar_chart`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_type: Option<String>,
}

/// A stored, parameterized query with its own refresh cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub id: TemplateId,
    /// Opaque query payload handed to the executor.
    pub query: String,
    /// Seconds between executions. Zero or negative disables scheduling.
    pub refresh_interval_secs: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub info: TemplateInfo,
}

impl TemplateDescriptor {
    pub fn new(id: TemplateId, name: impl Into<String>, query: impl Into<String>, refresh_interval_secs: i64) -> Self {
        Self {
            id,
            query: query.into(),
            refresh_interval_secs,
            last_executed_at: None,
            info: TemplateInfo {
                name: name.into(),
                description: None,
                refresh_rate: refresh_interval_secs,
                widget_type: None,
            },
        }
    }

    /// Whether the scheduler should ever run this template on its own.
    pub fn is_schedulable(&self) -> bool {
        self.refresh_interval_secs > 0
    }

    /// Check whether the template is due at `now`, given the most recent
    /// known execution time.
    ///
    /// Due iff schedulable and either never executed or at least
    /// `refresh_interval_secs` have elapsed since `last_executed`.
    pub fn is_due_at(&self, last_executed: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if !self.is_schedulable() {
            return false;
        }
        match last_executed {
            None => true,
            Some(last) => now.signed_duration_since(last).num_seconds() >= self.refresh_interval_secs,
        }
    }

    /// Snapshot of the display metadata for a result.
    pub fn snapshot_info(&self) -> TemplateInfo {
        TemplateInfo {
            refresh_rate: self.refresh_interval_secs,
            ..self.info.clone()
        }
    }
}

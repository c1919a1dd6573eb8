use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::template::{TemplateDescriptor, TemplateId, TemplateInfo};

/// What one execution produced: rows on success, a message on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { payload: serde_json::Value },
    Failure { message: String },
}

/// Outcome of a single template execution.
///
/// Built once per due execution and shared as `Arc<ExecutionResult>`; the
/// next execution of the same template replaces it rather than mutating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub template_id: TemplateId,
    pub executed_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub template: TemplateInfo,
}

impl ExecutionResult {
    pub fn success(template: &TemplateDescriptor, executed_at: DateTime<Utc>, payload: serde_json::Value) -> Self {
        Self {
            template_id: template.id,
            executed_at,
            outcome: Outcome::Success { payload },
            template: template.snapshot_info(),
        }
    }

    pub fn failure(template: &TemplateDescriptor, executed_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            template_id: template.id,
            executed_at,
            outcome: Outcome::Failure {
                message: message.into(),
            },
            template: template.snapshot_info(),
        }
    }

    /// Wrap an executor return value.
    pub fn from_execution(
        template: &TemplateDescriptor,
        executed_at: DateTime<Utc>,
        result: Result<serde_json::Value, ExecutionError>,
    ) -> Self {
        match result {
            Ok(payload) => Self::success(template, executed_at, payload),
            Err(e) => Self::failure(template, executed_at, e.to_string()),
        }
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            Outcome::Success { payload } => Some(payload),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { message } => Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }
}

//! Collaborator traits: where templates come from, how they run, and where
//! results go.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tilecast_core::{DeliveryError, ExecutionError, StoreError, TemplateDescriptor, TemplateId};

/// Identity of one live connection.
pub type SubscriberId = Uuid;

/// Source of schedulable templates.
///
/// The scheduler only reads the template set and writes back the
/// last-executed timestamp; it never creates or deletes templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// All templates, including ones with a non-positive refresh interval
    /// (the scheduler filters those out).
    async fn list_schedulable(&self) -> Result<Vec<TemplateDescriptor>, StoreError>;

    /// Persist the time a template was last executed, whatever the outcome.
    async fn record_execution(&self, template_id: TemplateId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Runs one template query.
///
/// May be slow and may fail; the scheduler bounds it with a timeout and
/// records a failure as a result instead of propagating it.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `query` and return its rows as a JSON value.
    async fn execute(&self, query: &str) -> Result<serde_json::Value, ExecutionError>;
}

/// One end of a persistent, message-oriented connection.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Push one text message. An error is fatal for this subscriber.
    async fn send(&self, text: &str) -> Result<(), DeliveryError>;
}

use thiserror::Error;

use crate::template::TemplateId;

/// Failure of a single query execution. Always recorded as a failing
/// result for that template, never propagated out of the scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("{0}")]
    Query(String),

    #[error("query timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

/// Template store read/write failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("template store unavailable: {0}")]
    Unavailable(String),

    #[error("template store query failed: {0}")]
    Query(String),

    #[error("template not found: {0}")]
    NotFound(TemplateId),
}

/// Delivery of one message to one subscriber failed. Fatal for that
/// subscriber only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out after {0}ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

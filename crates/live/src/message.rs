//! Wire messages exchanged with subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tilecast_core::{DeliveryError, ExecutionResult, TemplateId, TemplateInfo};

// ── Outbound ────────────────────────────────────────────────────

/// Server → subscriber message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage {
    TemplateResult {
        template_id: TemplateId,
        result: ResultBody,
    },
    Ping,
    /// Reply to a client heartbeat; echoes its timestamp when it sent one.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<serde_json::Value>,
    },
}

/// `result` object of a `template_result` message. Exactly one of `data`
/// and `error` is non-null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBody {
    pub timestamp: DateTime<Utc>,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub template_info: TemplateInfo,
}

impl From<&ExecutionResult> for LiveMessage {
    fn from(result: &ExecutionResult) -> Self {
        LiveMessage::TemplateResult {
            template_id: result.template_id,
            result: ResultBody {
                timestamp: result.executed_at,
                data: result.payload().cloned(),
                error: result.error_message().map(str::to_string),
                template_info: result.template.clone(),
            },
        }
    }
}

impl LiveMessage {
    pub fn to_json(&self) -> Result<String, DeliveryError> {
        serde_json::to_string(self).map_err(|e| DeliveryError::Serialize(e.to_string()))
    }
}

// ── Inbound ─────────────────────────────────────────────────────

/// Subscriber → server message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Pong,
    /// Client heartbeat, answered with a `pong`.
    Ping {
        #[serde(default)]
        timestamp: Option<serde_json::Value>,
    },
    /// Ask for the full set of current results.
    #[serde(alias = "get_results")]
    RequestResults,
}

impl ClientMessage {
    /// Parse an inbound frame. Unknown types and malformed JSON yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!(error = %e, "ignoring unrecognised inbound message");
                None
            }
        }
    }
}

//! Client wire protocol.
//!
//! Requests, responses, and pushed events are NDJSON objects sharing one
//! stream:
//!
//! ```json
//! {"id": 1, "method": "create_context", "params": {"configuration": {}}}
//! {"id": 1, "ok": true, "data": {"evaluationContextId": 1}}
//! {"id": 2, "method": "evaluate", "params": {"evaluationContextId": 1, "source": "1 + 1"}}
//! {"id": 3, "ok": false, "error": {"kind": "UnknownContext", "message": "..."}}
//! {"event": {"$type": "CodeCellEvaluationStartedEvent", "codeCellId": "..."}}
//! ```

use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::panic_message;
use crate::models::cell::CodeCellId;
use crate::models::context::{ContextConfiguration, EvaluationContextId};
use crate::models::event::CodeCellEvent;
use crate::AppError;

/// Inbound request from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Correlation id echoed in the response.
    pub id: u64,
    /// Operation name.
    pub method: String,
    /// Operation parameters.
    #[serde(default)]
    pub params: Value,
}

impl ClientRequest {
    /// Build a request from its parts.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Params of `create_context`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateContextParams {
    #[serde(default)]
    pub configuration: ContextConfiguration,
}

/// Params of `evaluate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EvaluateParams {
    pub evaluation_context_id: EvaluationContextId,
    pub source: String,
    pub code_cell_id: Option<CodeCellId>,
}

/// Params of `abort`, `destroy_context`, and `context_history`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContextParams {
    pub evaluation_context_id: EvaluationContextId,
}

/// Structured failure returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Error category, e.g. `UnknownContext`.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
    /// Underlying cause, when one was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorEnvelope {
    /// Envelope for a panic caught while handling a request.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self {
            kind: "Internal".into(),
            message: "request handler panicked".into(),
            cause: panic_message(payload),
        }
    }
}

impl From<&AppError> for ErrorEnvelope {
    fn from(err: &AppError) -> Self {
        let (kind, message) = match err {
            AppError::Config(m) => ("Config", m),
            AppError::UnknownContext(m) => ("UnknownContext", m),
            AppError::ContextCreation(m) => ("ContextCreation", m),
            AppError::Compiler(m) => ("Compiler", m),
            AppError::Disconnected(m) => ("Disconnected", m),
            AppError::Protocol(m) => ("Protocol", m),
            AppError::InvalidRequest(m) => ("InvalidRequest", m),
            AppError::Ipc(m) => ("Ipc", m),
            AppError::Io(m) => ("Io", m),
            AppError::Internal(m) => ("Internal", m),
        };
        Self {
            kind: kind.to_owned(),
            message: message.clone(),
            cause: None,
        }
    }
}

/// Outbound response to a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    /// Id of the request being answered; `null` when the request was unreadable.
    pub id: Option<u64>,
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl ClientResponse {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn success(id: u64, data: Value) -> Self {
        Self {
            id: Some(id),
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn failure(id: Option<u64>, error: ErrorEnvelope) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Cell event pushed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// The event.
    pub event: CodeCellEvent,
}

/// Any line the server writes, as seen by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// A pushed cell event.
    Event(EventMessage),
    /// A response to a request.
    Response(ClientResponse),
}

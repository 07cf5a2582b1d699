//! Request handling for one client session.
//!
//! Every request is routed to a manager operation and its outcome, error, or
//! panic is converted into exactly one [`ClientResponse`]. A panic inside an
//! operation never ends the session.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, info_span, Instrument};

use crate::compiler::Compiler;
use crate::engine::{EvaluationContextManager, SubmitOutcome};
use crate::session::protocol::{
    ClientRequest, ClientResponse, ContextParams, CreateContextParams, ErrorEnvelope,
    EvaluateParams,
};
use crate::{AppError, Result};

/// One client's view of the engine: its own manager and event bus.
#[derive(Debug, Clone)]
pub struct ClientSession {
    manager: Arc<EvaluationContextManager>,
}

impl ClientSession {
    /// Create a session with a fresh manager over `compiler`.
    #[must_use]
    pub fn new(compiler: Arc<dyn Compiler>, abort_grace: Duration) -> Self {
        Self::with_manager(Arc::new(EvaluationContextManager::new(compiler, abort_grace)))
    }

    /// Create a session over an existing manager.
    #[must_use]
    pub fn with_manager(manager: Arc<EvaluationContextManager>) -> Self {
        Self { manager }
    }

    /// Manager backing this session.
    #[must_use]
    pub fn manager(&self) -> &Arc<EvaluationContextManager> {
        &self.manager
    }

    /// Handle one request and produce its response.
    pub async fn handle_request(&self, request: ClientRequest) -> ClientResponse {
        let id = request.id;
        let span = info_span!("client_request", id, method = %request.method);

        let outcome = AssertUnwindSafe(self.dispatch(request))
            .catch_unwind()
            .instrument(span)
            .await;

        match outcome {
            Ok(Ok(data)) => ClientResponse::success(id, data),
            Ok(Err(err)) => ClientResponse::failure(Some(id), ErrorEnvelope::from(&err)),
            Err(payload) => {
                let envelope = ErrorEnvelope::from_panic(payload.as_ref());
                error!(id, cause = ?envelope.cause, "request handler panicked");
                ClientResponse::failure(Some(id), envelope)
            }
        }
    }

    async fn dispatch(&self, request: ClientRequest) -> Result<Value> {
        let ClientRequest { method, params, .. } = request;

        match method.as_str() {
            "create_context" => {
                let p: CreateContextParams = if params.is_null() {
                    CreateContextParams::default()
                } else {
                    parse_params(&method, params)?
                };
                let id = self.manager.create_context(p.configuration).await?;
                Ok(json!({ "evaluationContextId": id }))
            }
            "evaluate" => {
                let p: EvaluateParams = parse_params(&method, params)?;
                let outcome = self
                    .manager
                    .submit(p.evaluation_context_id, p.source, p.code_cell_id)
                    .await?;
                Ok(match outcome {
                    SubmitOutcome::Accepted(cell_id) => {
                        json!({ "codeCellId": cell_id, "isSubmissionComplete": true })
                    }
                    SubmitOutcome::Incomplete => {
                        json!({ "codeCellId": null, "isSubmissionComplete": false })
                    }
                })
            }
            "abort" => {
                let p: ContextParams = parse_params(&method, params)?;
                self.manager.abort_evaluation(p.evaluation_context_id).await?;
                Ok(Value::Bool(true))
            }
            "destroy_context" => {
                let p: ContextParams = parse_params(&method, params)?;
                self.manager.destroy_context(p.evaluation_context_id).await;
                Ok(Value::Bool(true))
            }
            "list_contexts" => {
                let contexts = self.manager.list_contexts().await;
                Ok(json!({ "contexts": contexts }))
            }
            "context_history" => {
                let p: ContextParams = parse_params(&method, params)?;
                let cells = self.manager.context_history(p.evaluation_context_id).await?;
                Ok(json!({ "cells": cells }))
            }
            other => Err(AppError::InvalidRequest(format!("unknown method: {other}"))),
        }
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::InvalidRequest(format!("invalid params for {method}: {e}")))
}

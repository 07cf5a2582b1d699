//! Evaluator reader task.
//!
//! Reads newline-delimited JSON from the evaluator's stdout, parses each line
//! into an [`InboundMessage`], and forwards it through a tokio [`mpsc`]
//! channel.
//!
//! # Inbound shapes
//!
//! | Shape                                   | Maps to                          |
//! |-----------------------------------------|----------------------------------|
//! | `{"id", "result"}` / `{"id", "error"}`  | [`InboundMessage::Response`]     |
//! | `{"method": "cell/result", "params"}`   | [`InboundMessage::CellResult`]   |
//! | `{"method": "cell/output", "params"}`   | [`InboundMessage::CellOutput`]   |
//! | *(any other method)*                    | Skipped; logged at `DEBUG`       |

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::LineCodec;
use crate::models::cell::CodeCellId;
use crate::models::context::EvaluationContextId;
use crate::models::event::ResultHandling;
use crate::{AppError, Result};

/// Message received from an evaluator process.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Answer to an earlier request.
    Response {
        /// Correlation id of the request.
        id: String,
        /// Result payload, or the error message reported by the evaluator.
        result: std::result::Result<serde_json::Value, String>,
    },
    /// A value produced by the executing cell.
    CellResult {
        /// Originating cell.
        code_cell_id: CodeCellId,
        /// Display handling mode.
        result_handling: ResultHandling,
        /// Declared type name.
        type_name: Option<String>,
        /// Structured value representations.
        value_representations: Option<Vec<serde_json::Value>>,
    },
    /// Captured output from the executing cell.
    CellOutput {
        /// Originating cell.
        code_cell_id: CodeCellId,
        /// Stream descriptor (1 = stdout, 2 = stderr).
        file_descriptor: i32,
        /// Captured text.
        value: String,
    },
    /// The stream ended; no further messages follow.
    Closed {
        /// Human-readable reason.
        reason: String,
    },
}

// ── Inbound message types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    id: Option<serde_json::Value>,
    method: Option<String>,
    #[serde(default)]
    params: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellResultParams {
    code_cell_id: CodeCellId,
    #[serde(default)]
    result_handling: ResultHandling,
    #[serde(rename = "type")]
    type_name: Option<String>,
    value_representations: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellOutputParams {
    code_cell_id: CodeCellId,
    file_descriptor: i32,
    value: String,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse one NDJSON line from an evaluator.
///
/// - `Ok(Some(msg))`: a recognized message.
/// - `Ok(None)`: empty line or unknown notification method.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("malformed json: …")`: not valid JSON.
/// - [`AppError::Protocol`]`("missing required field: …")`: a known method
///   without its required params, or a response without an `id`.
pub fn parse_inbound_line(
    context_id: EvaluationContextId,
    line: &str,
) -> Result<Option<InboundMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    match envelope.method.as_deref() {
        Some("cell/result") => {
            let params: CellResultParams = serde_json::from_value(envelope.params).map_err(|e| {
                AppError::Protocol(format!("missing required field: cell/result params: {e}"))
            })?;
            Ok(Some(InboundMessage::CellResult {
                code_cell_id: params.code_cell_id,
                result_handling: params.result_handling,
                type_name: params.type_name,
                value_representations: params.value_representations,
            }))
        }
        Some("cell/output") => {
            let params: CellOutputParams = serde_json::from_value(envelope.params).map_err(|e| {
                AppError::Protocol(format!("missing required field: cell/output params: {e}"))
            })?;
            Ok(Some(InboundMessage::CellOutput {
                code_cell_id: params.code_cell_id,
                file_descriptor: params.file_descriptor,
                value: params.value,
            }))
        }
        Some(other) => {
            debug!(
                method = other,
                context_id = %context_id,
                "evaluator reader: skipping unknown inbound method"
            );
            Ok(None)
        }
        None => parse_response(envelope).map(Some),
    }
}

/// Read NDJSON lines from `stdout` and forward parsed messages to `msg_tx`.
///
/// On EOF, an I/O error or an oversized line, sends [`InboundMessage::Closed`]
/// before returning. An oversized line may have carried a response, so the
/// stream is treated as lost. Malformed lines are logged and skipped.
/// When `cancel` fires the reader exits without sending `Closed`.
///
/// # Errors
///
/// Always returns `Ok(())`; failures are reported through `Closed`.
pub async fn run_reader<R>(
    context_id: EvaluationContextId,
    stdout: R,
    msg_tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%context_id, "evaluator reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(context_id = %context_id, "evaluator reader: EOF detected");
                        send_closed(&msg_tx, "evaluator stream closed").await;
                        break;
                    }
                    Some(Err(AppError::Protocol(ref msg))) => {
                        warn!(
                            context_id = %context_id,
                            error = msg.as_str(),
                            "evaluator reader: framing error, stopping"
                        );
                        send_closed(&msg_tx, &format!("evaluator protocol error: {msg}")).await;
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%context_id, error = %e, "evaluator reader: IO error, stopping");
                        send_closed(&msg_tx, &format!("evaluator stream error: {e}")).await;
                        break;
                    }
                    Some(Ok(line)) => match parse_inbound_line(context_id, &line) {
                        Ok(Some(msg)) => {
                            if msg_tx.send(msg).await.is_err() {
                                debug!(%context_id, "evaluator reader: receiver closed, stopping");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                context_id = %context_id,
                                error = %e,
                                raw_line = %line,
                                "evaluator reader: parse error, skipping line"
                            );
                        }
                    },
                }
            }
        }
    }

    Ok(())
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn parse_response(envelope: Envelope) -> Result<InboundMessage> {
    let id = match envelope.id {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => {
            return Err(AppError::Protocol(
                "missing required field: `id` in response envelope".into(),
            ))
        }
    };

    let result = match envelope.error {
        Some(err) => Err(err.message),
        None => Ok(envelope.result.unwrap_or(serde_json::Value::Null)),
    };

    Ok(InboundMessage::Response { id, result })
}

async fn send_closed(msg_tx: &mpsc::Sender<InboundMessage>, reason: &str) {
    let msg = InboundMessage::Closed {
        reason: reason.to_owned(),
    };
    if msg_tx.send(msg).await.is_err() {
        debug!("evaluator reader: receiver closed before Closed could be delivered");
    }
}

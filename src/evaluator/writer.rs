//! Evaluator writer task.
//!
//! Receives outbound JSON messages from a tokio [`mpsc`] channel and writes
//! each one as a single NDJSON line to the evaluator's stdin.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::context::EvaluationContextId;
use crate::{AppError, Result};

/// Serialize messages from `msg_rx` and write them to `stdin`.
///
/// Exits cleanly when `cancel` fires or every sender is dropped.
///
/// # Errors
///
/// Returns [`AppError::Disconnected`]`("write failed: …")` when the write
/// fails, typically because the evaluator exited.
pub async fn run_writer<W>(
    context_id: EvaluationContextId,
    mut stdin: W,
    mut msg_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%context_id, "evaluator writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!(context_id = %context_id, "evaluator writer: channel closed, stopping");
                    break;
                };

                let mut bytes = serde_json::to_vec(&value).map_err(|e| {
                    AppError::Protocol(format!("failed to serialise outbound message: {e}"))
                })?;
                bytes.push(b'\n');

                if let Err(e) = stdin.write_all(&bytes).await {
                    warn!(context_id = %context_id, error = %e, "evaluator writer: write failed");
                    return Err(AppError::Disconnected(format!("write failed: {e}")));
                }
                stdin.flush().await.map_err(|e| {
                    AppError::Disconnected(format!("flush failed: {e}"))
                })?;
            }
        }
    }

    Ok(())
}

//! Stream transport for client sessions.
//!
//! Requests are read line by line and handled in arrival order, except
//! `abort`, which is handled as soon as it is read so it never waits behind a
//! slow `create_context` or `destroy_context`. Responses and pushed events
//! share a single writer task so lines never interleave. When the inbound
//! side ends the session's contexts are torn down with `Disconnect`, so
//! in-flight cells finish as `Disconnected`.

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::LineCodec;
use crate::session::handler::ClientSession;
use crate::session::protocol::{ClientRequest, ClientResponse, ErrorEnvelope, EventMessage};
use crate::{AppError, Result};

/// Capacity of the outbound line channel.
const OUTBOUND_CAPACITY: usize = 256;

/// Capacity of the queue of requests awaiting in-order handling.
const REQUEST_CAPACITY: usize = 256;

/// Method handled out of band instead of through the in-order queue.
const ABORT_METHOD: &str = "abort";

/// Serve `session` over a pair of byte streams until EOF or cancellation.
///
/// # Errors
///
/// Returns `AppError::Io` if the inbound stream fails mid-read. The session is
/// torn down before the error is returned.
pub async fn serve_stream<R, W>(
    session: ClientSession,
    reader: R,
    writer: W,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (line_tx, line_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_lines(writer, line_rx));

    let mut subscription = session.manager().subscribe().await;
    let subscription_id = subscription.id();
    let event_tx = line_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let Some(line) = encode(&EventMessage { event }) else {
                continue;
            };
            if event_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let (request_tx, request_rx) = mpsc::channel::<ClientRequest>(REQUEST_CAPACITY);
    let in_order = tokio::spawn(handle_in_order(session.clone(), request_rx, line_tx.clone()));
    let mut out_of_band = JoinSet::new();

    let mut framed = FramedRead::new(reader, LineCodec::new());
    let mut outcome = Ok(());

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("session transport cancelled");
                break;
            }
            Some(joined) = out_of_band.join_next() => {
                if let Err(err) = joined {
                    warn!(%err, "out-of-band request task failed");
                }
                continue;
            }
            item = framed.next() => item,
        };

        let line = match item {
            None => {
                debug!("client closed the stream");
                break;
            }
            Some(Ok(line)) => line,
            Some(Err(AppError::Protocol(msg))) => {
                warn!(error = %msg, "client line rejected");
                let error = ErrorEnvelope::from(&AppError::InvalidRequest(msg));
                send_line(&line_tx, &ClientResponse::failure(None, error)).await;
                continue;
            }
            Some(Err(err)) => {
                warn!(%err, "client stream failed");
                outcome = Err(err);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ClientRequest>(&line) {
            Ok(request) if request.method == ABORT_METHOD => {
                out_of_band.spawn(respond(session.clone(), request, line_tx.clone()));
            }
            Ok(request) => {
                if request_tx.send(request).await.is_err() {
                    warn!("request handler stopped, closing session");
                    break;
                }
            }
            Err(err) => {
                let error = AppError::InvalidRequest(format!("invalid json: {err}"));
                let response = ClientResponse::failure(None, ErrorEnvelope::from(&error));
                send_line(&line_tx, &response).await;
            }
        }
    }

    drop(request_tx);
    if let Err(err) = in_order.await {
        warn!(%err, "request handler task failed");
    }
    while let Some(joined) = out_of_band.join_next().await {
        if let Err(err) = joined {
            warn!(%err, "out-of-band request task failed");
        }
    }

    session.manager().disconnect_all().await;
    session.manager().unsubscribe(subscription_id).await;
    if let Err(err) = forwarder.await {
        warn!(%err, "event forwarder task failed");
    }
    drop(line_tx);
    if let Err(err) = writer_task.await {
        warn!(%err, "session writer task failed");
    }

    info!("client session closed");
    outcome
}

/// Serve one session over the process's stdin and stdout.
///
/// # Errors
///
/// Propagates [`serve_stream`] errors.
pub async fn serve_stdio(session: ClientSession, cancel: CancellationToken) -> Result<()> {
    serve_stream(session, tokio::io::stdin(), tokio::io::stdout(), cancel).await
}

async fn handle_in_order(
    session: ClientSession,
    mut request_rx: mpsc::Receiver<ClientRequest>,
    line_tx: mpsc::Sender<String>,
) {
    while let Some(request) = request_rx.recv().await {
        let response = session.handle_request(request).await;
        send_line(&line_tx, &response).await;
    }
}

async fn respond(session: ClientSession, request: ClientRequest, line_tx: mpsc::Sender<String>) {
    let response = session.handle_request(request).await;
    send_line(&line_tx, &response).await;
}

async fn write_lines<W>(mut writer: W, mut line_rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(line) = line_rx.recv().await {
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            warn!(%err, "failed to write to client");
            break;
        }
        if let Err(err) = writer.flush().await {
            warn!(%err, "failed to flush client stream");
            break;
        }
    }
}

async fn send_line<T: Serialize>(line_tx: &mpsc::Sender<String>, message: &T) {
    if let Some(line) = encode(message) {
        if line_tx.send(line).await.is_err() {
            debug!("client writer closed, dropping line");
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(mut line) => {
            line.push('\n');
            Some(line)
        }
        Err(err) => {
            warn!(%err, "failed to serialize outbound message");
            None
        }
    }
}

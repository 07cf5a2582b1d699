//! Local IPC listener for client sessions.
//!
//! Binds a namespaced local socket (a named pipe on Windows, an abstract or
//! filesystem Unix socket elsewhere) through `interprocess`. Every accepted
//! connection is served by its own [`ClientSession`], so contexts and event
//! subscriptions never leak between clients.

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::tokio::{Listener, Stream};
use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::compiler::Compiler;
use crate::session::handler::ClientSession;
use crate::session::transport::serve_stream;
use crate::{AppError, Result};

/// Bind `socket_name` and start accepting client sessions.
///
/// Connections are served until `shutdown` fires; their sessions observe a
/// child token so in-flight cells are torn down with the listener.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the name is invalid or the socket cannot be bound.
pub fn spawn_ipc_server(
    socket_name: &str,
    compiler: Arc<dyn Compiler>,
    abort_grace: Duration,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let listener = bind(socket_name)?;
    info!(ipc_name = socket_name, "accepting client sessions");

    let span = info_span!("ipc_listener", ipc_name = socket_name);
    let acceptor = Acceptor {
        listener,
        compiler,
        abort_grace,
        shutdown,
    };
    Ok(tokio::spawn(acceptor.run().instrument(span)))
}

fn bind(socket_name: &str) -> Result<Listener> {
    let name = socket_name
        .to_owned()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{socket_name}': {err}")))?;

    ListenerOptions::new()
        .name(name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to bind ipc socket: {err}")))
}

struct Acceptor {
    listener: Listener,
    compiler: Arc<dyn Compiler>,
    abort_grace: Duration,
    shutdown: CancellationToken,
}

impl Acceptor {
    async fn run(self) {
        let mut connections: u64 = 0;

        loop {
            let accepted = tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let stream = match accepted {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%err, "failed to accept ipc client");
                    continue;
                }
            };

            connections += 1;
            let session = ClientSession::new(Arc::clone(&self.compiler), self.abort_grace);
            tokio::spawn(
                serve_connection(stream, session, self.shutdown.child_token())
                    .instrument(info_span!("ipc_client", connection = connections)),
            );
        }

        info!(connections, "ipc listener stopped");
    }
}

async fn serve_connection(stream: Stream, session: ClientSession, shutdown: CancellationToken) {
    info!("client connected");
    let (recv, send) = stream.split();
    if let Err(err) = serve_stream(session, recv, send, shutdown).await {
        warn!(%err, "client session ended with error");
    }
}

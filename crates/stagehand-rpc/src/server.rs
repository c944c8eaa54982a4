//! Newline-delimited JSON transport over any byte stream.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::errors::{INVALID_REQUEST, PARSE_ERROR};
use crate::registry::Router;
use crate::types::{Outgoing, RpcErrorObject, RpcRequest, RpcResponse};

/// Longest accepted request line.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Transport failures that end a connection or listener.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// Reading, writing or accepting failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The line codec rejected the stream.
    #[error("line codec error: {0}")]
    Codec(#[from] LinesCodecError),
}

/// Serve one connection until its input ends or `shutdown` fires.
///
/// Each request runs on its own task, so replies go out in completion order.
/// When the input ends the connection scope is cancelled, in-flight requests
/// are drained and the writer is flushed before returning.
pub async fn serve_connection<R, W>(
    router: Arc<Router>,
    reader: R,
    writer: W,
    shutdown: &CancellationToken,
    outbound_queue: usize,
) -> Result<(), ServeError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(outbound_queue.max(1));
    let conn = Arc::new(Connection::new(tx));
    let scope = shutdown.child_token();
    info!(conn_id = %conn.id(), "connection opened");

    let writer_task = tokio::spawn(write_loop(rx, FramedWrite::new(writer, LinesCodec::new())));
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut in_flight = JoinSet::new();

    let result = loop {
        tokio::select! {
            () = scope.cancelled() => break Ok(()),
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(conn_id = %conn.id(), error = %e, "request task failed");
                }
            }
            next = lines.next() => match next {
                None => break Ok(()),
                Some(Ok(line)) => accept_line(&router, &conn, &scope, &mut in_flight, &line).await,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(conn_id = %conn.id(), "request line too long");
                    let reply = error_reply(Value::Null, PARSE_ERROR, "Parse error: line too long");
                    if conn.reply(reply).await.is_err() {
                        break Ok(());
                    }
                }
                Some(Err(LinesCodecError::Io(e))) => break Err(ServeError::Io(e)),
            }
        }
    };

    scope.cancel();
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(conn_id = %conn.id(), error = %e, "request task failed");
        }
    }

    let conn_id = conn.id().clone();
    let dropped = conn.dropped_notifications();
    drop(conn);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%conn_id, error = %e, "writer stopped early"),
        Err(e) => error!(%conn_id, error = %e, "writer task failed"),
    }
    info!(%conn_id, dropped_notifications = dropped, "connection closed");
    result
}

/// Serve the process's stdin/stdout as one connection.
pub async fn serve_stdio(
    router: Arc<Router>,
    shutdown: &CancellationToken,
    outbound_queue: usize,
) -> Result<(), ServeError> {
    serve_connection(
        router,
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown,
        outbound_queue,
    )
    .await
}

/// Accept TCP connections until `shutdown` fires, serving each independently.
pub async fn serve_tcp(
    router: Arc<Router>,
    listener: TcpListener,
    shutdown: &CancellationToken,
    outbound_queue: usize,
) -> Result<(), ServeError> {
    info!(addr = ?listener.local_addr().ok(), "listening");
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "connection task failed");
                }
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                debug!(%peer, "accepted connection");
                let (reader, writer) = socket.into_split();
                let router = Arc::clone(&router);
                let shutdown = shutdown.clone();
                let _ = connections.spawn(async move {
                    if let Err(e) = serve_connection(router, reader, writer, &shutdown, outbound_queue).await {
                        warn!(%peer, error = %e, "connection ended with error");
                    }
                });
            }
        }
    }
    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn accept_line(
    router: &Arc<Router>,
    conn: &Arc<Connection>,
    scope: &CancellationToken,
    in_flight: &mut JoinSet<()>,
    line: &str,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let request = match parse_request(line) {
        Ok(request) => request,
        Err(reply) => {
            debug!(conn_id = %conn.id(), "rejected malformed line");
            let _ = conn.reply(reply).await;
            return;
        }
    };
    let router = Arc::clone(router);
    let conn = Arc::clone(conn);
    let scope = scope.clone();
    let _ = in_flight.spawn(async move {
        if let Some(reply) = router.dispatch(&conn, request, &scope).await {
            if conn.reply(reply).await.is_err() {
                debug!(conn_id = %conn.id(), "reply dropped, writer gone");
            }
        }
    });
}

/// Decode one line. Invalid JSON is a parse error; valid JSON that is not a
/// request envelope is an invalid request. Both are answered with `id: null`.
fn parse_request(line: &str) -> Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| error_reply(Value::Null, PARSE_ERROR, format!("Parse error: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| error_reply(Value::Null, INVALID_REQUEST, format!("Invalid request: {e}")))
}

fn error_reply(id: Value, code: i64, message: impl Into<String>) -> RpcResponse {
    RpcResponse::error(
        id,
        RpcErrorObject {
            code,
            message: message.into(),
            data: None,
        },
    )
}

async fn write_loop<W>(
    mut rx: mpsc::Receiver<Outgoing>,
    mut sink: FramedWrite<W, LinesCodec>,
) -> Result<(), ServeError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "could not encode outgoing message");
                continue;
            }
        };
        sink.send(line).await?;
    }
    SinkExt::<String>::flush(&mut sink).await?;
    Ok(())
}

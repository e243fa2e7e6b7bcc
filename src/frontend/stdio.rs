//! JSON-RPC server on the proxy's own stdin/stdout.
//!
//! Reads one JSON-RPC message per line and hands it to the shared dispatcher.
//! Responses are written back in completion order by a single writer task.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::rpc::{dispatch_raw, InFlight};
use crate::proxy::ProxySession;

/// Outgoing message queue depth.
const OUTBOX_CAPACITY: usize = 64;

/// Serve JSON-RPC on `reader`/`writer` until EOF or `shutdown` fires.
///
/// Requests still in flight when the loop ends are aborted.
pub async fn serve<R, W>(
    proxy: Arc<ProxySession>,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, mut queue) = mpsc::channel::<String>(OUTBOX_CAPACITY);
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(line) = queue.recv().await {
            if let Err(e) = write_line(&mut writer, &line).await {
                tracing::error!(error = %e, "failed to write to frontend");
                break;
            }
        }
    });

    let mut reader = BufReader::new(reader);
    // Survives cancelled reads: read_until keeps partial input here.
    let mut line = Vec::new();
    let mut in_flight = InFlight::new();

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("frontend loop stopping on shutdown signal");
                break Ok(());
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                in_flight.finished(done);
            }
            read = reader.read_until(b'\n', &mut line) => match read {
                Ok(0) => {
                    if !line.is_empty() {
                        dispatch_raw(&proxy, &line, &outbox, &mut in_flight).await;
                    }
                    tracing::info!("frontend input closed");
                    break Ok(());
                }
                Ok(_) => {
                    dispatch_raw(&proxy, &line, &outbox, &mut in_flight).await;
                    line.clear();
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read from frontend");
                    break Err(e);
                }
            },
        }
    };

    in_flight.shutdown().await;
    drop(outbox);
    if let Err(e) = writer_task.await {
        tracing::warn!(error = %e, "frontend writer task failed");
    }
    result
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

// ─── Tests ───────────────────────────────────────────────────────────────────

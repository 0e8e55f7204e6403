use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use super::Envelope;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "[gateway]";

use crate::{log_error, log_info, log_warn};

/// Accepts JSON-lines clients until cancelled. Each client gets one reply line per message.
pub async fn serve_tcp(
    addr: SocketAddr,
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind command listener on {addr}"))?;
    log_info!("Listening for commands on {}", addr);
    serve_listener(listener, tx, cancel).await;
    Ok(())
}

pub(crate) async fn serve_listener(
    listener: TcpListener,
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    log_warn!("Failed to accept command client: {}", err);
                    continue;
                }
            },
        };

        log_info!("Command client connected: {}", peer);
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_client(stream, tx, cancel).await {
                log_warn!("Command client {} dropped: {err:#}", peer);
            }
            log_info!("Command client disconnected: {}", peer);
        });
    }
}

async fn serve_client(
    stream: TcpStream,
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    pump_lines(reader, writer, tx, cancel).await
}

/// Reads commands from the process's stdin and writes replies to stdout.
pub async fn serve_stdin(tx: mpsc::Sender<Envelope>, cancel: CancellationToken) -> Result<()> {
    log_info!("Reading commands from stdin");
    pump_lines(tokio::io::stdin(), tokio::io::stdout(), tx, cancel).await
}

/// Forwards each non-empty line to the gateway and writes back its reply.
async fn pump_lines<R, W>(
    reader: R,
    mut writer: W,
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read command line")?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let (envelope, reply) = Envelope::new(line);
        if tx.send(envelope).await.is_err() {
            log_error!("Command gateway is gone, closing source");
            break;
        }
        let Ok(reply) = reply.await else {
            log_error!("Command gateway dropped a reply");
            continue;
        };

        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

// Author: Quayside contributors
// License: MIT

//! The per-connection stream-socket listener (spec.md §2 item 1, §4.1,
//! §6). Binds `${runtime_dir}/${name}-${pid}.sock`, sweeps sockets left
//! behind by dead PIDs of the same name, greets every connection with the
//! capability banner, and hands each newline-delimited JSON request to the
//! [`router`].

pub mod protocol;
pub mod router;
pub mod socket;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};

use crate::core::daemon::Daemon;
use crate::error::AnyError;
use protocol::{Greeting, Request, Response, StreamEvent};

/// Bind the socket, sweep stale siblings, and accept connections until
/// `shutdown_rx` fires. The listener itself is removed on the way out
/// (spec.md §6 "unlinked on exit").
pub async fn serve(daemon: Arc<Daemon>, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), AnyError> {
    let path = socket::resolve_path(&daemon.socket_name);
    socket::sweep_stale(&daemon.socket_name, &path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A previous unclean exit may have left our own socket behind; a fresh
    // bind on a live path would otherwise fail with AddrInUse.
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)
        .map_err(|e| format!("failed to bind {}: {e}", path.display()))?;
    eventline::info!("transport: listening on {}", path.display());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = match accepted {
                    Ok(x) => x,
                    Err(e) => {
                        eventline::warn!("transport: accept failed: {e}");
                        continue;
                    }
                };
                let daemon = Arc::clone(&daemon);
                let conn_shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, daemon, conn_shutdown).await {
                        eventline::debug!("transport: connection closed: {e}");
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    let _ = std::fs::remove_file(&path);
    eventline::info!("transport: listener stopped");
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    daemon: Arc<Daemon>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), AnyError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let greeting = Greeting {
        capabilities: daemon.capabilities(),
    };
    write_half
        .write_all(serde_json::to_string(&greeting)?.as_bytes())
        .await?;
    write_half.write_all(b"\n").await?;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown_rx.changed() => break,
        };

        let Some(line) = line else { break }; // EOF
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(_) => {
                write_response(&mut write_half, Response::invalid_json()).await?;
                continue;
            }
        };

        if request.method == "subscribe" {
            router::run_subscribe(&daemon, &request, &mut write_half, &mut shutdown_rx).await?;
            break; // subscribe owns the connection until it closes
        }

        let response = router::dispatch(&daemon, &request).await;
        write_response(&mut write_half, response).await?;
    }

    Ok(())
}

async fn write_response(write_half: &mut tokio::net::unix::OwnedWriteHalf, response: Response) -> Result<(), AnyError> {
    write_half.write_all(response.to_line().as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    Ok(())
}

/// Frame and write one `subscribe` stream event.
pub(crate) async fn write_stream_event(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    id: &serde_json::Value,
    event: StreamEvent,
) -> Result<(), AnyError> {
    let response = Response::ok(id.clone(), serde_json::to_value(event)?);
    write_response(write_half, response).await
}

/// Used by `run_subscribe` to hold one manager's typed receiver behind a
/// uniform `Value`-producing interface so a single `select!` can poll all
/// of them at once.
pub(crate) fn spawn_value_bridge<T>(mut rx: mpsc::Receiver<T>, service: &'static str) -> mpsc::Receiver<StreamEvent>
where
    T: serde::Serialize + Send + 'static,
{
    let (tx, out_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let data = serde_json::to_value(&item).unwrap_or(serde_json::Value::Null);
            if tx
                .send(StreamEvent {
                    service: service.to_string(),
                    data,
                })
                .await
                .is_err()
            {
                break;
            }
        }
    });
    out_rx
}

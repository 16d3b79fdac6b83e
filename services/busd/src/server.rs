//! TCP listener and per-connection read loops.
//!
//! Each accepted socket gets its own task: bounded reads feed the streaming
//! frame parser, complete frames go to the router in arrival order. An idle
//! read timeout is keep-alive, not a disconnect — only EOF, a socket error,
//! a protocol violation, or server shutdown ends a connection.

use crate::connection::Connection;
use crate::router::{Bus, Disposition};
use bus_protocol::FrameParser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on bytes consumed from the socket per read.
const READ_CHUNK: usize = 32 * 1024;
/// Idle period after which the read loop just goes around again.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Housekeeping log cadence.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to the running bus listener.
pub struct BusServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl BusServer {
    /// Bind the bus listener and start accepting. Returns once the socket
    /// is bound; accept and read loops run on their own tasks.
    pub async fn start(bus: Arc<Bus>, bind_addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        bus.mark_listening(local_addr);
        info!(addr = %local_addr, "bus listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(
            Arc::clone(&bus),
            listener,
            shutdown_tx.clone(),
        ));
        tokio::spawn(housekeeping(bus, shutdown_rx));

        Ok(BusServer {
            local_addr,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wake every read loop; connections close and run
    /// their normal disconnect path.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Resolve once the listener has stopped, whether via
    /// [`shutdown`](Self::shutdown) or a fatal accept failure.
    pub async fn stopped(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

async fn accept_loop(bus: Arc<Bus>, listener: TcpListener, shutdown_tx: watch::Sender<bool>) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_client(
                            Arc::clone(&bus),
                            stream,
                            peer,
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed, shutting down");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
            }
        }
    }
    drop(listener);
    bus.close_all().await;
    info!("bus listener stopped");
}

async fn handle_client(
    bus: Arc<Bus>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut read_half, write_half) = stream.into_split();
    let conn = bus
        .registry()
        .insert(|id| Arc::new(Connection::new(id, peer.to_string(), write_half)))
        .await;
    info!(client_id = conn.id(), peer = %peer, "client connected");

    bus.on_connect(&conn).await;

    let mut parser = FrameParser::new();
    let mut buf = vec![0u8; READ_CHUNK];
    'read: loop {
        let read = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break 'read;
                }
                continue;
            }
            read = timeout(IDLE_TIMEOUT, read_half.read(&mut buf)) => read,
        };
        let n = match read {
            // Idle is keep-alive.
            Err(_elapsed) => continue,
            Ok(Ok(0)) => break 'read,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!(client_id = conn.id(), error = %e, "read error");
                break 'read;
            }
        };

        parser.feed(&buf[..n]);
        loop {
            match parser.try_next() {
                Ok(Some((message_id, args))) => {
                    if bus.on_frame(&conn, &message_id, args).await == Disposition::Close {
                        break 'read;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(client_id = conn.id(), error = %e, "protocol error, closing connection");
                    break 'read;
                }
            }
        }
    }

    bus.on_disconnect(&conn).await;
}

/// Log how many clients are connected, at a fixed cadence, while any are.
async fn housekeeping(bus: Arc<Bus>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let (total, identified) = bus.registry().counts().await;
                if total > 0 {
                    info!(identified, total, "clients connected");
                }
            }
        }
    }
}

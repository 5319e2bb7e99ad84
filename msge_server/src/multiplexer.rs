//! Connection multiplexer.
//!
//! The well-known port only handles handshakes. Each accepted connection is
//! given a fresh port, a sub-listener is bound there, and the client is told
//! to reconnect to it with a framed redirect. From then on every client has
//! its own socket, ring buffer and frame parser, so messages never need a
//! client id at the transport layer.
//!
//! Sub-listener ports are allocated sequentially above the handshake port
//! and are never reused for the lifetime of the multiplexer. A sub-listener
//! whose client does not reconnect within the reconnect timeout closes its
//! port and exits.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Context;
use bytes::Bytes;
use msge_shared::{
    cancel::CancelToken,
    framing::{frame, FrameParser},
    protocol::{redirect_body, ClientId, Message},
    ring_buffer::RingBuffer,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 16 * 1024;

/// Hands out sub-listener ports: handshake port + 1, + 2, ...
#[derive(Debug, Clone)]
pub struct PortAllocator {
    next: Option<u16>,
}

impl PortAllocator {
    pub fn new(handshake_port: u16) -> Self {
        Self {
            next: handshake_port.checked_add(1),
        }
    }

    /// Next unused port, or `None` once the port space is exhausted.
    pub fn allocate(&mut self) -> Option<u16> {
        let port = self.next?;
        self.next = port.checked_add(1);
        Some(port)
    }
}

/// What sub-listeners report back to the game loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The client reconnected on its dedicated port.
    Connected { client_id: ClientId, port: u16 },
    Message { client_id: ClientId, message: Message },
    Disconnected { client_id: ClientId },
}

#[derive(Clone)]
struct SessionContext {
    snapshots: watch::Receiver<Bytes>,
    inbound: mpsc::UnboundedSender<Inbound>,
    cancel: CancelToken,
    ring_capacity: usize,
    reconnect_timeout: Duration,
}

/// Server side of the transport.
pub struct Multiplexer {
    local_addr: SocketAddr,
    snapshots: watch::Sender<Bytes>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    allocated: Arc<Mutex<Vec<u16>>>,
    cancel: CancelToken,
    accept_task: Option<JoinHandle<()>>,
}

impl Multiplexer {
    /// Binds the handshake listener and starts accepting. Each redirected
    /// client has `reconnect_timeout` to reach its dedicated port.
    pub async fn bind(
        addr: SocketAddr,
        ring_capacity: usize,
        reconnect_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind handshake listener {addr}"))?;
        let local_addr = listener.local_addr()?;

        let (snapshots, snapshot_rx) = watch::channel(Bytes::new());
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let allocated = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancelToken::new();

        let ctx = SessionContext {
            snapshots: snapshot_rx,
            inbound: inbound_tx,
            cancel: cancel.clone(),
            ring_capacity,
            reconnect_timeout,
        };
        let accept_task = tokio::spawn(accept_loop(listener, local_addr, ctx, allocated.clone()));

        info!(%local_addr, "handshake listener bound");
        Ok(Self {
            local_addr,
            snapshots,
            inbound,
            allocated,
            cancel,
            accept_task: Some(accept_task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handshake_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Ports handed out so far, in allocation order.
    pub fn allocated_ports(&self) -> Vec<u16> {
        self.allocated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes a snapshot to every sub-listener. Sub-listeners that are
    /// still writing the previous one skip straight to the newest.
    pub fn broadcast(&self, snapshot: Bytes) {
        self.snapshots.send_replace(snapshot);
    }

    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.inbound.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Stops the handshake listener and every sub-listener, and waits for
    /// them to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "accept task failed");
            }
        }
        info!(addr = %self.local_addr, "multiplexer stopped");
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: SessionContext,
    allocated: Arc<Mutex<Vec<u16>>>,
) {
    let mut ports = PortAllocator::new(local_addr.port());
    let mut sessions = JoinSet::new();
    let mut next_client = 1u32;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "sub-listener task failed");
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "handshake accept failed");
                        continue;
                    }
                };

                let Some(port) = ports.allocate() else {
                    error!(%peer, "sub-listener ports exhausted, dropping handshake");
                    continue;
                };
                let sub_addr = SocketAddr::new(local_addr.ip(), port);
                let sub = match TcpListener::bind(sub_addr).await {
                    Ok(sub) => sub,
                    Err(e) => {
                        warn!(port, error = %e, "bind sub-listener failed");
                        continue;
                    }
                };

                let client_id = ClientId(next_client);
                next_client += 1;
                allocated
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(port);
                sessions.spawn(run_sub_listener(sub, client_id, port, ctx.clone()));

                if let Err(e) = send_redirect(stream, port).await {
                    warn!(%peer, port, error = %e, "redirect failed");
                } else {
                    debug!(%peer, port, ?client_id, "redirected");
                }
            }
        }
    }

    drop(listener);
    while sessions.join_next().await.is_some() {}
}

async fn send_redirect(mut stream: TcpStream, port: u16) -> anyhow::Result<()> {
    stream
        .write_all(&frame(&redirect_body(port)))
        .await
        .context("write redirect")?;
    stream.shutdown().await.context("close handshake")?;
    Ok(())
}

/// Waits for the redirected client, then serves it until either side ends.
async fn run_sub_listener(listener: TcpListener, client_id: ClientId, port: u16, ctx: SessionContext) {
    let accepted = tokio::select! {
        _ = ctx.cancel.cancelled() => return,
        accepted = tokio::time::timeout(ctx.reconnect_timeout, listener.accept()) => accepted,
    };
    let Ok(accepted) = accepted else {
        warn!(
            ?client_id,
            port,
            timeout = ?ctx.reconnect_timeout,
            "client never reconnected, closing sub-listener"
        );
        return;
    };
    // One client per port.
    drop(listener);

    let (stream, peer) = match accepted {
        Ok(conn) => conn,
        Err(e) => {
            warn!(port, error = %e, "sub-listener accept failed");
            return;
        }
    };

    info!(?client_id, port, %peer, "client session started");
    let _ = ctx.inbound.send(Inbound::Connected { client_id, port });
    if let Err(e) = serve_client(stream, client_id, &ctx).await {
        warn!(?client_id, error = %e, "client session ended with error");
    }
    let _ = ctx.inbound.send(Inbound::Disconnected { client_id });
}

async fn serve_client(stream: TcpStream, client_id: ClientId, ctx: &SessionContext) -> anyhow::Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let init = Message::Init { client_id }.encode();
    writer.write_all(&frame(&init)).await.context("send init")?;

    let ring = Arc::new(RingBuffer::new(ctx.ring_capacity));
    let mut parser = FrameParser::new(ring.clone());
    let mut snapshots = ctx.snapshots.clone();
    let current = snapshots.borrow_and_update().clone();
    if !current.is_empty() {
        write_snapshot(&mut writer, current).await?;
    }
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            changed = snapshots.changed() => {
                if changed.is_err() {
                    // Multiplexer dropped.
                    return Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                write_snapshot(&mut writer, snapshot).await?;
            }
            read = reader.read(&mut buf) => {
                let n = read.context("read client socket")?;
                if n == 0 {
                    info!(?client_id, "client disconnected");
                    return Ok(());
                }
                if let Err(e) = ring.append(&buf[..n]) {
                    error!(?client_id, error = %e, "ring buffer overflow, closing session");
                    return Err(e.into());
                }
                for body in parser.drain() {
                    match Message::decode(body) {
                        Ok(message) => {
                            let _ = ctx.inbound.send(Inbound::Message { client_id, message });
                        }
                        Err(e) => warn!(?client_id, error = %e, "undecodable client message dropped"),
                    }
                }
            }
        }
    }
}

async fn write_snapshot(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    snapshot: Bytes,
) -> anyhow::Result<()> {
    let body = Message::WorldSnapshot(snapshot).encode();
    writer.write_all(&frame(&body)).await.context("send snapshot")
}

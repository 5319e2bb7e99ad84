//! Client transport session.
//!
//! Connecting is a two-step dance: connect to the well-known port, wait (under
//! a timeout and a cancellation token) for a framed redirect naming the
//! dedicated port, drop the handshake socket and connect again to that port.
//! After that a background task appends every received byte to the session's
//! ring buffer, and the game loop pulls complete frames out of it.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use msge_shared::{
    cancel::CancelToken,
    framing::{frame, FrameParser},
    protocol::{parse_redirect, Message},
    ring_buffer::{RingBuffer, RingBufferError},
};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("no redirect received within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("handshake cancelled")]
    Cancelled,
    #[error("server closed the handshake connection before redirecting")]
    HandshakeClosed,
    #[error("session is no longer active")]
    Closed,
    #[error(transparent)]
    RingBuffer(#[from] RingBufferError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// An established, redirected connection to the server.
pub struct ClientSession {
    server_port: u16,
    writer: OwnedWriteHalf,
    parser: FrameParser,
    active: Arc<AtomicBool>,
    read_task: JoinHandle<()>,
}

impl ClientSession {
    /// Performs the redirect handshake against `addr`.
    ///
    /// Fails with [`SessionError::HandshakeTimeout`] when no redirect arrives
    /// within `timeout`, [`SessionError::Cancelled`] when `cancel` fires first,
    /// and [`SessionError::Connect`] when either socket cannot be opened.
    pub async fn connect(
        addr: SocketAddr,
        ring_capacity: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Self, SessionError> {
        let ring = Arc::new(RingBuffer::new(ring_capacity));
        let mut parser = FrameParser::new(ring.clone());

        let port = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            res = tokio::time::timeout(timeout, await_redirect(addr, &mut parser)) => match res {
                Ok(port) => port?,
                Err(_) => return Err(SessionError::HandshakeTimeout(timeout)),
            },
        };
        // Anything after the redirect on the handshake socket is meaningless.
        parser.reset();

        let dedicated = SocketAddr::new(addr.ip(), port);
        let stream = TcpStream::connect(dedicated)
            .await
            .map_err(|source| SessionError::Connect {
                addr: dedicated,
                source,
            })?;
        stream.set_nodelay(true)?;
        info!(%dedicated, "session established");

        let (reader, writer) = stream.into_split();
        let active = Arc::new(AtomicBool::new(true));
        let read_task = tokio::spawn(read_loop(reader, ring, active.clone()));

        Ok(Self {
            server_port: port,
            writer,
            parser,
            active,
            read_task,
        })
    }

    /// The dedicated port this session was redirected to.
    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// False once the server closed the socket or the ring buffer overflowed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Every complete message body buffered so far, oldest first.
    pub fn poll_messages(&mut self) -> Vec<Bytes> {
        self.parser.drain()
    }

    /// Frames and writes one message.
    pub async fn send(&mut self, message: &Message) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::Closed);
        }
        self.writer.write_all(&frame(&message.encode())).await?;
        Ok(())
    }

    /// Closes this client's socket. The server keeps running.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "shutdown after disconnect");
        }
        self.read_task.abort();
        self.active.store(false, Ordering::Release);
        info!(port = self.server_port, "disconnected");
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

async fn await_redirect(addr: SocketAddr, parser: &mut FrameParser) -> Result<u16, SessionError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| SessionError::Connect { addr, source })?;
    debug!(%addr, "handshake connected, awaiting redirect");

    let mut buf = [0u8; 1024];
    loop {
        while let Some(body) = parser.parse_message_loop() {
            if let Some(port) = parse_redirect(&body) {
                debug!(port, "redirect received");
                return Ok(port);
            }
            warn!(len = body.len(), "non-redirect frame during handshake ignored");
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(SessionError::HandshakeClosed);
        }
        parser.ring().append(&buf[..n])?;
    }
}

async fn read_loop(mut reader: OwnedReadHalf, ring: Arc<RingBuffer>, active: Arc<AtomicBool>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("server closed the session");
                break;
            }
            Ok(n) => {
                if let Err(e) = ring.append(&buf[..n]) {
                    error!(error = %e, "ring buffer overflow, closing session");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "session read failed");
                break;
            }
        }
    }
    active.store(false, Ordering::Release);
}

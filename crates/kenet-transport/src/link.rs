use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::config::LinkConfig;
use crate::framing::{read_framed, write_framed};
use crate::LinkError;

/// Listening side of the link (the Wi-Fi Direct group owner).
///
/// The listener outlives individual links so the owner can accept a new
/// peer after the previous link drops.
pub struct LinkListener {
    listener: TcpListener,
    config: LinkConfig,
}

impl LinkListener {
    pub async fn bind(config: &LinkConfig) -> Result<Self, LinkError> {
        let addr = format!("{}:{}", config.bind_host, config.port);
        let listener = TcpListener::bind(&addr).await.map_err(LinkError::Bind)?;
        tracing::info!("link listener bound on {addr}");
        Ok(Self {
            listener,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        self.listener.local_addr().map_err(LinkError::Bind)
    }

    /// Wait for the next peer and wrap its socket as a [`LinkNode`].
    pub async fn accept(&self) -> Result<LinkNode, LinkError> {
        let (stream, peer) = self.listener.accept().await.map_err(LinkError::Accept)?;
        tracing::info!("link accepted from {peer}");
        LinkNode::from_stream(stream, &self.config)
    }
}

/// One established point-to-point link.
///
/// Reads and writes go through separate halves. The write half sits behind
/// an async mutex so concurrent senders never interleave partial frames.
pub struct LinkNode {
    peer_addr: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    connected: AtomicBool,
    max_frame_size: usize,
}

impl LinkNode {
    /// Dial the group owner at `host`, using the configured port and timeout.
    pub async fn connect(host: &str, config: &LinkConfig) -> Result<Self, LinkError> {
        let addr = format!("{host}:{}", config.port);
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| LinkError::ConnectTimeout { addr: addr.clone() })?
            .map_err(|source| LinkError::Connect {
                addr: addr.clone(),
                source,
            })?;
        tracing::info!("link connected to {addr}");
        Self::from_stream(stream, config)
    }

    /// Wrap an already-connected socket.
    pub fn from_stream(stream: TcpStream, config: &LinkConfig) -> Result<Self, LinkError> {
        let peer_addr = stream.peer_addr().map_err(LinkError::Accept)?;
        // Frames are small and latency-sensitive.
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            peer_addr,
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
            connected: AtomicBool::new(true),
            max_frame_size: config.max_frame_size,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Send one frame. Concurrent callers are serialized.
    pub async fn send_frame(&self, data: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Closed);
        }
        let mut writer = self.writer.lock().await;
        let result = write_framed(&mut *writer, data, self.max_frame_size).await;
        match &result {
            Ok(()) => tracing::trace!("sent frame ({} bytes) to {}", data.len(), self.peer_addr),
            // An oversized frame never touched the socket.
            Err(LinkError::FrameTooLarge { .. }) => {}
            Err(_) => self.connected.store(false, Ordering::Release),
        }
        result
    }

    /// Receive the next frame. `Ok(None)` means the peer closed the link.
    ///
    /// Not cancellation-safe: call it from a dedicated reader task, never
    /// from one arm of a `select!`.
    pub async fn recv_frame(&self) -> Result<Option<Vec<u8>>, LinkError> {
        let mut reader = self.reader.lock().await;
        let result = read_framed(&mut *reader, self.max_frame_size).await;
        match &result {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => self.connected.store(false, Ordering::Release),
        }
        result
    }

    /// Close the write side; the peer's reader observes a clean EOF.
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.connected.store(false, Ordering::Release);
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(LinkError::Send)
    }
}

impl std::fmt::Debug for LinkNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkNode")
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

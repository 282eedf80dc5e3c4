//! Connected data channels
//!
//! A [`DataChannel`] wraps one connected TCP socket. Receiving is
//! non-blocking (`try_read` under the hood); sending goes through an
//! unbounded queue drained by a spawned writer task, so a send never blocks
//! the execution context even when the socket's write buffer is full.
//!
//! Channels are cheaply cloneable; every clone refers to the same socket.
//! The readiness multiplexer holds only the channel id, never the channel
//! itself, so dropping the last owning clone closes the connection.

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::NetError;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier for one connected channel; unique for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

/// Result of one non-blocking receive attempt
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were available
    Data(Vec<u8>),
    /// Nothing to read right now; the peer is still connected
    WouldBlock,
    /// End of stream: the peer is gone, not "zero bytes were sent"
    Closed,
}

/// One connected socket with non-blocking send/receive
#[derive(Clone)]
pub struct DataChannel {
    id: ChannelId,
    stream: Arc<TcpStream>,
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    peer: SocketAddr,
}

impl DataChannel {
    /// Wrap a connected stream, spawning its writer task
    pub fn from_stream(stream: TcpStream) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        let stream = Arc::new(stream);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(stream.clone(), writer_rx));

        Ok(Self {
            id: ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)),
            stream,
            writer_tx,
            peer,
        })
    }

    /// Identifier for this channel
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Address of the connected peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Queue bytes for sending; never blocks
    ///
    /// Fails only once the peer is known to be gone.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), NetError> {
        self.writer_tx
            .send(data.into())
            .map_err(|_| NetError::ChannelClosed)
    }

    /// Wait until the socket is readable or has hung up
    ///
    /// Production code watches channels through the readiness multiplexer;
    /// this direct form exists for protocol drivers and tests.
    pub async fn readable(&self) -> std::io::Result<()> {
        self.stream.readable().await
    }

    /// Read up to `max` bytes without blocking
    pub fn receive(&self, max: usize) -> std::io::Result<ReadOutcome> {
        let mut buf = vec![0u8; max];
        match self.stream.try_read(&mut buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                buf.truncate(n);
                trace!("channel {:?} received {} bytes", self.id, n);
                Ok(ReadOutcome::Data(buf))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Drain everything currently readable
    ///
    /// Returns the collected bytes and whether end-of-stream was reached.
    pub fn receive_available(&self, chunk: usize) -> std::io::Result<(Vec<u8>, bool)> {
        let mut collected = Vec::new();
        loop {
            match self.receive(chunk)? {
                ReadOutcome::Data(data) => collected.extend_from_slice(&data),
                ReadOutcome::WouldBlock => return Ok((collected, false)),
                ReadOutcome::Closed => return Ok((collected, true)),
            }
        }
    }

    pub(crate) fn stream(&self) -> &Arc<TcpStream> {
        &self.stream
    }
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

/// Writer task: drains the send queue into the socket
async fn run_writer(stream: Arc<TcpStream>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(buf) = rx.recv().await {
        let mut written = 0;
        while written < buf.len() {
            if stream.writable().await.is_err() {
                debug!("writer exiting: socket no longer writable");
                return;
            }
            match stream.try_write(&buf[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => {
                    warn!("write failed, dropping channel writer: {}", e);
                    return;
                }
            }
        }
    }
}

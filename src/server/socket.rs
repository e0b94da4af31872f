//! Connection sockets and the registry of live ones.

use crate::{errors::Result, http::source::ByteSource, limits::ConnLimits};
use dashmap::DashMap;
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::watch,
    time::{sleep, timeout},
};

/// A byte stream the server can talk HTTP over.
///
/// Implemented for every suitable stream: plain [`tokio::net::TcpStream`]s,
/// TLS streams that were already negotiated by the caller, in-memory pipes.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static> Transport for T {}

// REGISTRY

struct LiveEntry {
    remote: SocketAddr,
    close: watch::Sender<bool>,
}

#[derive(Default)]
struct LiveInner {
    sockets: DashMap<u64, LiveEntry>,
    next_id: AtomicU64,
}

/// Every socket the server currently has open.
///
/// Sockets register themselves when wrapped and deregister when closed or
/// dropped. Cloning is cheap and shares the registry.
#[derive(Clone, Default)]
pub struct LiveSockets {
    inner: Arc<LiveInner>,
}

impl LiveSockets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sockets.is_empty()
    }

    /// Remote addresses of the open sockets, in no particular order.
    pub fn remote_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .sockets
            .iter()
            .map(|entry| entry.value().remote)
            .collect()
    }

    /// Signals every open socket to close.
    ///
    /// Pending reads return `ConnectionAborted`; the sockets deregister as
    /// their tasks finish.
    pub fn close_all(&self) {
        for entry in self.inner.sockets.iter() {
            entry.value().close.send_replace(true);
        }
    }

    fn register(&self, remote: SocketAddr) -> (Registration, watch::Receiver<bool>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (close, closed) = watch::channel(false);

        self.inner.sockets.insert(id, LiveEntry { remote, close });
        tracing::trace!("registered socket {id} for {remote}");

        (
            Registration {
                id,
                live: self.clone(),
            },
            closed,
        )
    }
}

impl std::fmt::Debug for LiveSockets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSockets")
            .field("len", &self.len())
            .finish()
    }
}

/// Removes its socket from the registry when dropped.
struct Registration {
    id: u64,
    live: LiveSockets,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.live.inner.sockets.remove(&self.id).is_some() {
            tracing::trace!("deregistered socket {}", self.id);
        }
    }
}

// SOCKET

/// A connection's stream with buffered reads, timeouts and a close signal.
///
/// Every read that has to wait on the network races three things: the data,
/// the read timeout (`TimedOut`) and the registry's close signal
/// (`ConnectionAborted`).
pub struct SocketWrapper {
    stream: BufReader<Box<dyn Transport>>,
    remote: SocketAddr,
    read_timeout: Duration,
    write_timeout: Duration,
    closed: watch::Receiver<bool>,
    registration: Registration,
}

impl SocketWrapper {
    pub(crate) fn new<T: Transport>(
        stream: T,
        remote: SocketAddr,
        limits: &ConnLimits,
        live: &LiveSockets,
    ) -> Self {
        let (registration, closed) = live.register(remote);

        Self {
            stream: BufReader::new(Box::new(stream)),
            remote,
            read_timeout: limits.socket_read_timeout,
            write_timeout: limits.socket_write_timeout,
            closed,
            registration,
        }
    }

    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Registry id of this socket.
    #[inline]
    pub fn id(&self) -> u64 {
        self.registration.id
    }

    /// Writes all of `bytes`.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match timeout(self.write_timeout, self.stream.write_all(bytes)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout").into()),
        }
    }

    /// Writes `line` followed by CRLF.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        tracing::trace!("{} sending: {line:?}", self.remote);

        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.send(&bytes).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(self.stream.flush().await?)
    }

    /// Shuts the stream down and deregisters it.
    pub async fn close(mut self) {
        tracing::trace!("closing socket for {}", self.remote);
        let _ = timeout(self.write_timeout, self.stream.shutdown()).await;
    }

    /// Makes sure the read buffer holds data, returning `false` at the end
    /// of the stream.
    async fn fill(&mut self) -> Result<bool> {
        if !self.stream.buffer().is_empty() {
            return Ok(true);
        }

        if *self.closed.borrow() {
            return Err(aborted().into());
        }

        let Self {
            stream,
            closed,
            read_timeout,
            ..
        } = self;

        tokio::select! {
            biased;

            _ = closed.changed() => Err(aborted().into()),
            result = stream.fill_buf() => Ok(!result?.is_empty()),
            _ = sleep(*read_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout").into())
            }
        }
    }
}

#[inline]
fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed by the server")
}

impl ByteSource for SocketWrapper {
    async fn read_byte(&mut self) -> Result<Option<u8>> {
        if !self.fill().await? {
            return Ok(None);
        }

        let byte = self.stream.buffer()[0];
        self.stream.consume(1);
        Ok(Some(byte))
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || !self.fill().await? {
            return Ok(0);
        }

        let available = self.stream.buffer();
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.stream.consume(count);
        Ok(count)
    }
}

impl std::fmt::Debug for SocketWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketWrapper")
            .field("id", &self.registration.id)
            .field("remote", &self.remote)
            .finish()
    }
}

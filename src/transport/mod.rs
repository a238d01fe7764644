//! Line oriented transports.
//!
//! The protocol only needs two primitives per peer: send some bytes and
//! receive one newline terminated line within a bounded wait. Both halves are
//! traits so the servers and the clients run unchanged over TCP or over the
//! in-memory `crossbeam_channel` pairs used by the tests.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::debug;

use crate::error::{Result, TransportError};

#[cfg(test)]
mod test;

/// identifier of a requester, unique within one server run
pub type RequesterId = u32;

/// longest accepted line, terminator included
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Receiving half of a transport.
pub trait LineSource: Send {
    /// blocks until one full line arrived and returns it without its line
    /// terminator
    ///
    /// # Errors
    /// [`TransportError::Timeout`] when the bounded wait expires (bytes of a
    /// partial line are kept for the next call), [`TransportError::Closed`]
    /// when the peer is gone, [`TransportError::LineTooLong`] when
    /// [`MAX_LINE_LEN`] bytes arrived without a terminator, I/O errors
    /// otherwise
    fn receive_line(&mut self) -> Result<String>;

    /// true if bytes of an unterminated line are buffered
    fn has_partial_line(&self) -> bool;
}

/// Sending half of a transport.
pub trait LineSink: Send {
    /// writes every byte of `data`
    ///
    /// # Errors
    /// fails if the peer is unreachable
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// closes the stream, further sends fail
    fn close(&mut self);
}

/// takes one line out of `pending`, if a full one is buffered; an
/// unterminated run of [`MAX_LINE_LEN`] bytes is discarded as an error
fn take_line(pending: &mut Vec<u8>) -> Option<Result<String>> {
    let Some(end) = pending
        .iter()
        .take(MAX_LINE_LEN)
        .position(|&b: &u8| b == b'\n')
    else {
        if pending.len() >= MAX_LINE_LEN {
            pending.clear();
            return Some(Err(TransportError::LineTooLong {
                limit: MAX_LINE_LEN,
            }
            .into()));
        }
        return None;
    };
    let mut line: Vec<u8> = pending.drain(..=end).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8(line).map_err(|_| TransportError::Encoding.into()))
}

#[allow(clippy::cast_possible_truncation)]
fn timeout_error(timeout: Duration) -> TransportError {
    TransportError::Timeout {
        timeout_ms: timeout.as_millis() as u64,
    }
}

/// [`LineSource`] over a [`TcpStream`] with a read timeout.
pub struct TcpLineSource {
    reader: BufReader<TcpStream>,
    pending: Vec<u8>,
    timeout: Duration,
}

impl LineSource for TcpLineSource {
    fn receive_line(&mut self) -> Result<String> {
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return line;
            }
            let room: u64 = (MAX_LINE_LEN - self.pending.len()) as u64;
            match (&mut self.reader)
                .take(room)
                .read_until(b'\n', &mut self.pending)
            {
                Ok(0) => return Err(TransportError::Closed.into()),
                Ok(_) => {
                    let terminated: bool = self.pending.last() == Some(&b'\n');
                    if !terminated && self.pending.len() < MAX_LINE_LEN {
                        // short of the delimiter and of the limit: end of stream
                        return Err(TransportError::Closed.into());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(timeout_error(self.timeout).into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn has_partial_line(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// [`LineSink`] over a [`TcpStream`].
pub struct TcpLineSink {
    stream: TcpStream,
}

impl LineSink for TcpLineSink {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// [`LineSource`] fed by a channel, used for in-process peers.
pub struct ChannelLineSource {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    timeout: Duration,
}

impl LineSource for ChannelLineSource {
    fn receive_line(&mut self) -> Result<String> {
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return line;
            }
            match self.rx.recv_timeout(self.timeout) {
                Ok(bytes) => self.pending.extend_from_slice(&bytes),
                Err(RecvTimeoutError::Timeout) => return Err(timeout_error(self.timeout).into()),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed.into()),
            }
        }
    }

    fn has_partial_line(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// [`LineSink`] writing into a channel, closing drops the sender.
pub struct ChannelLineSink {
    tx: Option<Sender<Vec<u8>>>,
}

impl LineSink for ChannelLineSink {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let tx: &Sender<Vec<u8>> = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sink closed"))?;
        tx.send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// Both halves of a connection to one peer.
pub struct Connection {
    source: Box<dyn LineSource>,
    sink: Box<dyn LineSink>,
}

impl Connection {
    /// wraps two halves
    #[must_use]
    pub fn new(source: Box<dyn LineSource>, sink: Box<dyn LineSink>) -> Self {
        Self { source, sink }
    }

    /// wraps an accepted or connected stream, every read is bounded by
    /// `read_timeout`
    ///
    /// # Errors
    /// fails if the socket options cannot be set or the stream cannot be cloned
    pub fn tcp(stream: TcpStream, read_timeout: Duration) -> io::Result<Self> {
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_nodelay(true)?;
        let writer: TcpStream = stream.try_clone()?;
        Ok(Self::new(
            Box::new(TcpLineSource {
                reader: BufReader::new(stream),
                pending: Vec::new(),
                timeout: read_timeout,
            }),
            Box::new(TcpLineSink { stream: writer }),
        ))
    }

    /// connects to a server
    ///
    /// # Errors
    /// fails if the connection cannot be established
    pub fn connect(addr: SocketAddr, read_timeout: Duration) -> io::Result<Self> {
        let stream: TcpStream = TcpStream::connect(addr)?;
        debug!("Connected to {addr}");
        Self::tcp(stream, read_timeout)
    }

    /// sends `data` as is
    ///
    /// # Errors
    /// fails if the peer is unreachable
    pub fn send(&mut self, data: &str) -> Result<()> {
        Ok(self.sink.send(data.as_bytes())?)
    }

    /// see [`LineSource::receive_line`]
    ///
    /// # Errors
    /// see [`LineSource::receive_line`]
    pub fn receive_line(&mut self) -> Result<String> {
        self.source.receive_line()
    }

    /// closes the sending half
    pub fn close(&mut self) {
        self.sink.close();
    }

    /// splits the connection in its halves
    #[must_use]
    pub fn into_parts(self) -> (Box<dyn LineSource>, Box<dyn LineSink>) {
        (self.source, self.sink)
    }
}

/// Creates two connected in-memory endpoints.
#[must_use]
pub fn channel_pair(read_timeout: Duration) -> (Connection, Connection) {
    let (a_tx, a_rx) = crossbeam_channel::unbounded();
    let (b_tx, b_rx) = crossbeam_channel::unbounded();
    let endpoint = |rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>| -> Connection {
        Connection::new(
            Box::new(ChannelLineSource {
                rx,
                pending: Vec::new(),
                timeout: read_timeout,
            }),
            Box::new(ChannelLineSink { tx: Some(tx) }),
        )
    };
    (endpoint(a_rx, b_tx), endpoint(b_rx, a_tx))
}

/// Cloneable handle used by server threads to write to one peer.
///
/// Every write goes through one mutex so lines coming from different threads
/// (the peer's own handler, a colliding handler, the dispatcher) are never
/// interleaved.
#[derive(Clone)]
pub struct PeerHandle {
    id: RequesterId,
    sink: Arc<Mutex<Box<dyn LineSink>>>,
}

impl PeerHandle {
    /// wraps the sending half of a peer
    #[must_use]
    pub fn new(id: RequesterId, sink: Box<dyn LineSink>) -> Self {
        Self {
            id,
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// the peer id
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequesterId {
        self.id
    }

    /// runs `f` with exclusive access to the sink
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut dyn LineSink) -> R) -> R {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **sink)
    }

    /// sends `data` as is
    ///
    /// # Errors
    /// fails if the peer is unreachable
    pub fn send(&self, data: &str) -> Result<()> {
        Ok(self.with_sink(|sink: &mut dyn LineSink| sink.send(data.as_bytes()))?)
    }

    /// closes the sending half
    pub fn close(&self) {
        self.with_sink(|sink: &mut dyn LineSink| sink.close());
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::{
    error::{Error, ProtocolError, Result, TransportError},
    protocol_utils::ClientMessage,
    transport::{LineSource, RequesterId},
};

#[cfg(test)]
mod test;

/// One offset request, immutable once read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// who asked
    pub requester: RequesterId,
    /// first word wanted
    pub offset: usize,
    /// when the line was read
    pub received_at: Instant,
}

impl RequestDescriptor {
    /// a request read now
    #[must_use]
    pub fn new(requester: RequesterId, offset: usize) -> Self {
        Self {
            requester,
            offset,
            received_at: Instant::now(),
        }
    }

    /// time elapsed since the line was read
    #[inline]
    #[must_use]
    pub fn queued_for(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// A decoded line from a requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// offset request
    Request(RequestDescriptor),
    /// carrier sense probe
    Probe,
    /// line that is not part of the protocol, answered with the invalid
    /// offset marker
    Malformed(ProtocolError),
}

/// Why a [`RequestChannel`] stopped producing requests.
#[derive(Debug)]
pub enum ChannelEnd {
    /// the peer closed the connection
    Closed,
    /// a request line stalled past the read bound, the request is dropped
    Abandoned,
    /// transport failure
    Failed(Error),
}

/// Per connection reader turning request lines into [`Inbound`] values.
pub struct RequestChannel {
    requester: RequesterId,
    source: Box<dyn LineSource>,
    target_topic: String,
    received: u64,
}

impl RequestChannel {
    /// reads requests of `requester` from `source`
    #[must_use]
    pub fn new(requester: RequesterId, source: Box<dyn LineSource>) -> Self {
        Self {
            requester,
            source,
            target_topic: format!("conn[{requester}]"),
            received: 0,
        }
    }

    /// the requester this channel reads from
    #[inline]
    #[must_use]
    pub fn requester(&self) -> RequesterId {
        self.requester
    }

    /// lines decoded so far
    #[inline]
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Blocks for the next line. A requester may stay silent between
    /// requests for as long as it wants, but a request line that does not
    /// complete within the read bound abandons the connection.
    ///
    /// # Errors
    /// returns why the channel ended, the caller must not read again
    pub fn next_inbound(&mut self) -> std::result::Result<Inbound, ChannelEnd> {
        let line: String = loop {
            match self.source.receive_line() {
                Ok(line) => break line,
                Err(Error::Transport(TransportError::Closed)) => {
                    info!(target: &self.target_topic, "Peer closed the connection");
                    return Err(ChannelEnd::Closed);
                }
                Err(Error::Transport(TransportError::Timeout { timeout_ms })) => {
                    if self.source.has_partial_line() {
                        warn!(target: &self.target_topic, "Request line stalled for {timeout_ms}ms, abandoning connection");
                        return Err(ChannelEnd::Abandoned);
                    }
                    debug!(target: &self.target_topic, "Idle for {timeout_ms}ms");
                }
                Err(e) => {
                    warn!(target: &self.target_topic, "Read failed: {e}");
                    return Err(ChannelEnd::Failed(e));
                }
            }
        };
        self.received += 1;
        Ok(self.decode(&line))
    }

    fn decode(&self, line: &str) -> Inbound {
        match ClientMessage::parse(line) {
            Ok(ClientMessage::Offset(offset)) => {
                debug!(target: &self.target_topic, "Requested offset: {offset}");
                Inbound::Request(RequestDescriptor::new(self.requester, offset))
            }
            Ok(ClientMessage::Probe) => Inbound::Probe,
            Err(e) => {
                warn!(target: &self.target_topic, "{e}");
                Inbound::Malformed(e)
            }
        }
    }
}

/// convenience for handlers that only care about the transport outcome
pub(crate) fn end_to_result(end: ChannelEnd) -> Result<()> {
    match end {
        ChannelEnd::Closed | ChannelEnd::Abandoned => Ok(()),
        ChannelEnd::Failed(e) => Err(e),
    }
}

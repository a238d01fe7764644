use std::sync::Arc;

use crate::{
    corpus::WordCorpus,
    error::Result,
    protocol_utils::{encode_packet, ServerMessage},
};


/// How a streamed request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// every packet was handed to the sender
    Completed {
        /// packets sent
        packets: usize,
        /// words sent, sentinel included
        words: usize,
    },
    /// the sender refused a packet, the rest was not sent
    Aborted {
        /// packets sent before the refusal
        packets: usize,
    },
    /// the offset was out of range, the marker was sent instead
    InvalidOffset,
}

/// Cuts the corpus into the packets answering one offset request.
#[derive(Debug, Clone)]
pub struct ChunkServer {
    corpus: Arc<WordCorpus>,
    words_per_request: usize,
    words_per_packet: usize,
}

impl ChunkServer {
    /// `words_per_request` and `words_per_packet` must be positive
    #[must_use]
    pub fn new(corpus: Arc<WordCorpus>, words_per_request: usize, words_per_packet: usize) -> Self {
        debug_assert!(words_per_request > 0 && words_per_packet > 0);
        Self {
            corpus,
            words_per_request,
            words_per_packet,
        }
    }

    /// words per request (K)
    #[inline]
    #[must_use]
    pub fn words_per_request(&self) -> usize {
        self.words_per_request
    }

    /// Packet lines for a request at `offset`, `None` if the offset is past
    /// the sentinel.
    ///
    /// The range is `offset..offset + K` clipped at the sentinel, which is the
    /// last entry of the corpus, so a reached sentinel is always the last word
    /// of the last packet.
    pub fn packets(&self, offset: usize) -> Option<impl Iterator<Item = String> + '_> {
        if !self.corpus.is_valid_offset(offset) {
            return None;
        }
        let end: usize = offset
            .saturating_add(self.words_per_request)
            .min(self.corpus.len());
        Some(
            self.corpus.words()[offset..end]
                .chunks(self.words_per_packet)
                .map(encode_packet),
        )
    }

    /// every line answering a request at `offset`, the invalid offset marker
    /// included
    #[must_use]
    pub fn serve(&self, offset: usize) -> Vec<String> {
        match self.packets(offset) {
            Some(packets) => packets.collect(),
            None => vec![ServerMessage::InvalidOffset.encode()],
        }
    }

    /// Streams the answer to `offset` through `send`, stopping at the first
    /// packet `send` refuses (returns `false`). The second argument of `send`
    /// tells whether the line is the last one of the answer.
    ///
    /// # Errors
    /// propagates the errors of `send`
    pub fn stream(
        &self,
        offset: usize,
        mut send: impl FnMut(&str, bool) -> Result<bool>,
    ) -> Result<StreamOutcome> {
        let Some(packets) = self.packets(offset) else {
            send(&ServerMessage::InvalidOffset.encode(), true)?;
            return Ok(StreamOutcome::InvalidOffset);
        };
        let mut packets = packets.peekable();
        let mut sent: usize = 0;
        let mut words: usize = 0;
        while let Some(packet) = packets.next() {
            let last: bool = packets.peek().is_none();
            if !send(&packet, last)? {
                return Ok(StreamOutcome::Aborted { packets: sent });
            }
            sent += 1;
            words += packet.matches(',').count() + 1;
        }
        Ok(StreamOutcome::Completed {
            packets: sent,
            words,
        })
    }
}

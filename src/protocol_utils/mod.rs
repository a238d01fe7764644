use itertools::Itertools;

use crate::{corpus::is_sentinel, error::ProtocolError};


/// reply to an offset past the end of the corpus
pub const INVALID_OFFSET: &str = "$$";
/// collision signal, sent to every requester involved in a collision
pub const COLLISION: &str = "HUH!";
/// probe reply, the serving path is taken
pub const BUSY: &str = "BUSY";
/// probe reply, the serving path is free
pub const IDLE: &str = "IDLE";
/// carrier sense probe sent by requesters
pub const PROBE: &str = "BUSY?";
/// separator of the words inside a packet
pub const WORD_DELIMITER: char = ',';

/// A line sent by a requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// request for the words starting at the given offset
    Offset(usize),
    /// asks whether the serving path is busy
    Probe,
}

impl ClientMessage {
    /// decodes a line, the trailing newline (if any) is ignored
    ///
    /// # Errors
    /// returns [`ProtocolError::BadRequest`] for anything that is neither a
    /// probe nor a plain ASCII decimal offset (no sign, no blanks, fits a
    /// `usize`)
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line: &str = line.trim_end_matches(['\n', '\r']);
        if line == PROBE {
            return Ok(Self::Probe);
        }
        if line.is_empty() || !line.bytes().all(|b: u8| b.is_ascii_digit()) {
            return Err(ProtocolError::BadRequest(line.to_owned()));
        }
        line.parse::<usize>()
            .map(Self::Offset)
            .map_err(|_| ProtocolError::BadRequest(line.to_owned()))
    }

    /// wire form, newline included
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Offset(offset) => format!("{offset}\n"),
            Self::Probe => format!("{PROBE}\n"),
        }
    }
}

/// A line sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// `$$`
    InvalidOffset,
    /// probe reply, serving path taken
    Busy,
    /// probe reply, serving path free
    Idle,
    /// `HUH!`
    Collision,
    /// a group of words
    Packet(Vec<String>),
}

impl ServerMessage {
    /// decodes a line, the trailing newline (if any) is ignored
    ///
    /// # Errors
    /// returns [`ProtocolError::BadReply`] for an empty line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line: &str = line.trim_end_matches(['\n', '\r']);
        match line {
            INVALID_OFFSET => Ok(Self::InvalidOffset),
            BUSY => Ok(Self::Busy),
            IDLE => Ok(Self::Idle),
            COLLISION => Ok(Self::Collision),
            "" => Err(ProtocolError::BadReply(line.to_owned())),
            _ => Ok(Self::Packet(
                line.split(WORD_DELIMITER)
                    .map(str::trim)
                    .filter(|w: &&str| !w.is_empty())
                    .map(str::to_owned)
                    .collect(),
            )),
        }
    }

    /// wire form, newline included
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::InvalidOffset => format!("{INVALID_OFFSET}\n"),
            Self::Busy => format!("{BUSY}\n"),
            Self::Idle => format!("{IDLE}\n"),
            Self::Collision => format!("{COLLISION}\n"),
            Self::Packet(words) => encode_packet(words),
        }
    }
}

/// Joins words into one packet line: no trailing delimiter, exactly one
/// trailing newline.
///
/// ```
/// # use ap2024_unitn_cppenjoyers_wordservers::protocol_utils::encode_packet;
/// # fn main() {
/// assert_eq!(encode_packet(&["the", "quick"]), "the,quick\n");
/// # }
/// ```
#[must_use]
pub fn encode_packet<S: AsRef<str>>(words: &[S]) -> String {
    let mut line: String = words.iter().map(AsRef::as_ref).join(",");
    line.push('\n');
    line
}

/// true if the packet ends the corpus, i.e. its last word is the sentinel
#[inline]
#[must_use]
pub fn ends_corpus(words: &[String]) -> bool {
    words.last().is_some_and(|w: &String| is_sentinel(w))
}

//! Requester side transmission policies.
//!
//! Every call to [`ContentionArbiter::attempt_transfer`] is one decision of
//! the policy: it may transmit one offset request and read its answer, or
//! decide not to transmit and wait instead. Time comes from a [`Clock`] so
//! slot gating and backoff can be driven by hand in tests.

use std::{
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    config::{ArbitrationPolicy, Config},
    corpus::is_sentinel,
    error::{Error, ProtocolError, Result},
    protocol_utils::{ends_corpus, ClientMessage, ServerMessage},
    transport::{Connection, RequesterId},
};


/// largest backoff exponent, the window stops growing at 1023 slots
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Source of time for the arbiter.
pub trait Clock {
    /// milliseconds since the UNIX epoch
    fn now_ms(&self) -> u64;
    /// blocks the requester for `ms` milliseconds
    fn sleep_ms(&self, ms: u64);
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d: Duration| d.as_millis() as u64)
    }

    fn sleep_ms(&self, ms: u64) {
        if ms > 0 {
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// Per requester progress, owned by its requester.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequesterState {
    /// next word index to request
    pub offset: usize,
    /// consecutive collisions of the current offset
    pub attempt_count: u32,
    /// clock reading of the last transmission
    pub last_attempt_time: Option<u64>,
}

/// Words received for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// the words, sentinel excluded
    pub words: Vec<String>,
    /// the sentinel or the invalid offset marker was received
    pub reached_end: bool,
}

/// Answer to one offset request as read by the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// the request was served
    Chunk(Chunk),
    /// `HUH!`, whatever arrived before it is discarded
    Collision,
}

/// Reads the answer to one offset request: packets until `words_per_request`
/// words, the sentinel or the invalid offset marker, or a collision.
///
/// # Errors
/// transport failures, and replies that cannot answer an offset request
pub fn receive_answer(conn: &mut Connection, words_per_request: usize) -> Result<Answer> {
    let mut chunk: Chunk = Chunk::default();
    let mut received: usize = 0;
    while received < words_per_request {
        let line: String = conn.receive_line()?;
        match ServerMessage::parse(&line)? {
            ServerMessage::Collision => return Ok(Answer::Collision),
            ServerMessage::InvalidOffset => {
                chunk.reached_end = true;
                break;
            }
            ServerMessage::Packet(words) => {
                received += words.len();
                let last: bool = ends_corpus(&words);
                chunk
                    .words
                    .extend(words.into_iter().filter(|w: &String| !is_sentinel(w)));
                if last {
                    chunk.reached_end = true;
                    break;
                }
            }
            ServerMessage::Busy | ServerMessage::Idle => {
                return Err(ProtocolError::BadReply(line).into())
            }
        }
    }
    Ok(Answer::Chunk(chunk))
}

/// Result of one arbitration step.
#[derive(Debug)]
pub enum TransferOutcome {
    /// the chunk arrived without collision, the offset has advanced
    Success(Chunk),
    /// the request collided, the offset is unchanged
    Collision,
    /// the carrier sense probe found the server busy
    Busy,
    /// the policy decided not to transmit yet
    Deferred,
    /// the requester must stop
    Fatal(Error),
}

/// Tunables of a [`ContentionArbiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterSettings {
    /// transmission policy
    pub policy: ArbitrationPolicy,
    /// number of competing requesters, ALOHA transmits with probability 1/n
    pub num_requesters: u32,
    /// slot length in milliseconds
    pub slot_ms: u64,
    /// colliding attempts tolerated by backoff
    pub max_attempts: u32,
    /// words per request (K)
    pub words_per_request: usize,
}

impl ArbiterSettings {
    /// settings described by `config`
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.arbitration,
            num_requesters: u32::try_from(config.num_clients).unwrap_or(u32::MAX),
            slot_ms: config.slot_ms,
            max_attempts: config.max_attempts,
            words_per_request: config.words_per_request,
        }
    }
}

/// Decides when a requester transmits and how it reacts to collisions.
#[derive(Debug)]
pub struct ContentionArbiter<C: Clock = SystemClock> {
    settings: ArbiterSettings,
    rng: ChaCha8Rng,
    clock: C,
    transmissions: u64,
    target_topic: String,
}

impl<C: Clock> ContentionArbiter<C> {
    /// arbiter of `requester`, backoff draws come from `seed`
    #[must_use]
    pub fn new(requester: RequesterId, settings: ArbiterSettings, seed: u64, clock: C) -> Self {
        Self {
            settings,
            rng: ChaCha8Rng::seed_from_u64(seed),
            clock,
            transmissions: 0,
            target_topic: format!("client[{requester}]"),
        }
    }

    /// offset requests sent so far
    #[inline]
    #[must_use]
    pub fn transmissions(&self) -> u64 {
        self.transmissions
    }

    /// the clock
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// One arbitration step for `state` over `conn`. On success the offset
    /// advances by K and the attempt counter is reset.
    pub fn attempt_transfer(
        &mut self,
        state: &mut RequesterState,
        conn: &mut Connection,
    ) -> TransferOutcome {
        let outcome: TransferOutcome = match self.settings.policy {
            ArbitrationPolicy::Direct => self.transmit(state, conn),
            ArbitrationPolicy::SlottedAloha => self.slotted_aloha(state, conn),
            ArbitrationPolicy::Beb => self.backoff_attempt(state, conn),
            ArbitrationPolicy::SensingBeb => self.sensing_attempt(state, conn),
        };
        if let TransferOutcome::Success(chunk) = &outcome {
            state.offset = state.offset.saturating_add(self.settings.words_per_request);
            state.attempt_count = 0;
            debug!(target: &self.target_topic, "Received {} words, next offset {}", chunk.words.len(), state.offset);
        }
        outcome
    }

    /// sends the current offset and reads its answer
    fn transmit(&mut self, state: &mut RequesterState, conn: &mut Connection) -> TransferOutcome {
        state.last_attempt_time = Some(self.clock.now_ms());
        self.transmissions += 1;
        let answer: Result<Answer> = conn
            .send(&ClientMessage::Offset(state.offset).encode())
            .and_then(|()| receive_answer(conn, self.settings.words_per_request));
        match answer {
            Ok(Answer::Chunk(chunk)) => TransferOutcome::Success(chunk),
            Ok(Answer::Collision) => {
                debug!(target: &self.target_topic, "Collision on offset {}", state.offset);
                TransferOutcome::Collision
            }
            Err(e) => TransferOutcome::Fatal(e),
        }
    }

    /// Transmits only on an exact slot boundary, with probability 1/n and at
    /// most once per boundary. Otherwise sleeps towards the next boundary.
    fn slotted_aloha(&mut self, state: &mut RequesterState, conn: &mut Connection) -> TransferOutcome {
        let slot: u64 = self.settings.slot_ms.max(1);
        let now: u64 = self.clock.now_ms();
        let into_slot: u64 = now % slot;
        if into_slot != 0 {
            // poll the last millisecond so the boundary itself is observed
            self.clock.sleep_ms((slot - into_slot).saturating_sub(1).max(1));
            return TransferOutcome::Deferred;
        }
        if state.last_attempt_time == Some(now) {
            self.clock.sleep_ms(1);
            return TransferOutcome::Deferred;
        }
        let draw: u32 = self.rng.gen_range(1..=self.settings.num_requesters.max(1));
        if draw != 1 {
            self.clock.sleep_ms(1);
            return TransferOutcome::Deferred;
        }
        self.transmit(state, conn)
    }

    /// transmits at once, backs off on collision
    fn backoff_attempt(&mut self, state: &mut RequesterState, conn: &mut Connection) -> TransferOutcome {
        let outcome: TransferOutcome = self.transmit(state, conn);
        if !matches!(outcome, TransferOutcome::Collision) {
            return outcome;
        }
        state.attempt_count += 1;
        if state.attempt_count > self.settings.max_attempts {
            warn!(target: &self.target_topic, "Offset {} collided {} times, giving up", state.offset, state.attempt_count);
            return TransferOutcome::Fatal(Error::StarvationBound {
                attempts: state.attempt_count,
            });
        }
        let slots: u64 = self.draw_backoff_slots(state.attempt_count);
        let wait: u64 = slots.saturating_mul(self.settings.slot_ms);
        info!(target: &self.target_topic, "Attempt {} collided, backing off {wait}ms", state.attempt_count);
        self.clock.sleep_ms(wait);
        TransferOutcome::Collision
    }

    /// probes the server, transmits with backoff only when it is idle
    fn sensing_attempt(&mut self, state: &mut RequesterState, conn: &mut Connection) -> TransferOutcome {
        let reply: Result<ServerMessage> = conn
            .send(&ClientMessage::Probe.encode())
            .and_then(|()| conn.receive_line())
            .and_then(|line: String| ServerMessage::parse(&line).map_err(Error::from));
        match reply {
            Ok(ServerMessage::Busy) => {
                debug!(target: &self.target_topic, "Server busy, waiting one slot");
                self.clock.sleep_ms(self.settings.slot_ms);
                TransferOutcome::Busy
            }
            Ok(ServerMessage::Idle) => self.backoff_attempt(state, conn),
            Ok(other) => TransferOutcome::Fatal(
                ProtocolError::BadReply(other.encode().trim_end().to_owned()).into(),
            ),
            Err(e) => TransferOutcome::Fatal(e),
        }
    }

    /// uniform draw in `[0, 2^min(attempt, 10) - 1]`
    fn draw_backoff_slots(&mut self, attempt: u32) -> u64 {
        self.rng.gen_range(0..=backoff_window(attempt))
    }
}

/// largest backoff, in slots, after `attempt` consecutive collisions
#[inline]
#[must_use]
pub fn backoff_window(attempt: u32) -> u64 {
    (1u64 << attempt.min(MAX_BACKOFF_EXPONENT)) - 1
}

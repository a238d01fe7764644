//! Requesters: the retrieval loop driven by a [`ContentionArbiter`], the
//! pipelined requester and the launcher running several of them.

use std::{
    collections::VecDeque,
    thread,
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::{error, info, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    protocol_utils::ClientMessage,
    transport::{Connection, RequesterId},
};

pub mod arbiter;
/// Word frequencies and their output files
pub mod tally;


use arbiter::{
    receive_answer, Answer, ArbiterSettings, Clock, ContentionArbiter, RequesterState, SystemClock,
    TransferOutcome,
};
use tally::WordTally;

/// What one requester retrieved and how hard it was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalReport {
    /// the requester
    pub requester: RequesterId,
    /// words received, sentinel excluded
    pub words: u64,
    /// offset requests sent
    pub attempts: u64,
    /// requests that ended in `HUH!`
    pub collisions: u64,
    /// probes answered BUSY
    pub busy: u64,
    /// time spent retrieving
    pub elapsed: Duration,
    /// word frequencies
    pub tally: WordTally,
}

/// A requester retrieving the whole corpus one chunk at a time.
pub struct Requester<C: Clock = SystemClock> {
    id: RequesterId,
    conn: Connection,
    arbiter: ContentionArbiter<C>,
    state: RequesterState,
    target_topic: String,
}

impl<C: Clock> Requester<C> {
    /// requester `id` talking to the server over `conn`
    #[must_use]
    pub fn new(id: RequesterId, conn: Connection, arbiter: ContentionArbiter<C>) -> Self {
        Self {
            id,
            conn,
            arbiter,
            state: RequesterState::default(),
            target_topic: format!("client[{id}]"),
        }
    }

    /// Requests chunks until the end of the corpus.
    ///
    /// # Errors
    /// transport failures, protocol violations and the backoff starvation
    /// bound end the retrieval
    pub fn run(mut self) -> Result<RetrievalReport> {
        let start: Instant = Instant::now();
        let mut report: RetrievalReport = RetrievalReport {
            requester: self.id,
            ..RetrievalReport::default()
        };
        loop {
            match self.arbiter.attempt_transfer(&mut self.state, &mut self.conn) {
                TransferOutcome::Success(chunk) => {
                    report.words += chunk.words.len() as u64;
                    report.tally.add_all(&chunk.words);
                    if chunk.reached_end {
                        break;
                    }
                }
                TransferOutcome::Collision => report.collisions += 1,
                TransferOutcome::Busy => report.busy += 1,
                TransferOutcome::Deferred => {}
                TransferOutcome::Fatal(e) => {
                    error!(target: &self.target_topic, "Retrieval stopped at offset {}: {e}", self.state.offset);
                    self.conn.close();
                    return Err(e);
                }
            }
        }
        self.conn.close();
        report.attempts = self.arbiter.transmissions();
        report.elapsed = start.elapsed();
        info!(
            target: &self.target_topic,
            "Retrieved {} words in {:?} ({} attempts, {} collisions)",
            report.words, report.elapsed, report.attempts, report.collisions
        );
        Ok(report)
    }
}

/// Greedy requester: sends `burst` consecutive offset requests before
/// reading any answer. Requests answered with `HUH!` are sent again at the
/// head of the next burst.
///
/// # Errors
/// transport failures and protocol violations
pub fn run_pipelined(
    id: RequesterId,
    mut conn: Connection,
    words_per_request: usize,
    burst: usize,
) -> Result<RetrievalReport> {
    let target_topic: String = format!("client[{id}]");
    let start: Instant = Instant::now();
    let mut report: RetrievalReport = RetrievalReport {
        requester: id,
        ..RetrievalReport::default()
    };
    let mut retry: VecDeque<usize> = VecDeque::new();
    let mut next_offset: usize = 0;
    let mut end_seen: bool = false;

    while !(end_seen && retry.is_empty()) {
        let mut offsets: Vec<usize> = retry.drain(..).collect();
        while !end_seen && offsets.len() < burst.max(1) {
            offsets.push(next_offset);
            next_offset = next_offset.saturating_add(words_per_request);
        }
        let requests: String = offsets
            .iter()
            .map(|&o: &usize| ClientMessage::Offset(o).encode())
            .join("");
        conn.send(&requests)?;
        report.attempts += offsets.len() as u64;

        for offset in offsets {
            match receive_answer(&mut conn, words_per_request)? {
                Answer::Chunk(chunk) => {
                    report.words += chunk.words.len() as u64;
                    report.tally.add_all(&chunk.words);
                    end_seen |= chunk.reached_end;
                }
                Answer::Collision => {
                    report.collisions += 1;
                    retry.push_back(offset);
                }
            }
        }
    }
    conn.close();
    report.elapsed = start.elapsed();
    info!(
        target: &target_topic,
        "Pipelined retrieval of {} words in {:?} ({} requests, {} collisions)",
        report.words, report.elapsed, report.attempts, report.collisions
    );
    Ok(report)
}

/// Result of [`run_clients`].
#[derive(Debug, Default)]
pub struct LaunchSummary {
    /// reports of the requesters that finished, by id
    pub reports: Vec<RetrievalReport>,
    /// requesters that stopped with an error
    pub failures: Vec<(RequesterId, Error)>,
}

fn requester_seed(config: &Config, id: RequesterId) -> u64 {
    config
        .seed
        .unwrap_or_else(|| SystemClock.now_ms())
        .wrapping_add(u64::from(id))
}

fn run_one(config: &Config, id: RequesterId) -> Result<RetrievalReport> {
    let conn: Connection = Connection::connect(config.socket_addr()?, config.read_timeout())?;
    let pipelined: bool = usize::try_from(id).is_ok_and(|i: usize| i <= config.rogue_clients);
    let report: RetrievalReport = if pipelined {
        info!(target: &format!("client[{id}]"), "Starting pipelined requester");
        run_pipelined(id, conn, config.words_per_request, config.rogue_burst)?
    } else {
        let arbiter: ContentionArbiter = ContentionArbiter::new(
            id,
            ArbiterSettings::from_config(config),
            requester_seed(config, id),
            SystemClock,
        );
        Requester::new(id, conn, arbiter).run()?
    };
    report.tally.write(&config.output_prefix, id)?;
    Ok(report)
}

/// Runs `num_clients` requesters (ids `1..=num_clients`, the first
/// `rogue_clients` pipelined) on their own threads and writes their
/// frequency files.
#[must_use]
pub fn run_clients(config: &Config) -> LaunchSummary {
    let mut summary: LaunchSummary = LaunchSummary::default();
    let last: RequesterId = RequesterId::try_from(config.num_clients).unwrap_or(RequesterId::MAX);
    thread::scope(|s| {
        let handles: Vec<(RequesterId, thread::ScopedJoinHandle<'_, Result<RetrievalReport>>)> =
            (1..=last)
                .map(|id: RequesterId| (id, s.spawn(move || run_one(config, id))))
                .collect();
        for (id, handle) in handles {
            match handle.join() {
                Ok(Ok(report)) => summary.reports.push(report),
                Ok(Err(e)) => {
                    warn!("Requester {id} failed: {e}");
                    summary.failures.push((id, e));
                }
                Err(_) => error!("Requester {id} panicked"),
            }
        }
    });
    summary
}

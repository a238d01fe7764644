//! Per connection handlers, one thread each.
//!
//! In contention mode the handler arbitrates and streams by itself through
//! the shared [`ResourceLock`]. In scheduling mode it only reads and hands
//! every request to the [`FairScheduler`], the dispatcher does the writing.

use log::{debug, info, warn};

use crate::{
    error::Result,
    protocol_utils::ServerMessage,
    transport::PeerHandle,
};

use super::{
    chunking::{ChunkServer, StreamOutcome},
    requests_handling::{end_to_result, Inbound, RequestChannel, RequestDescriptor},
    resource_lock::{ClaimOutcome, ResourceLock, Status},
    scheduling::{Admission, FairScheduler, Job},
};


/// Counters of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// offset requests read
    pub requests: u64,
    /// requests answered in full (invalid offsets included), or queued in
    /// scheduling mode
    pub served: u64,
    /// claims of this requester that collided
    pub collisions: u64,
    /// probes answered
    pub probes: u64,
}

/// Serves one requester in contention mode until it disconnects.
///
/// # Errors
/// fails if the requester cannot be written to or its stream breaks
pub fn handle_contention(
    mut channel: RequestChannel,
    peer: &PeerHandle,
    lock: &ResourceLock,
    chunks: &ChunkServer,
) -> Result<ConnectionStats> {
    let target_topic: String = format!("conn[{}]", peer.id());
    let mut stats: ConnectionStats = ConnectionStats::default();
    let result: Result<()> = loop {
        let inbound: Inbound = match channel.next_inbound() {
            Ok(inbound) => inbound,
            Err(end) => break end_to_result(end),
        };
        let handled: Result<()> = match inbound {
            Inbound::Probe => {
                stats.probes += 1;
                let status: Status = lock.probe();
                debug!(target: &target_topic, "Probe answered {status:?}");
                peer.send(&status.reply().encode())
            }
            Inbound::Malformed(_) => peer.send(&ServerMessage::InvalidOffset.encode()),
            Inbound::Request(request) => {
                stats.requests += 1;
                serve_claim(&target_topic, &request, peer, lock, chunks, &mut stats)
            }
        };
        if let Err(e) = handled {
            break Err(e);
        }
    };
    peer.close();
    info!(target: &target_topic, "Connection closed: {stats:?}");
    result.map(|()| stats)
}

fn serve_claim(
    target_topic: &str,
    request: &RequestDescriptor,
    peer: &PeerHandle,
    lock: &ResourceLock,
    chunks: &ChunkServer,
    stats: &mut ConnectionStats,
) -> Result<()> {
    match lock.try_claim(peer) {
        ClaimOutcome::Granted(grant) => {
            let outcome: StreamOutcome =
                chunks.stream(request.offset, |line: &str, last: bool| grant.send(line, last))?;
            match outcome {
                StreamOutcome::Aborted { packets } => {
                    info!(target: target_topic, "Transfer of offset {} aborted after {packets} packets", request.offset);
                    stats.collisions += 1;
                }
                StreamOutcome::Completed { .. } | StreamOutcome::InvalidOffset => {
                    debug!(target: target_topic, "Offset {} served: {outcome:?}", request.offset);
                    stats.served += 1;
                }
            }
        }
        ClaimOutcome::Collision { victim } => {
            info!(target: target_topic, "Claim for offset {} collided with {victim:?}", request.offset);
            stats.collisions += 1;
        }
    }
    Ok(())
}

/// Reads the requests of one requester in scheduling mode and queues them.
///
/// Malformed lines are queued as invalid offsets, so their `$$` is written
/// by the dispatcher in order with the other answers. The connection is not
/// closed here: queued answers still go out through `peer`.
///
/// # Errors
/// fails if the requester cannot be written to or its stream breaks
pub fn handle_scheduled(
    mut channel: RequestChannel,
    peer: &PeerHandle,
    scheduler: &FairScheduler,
) -> Result<ConnectionStats> {
    let target_topic: String = format!("conn[{}]", peer.id());
    let mut stats: ConnectionStats = ConnectionStats::default();
    scheduler.register(peer.id());
    let result: Result<()> = loop {
        let request: RequestDescriptor = match channel.next_inbound() {
            Ok(Inbound::Request(request)) => {
                stats.requests += 1;
                request
            }
            Ok(Inbound::Malformed(_)) => RequestDescriptor::new(peer.id(), usize::MAX),
            Ok(Inbound::Probe) => {
                stats.probes += 1;
                if let Err(e) = peer.send(&Status::Idle.reply().encode()) {
                    break Err(e);
                }
                continue;
            }
            Err(end) => break end_to_result(end),
        };
        let job: Job = Job {
            request,
            peer: peer.clone(),
        };
        if scheduler.enqueue(job) == Admission::DrainComplete {
            warn!(target: &target_topic, "Scheduler is draining, dropping offset {}", request.offset);
            break Ok(());
        }
        stats.served += 1;
    };
    scheduler.deregister(peer.id());
    info!(target: &target_topic, "Connection closed: {stats:?}");
    result.map(|()| stats)
}

//! Single-holder gate over the serving path, contention mode.
//!
//! ```text
//!   IDLE --[try_claim wins]--> BUSY --[grant dropped | collision]--> IDLE
//! ```
//!
//! A claim is only attempted with a non blocking lock. A claim that finds the
//! path BUSY, or cannot even take the state lock, is a collision: both the
//! claimant and the current holder receive `HUH!` and the state goes back to
//! IDLE. The holder learns about the abort through its transfer flag, which
//! is only ever flipped while the holder's sink is locked, so a `HUH!` can
//! never follow the last packet of a completed transfer.
//!
//! The flag is flipped after the state lock is released. Until the evicted
//! holder's sink is free, the path may already be granted to a third claimant
//! while the evicted holder keeps writing packets. Those packets are always
//! followed by its `HUH!`, so the evicted requester discards them, and every
//! peer has its own sink so the two transfers never share a stream.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, TryLockError,
    },
    time::Instant,
};

use log::{debug, warn};

use crate::{
    error::Result,
    protocol_utils::ServerMessage,
    transport::{LineSink, PeerHandle, RequesterId},
};

#[cfg(test)]
mod test;

const ACTIVE: u8 = 0;
const FINISHED: u8 = 1;
const ABORTED: u8 = 2;

/// Occupancy of the serving path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// free
    Idle,
    /// one requester is being served
    Busy,
}

impl Status {
    /// probe reply for this status
    #[must_use]
    pub fn reply(self) -> ServerMessage {
        match self {
            Self::Idle => ServerMessage::Idle,
            Self::Busy => ServerMessage::Busy,
        }
    }
}

#[derive(Debug)]
struct Holder {
    peer: PeerHandle,
    transfer: Arc<AtomicU8>,
    episode: u64,
}

/// holder is set iff the path is BUSY
#[derive(Debug, Default)]
struct ResourceState {
    holder: Option<Holder>,
    claim_started: Option<Instant>,
    last_collision: Option<Instant>,
    episode: u64,
    grants: u64,
    collisions: u64,
}

/// Point in time copy of the lock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// occupancy
    pub status: Status,
    /// current holder, set iff `status` is BUSY
    pub holder: Option<RequesterId>,
    /// when the current holder won its claim
    pub claim_started: Option<Instant>,
    /// when the last collision was detected
    pub last_collision: Option<Instant>,
    /// claims won so far
    pub grants: u64,
    /// collisions detected so far
    pub collisions: u64,
}

/// Result of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome<'a> {
    /// exclusive access, released when the grant is dropped
    Granted(Grant<'a>),
    /// the claim collided, `HUH!` was already sent to everybody involved
    Collision {
        /// the holder that lost its in-flight transfer, if any
        victim: Option<RequesterId>,
    },
}

/// The serving path arbiter.
#[derive(Debug, Default)]
pub struct ResourceLock {
    state: Mutex<ResourceState>,
}

impl ResourceLock {
    /// creates an IDLE lock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tries to take the serving path for `peer`.
    ///
    /// On collision the collider and the in-flight holder are sent `HUH!`
    /// after the state lock has been released.
    pub fn try_claim(&self, peer: &PeerHandle) -> ClaimOutcome<'_> {
        let victim: Option<Holder> = match self.state.try_lock() {
            Ok(mut state) => {
                if state.holder.is_none() {
                    return ClaimOutcome::Granted(Self::grant(self, &mut state, peer));
                }
                Self::collide(&mut state)
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                let mut state: MutexGuard<'_, ResourceState> = poisoned.into_inner();
                if state.holder.is_none() {
                    return ClaimOutcome::Granted(Self::grant(self, &mut state, peer));
                }
                Self::collide(&mut state)
            }
            Err(TryLockError::WouldBlock) => Self::collide(&mut self.lock_state()),
        };

        let victim_id: Option<RequesterId> = victim.as_ref().map(|h: &Holder| h.peer.id());
        warn!("Collision: requester {} hit holder {victim_id:?}", peer.id());
        if let Err(e) = peer.send(&ServerMessage::Collision.encode()) {
            warn!("Cannot signal collision to requester {}: {e}", peer.id());
        }
        if let Some(holder) = victim.filter(|h: &Holder| h.peer.id() != peer.id()) {
            Self::abort_holder(&holder);
        }
        ClaimOutcome::Collision { victim: victim_id }
    }

    fn grant<'a>(
        lock: &'a ResourceLock,
        state: &mut ResourceState,
        peer: &PeerHandle,
    ) -> Grant<'a> {
        state.episode += 1;
        state.grants += 1;
        state.claim_started = Some(Instant::now());
        let transfer: Arc<AtomicU8> = Arc::new(AtomicU8::new(ACTIVE));
        state.holder = Some(Holder {
            peer: peer.clone(),
            transfer: Arc::clone(&transfer),
            episode: state.episode,
        });
        debug!("Requester {} holds the serving path (episode {})", peer.id(), state.episode);
        Grant {
            lock,
            peer: peer.clone(),
            transfer,
            episode: state.episode,
        }
    }

    /// records the collision and resets to IDLE, returning the evicted holder
    fn collide(state: &mut ResourceState) -> Option<Holder> {
        state.last_collision = Some(Instant::now());
        state.collisions += 1;
        state.claim_started = None;
        state.holder.take()
    }

    fn abort_holder(holder: &Holder) {
        let signalled: std::io::Result<bool> = holder.peer.with_sink(|sink: &mut dyn LineSink| {
            if holder
                .transfer
                .compare_exchange(ACTIVE, ABORTED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // the transfer already completed, the holder is only releasing
                return Ok(false);
            }
            sink.send(ServerMessage::Collision.encode().as_bytes())?;
            Ok(true)
        });
        match signalled {
            Ok(true) => debug!("Aborted transfer of requester {}", holder.peer.id()),
            Ok(false) => {}
            Err(e) => warn!("Cannot signal collision to holder {}: {e}", holder.peer.id()),
        }
    }

    /// Status as seen by a carrier sense probe. A state lock that cannot be
    /// taken right away counts as BUSY.
    #[must_use]
    pub fn probe(&self) -> Status {
        match self.state.try_lock() {
            Ok(state) if state.holder.is_none() => Status::Idle,
            Err(TryLockError::Poisoned(p)) if p.get_ref().holder.is_none() => Status::Idle,
            _ => Status::Busy,
        }
    }

    /// copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> ResourceSnapshot {
        let state: MutexGuard<'_, ResourceState> = self.lock_state();
        ResourceSnapshot {
            status: if state.holder.is_some() {
                Status::Busy
            } else {
                Status::Idle
            },
            holder: state.holder.as_ref().map(|h: &Holder| h.peer.id()),
            claim_started: state.claim_started,
            last_collision: state.last_collision,
            grants: state.grants,
            collisions: state.collisions,
        }
    }

    fn release(&self, episode: u64) {
        let mut state: MutexGuard<'_, ResourceState> = self.lock_state();
        if state.holder.as_ref().is_some_and(|h: &Holder| h.episode == episode) {
            state.holder = None;
            state.claim_started = None;
        }
    }
}

/// Exclusive access to the serving path, released on drop.
#[derive(Debug)]
pub struct Grant<'a> {
    lock: &'a ResourceLock,
    peer: PeerHandle,
    transfer: Arc<AtomicU8>,
    episode: u64,
}

impl Grant<'_> {
    /// Sends one line of the transfer unless a collision aborted it.
    /// Sending the `last` line completes the transfer, after which a
    /// collision no longer reaches this holder.
    ///
    /// # Errors
    /// fails if the peer is unreachable
    pub fn send(&self, line: &str, last: bool) -> Result<bool> {
        let sent: std::io::Result<bool> = self.peer.with_sink(|sink: &mut dyn LineSink| {
            if self.transfer.load(Ordering::Acquire) != ACTIVE {
                return Ok(false);
            }
            sink.send(line.as_bytes())?;
            if last {
                self.transfer.store(FINISHED, Ordering::Release);
            }
            Ok(true)
        });
        Ok(sent?)
    }

    /// false once a collision aborted the transfer
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.transfer.load(Ordering::Acquire) != ABORTED
    }

    /// the holder
    #[must_use]
    pub fn holder(&self) -> RequesterId {
        self.peer.id()
    }
}

impl Drop for Grant<'_> {
    fn drop(&mut self) {
        self.lock.release(self.episode);
    }
}

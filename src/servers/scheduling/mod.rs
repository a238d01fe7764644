//! Scheduling mode: one dispatcher serves a shared queue.
//!
//! Readers enqueue, the dispatcher pops and streams. FIFO admits every request
//! on arrival. Round-robin only admits a request from the requester at the
//! head of the rotation, then moves it to the tail; a head that does not
//! submit within the turn timeout is moved to the tail by the next waiter.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    error::Result,
    transport::{PeerHandle, RequesterId},
};

use super::{chunking::ChunkServer, requests_handling::RequestDescriptor};


/// Queue discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// strict arrival order
    Fifo,
    /// admission in rotation over the registered requesters
    RoundRobin,
}

/// A queued request with the peer to answer.
#[derive(Debug, Clone)]
pub struct Job {
    /// the request
    pub request: RequestDescriptor,
    /// where the packets go
    pub peer: PeerHandle,
}

/// Result of [`FairScheduler::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// the request is queued and will be served
    Enqueued,
    /// the scheduler shut down before the request was queued
    DrainComplete,
}

/// Result of [`FairScheduler::dispatch_next`].
#[derive(Debug)]
pub enum Dispatch {
    /// next request to serve
    Job(Job),
    /// queue empty and shutdown signalled
    DrainComplete,
}

#[derive(Debug)]
struct SchedulerState {
    queue: VecDeque<Job>,
    rotation: VecDeque<RequesterId>,
    head_since: Instant,
    running: bool,
    enqueued: u64,
    dispatched: u64,
}

impl SchedulerState {
    fn advance_rotation(&mut self) {
        self.rotation.rotate_left(1.min(self.rotation.len()));
        self.head_since = Instant::now();
    }
}

/// Request queue with a single consumer.
#[derive(Debug)]
pub struct FairScheduler {
    policy: SchedulingPolicy,
    turn_timeout: Duration,
    state: Mutex<SchedulerState>,
    queue_ready: Condvar,
    turn_changed: Condvar,
}

impl FairScheduler {
    /// a running scheduler with an empty queue
    #[must_use]
    pub fn new(policy: SchedulingPolicy, turn_timeout: Duration) -> Self {
        Self {
            policy,
            turn_timeout,
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                rotation: VecDeque::new(),
                head_since: Instant::now(),
                running: true,
                enqueued: 0,
                dispatched: 0,
            }),
            queue_ready: Condvar::new(),
            turn_changed: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// the queue discipline
    #[inline]
    #[must_use]
    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// adds a requester at the tail of the rotation
    pub fn register(&self, requester: RequesterId) {
        let mut state: MutexGuard<'_, SchedulerState> = self.lock_state();
        if !state.rotation.contains(&requester) {
            if state.rotation.is_empty() {
                state.head_since = Instant::now();
            }
            state.rotation.push_back(requester);
        }
    }

    /// removes a requester from the rotation, its queued requests stay queued
    pub fn deregister(&self, requester: RequesterId) {
        let mut state: MutexGuard<'_, SchedulerState> = self.lock_state();
        if let Some(pos) = state.rotation.iter().position(|&r: &RequesterId| r == requester) {
            state.rotation.remove(pos);
            if pos == 0 {
                state.head_since = Instant::now();
            }
            drop(state);
            self.turn_changed.notify_all();
        }
    }

    /// Queues a request. Under round-robin this blocks until the requester
    /// is at the head of the rotation.
    pub fn enqueue(&self, job: Job) -> Admission {
        let requester: RequesterId = job.request.requester;
        let mut state: MutexGuard<'_, SchedulerState> = self.lock_state();
        if self.policy == SchedulingPolicy::RoundRobin {
            if !state.rotation.contains(&requester) {
                if state.rotation.is_empty() {
                    state.head_since = Instant::now();
                }
                state.rotation.push_back(requester);
            }
            loop {
                if !state.running {
                    return Admission::DrainComplete;
                }
                if state.rotation.front() == Some(&requester) {
                    break;
                }
                let waited: Duration = state.head_since.elapsed();
                if waited >= self.turn_timeout {
                    if let Some(&head) = state.rotation.front() {
                        warn!("Requester {head} let its turn expire, moving it to the tail");
                    }
                    state.advance_rotation();
                    self.turn_changed.notify_all();
                    continue;
                }
                state = self
                    .turn_changed
                    .wait_timeout(state, self.turn_timeout - waited)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            state.advance_rotation();
            self.turn_changed.notify_all();
        }
        if !state.running {
            return Admission::DrainComplete;
        }
        debug!(
            "Queued offset {} of requester {requester} ({} waiting)",
            job.request.offset,
            state.queue.len()
        );
        state.queue.push_back(job);
        state.enqueued += 1;
        drop(state);
        self.queue_ready.notify_one();
        Admission::Enqueued
    }

    /// Pops the next request, blocking while the queue is empty. Returns
    /// [`Dispatch::DrainComplete`] once the queue is empty after shutdown.
    pub fn dispatch_next(&self) -> Dispatch {
        let mut state: MutexGuard<'_, SchedulerState> = self.lock_state();
        loop {
            if let Some(job) = state.queue.pop_front() {
                state.dispatched += 1;
                return Dispatch::Job(job);
            }
            if !state.running {
                return Dispatch::DrainComplete;
            }
            state = self
                .queue_ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// stops admissions and wakes every blocked reader and the dispatcher,
    /// already queued requests are still dispatched
    pub fn shutdown(&self) {
        self.lock_state().running = false;
        self.queue_ready.notify_all();
        self.turn_changed.notify_all();
    }

    /// requests waiting for the dispatcher
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// (enqueued, dispatched) counters
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        let state: MutexGuard<'_, SchedulerState> = self.lock_state();
        (state.enqueued, state.dispatched)
    }

    /// current rotation, head first
    #[must_use]
    pub fn rotation(&self) -> Vec<RequesterId> {
        self.lock_state().rotation.iter().copied().collect()
    }
}

/// Dispatcher loop: serves jobs until the scheduler drains, returns the
/// number of jobs served. A peer that cannot be written to only loses its
/// own answer.
pub fn run_dispatcher(scheduler: &FairScheduler, chunks: &ChunkServer) -> u64 {
    let mut served: u64 = 0;
    while let Dispatch::Job(job) = scheduler.dispatch_next() {
        let sent: Result<_> = chunks.stream(job.request.offset, |line: &str, _| {
            job.peer.send(line)?;
            Ok(true)
        });
        match sent {
            Ok(outcome) => debug!(
                "Served offset {} to requester {} after {}ms in queue: {outcome:?}",
                job.request.offset,
                job.peer.id(),
                job.request.queued_for().as_millis()
            ),
            Err(e) => warn!("Cannot answer requester {}: {e}", job.peer.id()),
        }
        served += 1;
    }
    info!("Dispatcher drained after {served} requests");
    served
}

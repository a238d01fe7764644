#[cfg(test)]
mod resource_lock_tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    use crate::{
        servers::{
            resource_lock::{ClaimOutcome, Grant, ResourceLock, ResourceSnapshot, Status},
            test_utils::{drain_lines, dummy_peer},
        },
        transport::PeerHandle,
    };

    #[test]
    fn test_claim_and_release() {
        let lock: ResourceLock = ResourceLock::new();
        let (peer, _conn) = dummy_peer(1);
        assert_eq!(lock.probe(), Status::Idle);
        {
            let ClaimOutcome::Granted(grant) = lock.try_claim(&peer) else {
                panic!("idle lock refused a claim");
            };
            assert_eq!(grant.holder(), 1);
            let snapshot: ResourceSnapshot = lock.snapshot();
            assert_eq!(snapshot.status, Status::Busy);
            assert_eq!(snapshot.holder, Some(1));
            assert!(snapshot.claim_started.is_some());
            assert_eq!(lock.probe(), Status::Busy);
        }
        let snapshot: ResourceSnapshot = lock.snapshot();
        assert_eq!(snapshot.status, Status::Idle);
        assert_eq!(snapshot.holder, None);
        assert_eq!(snapshot.grants, 1);
        assert_eq!(snapshot.collisions, 0);
    }

    /// loser and in-flight holder both get HUH!, the state goes back to IDLE
    #[test]
    fn test_collision_signals_both_parties() {
        let lock: ResourceLock = ResourceLock::new();
        let (holder, mut holder_conn) = dummy_peer(1);
        let (loser, mut loser_conn) = dummy_peer(2);

        let ClaimOutcome::Granted(grant) = lock.try_claim(&holder) else {
            panic!("idle lock refused a claim");
        };
        assert!(grant.send("the\n", false).unwrap());

        let outcome: ClaimOutcome<'_> = lock.try_claim(&loser);
        assert!(matches!(outcome, ClaimOutcome::Collision { victim: Some(1) }));

        let snapshot: ResourceSnapshot = lock.snapshot();
        assert_eq!(snapshot.status, Status::Idle);
        assert_eq!(snapshot.holder, None);
        assert_eq!(snapshot.collisions, 1);
        assert!(snapshot.last_collision.is_some());

        // the aborted holder cannot send anything else
        assert!(!grant.is_active());
        assert!(!grant.send("quick\n", true).unwrap());
        drop(grant);

        assert_eq!(drain_lines(&mut holder_conn), ["the", "HUH!"]);
        assert_eq!(drain_lines(&mut loser_conn), ["HUH!"]);

        // a fresh claim wins again
        assert!(matches!(lock.try_claim(&loser), ClaimOutcome::Granted(_)));
    }

    /// the path can be granted again before the evicted holder is told,
    /// the evicted stream still ends with HUH!
    #[test]
    fn test_regrant_before_abort_lands() {
        let lock: ResourceLock = ResourceLock::new();
        let (holder, mut holder_conn) = dummy_peer(1);
        let (loser, mut loser_conn) = dummy_peer(2);
        let (third, mut third_conn) = dummy_peer(3);

        let ClaimOutcome::Granted(grant) = lock.try_claim(&holder) else {
            panic!("idle lock refused a claim");
        };
        assert!(grant.send("the\n", false).unwrap());

        thread::scope(|s| {
            let collider = holder.with_sink(|_| {
                let collider = s.spawn(|| {
                    matches!(
                        lock.try_claim(&loser),
                        ClaimOutcome::Collision { victim: Some(1) }
                    )
                });
                while lock.snapshot().collisions == 0 {
                    thread::yield_now();
                }
                let ClaimOutcome::Granted(next) = lock.try_claim(&third) else {
                    panic!("reset lock refused a claim");
                };
                assert!(grant.is_active());
                assert!(next.send("fox,EOF\n", true).unwrap());
                collider
            });
            assert!(collider.join().unwrap());
        });

        assert!(!grant.is_active());
        assert!(!grant.send("quick\n", true).unwrap());
        drop(grant);

        assert_eq!(drain_lines(&mut holder_conn), ["the", "HUH!"]);
        assert_eq!(drain_lines(&mut loser_conn), ["HUH!"]);
        assert_eq!(drain_lines(&mut third_conn), ["fox,EOF"]);
        let snapshot: ResourceSnapshot = lock.snapshot();
        assert_eq!(snapshot.grants, 2);
        assert_eq!(snapshot.collisions, 1);
        assert_eq!(snapshot.status, Status::Idle);
    }

    /// a holder that already sent its last packet is not told about the collision
    #[test]
    fn test_completed_transfer_not_aborted() {
        let lock: ResourceLock = ResourceLock::new();
        let (holder, mut holder_conn) = dummy_peer(1);
        let (loser, mut loser_conn) = dummy_peer(2);

        let ClaimOutcome::Granted(grant) = lock.try_claim(&holder) else {
            panic!("idle lock refused a claim");
        };
        assert!(grant.send("the,quick\n", true).unwrap());
        assert!(matches!(
            lock.try_claim(&loser),
            ClaimOutcome::Collision { victim: Some(1) }
        ));
        assert!(grant.is_active());
        drop(grant);

        assert_eq!(drain_lines(&mut holder_conn), ["the,quick"]);
        assert_eq!(drain_lines(&mut loser_conn), ["HUH!"]);
        assert_eq!(lock.snapshot().status, Status::Idle);
    }

    /// a stale grant dropped after someone else won does not free their claim
    #[test]
    fn test_stale_release_ignored() {
        let lock: ResourceLock = ResourceLock::new();
        let (a, _a_conn) = dummy_peer(1);
        let (b, _b_conn) = dummy_peer(2);
        let (c, _c_conn) = dummy_peer(3);

        let ClaimOutcome::Granted(stale) = lock.try_claim(&a) else {
            panic!("idle lock refused a claim");
        };
        assert!(matches!(lock.try_claim(&b), ClaimOutcome::Collision { .. }));
        let ClaimOutcome::Granted(current) = lock.try_claim(&c) else {
            panic!("idle lock refused a claim");
        };
        drop(stale);
        assert_eq!(lock.snapshot().holder, Some(3));
        drop(current);
        assert_eq!(lock.snapshot().holder, None);
    }

    /// under concurrent claims at most one grant is live and it matches the state
    #[test]
    fn test_concurrent_claims() {
        const N: usize = 16;
        let lock: Arc<ResourceLock> = Arc::new(ResourceLock::new());
        let barrier: Arc<Barrier> = Arc::new(Barrier::new(N));
        let peers: Vec<(PeerHandle, _)> = (1..=N as u32).map(dummy_peer).collect();

        thread::scope(|s| {
            let handles: Vec<_> = peers
                .iter()
                .map(|(peer, _)| {
                    let lock: &ResourceLock = &lock;
                    let barrier: Arc<Barrier> = Arc::clone(&barrier);
                    s.spawn(move || {
                        barrier.wait();
                        lock.try_claim(peer)
                    })
                })
                .collect();
            let outcomes: Vec<ClaimOutcome<'_>> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();

            let grants: Vec<&Grant<'_>> = outcomes
                .iter()
                .filter_map(|o: &ClaimOutcome<'_>| match o {
                    ClaimOutcome::Granted(g) => Some(g),
                    ClaimOutcome::Collision { .. } => None,
                })
                .collect();
            assert!(!grants.is_empty());

            let snapshot: ResourceSnapshot = lock.snapshot();
            let live: Vec<u32> = grants
                .iter()
                .filter(|g| g.is_active())
                .map(|g| g.holder())
                .collect();
            match snapshot.status {
                Status::Busy => assert_eq!(live, vec![snapshot.holder.unwrap()]),
                Status::Idle => assert!(live.is_empty()),
            }
            assert_eq!(
                snapshot.grants + snapshot.collisions,
                u64::try_from(N).unwrap()
            );
        });
        assert_eq!(lock.snapshot().status, Status::Idle);
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bookkeeping of the peers a sync engine works with.
//!
//! Every known peer is in exactly one of four states:
//! 1. **Unchecked**: not known to be able to serve requests; it may be probed.
//! 2. **Ready**: may be sent a request.
//! 3. **Sent**: has exactly one outstanding request.
//! 4. **Resting**: left alone until an instant, after which it becomes ready or unchecked.
//!
//! Which transition a reply or an expiry causes is up to the engine; the pool only keeps the states,
//! the outstanding requests, and each peer's timeout. A peer's timeout starts at the configured
//! request timeout and doubles on every expiry, up to the configured maximum.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use crate::types::{crypto_primitives::VerifyingKey, data_types::CryptoHash};

/// What an outstanding request asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Probe,
    /// Values of `hashes`, on behalf of the `target`-th builder of the engine.
    Data {
        target: usize,
        hashes: Vec<CryptoHash>,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Request {
    pub(crate) req_id: u32,
    pub(crate) deadline: Instant,
    pub(crate) kind: RequestKind,
}

#[derive(Clone, Debug)]
enum PeerState {
    Unchecked,
    Ready,
    Sent(Request),
    Resting(Instant),
}

struct Peer {
    state: PeerState,
    timeout: Duration,
}

pub(crate) struct PeerPool {
    request_timeout: Duration,
    max_timeout: Duration,
    peers: HashMap<VerifyingKey, Peer>,
    ready: VecDeque<VerifyingKey>,
}

impl PeerPool {
    pub(crate) fn new(request_timeout: Duration, max_timeout: Duration) -> PeerPool {
        PeerPool {
            request_timeout,
            max_timeout,
            peers: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    /// Add `peer`, either ready to serve requests or waiting to be probed. Returns false if the peer
    /// is already known.
    pub(crate) fn join(&mut self, peer: VerifyingKey, ready: bool) -> bool {
        if self.peers.contains_key(&peer) {
            return false;
        }
        let state = if ready {
            self.ready.push_back(peer);
            PeerState::Ready
        } else {
            PeerState::Unchecked
        };
        self.peers.insert(
            peer,
            Peer {
                state,
                timeout: self.request_timeout,
            },
        );
        true
    }

    /// Forget `peer`, returning the request it still had outstanding.
    pub(crate) fn leave(&mut self, peer: &VerifyingKey) -> Option<Request> {
        self.ready.retain(|ready| ready != peer);
        match self.peers.remove(peer)?.state {
            PeerState::Sent(request) => Some(request),
            _ => None,
        }
    }

    pub(crate) fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.peers
            .values()
            .filter(|peer| matches!(peer.state, PeerState::Sent(_)))
            .count()
    }

    /// Ready peers, most preferred first.
    pub(crate) fn ready_peers(&self) -> Vec<VerifyingKey> {
        self.ready.iter().copied().collect()
    }

    /// Peers waiting to be probed.
    pub(crate) fn unchecked_peers(&self) -> Vec<VerifyingKey> {
        self.peers
            .iter()
            .filter(|(_, peer)| matches!(peer.state, PeerState::Unchecked))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Record that a request was sent to `peer`, whatever state it was in.
    pub(crate) fn sent(&mut self, peer: &VerifyingKey, req_id: u32, kind: RequestKind, now: Instant) {
        self.ready.retain(|ready| ready != peer);
        if let Some(entry) = self.peers.get_mut(peer) {
            entry.state = PeerState::Sent(Request {
                req_id,
                deadline: now + entry.timeout,
                kind,
            });
        }
    }

    /// Take the request outstanding at `peer` if its id is `req_id`. The peer is left unchecked until
    /// the engine moves it with [`make_ready`](Self::make_ready) or [`rest`](Self::rest).
    pub(crate) fn complete(&mut self, peer: &VerifyingKey, req_id: u32) -> Option<RequestKind> {
        let entry = self.peers.get_mut(peer)?;
        match &entry.state {
            PeerState::Sent(request) if request.req_id == req_id => {
                let kind = request.kind.clone();
                entry.state = PeerState::Unchecked;
                Some(kind)
            }
            _ => None,
        }
    }

    /// Make `peer` ready. Preferred peers are served first.
    pub(crate) fn make_ready(&mut self, peer: &VerifyingKey, preferred: bool) {
        if let Some(entry) = self.peers.get_mut(peer) {
            if !matches!(entry.state, PeerState::Ready) {
                entry.state = PeerState::Ready;
                if preferred {
                    self.ready.push_front(*peer);
                } else {
                    self.ready.push_back(*peer);
                }
            }
        }
    }

    /// Leave `peer` alone until `until`.
    pub(crate) fn rest(&mut self, peer: &VerifyingKey, until: Instant) {
        self.ready.retain(|ready| ready != peer);
        if let Some(entry) = self.peers.get_mut(peer) {
            entry.state = PeerState::Resting(until);
        }
    }

    /// Expire every request whose deadline is at or before `now`. The peers are left unchecked with
    /// their timeout doubled; returned with their expired request and their new timeout.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<(VerifyingKey, Request, Duration)> {
        let mut expired = Vec::new();
        for (key, entry) in self.peers.iter_mut() {
            let is_expired = matches!(&entry.state, PeerState::Sent(request) if request.deadline <= now);
            if is_expired {
                if let PeerState::Sent(request) =
                    std::mem::replace(&mut entry.state, PeerState::Unchecked)
                {
                    entry.timeout = (entry.timeout * 2).min(self.max_timeout);
                    expired.push((*key, request, entry.timeout));
                }
            }
        }
        expired
    }

    /// End the rest of every peer whose rest is over at `now`, making it ready or unchecked. Returns
    /// how many peers were woken.
    pub(crate) fn wake(&mut self, now: Instant, to_ready: bool) -> usize {
        let woken: Vec<VerifyingKey> = self
            .peers
            .iter()
            .filter(|(_, peer)| matches!(peer.state, PeerState::Resting(until) if until <= now))
            .map(|(key, _)| *key)
            .collect();
        for key in woken.iter() {
            if to_ready {
                self.make_ready(key, false);
            } else if let Some(entry) = self.peers.get_mut(key) {
                entry.state = PeerState::Unchecked;
            }
        }
        woken.len()
    }

    /// The earliest instant at which a request expires or a rest ends.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.peers
            .values()
            .filter_map(|peer| match &peer.state {
                PeerState::Sent(request) => Some(request.deadline),
                PeerState::Resting(until) => Some(*until),
                _ => None,
            })
            .min()
    }

    /// Hashes requested on behalf of `target` that have not been answered yet.
    pub(crate) fn in_flight(&self, target: usize) -> HashSet<CryptoHash> {
        self.peers
            .values()
            .filter_map(|peer| match &peer.state {
                PeerState::Sent(Request {
                    kind: RequestKind::Data { target: t, hashes },
                    ..
                }) if *t == target => Some(hashes.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub(crate) fn timeout(&self, peer: &VerifyingKey) -> Option<Duration> {
        self.peers.get(peer).map(|peer| peer.timeout)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;

    fn peer(seed: u8) -> VerifyingKey {
        SigningKey::from_bytes(&[seed; 32]).verifying_key()
    }

    fn pool() -> PeerPool {
        PeerPool::new(Duration::from_secs(1), Duration::from_secs(8))
    }

    #[test]
    fn timeout_doubles_up_to_max() {
        let mut pool = pool();
        let p = peer(1);
        pool.join(p, true);
        let mut now = Instant::now();
        let mut timeouts = Vec::new();
        for req_id in 0..5 {
            pool.sent(&p, req_id, RequestKind::Probe, now);
            now += Duration::from_secs(10);
            let expired = pool.expire(now);
            assert_eq!(expired.len(), 1);
            assert_eq!(expired[0].1.req_id, req_id);
            timeouts.push(expired[0].2.as_secs());
        }
        assert_eq!(timeouts, vec![2, 4, 8, 8, 8]);
    }

    #[test]
    fn requests_expire_only_after_deadline() {
        let mut pool = pool();
        let p = peer(1);
        pool.join(p, true);
        let now = Instant::now();
        pool.sent(&p, 1, RequestKind::Probe, now);
        assert!(pool.expire(now + Duration::from_millis(500)).is_empty());
        assert_eq!(pool.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(pool.expire(now + Duration::from_secs(1)).len(), 1);
        assert_eq!(pool.unchecked_peers(), vec![p]);
    }

    #[test]
    fn complete_matches_req_id() {
        let mut pool = pool();
        let p = peer(1);
        pool.join(p, true);
        let hashes = vec![CryptoHash::new([1; 32])];
        pool.sent(
            &p,
            4,
            RequestKind::Data {
                target: 0,
                hashes: hashes.clone(),
            },
            Instant::now(),
        );
        assert_eq!(pool.ready_count(), 0);
        assert_eq!(pool.in_flight(0).len(), 1);
        assert!(pool.in_flight(1).is_empty());

        assert!(pool.complete(&p, 5).is_none());
        assert_eq!(
            pool.complete(&p, 4),
            Some(RequestKind::Data { target: 0, hashes })
        );
        assert!(pool.complete(&p, 4).is_none());
        pool.make_ready(&p, true);
        assert_eq!(pool.ready_peers(), vec![p]);
    }

    #[test]
    fn preferred_peers_are_served_first() {
        let mut pool = pool();
        let (a, b) = (peer(1), peer(2));
        pool.join(a, true);
        pool.join(b, false);
        pool.make_ready(&b, true);
        assert_eq!(pool.ready_peers(), vec![b, a]);
    }

    #[test]
    fn rested_peers_wake_up() {
        let mut pool = pool();
        let p = peer(1);
        pool.join(p, true);
        let now = Instant::now();
        pool.rest(&p, now + Duration::from_secs(3));
        assert_eq!(pool.ready_count(), 0);
        assert_eq!(pool.wake(now, true), 0);
        assert_eq!(pool.wake(now + Duration::from_secs(3), true), 1);
        assert_eq!(pool.ready_peers(), vec![p]);
    }

    #[test]
    fn leave_returns_outstanding_request() {
        let mut pool = pool();
        let p = peer(1);
        assert!(pool.join(p, false));
        assert!(!pool.join(p, true));
        pool.sent(&p, 9, RequestKind::Probe, Instant::now());
        let request = pool.leave(&p).unwrap();
        assert_eq!(request.req_id, 9);
        assert!(pool.leave(&p).is_none());
        assert!(pool.timeout(&p).is_none());
    }
}

//! Bounded cache of handled message hashes
//!
//! The relayer remembers which messages it already settled or saw rejected as
//! duplicates so a redelivered message is skipped without a consume attempt.
//! Memory stays bounded by both entry count and age.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use starkbridge_rs::MessageHash;

#[derive(Debug, Clone, Copy)]
struct Entry {
    seq: u64,
    inserted: Instant,
}

/// Message hashes with a TTL and a capacity limit.
///
/// Entries are evicted in insertion order: expired ones first, then the
/// oldest while the cache is full.
pub struct HandledMessageCache {
    seen: HashMap<MessageHash, Entry>,
    order: VecDeque<(MessageHash, Entry)>,
    next_seq: u64,
    max_size: usize,
    ttl: Duration,
}

impl HandledMessageCache {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            seen: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            max_size: max_size.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// True if `hash` was inserted and has not expired
    pub fn contains(&self, hash: &MessageHash) -> bool {
        self.seen
            .get(hash)
            .is_some_and(|entry| entry.inserted.elapsed() < self.ttl)
    }

    pub fn insert(&mut self, hash: MessageHash) {
        let now = Instant::now();
        self.evict_expired(now);

        // A refreshed hash leaves a stale queue entry behind, skipped on eviction
        if !self.seen.contains_key(&hash) {
            while self.seen.len() >= self.max_size {
                if !self.pop_oldest() {
                    break;
                }
            }
        }

        let entry = Entry {
            seq: self.next_seq,
            inserted: now,
        };
        self.next_seq += 1;
        self.seen.insert(hash, entry);
        self.order.push_back((hash, entry));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// (current len, max size)
    pub fn capacity_info(&self) -> (usize, usize) {
        (self.seen.len(), self.max_size)
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&(_, entry)) = self.order.front() {
            if now.duration_since(entry.inserted) < self.ttl {
                break;
            }
            self.pop_oldest();
        }
    }

    /// Drop the front queue entry; returns false when the queue is empty
    fn pop_oldest(&mut self) -> bool {
        let Some((hash, entry)) = self.order.pop_front() else {
            return false;
        };
        if self.seen.get(&hash).is_some_and(|live| live.seq == entry.seq) {
            self.seen.remove(&hash);
        }
        true
    }
}

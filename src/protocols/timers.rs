// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Keyed one-shot timers.
//!
//! Timers live in a priority queue ordered by fire time. Each key has at most
//! one armed deadline; restarting a key supersedes the old heap entry, which is
//! skipped lazily when it reaches the top. Stopping a key guarantees it never
//! fires afterwards.
//!
//! The queue never reads a clock: callers pass `now` in, so the engine can be
//! driven by tokio time, a simulator, or a test.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A scheduled timer with its fire time and key
#[derive(Debug, Clone)]
struct ScheduledTimer<K> {
    fire_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for ScheduledTimer<K> {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl<K> Eq for ScheduledTimer<K> {}

impl<K> PartialOrd for ScheduledTimer<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for ScheduledTimer<K> {
    // Ties on fire time go to the timer armed first
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Priority queue of keyed timers
#[derive(Debug)]
pub struct TimerQueue<K> {
    heap: BinaryHeap<Reverse<ScheduledTimer<K>>>,
    armed: HashMap<K, (Instant, u64)>,
    next_seq: u64,
}

impl<K: Clone + Eq + Hash> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Arm (or re-arm) `key` to fire `after` from `now`
    pub fn start(&mut self, key: K, now: Instant, after: Duration) {
        self.start_at(key, now + after);
    }

    /// Arm (or re-arm) `key` to fire at `fire_at`
    pub fn start_at(&mut self, key: K, fire_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.armed.insert(key.clone(), (fire_at, seq));
        self.heap.push(Reverse(ScheduledTimer { fire_at, seq, key }));
        self.maybe_compact();
    }

    /// Disarm `key`; returns whether it was running
    pub fn stop(&mut self, key: &K) -> bool {
        self.armed.remove(key).is_some()
    }

    /// Disarm every key matching the predicate
    pub fn stop_matching(&mut self, mut pred: impl FnMut(&K) -> bool) {
        self.armed.retain(|k, _| !pred(k));
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.armed.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.armed.get(key).map(|(at, _)| *at)
    }

    /// Time left before `key` fires (zero if overdue), or `None` if stopped
    pub fn remaining(&self, key: &K, now: Instant) -> Option<Duration> {
        self.deadline(key)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Earliest armed deadline
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_stale();
        self.heap.peek().map(|Reverse(t)| t.fire_at)
    }

    /// Pop the next timer due at or before `now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<K> {
        self.discard_stale();
        match self.heap.peek() {
            Some(Reverse(next)) if next.fire_at <= now => {}
            _ => return None,
        }
        let Reverse(timer) = self.heap.pop()?;
        self.armed.remove(&timer.key);
        Some(timer.key)
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    fn is_current(&self, timer: &ScheduledTimer<K>) -> bool {
        matches!(self.armed.get(&timer.key), Some((_, seq)) if *seq == timer.seq)
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_current(top) {
                break;
            }
            self.heap.pop();
        }
    }

    // Restarted timers leave superseded heap entries behind; rebuild once
    // they dominate the heap.
    fn maybe_compact(&mut self) {
        if self.heap.len() <= 64 || self.heap.len() <= 2 * self.armed.len() {
            return;
        }
        let heap = std::mem::take(&mut self.heap);
        self.heap = heap
            .into_iter()
            .filter(|Reverse(t)| self.is_current(t))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.start("b", now, Duration::from_secs(2));
        q.start("a", now, Duration::from_secs(1));
        q.start("c", now, Duration::from_secs(3));

        assert_eq!(q.pop_expired(now), None);
        let later = now + Duration::from_secs(5);
        assert_eq!(q.pop_expired(later), Some("a"));
        assert_eq!(q.pop_expired(later), Some("b"));
        assert_eq!(q.pop_expired(later), Some("c"));
        assert_eq!(q.pop_expired(later), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_restart_supersedes() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.start(1u32, now, Duration::from_secs(1));
        q.start(1u32, now, Duration::from_secs(10));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_expired(now + Duration::from_secs(2)), None);
        assert_eq!(q.next_deadline(), Some(now + Duration::from_secs(10)));
        assert_eq!(
            q.remaining(&1, now + Duration::from_secs(4)),
            Some(Duration::from_secs(6))
        );
    }

    #[test]
    fn test_stop_prevents_fire() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.start(7u32, now, Duration::ZERO);
        assert!(q.stop(&7));
        assert!(!q.stop(&7));
        assert_eq!(q.pop_expired(now + Duration::from_secs(1)), None);
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn test_equal_deadlines_fire_in_arm_order() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        for k in [3u32, 1, 2] {
            q.start(k, now, Duration::ZERO);
        }
        let fired: Vec<u32> = std::iter::from_fn(|| q.pop_expired(now)).collect();
        assert_eq!(fired, vec![3, 1, 2]);
    }

    #[test]
    fn test_compaction_keeps_armed() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        for i in 0..500u64 {
            q.start(i % 4, now, Duration::from_millis(1000 + i));
        }
        assert_eq!(q.len(), 4);
        assert!(q.heap.len() <= 2 * 64 + 4);
        q.stop_matching(|k| *k == 0);
        let fired: Vec<u64> =
            std::iter::from_fn(|| q.pop_expired(now + Duration::from_secs(10))).collect();
        assert_eq!(fired, vec![1, 2, 3]);
    }
}

//! Outbound message queue and delivery tracking.
//!
//! Every outbound carries a monotonic id. Failed sends are re-enqueued
//! with exponential backoff (full jitter) until `max_attempts`, and
//! anything older than `message_ttl` is dropped with a counter. The
//! delivery tracker records which ids each interface has accepted, so a
//! retry after a reported failure is the only way an id repeats.

use std::collections::{HashMap, HashSet, VecDeque};

use rand::Rng;

use skymesh_core::watchlist::Priority;

/// Retry/backoff knobs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_initial: f64,
    pub backoff_max: f64,
    /// Drop messages older than this many seconds.
    pub message_ttl: f64,
    /// Pending queue bound; oldest dropped beyond it.
    pub max_pending: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff_initial: 1.0,
            backoff_max: 30.0,
            message_ttl: 300.0,
            max_pending: 256,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with full jitter: uniform in
    /// `[0, min(backoff_max, initial * 2^attempt)]`.
    pub fn backoff(&self, attempt: u32) -> f64 {
        let ceiling = (self.backoff_initial * 2f64.powi(attempt as i32)).min(self.backoff_max);
        rand::thread_rng().gen_range(0.0..=ceiling)
    }
}

/// A formatted alert waiting for delivery.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: u64,
    pub channel: String,
    pub priority: Priority,
    pub content: Vec<u8>,
    pub created_at: f64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: f64,
}

/// Queue counters, surfaced through the stats read view.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct OutboundStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub expired: u64,
    pub dropped_full: u64,
    pub exhausted: u64,
}

/// Pending outbound queue with TTL and drop-oldest overflow.
#[derive(Debug)]
pub struct OutboundQueue {
    policy: RetryPolicy,
    pending: VecDeque<OutboundMessage>,
    next_id: u64,
    pub stats: OutboundStats,
}

impl OutboundQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        OutboundQueue {
            policy,
            pending: VecDeque::new(),
            next_id: 1,
            stats: OutboundStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Create and enqueue a new outbound. Returns its id.
    pub fn enqueue(
        &mut self,
        channel: &str,
        priority: Priority,
        content: Vec<u8>,
        now: f64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        if self.pending.len() >= self.policy.max_pending {
            self.pending.pop_front();
            self.stats.dropped_full += 1;
        }

        self.pending.push_back(OutboundMessage {
            id,
            channel: channel.to_string(),
            priority,
            content,
            created_at: now,
            attempts: 0,
            max_attempts: self.policy.max_attempts,
            next_attempt_at: now,
        });
        self.stats.enqueued += 1;
        id
    }

    /// Pop every message due for a send attempt, dropping expired ones.
    pub fn due(&mut self, now: f64) -> Vec<OutboundMessage> {
        let ttl = self.policy.message_ttl;
        let mut due = Vec::new();
        let mut keep = VecDeque::with_capacity(self.pending.len());

        while let Some(msg) = self.pending.pop_front() {
            if now - msg.created_at > ttl {
                self.stats.expired += 1;
            } else if msg.next_attempt_at <= now {
                due.push(msg);
            } else {
                keep.push_back(msg);
            }
        }
        self.pending = keep;
        due
    }

    /// Record a failed attempt: re-enqueue with backoff, or give up after
    /// `max_attempts`.
    pub fn requeue_failed(&mut self, mut msg: OutboundMessage, now: f64) {
        msg.attempts += 1;
        self.stats.failed += 1;
        if msg.attempts >= msg.max_attempts {
            self.stats.exhausted += 1;
            return;
        }
        msg.next_attempt_at = now + self.policy.backoff(msg.attempts);
        self.pending.push_back(msg);
    }

    pub fn mark_delivered(&mut self) {
        self.stats.delivered += 1;
    }

    /// Seconds until the earliest pending retry, if any.
    pub fn next_due_in(&self, now: f64) -> Option<f64> {
        self.pending
            .iter()
            .map(|m| (m.next_attempt_at - now).max(0.0))
            .min_by(f64::total_cmp)
    }
}

/// Per-interface record of delivered ids.
///
/// An id may be observed twice on the same interface only after the first
/// attempt was reported failed.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    delivered: HashMap<String, HashSet<u64>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        DeliveryTracker::default()
    }

    /// Record a delivery. Returns false when this id was already
    /// delivered on this interface (duplicate send — a bug upstream).
    pub fn record(&mut self, iface: &str, id: u64) -> bool {
        self.delivered.entry(iface.to_string()).or_default().insert(id)
    }

    pub fn was_delivered(&self, iface: &str, id: u64) -> bool {
        self.delivered.get(iface).is_some_and(|s| s.contains(&id))
    }

    pub fn delivered_count(&self, iface: &str) -> usize {
        self.delivered.get(iface).map(|s| s.len()).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> OutboundQueue {
        OutboundQueue::new(RetryPolicy {
            max_attempts: 3,
            backoff_initial: 1.0,
            backoff_max: 8.0,
            message_ttl: 300.0,
            max_pending: 4,
        })
    }

    #[test]
    fn test_ids_monotonic() {
        let mut q = queue();
        let a = q.enqueue("alerts", Priority::High, b"a".to_vec(), 0.0);
        let b = q.enqueue("alerts", Priority::High, b"b".to_vec(), 0.0);
        assert!(b > a);
    }

    #[test]
    fn test_due_returns_ready_messages() {
        let mut q = queue();
        q.enqueue("alerts", Priority::High, b"a".to_vec(), 0.0);
        let due = q.due(0.0);
        assert_eq!(due.len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_expired_messages_dropped() {
        let mut q = queue();
        q.enqueue("alerts", Priority::High, b"old".to_vec(), 0.0);
        let due = q.due(301.0);
        assert!(due.is_empty());
        assert_eq!(q.stats.expired, 1);
    }

    #[test]
    fn test_requeue_backoff_and_exhaustion() {
        let mut q = queue();
        q.enqueue("alerts", Priority::High, b"x".to_vec(), 0.0);
        let msg = q.due(0.0).pop().unwrap();

        // First failure: retried later.
        q.requeue_failed(msg, 0.0);
        assert_eq!(q.len(), 1);
        let retry_at = q.pending[0].next_attempt_at;
        assert!(retry_at >= 0.0 && retry_at <= 8.0, "backoff {retry_at}");

        // Exhaust remaining attempts.
        let msg = q.due(100.0).pop().unwrap();
        q.requeue_failed(msg, 100.0);
        let msg = q.due(200.0).pop().unwrap();
        q.requeue_failed(msg, 200.0);

        assert!(q.is_empty(), "message should be dropped after 3 attempts");
        assert_eq!(q.stats.exhausted, 1);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut q = queue();
        for i in 0..5 {
            q.enqueue("alerts", Priority::High, vec![i], 0.0);
        }
        assert_eq!(q.len(), 4);
        assert_eq!(q.stats.dropped_full, 1);
        // Oldest (content [0]) was dropped.
        assert_eq!(q.pending[0].content, vec![1]);
    }

    #[test]
    fn test_backoff_bounded() {
        let policy = RetryPolicy {
            backoff_initial: 2.0,
            backoff_max: 10.0,
            ..RetryPolicy::default()
        };
        for attempt in 0..8 {
            let b = policy.backoff(attempt);
            assert!((0.0..=10.0).contains(&b), "attempt {attempt}: {b}");
        }
    }

    #[test]
    fn test_delivery_tracker_idempotence() {
        let mut t = DeliveryTracker::new();
        assert!(t.record("serial", 1));
        assert!(!t.record("serial", 1), "duplicate id on same interface");
        assert!(t.record("mqtt", 1), "same id on another interface is fine");
        assert!(t.was_delivered("serial", 1));
        assert!(!t.was_delivered("serial", 2));
        assert_eq!(t.delivered_count("serial"), 1);
    }

    #[test]
    fn test_next_due_in() {
        let mut q = queue();
        assert!(q.next_due_in(0.0).is_none());
        q.enqueue("alerts", Priority::High, b"x".to_vec(), 5.0);
        assert_eq!(q.next_due_in(5.0), Some(0.0));
    }
}

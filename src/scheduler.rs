// Debounced, batched scheduling of consolidated snapshot writes

use crate::config::PersistConfig;
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// Why the single pending slot is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Debounce,
    Retry { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPersist {
    pub deadline_ms: i64,
    pub kind: PendingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// A threshold was met: persist now, the pending slot has been cleared
    PersistNow,
    /// The pending slot was (re)armed for this deadline
    Deferred { deadline_ms: i64 },
}

/// Pure state machine: the owner performs the actual snapshot write and reports
/// the outcome through [`PersistScheduler::complete`] or [`PersistScheduler::fail`].
#[derive(Debug)]
pub struct PersistScheduler {
    policy: PersistConfig,
    queue: BTreeSet<String>,
    pending: Option<PendingPersist>,
    last_persist_ms: i64,
    failed_attempts: u32,
}

impl PersistScheduler {
    pub fn new(policy: PersistConfig) -> Self {
        Self {
            policy,
            queue: BTreeSet::new(),
            pending: None,
            last_persist_ms: 0,
            failed_attempts: 0,
        }
    }

    pub fn policy(&self) -> &PersistConfig {
        &self.policy
    }

    /// Record a dirty source and decide whether to persist now or later
    pub fn schedule(&mut self, source: impl Into<String>, now_ms: i64) -> ScheduleDecision {
        let source = source.into();
        trace!(source = %source, "schedule: called");
        self.queue.insert(source);

        let queue_full = self.queue.len() >= self.policy.max_queue_size;
        let overdue = now_ms - self.last_persist_ms > self.policy.max_interval_ms;
        if queue_full || overdue {
            debug!(queued = self.queue.len(), queue_full, overdue, "Persist threshold reached");
            self.pending = None;
            return ScheduleDecision::PersistNow;
        }

        let deadline_ms = now_ms + self.policy.delay_ms;
        self.pending = Some(PendingPersist {
            deadline_ms,
            kind: PendingKind::Debounce,
        });
        ScheduleDecision::Deferred { deadline_ms }
    }

    pub fn pending(&self) -> Option<PendingPersist> {
        self.pending
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.pending.map(|p| p.deadline_ms)
    }

    /// Disarm the pending slot if its deadline has passed, returning whether it fired
    pub fn take_due(&mut self, now_ms: i64) -> bool {
        match self.pending {
            Some(p) if p.deadline_ms <= now_ms => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn last_persist_ms(&self) -> i64 {
        self.last_persist_ms
    }

    /// A snapshot covering everything queued was written
    pub fn complete(&mut self, now_ms: i64) {
        self.queue.clear();
        self.pending = None;
        self.last_persist_ms = now_ms;
        self.failed_attempts = 0;
    }

    /// A background snapshot failed. The queue is kept; the slot is re-armed with
    /// exponential backoff until `max_retries` is exhausted. Returns the retry deadline.
    pub fn fail(&mut self, now_ms: i64) -> Option<i64> {
        self.failed_attempts += 1;
        let attempt = self.failed_attempts;
        if attempt > self.policy.max_retries {
            warn!(attempt, queued = self.queue.len(), "Giving up on background persist until next change");
            self.pending = None;
            return None;
        }

        // Shift stays below 63 so the factor is always a positive i64
        let factor = 1_i64 << (attempt.min(63) - 1);
        let delay = self
            .policy
            .delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_interval_ms);
        let deadline_ms = now_ms + delay;
        self.pending = Some(PendingPersist {
            deadline_ms,
            kind: PendingKind::Retry { attempt },
        });
        Some(deadline_ms)
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Forget all queued sources and timers
    pub fn reset(&mut self) {
        self.queue.clear();
        self.pending = None;
        self.failed_attempts = 0;
    }
}

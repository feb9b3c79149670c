//! Bounded per-table fingerprint cache.
//!
//! Membership means "already handled recently". Entries leave the cache by
//! TTL (swept every half TTL) or, when the cache is full, oldest-first in
//! insertion order. Every method takes an explicit `now` so the cache can be
//! driven deterministically from tests.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bridge_core::{ChangeRecord, DeleteScope, TableSpec};
use tracing::debug;

use crate::policy::DedupPolicy;

/// Build the dedup fingerprint for a record.
///
/// The key is `{id}|{classification}|{business id}`; line-item tables widen it
/// with the product id or payment method. `correlated` replaces the folio as
/// the business id when the row belongs to a live split operation.
pub fn fingerprint(table: &TableSpec, record: &ChangeRecord, correlated: Option<&str>) -> String {
    let business = correlated
        .map(str::to_string)
        .or_else(|| record.folio())
        .or_else(|| record.shift_id())
        .unwrap_or_else(|| "-".to_string());

    let mut key = format!("{}|{}|{}", record.id, record.classification(), business);
    if table.delete_scope == DeleteScope::Line {
        if let Some(detail) = record.product_id().or_else(|| record.payment_method()) {
            key.push('|');
            key.push_str(&detail);
        }
    }
    key
}

/// Running counters, logged after each sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub hits: u64,
    pub misses: u64,
    pub evicted: u64,
    pub expired: u64,
}

#[derive(Debug)]
pub struct DedupCache {
    entries: HashMap<String, Instant>,
    /// Insertion order; an item whose instant no longer matches `entries` is stale.
    order: VecDeque<(String, Instant)>,
    capacity: usize,
    ttl: Duration,
    last_sweep: Instant,
    stats: DedupStats,
}

impl DedupCache {
    pub fn new(policy: &DedupPolicy, now: Instant) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: policy.capacity.max(1),
            ttl: policy.ttl,
            last_sweep: now,
            stats: DedupStats::default(),
        }
    }

    /// Lookup-then-insert. Returns `true` when the fingerprint was already
    /// present and unexpired; otherwise records it and returns `false`.
    pub fn check_and_insert(&mut self, key: &str, now: Instant) -> bool {
        if let Some(seen) = self.entries.get(key) {
            if now.saturating_duration_since(*seen) < self.ttl {
                self.stats.hits += 1;
                return true;
            }
        }

        self.stats.misses += 1;
        self.entries.insert(key.to_string(), now);
        self.order.push_back((key.to_string(), now));
        self.evict_overflow();
        false
    }

    pub fn contains(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < self.ttl)
    }

    /// Sweep when at least half the TTL has passed since the previous sweep.
    /// Returns `None` when no sweep was due.
    pub fn maybe_sweep(&mut self, now: Instant) -> Option<usize> {
        if now.saturating_duration_since(self.last_sweep) < self.ttl / 2 {
            return None;
        }
        Some(self.sweep(now))
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        self.last_sweep = now;
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, seen| now.saturating_duration_since(*seen) < ttl);
        let removed = before - self.entries.len();

        let entries = &self.entries;
        self.order
            .retain(|(key, at)| entries.get(key).is_some_and(|seen| seen == at));

        if removed > 0 {
            self.stats.expired += removed as u64;
            debug!("Dedup sweep removed {} expired fingerprints", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            let Some((key, at)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&key) == Some(&at) {
                self.entries.remove(&key);
                self.stats.evicted += 1;
            }
        }
    }
}

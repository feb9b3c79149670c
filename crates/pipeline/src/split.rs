//! Bill-split correlation.
//!
//! A split turns one bill into several. Each row taking part declares some of
//! the bill ids involved (its own folio, a parent, children); the tracker folds
//! every declaration that overlaps a live operation into that operation, so
//! parent and children seen in different cycles, or by different table
//! processors, land on the same key.

use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

use bridge_core::SplitDeclaration;
use tracing::{debug, info};

use crate::policy::SplitPolicy;

#[derive(Debug, Clone)]
pub struct SplitOperation {
    pub bills: BTreeSet<String>,
    pub started_at: Instant,
    pub last_activity: Instant,
    /// Products already published under this operation.
    pub products: HashSet<String>,
}

impl SplitOperation {
    /// Sorted bill ids joined with `,`.
    pub fn key(&self) -> String {
        split_key(&self.bills)
    }

    fn is_live(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) < timeout
    }
}

pub fn split_key(bills: &BTreeSet<String>) -> String {
    bills.iter().cloned().collect::<Vec<_>>().join(",")
}

#[derive(Debug)]
pub struct SplitTracker {
    operations: Vec<SplitOperation>,
    policy: SplitPolicy,
    last_sweep: Instant,
}

impl SplitTracker {
    pub fn new(policy: SplitPolicy, now: Instant) -> Self {
        Self {
            operations: Vec::new(),
            policy,
            last_sweep: now,
        }
    }

    /// Record a split declaration and return the key of the operation it
    /// belongs to. Overlapping live operations are merged.
    pub fn register(&mut self, declaration: &SplitDeclaration, now: Instant) -> String {
        let timeout = self.policy.inactivity_timeout;
        let mut bills = declaration.bill_ids();

        let (overlapping, rest): (Vec<_>, Vec<_>) =
            self.operations.drain(..).partition(|op| {
                op.is_live(now, timeout) && !op.bills.is_disjoint(&bills)
            });
        self.operations = rest;

        let created = overlapping.is_empty();
        let mut started_at = now;
        let mut products = HashSet::new();
        for op in overlapping {
            started_at = started_at.min(op.started_at);
            bills.extend(op.bills);
            products.extend(op.products);
        }

        let operation = SplitOperation {
            bills,
            started_at,
            last_activity: now,
            products,
        };
        let key = operation.key();
        if created {
            info!(
                "Split operation {} started by folio {} ({:?})",
                key, declaration.own, declaration.role
            );
        } else {
            debug!("Folio {} joined split operation {}", declaration.own, key);
        }
        self.operations.push(operation);
        key
    }

    /// Key of the live operation covering `bill`, refreshing its activity time.
    pub fn correlate(&mut self, bill: &str, now: Instant) -> Option<String> {
        let timeout = self.policy.inactivity_timeout;
        let op = self
            .operations
            .iter_mut()
            .find(|op| op.is_live(now, timeout) && op.bills.contains(bill))?;
        op.last_activity = now;
        Some(op.key())
    }

    /// Remember that `product` was handled under the operation `key`.
    /// Returns `false` when it was already recorded.
    pub fn mark_product(&mut self, key: &str, product: &str) -> bool {
        self.operations
            .iter_mut()
            .find(|op| op.key() == key)
            .map(|op| op.products.insert(product.to_string()))
            .unwrap_or(false)
    }

    /// Sweep when the sweep interval has elapsed.
    pub fn maybe_sweep(&mut self, now: Instant) -> usize {
        if now.saturating_duration_since(self.last_sweep) < self.policy.sweep_interval {
            return 0;
        }
        self.sweep(now)
    }

    /// Drop operations idle for longer than the inactivity timeout.
    pub fn sweep(&mut self, now: Instant) -> usize {
        self.last_sweep = now;
        let timeout = self.policy.inactivity_timeout;
        let before = self.operations.len();
        self.operations.retain(|op| {
            let keep = op.is_live(now, timeout);
            if !keep {
                debug!(
                    "Split operation {} expired after {:?}",
                    op.key(),
                    now.saturating_duration_since(op.started_at)
                );
            }
            keep
        });
        before - self.operations.len()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }
}

//! Shift-closeout noise filter.
//!
//! Closing a shift makes the POS delete or cancel every row it touched, one
//! change-log entry per row. Those deletes are housekeeping, not user actions.
//! The filter suppresses them in two tiers:
//!
//! 1. direct membership: the delete's shift (carried on the row, or learned
//!    earlier from another row of the same bill) has a live closure record;
//! 2. statistical fallback: enough independent burst signals co-occur in the
//!    trailing activity window of the table.
//!
//! Ticket deletes need one signal, line-item deletes need more, so a waiter
//! removing a single item is never swallowed.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bridge_core::{ChangeRecord, Classification, DeleteScope, EventType, TableSpec};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::policy::CloseoutPolicy;

/// Result of running a record through the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Noise(String),
}

impl Verdict {
    pub fn is_noise(&self) -> bool {
        matches!(self, Verdict::Noise(_))
    }
}

/// Burst signals of the statistical tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    SameBillDeletes,
    DistinctBillDeletes,
    BillTransitions,
    RecentShiftClose,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::SameBillDeletes => "same-bill deletes",
            Signal::DistinctBillDeletes => "distinct-bill deletes",
            Signal::BillTransitions => "bill transitions",
            Signal::RecentShiftClose => "recent shift close",
        }
    }
}

/// One observed change: when it was logged, and when this process saw it.
///
/// Signal windows compare change times. Housekeeping uses the observation
/// time, so a backlog read long after the fact is still kept for a full
/// retention period.
#[derive(Debug, Clone, Copy)]
struct Stamp {
    changed_at: DateTime<Utc>,
    seen: Instant,
}

impl Stamp {
    fn is_stale(&self, now: Instant, retention: Duration) -> bool {
        now.saturating_duration_since(self.seen) > retention
    }
}

#[derive(Debug, Default)]
struct TableActivity {
    deletes: VecDeque<(Stamp, Option<String>)>,
    transitions: VecDeque<Stamp>,
}

impl TableActivity {
    fn trim(&mut self, now: Instant, retention: Duration) {
        while self
            .deletes
            .front()
            .is_some_and(|(stamp, _)| stamp.is_stale(now, retention))
        {
            self.deletes.pop_front();
        }
        while self
            .transitions
            .front()
            .is_some_and(|stamp| stamp.is_stale(now, retention))
        {
            self.transitions.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct ShiftClosureFilter {
    policy: CloseoutPolicy,
    /// shift id -> closing change
    closures: HashMap<String, Stamp>,
    /// folio -> (shift id, last seen)
    bill_shifts: HashMap<String, (String, Instant)>,
    shift_closes: VecDeque<Stamp>,
    activity: HashMap<String, TableActivity>,
}

/// Whether a row closes a shift.
pub fn is_shift_closing(table: &TableSpec, record: &ChangeRecord) -> bool {
    match record.classification() {
        Classification::ShiftClosed => true,
        Classification::Closed => table.event_type == EventType::Shift,
        _ => false,
    }
}

/// Absolute distance between two change times.
fn gap(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    (a - b).abs().to_std().unwrap_or(Duration::MAX)
}

impl ShiftClosureFilter {
    pub fn new(policy: CloseoutPolicy) -> Self {
        Self {
            policy,
            closures: HashMap::new(),
            bill_shifts: HashMap::new(),
            shift_closes: VecDeque::new(),
            activity: HashMap::new(),
        }
    }

    /// Feed one record, logged at `changed_at`, into the activity window.
    ///
    /// Callers observe a whole batch before evaluating any of it.
    pub fn observe(
        &mut self,
        table: &TableSpec,
        record: &ChangeRecord,
        changed_at: DateTime<Utc>,
        seen: Instant,
    ) {
        let stamp = Stamp { changed_at, seen };
        let classification = record.classification();
        let folio = record.folio();
        let shift = record.shift_id();

        if let (Some(folio), Some(shift)) = (&folio, &shift) {
            if table.event_type != EventType::Shift {
                self.bill_shifts
                    .insert(folio.clone(), (shift.clone(), seen));
            }
        }

        if is_shift_closing(table, record) {
            self.shift_closes.push_back(stamp);
            match &shift {
                Some(shift) => {
                    if self.closures.insert(shift.clone(), stamp).is_none() {
                        info!("Shift {} closure detected in {}", shift, table.name);
                    }
                }
                None => info!(
                    "Shift closure without shift id detected in {} (row {})",
                    table.name, record.id
                ),
            }
            return;
        }

        let activity = self.activity.entry(table.name.clone()).or_default();
        if classification.is_delete() {
            activity.deletes.push_back((stamp, folio));
        } else if classification.is_bill_transition() && table.event_type != EventType::Shift {
            activity.transitions.push_back(stamp);
        }
    }

    /// Classify a record logged at `changed_at`. `in_split` marks rows covered
    /// by a live split operation; they skip the statistical tier but not
    /// direct membership.
    pub fn evaluate(
        &self,
        table: &TableSpec,
        record: &ChangeRecord,
        in_split: bool,
        changed_at: DateTime<Utc>,
    ) -> Verdict {
        if table.delete_scope == DeleteScope::Exempt || !record.classification().is_delete() {
            return Verdict::Pass;
        }

        let folio = record.folio();
        if let Some(shift) = self.resolve_shift(record, folio.as_deref()) {
            if self.is_closed(&shift, changed_at) {
                return Verdict::Noise(format!("shift {shift} closed"));
            }
        }

        if in_split {
            return Verdict::Pass;
        }

        let signals = self.signals(table, folio.as_deref(), changed_at);
        let required = match table.delete_scope {
            DeleteScope::Ticket => self.policy.ticket_min_signals,
            _ => self.policy.line_min_signals,
        };
        if signals.len() >= required {
            let names: Vec<&str> = signals.iter().map(Signal::as_str).collect();
            debug!(
                "{}#{} matched {} closeout signals: {:?}",
                table.name,
                record.id,
                signals.len(),
                names
            );
            return Verdict::Noise(format!("closeout burst ({})", names.join(", ")));
        }
        Verdict::Pass
    }

    /// Statistical signals raised for a delete on `folio` logged at
    /// `changed_at`. Each window spans both sides of that time, so the rest
    /// of a burst read in the same batch counts too.
    pub fn signals(
        &self,
        table: &TableSpec,
        folio: Option<&str>,
        changed_at: DateTime<Utc>,
    ) -> Vec<Signal> {
        let p = &self.policy;
        let mut raised = Vec::new();
        let within = |stamp: &Stamp, window: Duration| gap(changed_at, stamp.changed_at) <= window;

        if let Some(activity) = self.activity.get(&table.name) {
            if let Some(folio) = folio {
                let same_bill = activity
                    .deletes
                    .iter()
                    .filter(|(at, bill)| within(at, p.same_bill_window) && bill.as_deref() == Some(folio))
                    .count();
                if same_bill > p.same_bill_threshold {
                    raised.push(Signal::SameBillDeletes);
                }
            }

            let mut bills: Vec<&str> = activity
                .deletes
                .iter()
                .filter(|(at, _)| within(at, p.distinct_bills_window))
                .filter_map(|(_, bill)| bill.as_deref())
                .collect();
            bills.sort_unstable();
            bills.dedup();
            if bills.len() > p.distinct_bills_threshold {
                raised.push(Signal::DistinctBillDeletes);
            }

            let transitions = activity
                .transitions
                .iter()
                .filter(|at| within(*at, p.transitions_window))
                .count();
            if transitions > p.transitions_threshold {
                raised.push(Signal::BillTransitions);
            }
        }

        if self
            .shift_closes
            .iter()
            .any(|at| within(at, p.shift_close_lookback))
        {
            raised.push(Signal::RecentShiftClose);
        }
        raised
    }

    /// Whether `shift` closed within the closure TTL of `changed_at`.
    pub fn is_closed(&self, shift: &str, changed_at: DateTime<Utc>) -> bool {
        self.closures
            .get(shift)
            .is_some_and(|closed| gap(changed_at, closed.changed_at) < self.policy.closure_ttl)
    }

    /// Drop closures and activity observed longer ago than they can matter.
    pub fn expire(&mut self, now: Instant) -> usize {
        let ttl = self.policy.closure_ttl;
        let before = self.closures.len();
        self.closures.retain(|_, stamp| !stamp.is_stale(now, ttl));
        self.bill_shifts
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) < ttl);
        let retention = self.policy.retention();
        while self
            .shift_closes
            .front()
            .is_some_and(|stamp| stamp.is_stale(now, retention))
        {
            self.shift_closes.pop_front();
        }
        for activity in self.activity.values_mut() {
            activity.trim(now, retention);
        }
        before - self.closures.len()
    }

    pub fn clear(&mut self) {
        self.closures.clear();
        self.bill_shifts.clear();
        self.shift_closes.clear();
        self.activity.clear();
    }

    fn resolve_shift(&self, record: &ChangeRecord, folio: Option<&str>) -> Option<String> {
        record.shift_id().or_else(|| {
            folio
                .and_then(|f| self.bill_shifts.get(f))
                .map(|(shift, _)| shift.clone())
        })
    }
}

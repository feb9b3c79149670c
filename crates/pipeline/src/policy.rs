//! Tunable thresholds and time windows.
//!
//! Every heuristic constant the pipeline uses lives here so it can be tuned
//! from a policy file and unit-tested without a scan loop.

use std::time::Duration;

/// Shift-closeout noise detection.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseoutPolicy {
    /// How long a detected shift closure suppresses deletes tied to that shift.
    pub closure_ttl: Duration,
    /// Signal (a): deletes for one bill within this window...
    pub same_bill_window: Duration,
    /// ...strictly above this count.
    pub same_bill_threshold: usize,
    /// Signal (b): distinct bills with deletes, table-wide, within this window...
    pub distinct_bills_window: Duration,
    /// ...strictly above this count.
    pub distinct_bills_threshold: usize,
    /// Signal (c): closed/paid transitions, table-wide, within this window...
    pub transitions_window: Duration,
    /// ...strictly above this count.
    pub transitions_threshold: usize,
    /// Signal (d): any shift-closing mutation within this lookback.
    pub shift_close_lookback: Duration,
    /// Signals required to suppress a whole-ticket delete.
    pub ticket_min_signals: usize,
    /// Signals required to suppress a line-item delete.
    pub line_min_signals: usize,
}

impl Default for CloseoutPolicy {
    fn default() -> Self {
        Self {
            closure_ttl: Duration::from_secs(10 * 60),
            same_bill_window: Duration::from_secs(10),
            same_bill_threshold: 3,
            distinct_bills_window: Duration::from_secs(10),
            distinct_bills_threshold: 3,
            transitions_window: Duration::from_secs(30),
            transitions_threshold: 10,
            shift_close_lookback: Duration::from_secs(5 * 60),
            ticket_min_signals: 1,
            line_min_signals: 2,
        }
    }
}

impl CloseoutPolicy {
    /// Longest window any signal looks back over; activity older than this is dropped.
    pub fn retention(&self) -> Duration {
        [
            self.same_bill_window,
            self.distinct_bills_window,
            self.transitions_window,
            self.shift_close_lookback,
        ]
        .into_iter()
        .max()
        .unwrap_or_default()
    }
}

/// Bill-split correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPolicy {
    pub inactivity_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Per-table deduplication cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupPolicy {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            capacity: 10_000,
        }
    }
}

impl DedupPolicy {
    /// Expired entries are swept at half the TTL.
    pub fn sweep_interval(&self) -> Duration {
        self.ttl / 2
    }
}

/// Adaptive polling interval.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerPolicy {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub step: Duration,
    /// Consecutive empty cycles before the interval grows.
    pub empty_cycles_before_backoff: u32,
    /// Rows fetched per table per cycle.
    pub batch_size: usize,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            step: Duration::from_millis(500),
            empty_cycles_before_backoff: 2,
            batch_size: 20,
        }
    }
}

/// Everything the pipeline can be tuned with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeuristicPolicy {
    pub closeout: CloseoutPolicy,
    pub split: SplitPolicy,
    pub dedup: DedupPolicy,
    pub scheduler: SchedulerPolicy,
}

impl HeuristicPolicy {
    /// Reject combinations the scheduler and caches cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        let s = &self.scheduler;
        if s.min_interval.is_zero() {
            return Err("scheduler min_interval must be greater than zero".to_string());
        }
        if s.min_interval > s.max_interval {
            return Err(format!(
                "scheduler min_interval ({:?}) exceeds max_interval ({:?})",
                s.min_interval, s.max_interval
            ));
        }
        if s.batch_size == 0 {
            return Err("scheduler batch_size must be at least 1".to_string());
        }
        if self.dedup.capacity == 0 {
            return Err("dedup capacity must be at least 1".to_string());
        }
        if self.dedup.ttl.is_zero() {
            return Err("dedup ttl must be greater than zero".to_string());
        }
        if self.closeout.ticket_min_signals == 0 || self.closeout.line_min_signals == 0 {
            return Err("closeout signal minimums must be at least 1".to_string());
        }
        Ok(())
    }
}

//! Detection, deduplication, correlation and publication pipeline.
//!
//! The pieces, leaves first:
//!
//! - [`dedup::DedupCache`]: bounded per-table fingerprint cache
//! - [`split::SplitTracker`]: correlates the bills of one split operation
//! - [`shift::ShiftClosureFilter`]: recognises shift-closeout delete bursts
//! - [`processor::TableProcessor`]: scan, filter, publish, write back for one table
//! - [`scheduler::Scheduler`]: the adaptive polling loop over all processors
//!
//! All heuristics are tuned through [`policy::HeuristicPolicy`], and all
//! process-local state lives in one [`state::PipelineState`].

pub mod dedup;
pub mod error;
pub mod message;
pub mod policy;
pub mod processor;
pub mod scheduler;
pub mod shift;
pub mod split;
pub mod state;
pub mod testing;
pub mod watermark;

pub use error::ProcessError;
pub use policy::{CloseoutPolicy, DedupPolicy, HeuristicPolicy, SchedulerPolicy, SplitPolicy};
pub use processor::{CycleReport, TableProcessor};
pub use scheduler::{AdaptiveInterval, CycleSummary, Scheduler};
pub use state::PipelineState;
pub use watermark::WatermarkCheckpoint;

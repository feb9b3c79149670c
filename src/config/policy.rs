//! Heuristic policy file.
//!
//! Every key is optional; anything left out keeps its default. Durations are
//! written as strings (`"10s"`, `"5m"`, `"500ms"`).
//!
//! ```toml
//! [closeout]
//! closure_ttl = "10m"
//! distinct_bills_threshold = 3
//!
//! [dedup]
//! ttl = "5m"
//! capacity = 10000
//!
//! [scheduler]
//! min_interval = "500ms"
//! max_interval = "5s"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use pos_bridge_pipeline::HeuristicPolicy;
use serde::Deserialize;
use tracing::info;

use super::duration::parse_duration;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    #[serde(default)]
    pub closeout: CloseoutSection,
    #[serde(default)]
    pub split: SplitSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseoutSection {
    pub closure_ttl: Option<String>,
    pub same_bill_window: Option<String>,
    pub same_bill_threshold: Option<usize>,
    pub distinct_bills_window: Option<String>,
    pub distinct_bills_threshold: Option<usize>,
    pub transitions_window: Option<String>,
    pub transitions_threshold: Option<usize>,
    pub shift_close_lookback: Option<String>,
    pub ticket_min_signals: Option<usize>,
    pub line_min_signals: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitSection {
    pub inactivity_timeout: Option<String>,
    pub sweep_interval: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupSection {
    pub ttl: Option<String>,
    pub capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    pub min_interval: Option<String>,
    pub max_interval: Option<String>,
    pub step: Option<String>,
    pub empty_cycles_before_backoff: Option<u32>,
    pub batch_size: Option<usize>,
}

fn set_duration(target: &mut Duration, value: &Option<String>, key: &str) -> anyhow::Result<()> {
    if let Some(raw) = value {
        *target = parse_duration(raw).with_context(|| format!("Invalid value for {key}"))?;
    }
    Ok(())
}

fn set<T: Copy>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

impl PolicyFile {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse policy file")
    }

    /// Overlay the file's settings on `base`.
    pub fn apply(&self, mut base: HeuristicPolicy) -> anyhow::Result<HeuristicPolicy> {
        let c = &self.closeout;
        let p = &mut base.closeout;
        set_duration(&mut p.closure_ttl, &c.closure_ttl, "closeout.closure_ttl")?;
        set_duration(&mut p.same_bill_window, &c.same_bill_window, "closeout.same_bill_window")?;
        set(&mut p.same_bill_threshold, c.same_bill_threshold);
        set_duration(
            &mut p.distinct_bills_window,
            &c.distinct_bills_window,
            "closeout.distinct_bills_window",
        )?;
        set(&mut p.distinct_bills_threshold, c.distinct_bills_threshold);
        set_duration(
            &mut p.transitions_window,
            &c.transitions_window,
            "closeout.transitions_window",
        )?;
        set(&mut p.transitions_threshold, c.transitions_threshold);
        set_duration(
            &mut p.shift_close_lookback,
            &c.shift_close_lookback,
            "closeout.shift_close_lookback",
        )?;
        set(&mut p.ticket_min_signals, c.ticket_min_signals);
        set(&mut p.line_min_signals, c.line_min_signals);

        set_duration(
            &mut base.split.inactivity_timeout,
            &self.split.inactivity_timeout,
            "split.inactivity_timeout",
        )?;
        set_duration(
            &mut base.split.sweep_interval,
            &self.split.sweep_interval,
            "split.sweep_interval",
        )?;

        set_duration(&mut base.dedup.ttl, &self.dedup.ttl, "dedup.ttl")?;
        set(&mut base.dedup.capacity, self.dedup.capacity);

        let s = &self.scheduler;
        let p = &mut base.scheduler;
        set_duration(&mut p.min_interval, &s.min_interval, "scheduler.min_interval")?;
        set_duration(&mut p.max_interval, &s.max_interval, "scheduler.max_interval")?;
        set_duration(&mut p.step, &s.step, "scheduler.step")?;
        set(&mut p.empty_cycles_before_backoff, s.empty_cycles_before_backoff);
        set(&mut p.batch_size, s.batch_size);

        Ok(base)
    }
}

/// Defaults, overlaid with `path` when given, validated.
pub fn load_policy(path: Option<&Path>) -> anyhow::Result<HeuristicPolicy> {
    let policy = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read policy file {}", path.display()))?;
            let policy = PolicyFile::parse(&content)
                .and_then(|file| file.apply(HeuristicPolicy::default()))
                .with_context(|| format!("Invalid policy file {}", path.display()))?;
            info!("Loaded heuristic policy from {}", path.display());
            policy
        }
        None => HeuristicPolicy::default(),
    };
    policy.validate().map_err(anyhow::Error::msg)?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = PolicyFile::parse(
            r#"
            [closeout]
            distinct_bills_threshold = 8
            same_bill_window = "15s"

            [scheduler]
            min_interval = "250ms"
            batch_size = 50
            "#,
        )
        .unwrap();
        let policy = file.apply(HeuristicPolicy::default()).unwrap();
        let defaults = HeuristicPolicy::default();

        assert_eq!(policy.closeout.distinct_bills_threshold, 8);
        assert_eq!(policy.closeout.same_bill_window, Duration::from_secs(15));
        assert_eq!(policy.closeout.closure_ttl, defaults.closeout.closure_ttl);
        assert_eq!(policy.scheduler.min_interval, Duration::from_millis(250));
        assert_eq!(policy.scheduler.batch_size, 50);
        assert_eq!(policy.dedup, defaults.dedup);
        assert_eq!(policy.split, defaults.split);
    }

    #[test]
    fn test_unknown_keys_and_bad_durations_rejected() {
        assert!(PolicyFile::parse("[dedup]\nttl_seconds = 3").is_err());
        assert!(PolicyFile::parse("[cache]\nttl = \"3s\"").is_err());

        let file = PolicyFile::parse("[dedup]\nttl = \"soon\"").unwrap();
        let err = file.apply(HeuristicPolicy::default()).unwrap_err();
        assert!(format!("{err:#}").contains("dedup.ttl"));
    }

    #[test]
    fn test_load_policy_validates() {
        assert_eq!(load_policy(None).unwrap(), HeuristicPolicy::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nmin_interval = \"10s\"\nmax_interval = \"1s\"").unwrap();
        let err = load_policy(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        assert!(load_policy(Some(Path::new("/nonexistent/policy.toml"))).is_err());
    }
}

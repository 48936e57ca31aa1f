use crate::core::{GpuType, JobId, INF, TOL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A runnable configuration for one job: GPU type, whole-GPU count and the
/// per-GPU fraction in (0, 1].
///
/// The fraction is keyed in thousandths so setups are hashable and totally
/// ordered; `frac()` exposes the floating-point value used by the resource
/// arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Setup {
    pub gpu_type: GpuType,
    pub gpus: u32,
    frac_milli: u32,
}

impl Setup {
    pub fn new(gpu_type: impl Into<GpuType>, gpus: u32, frac: f64) -> Self {
        Self {
            gpu_type: gpu_type.into(),
            gpus,
            frac_milli: (frac * 1000.0).round() as u32,
        }
    }

    pub fn frac(&self) -> f64 {
        self.frac_milli as f64 / 1000.0
    }

    pub fn is_fractional(&self) -> bool {
        self.frac_milli < 1000
    }
}

type SetupTimes = HashMap<Setup, f64>;

/// Expected execution times indexed by (job, setup), with an optional
/// parallel table of real times for stochastic runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeTable {
    times: HashMap<JobId, SetupTimes>,
    real: Option<HashMap<JobId, SetupTimes>>,
}

impl TimeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_real_times() -> Self {
        Self {
            times: HashMap::new(),
            real: Some(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn has_real_times(&self) -> bool {
        self.real.is_some()
    }

    pub fn insert(&mut self, job: impl Into<JobId>, setup: Setup, seconds: f64) {
        self.times.entry(job.into()).or_default().insert(setup, seconds);
    }

    pub fn insert_real(&mut self, job: impl Into<JobId>, setup: Setup, seconds: f64) {
        self.real
            .get_or_insert_with(HashMap::new)
            .entry(job.into())
            .or_default()
            .insert(setup, seconds);
    }

    pub fn setups(&self, job: &str) -> Option<&SetupTimes> {
        self.times.get(job)
    }

    pub fn time(&self, job: &str, setup: &Setup) -> Option<f64> {
        self.times.get(job).and_then(|m| m.get(setup)).copied()
    }

    pub fn real_time(&self, job: &str, setup: &Setup) -> Option<f64> {
        self.real
            .as_ref()
            .and_then(|t| t.get(job))
            .and_then(|m| m.get(setup))
            .copied()
    }

    /// Fastest configuration for a job; infinite when the job is unknown.
    pub fn min_exec(&self, job: &str) -> f64 {
        self.times
            .get(job)
            .map(|m| m.values().copied().fold(INF, f64::min))
            .unwrap_or(INF)
    }

    /// Slowest configuration for a job (skipping decayed-out entries).
    pub fn max_exec(&self, job: &str) -> f64 {
        self.times
            .get(job)
            .map(|m| {
                m.values()
                    .copied()
                    .filter(|t| t.is_finite())
                    .fold(0.0, f64::max)
            })
            .unwrap_or(0.0)
    }

    /// Scale every entry of a partially completed job by the share of work
    /// left after this step. Entries that decay to nothing are re-seeded from
    /// the real table when one exists, and become infinite otherwise so the
    /// job can no longer be placed through them.
    pub fn decay(&mut self, job: &str, cp_step: f64, ratio_avg: f64) {
        let real = self.real.as_ref().and_then(|t| t.get(job)).cloned();
        let Some(entries) = self.times.get_mut(job) else {
            return;
        };
        for (setup, t) in entries.iter_mut() {
            let scaled = *t * (100.0 - cp_step) / 100.0;
            if scaled > TOL {
                *t = scaled;
            } else {
                *t = match real.as_ref().and_then(|r| r.get(setup)) {
                    Some(rt) if ratio_avg > 0.0 => ratio_avg * rt,
                    _ => INF,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TimeTable {
        let mut t = TimeTable::new();
        t.insert("j1", Setup::new("A100", 2, 1.0), 100.0);
        t.insert("j1", Setup::new("A100", 4, 1.0), 60.0);
        t.insert("j1", Setup::new("V100", 1, 0.5), 250.0);
        t
    }

    #[test]
    fn test_setup_equality_includes_fraction() {
        assert_ne!(Setup::new("A100", 1, 0.5), Setup::new("A100", 1, 1.0));
        assert_eq!(Setup::new("A100", 1, 0.5), Setup::new("A100", 1, 0.5));
        assert!((Setup::new("T4", 1, 0.25).frac() - 0.25).abs() < TOL);
    }

    #[test]
    fn test_min_max_exec() {
        let t = table();
        assert_eq!(t.min_exec("j1"), 60.0);
        assert_eq!(t.max_exec("j1"), 250.0);
        assert_eq!(t.min_exec("missing"), INF);
        assert_eq!(t.max_exec("missing"), 0.0);
    }

    #[test]
    fn test_decay_scales_entries() {
        let mut t = table();
        t.decay("j1", 30.0, 0.0);
        assert_eq!(t.time("j1", &Setup::new("A100", 2, 1.0)), Some(70.0));
        assert_eq!(t.time("j1", &Setup::new("A100", 4, 1.0)), Some(42.0));
    }

    #[test]
    fn test_decay_to_zero_becomes_infinite_without_real_table() {
        let mut t = table();
        t.decay("j1", 100.0, 0.0);
        assert_eq!(t.time("j1", &Setup::new("A100", 2, 1.0)), Some(INF));
        assert_eq!(t.min_exec("j1"), INF);
        assert_eq!(t.max_exec("j1"), 0.0);
    }

    #[test]
    fn test_decay_to_zero_reseeds_from_real_table() {
        let mut t = table();
        t.insert_real("j1", Setup::new("A100", 2, 1.0), 120.0);
        t.insert_real("j1", Setup::new("A100", 4, 1.0), 80.0);
        t.insert_real("j1", Setup::new("V100", 1, 0.5), 300.0);
        t.decay("j1", 100.0, 0.9);
        assert_eq!(t.time("j1", &Setup::new("A100", 2, 1.0)), Some(108.0));
        assert_eq!(t.time("j1", &Setup::new("A100", 4, 1.0)), Some(72.0));
    }
}

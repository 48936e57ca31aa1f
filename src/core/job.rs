use crate::core::JobId;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A batch job competing for GPUs.
///
/// Static attributes come from the job list at load time; `min_exec_time`,
/// `max_exec_time` and `pressure` are derived fields refreshed from the
/// execution-time table at every scheduling instant. `epochs`,
/// `current_gpus`, `current_gpu_frac` and `rescheduling_time` are only
/// advanced in stochastic runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub id: JobId,
    pub submission_time: f64,
    pub deadline: f64,
    pub tardiness_weight: f64,
    pub min_exec_time: f64,
    pub max_exec_time: f64,
    /// Ratio between nominal and average real execution time (stochastic mode).
    pub ratio_avg: f64,
    pub max_epochs: f64,
    pub epochs: f64,
    pub distribution: CompactString,
    pub current_gpus: u32,
    pub current_gpu_frac: f64,
    pub rescheduling_time: f64,
    /// `current_time + min_exec_time - deadline`, weighted when positive.
    pub pressure: f64,
}

impl Job {
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    /// Refresh the cached urgency of this job. Jobs already past the point
    /// where even their fastest setup misses the deadline get their pressure
    /// amplified by the tardiness weight.
    pub fn update_pressure(&mut self, current_time: f64) {
        let p = current_time + self.min_exec_time - self.deadline;
        self.pressure = if p > 0.0 {
            p * self.tardiness_weight
        } else {
            p
        };
    }

    /// Advance the completed epochs by a fraction of the remaining ones.
    pub fn advance_epochs(&mut self, fraction: f64) {
        self.epochs += (self.max_epochs - self.epochs) * fraction;
    }
}

/// Equality and hashing key on jobs is the id alone, so ordering helpers
/// all fall back to the id to keep sorts total and deterministic.
impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Job {}

fn then_by_id(ord: Ordering, a: &Job, b: &Job) -> Ordering {
    ord.then_with(|| a.id.cmp(&b.id))
}

/// FIFO order: ascending submission time.
pub fn by_submission_time(a: &Job, b: &Job) -> Ordering {
    then_by_id(a.submission_time.total_cmp(&b.submission_time), a, b)
}

/// EDF order: ascending deadline.
pub fn by_deadline(a: &Job, b: &Job) -> Ordering {
    then_by_id(a.deadline.total_cmp(&b.deadline), a, b)
}

/// Priority order: descending tardiness weight.
pub fn by_tardiness_weight(a: &Job, b: &Job) -> Ordering {
    then_by_id(b.tardiness_weight.total_cmp(&a.tardiness_weight), a, b)
}

/// Greedy order: descending pressure.
pub fn by_pressure(a: &Job, b: &Job) -> Ordering {
    then_by_id(b.pressure.total_cmp(&a.pressure), a, b)
}

/// Id-indexed view of a job set, used wherever schedules (keyed by id) need
/// the job attributes back.
pub type JobMap = HashMap<JobId, Job>;

pub fn index_jobs(jobs: &[Job]) -> JobMap {
    jobs.iter().map(|j| (j.id.clone(), j.clone())).collect()
}

#[derive(Default)]
pub struct JobBuilder {
    id: Option<JobId>,
    submission_time: f64,
    deadline: f64,
    tardiness_weight: f64,
    ratio_avg: f64,
    max_epochs: f64,
    distribution: Option<CompactString>,
}

impl JobBuilder {
    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn submission_time(mut self, t: f64) -> Self {
        self.submission_time = t;
        self
    }

    pub fn deadline(mut self, d: f64) -> Self {
        self.deadline = d;
        self
    }

    pub fn tardiness_weight(mut self, w: f64) -> Self {
        self.tardiness_weight = w;
        self
    }

    pub fn ratio_avg(mut self, r: f64) -> Self {
        self.ratio_avg = r;
        self
    }

    pub fn max_epochs(mut self, e: f64) -> Self {
        self.max_epochs = e;
        self
    }

    pub fn distribution(mut self, d: impl Into<CompactString>) -> Self {
        self.distribution = Some(d.into());
        self
    }

    pub fn build(self) -> Job {
        Job {
            id: self.id.unwrap_or_default(),
            submission_time: self.submission_time,
            deadline: self.deadline,
            tardiness_weight: self.tardiness_weight,
            ratio_avg: self.ratio_avg,
            max_epochs: self.max_epochs,
            distribution: self.distribution.unwrap_or_default(),
            ..Job::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, deadline: f64, weight: f64) -> Job {
        Job::builder()
            .id(id)
            .deadline(deadline)
            .tardiness_weight(weight)
            .build()
    }

    #[test]
    fn test_pressure_weighted_only_when_positive() {
        let mut j = job("j1", 100.0, 3.0);
        j.min_exec_time = 40.0;

        j.update_pressure(0.0);
        assert_eq!(j.pressure, -60.0);

        j.update_pressure(80.0);
        // 80 + 40 - 100 = 20, amplified by the weight
        assert_eq!(j.pressure, 60.0);
    }

    #[test]
    fn test_orderings_break_ties_by_id() {
        let a = job("a", 50.0, 1.0);
        let b = job("b", 50.0, 1.0);
        assert_eq!(by_deadline(&a, &b), Ordering::Less);
        assert_eq!(by_tardiness_weight(&b, &a), Ordering::Greater);
    }

    #[test]
    fn test_pressure_sort_is_descending() {
        let mut hot = job("hot", 10.0, 2.0);
        hot.min_exec_time = 50.0;
        hot.update_pressure(0.0);
        let mut cold = job("cold", 500.0, 2.0);
        cold.min_exec_time = 50.0;
        cold.update_pressure(0.0);

        let mut queue = vec![cold.clone(), hot.clone()];
        queue.sort_by(by_pressure);
        assert_eq!(queue[0].id, "hot");
    }

    #[test]
    fn test_advance_epochs_converges_to_max() {
        let mut j = Job::builder().id("j").max_epochs(100.0).build();
        j.advance_epochs(0.5);
        assert_eq!(j.epochs, 50.0);
        j.advance_epochs(0.5);
        assert_eq!(j.epochs, 75.0);
        j.advance_epochs(1.0);
        assert_eq!(j.epochs, 100.0);
    }
}

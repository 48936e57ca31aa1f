use crate::core::resources::ResourceMap;
use crate::core::schedule::Schedule;
use crate::core::{JobId, INF};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every job's schedule at one scheduling instant, together with the
/// resource-map snapshot the schedules were placed against.
///
/// Solutions own their snapshot: the engine and the local search mutate
/// candidate solutions freely, and only the one the simulator commits ever
/// influences the live cluster state. The schedule map is ordered by job id
/// so iteration (and therefore every floating-point accumulation over it)
/// is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Solution {
    schedule: BTreeMap<JobId, Schedule>,
    resources: ResourceMap,
    first_finish_time: f64,
    current_time: f64,
}

impl Solution {
    pub fn new(
        schedule: BTreeMap<JobId, Schedule>,
        resources: ResourceMap,
        current_time: f64,
    ) -> Self {
        let mut solution = Self {
            schedule,
            resources,
            first_finish_time: INF,
            current_time,
        };
        solution.recompute_first_finish_time();
        solution
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    pub fn schedule(&self) -> &BTreeMap<JobId, Schedule> {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut BTreeMap<JobId, Schedule> {
        &mut self.schedule
    }

    pub fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceMap {
        &mut self.resources
    }

    pub fn first_finish_time(&self) -> f64 {
        self.first_finish_time
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Minimum selected time across non-empty schedules; must be called
    /// after any mutation that changes an assignment.
    pub fn recompute_first_finish_time(&mut self) {
        self.first_finish_time = self
            .schedule
            .values()
            .filter(|s| !s.is_empty())
            .map(Schedule::selected_time)
            .fold(INF, f64::min);
    }

    pub fn used_gpus(&self, gpu_type: &str, node_id: &str) -> u32 {
        self.resources.used_gpus(gpu_type, node_id)
    }

    pub fn compute_node_cost(&self, elapsed: f64) -> f64 {
        self.resources.compute_node_cost(elapsed)
    }
}

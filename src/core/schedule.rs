use crate::core::resources::Placement;
use crate::core::{GpuType, NodeId, INF, TOL};
use serde::{Deserialize, Serialize};

/// Where a job runs and how fast it is expected to finish there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub node: NodeId,
    pub gpu_type: GpuType,
    /// Expected execution time of the selected setup at assignment time.
    pub selected_time: f64,
    pub gpus: u32,
    pub gpu_frac: f64,
    /// Within-node shared-GPU index for fractional assignments.
    pub gpu_index: Option<u32>,
}

/// One job's slice of a solution: the (possibly absent) assignment plus the
/// bookkeeping the simulator and the proxy cost fill in.
///
/// An empty schedule (no assignment) is how resource exhaustion and
/// decayed-out execution times are absorbed; it is never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    assignment: Option<Assignment>,
    pub iter: u32,
    pub sim_time: f64,
    pub execution_time: f64,
    pub completion_percent: f64,
    /// Completion achieved in the current scheduling window alone.
    pub cp_step: f64,
    pub start_time: f64,
    pub finish_time: f64,
    pub tardiness: f64,
    pub gpu_cost: f64,
    pub tardiness_cost: f64,
}

impl Schedule {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_assignment(assignment: Assignment) -> Self {
        Self {
            assignment: Some(assignment),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assignment.is_none()
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    pub fn assignment_mut(&mut self) -> Option<&mut Assignment> {
        self.assignment.as_mut()
    }

    pub fn selected_time(&self) -> f64 {
        self.assignment.as_ref().map_or(INF, |a| a.selected_time)
    }

    pub fn set_tardiness(&mut self, tardiness: f64) {
        self.tardiness = tardiness;
        if tardiness < TOL {
            self.tardiness_cost = 0.0;
        }
    }

    /// GPU energy cost of this schedule for its current execution time,
    /// given how many GPUs are busy on the host node and the unit price for
    /// that occupancy.
    pub fn compute_gpu_cost(&mut self, used_on_node: u32, unit_cost: f64) {
        let Some(a) = &self.assignment else {
            return;
        };
        if used_on_node == 0 {
            self.gpu_cost = 0.0;
            return;
        }
        self.gpu_cost = self.execution_time * unit_cost / 3600.0 * a.gpus as f64
            / used_on_node as f64
            * a.gpu_frac;
    }

    pub fn compute_tardiness_cost(&mut self, weight: f64) {
        if self.assignment.is_some() {
            self.tardiness_cost = self.tardiness * weight;
        }
    }

    /// The placement to hand back to the resource map on release.
    pub fn placement(&self) -> Option<Placement> {
        self.assignment.as_ref().map(|a| Placement {
            node: a.node.clone(),
            gpu_type: a.gpu_type.clone(),
            gpus: a.gpus,
            gpu_frac: a.gpu_frac,
            gpu_index: a.gpu_index,
        })
    }
}

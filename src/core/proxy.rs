use crate::core::catalogue::GpuCatalogue;
use crate::core::elite::CostOrder;
use crate::core::job::JobMap;
use crate::core::solution::Solution;
use serde::{Deserialize, Serialize};

/// Scalar ranking functions over candidate solutions. These are proxies for
/// the real billed cost: monotone in it, cheap to evaluate, and only ever
/// used to compare candidates against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyCost {
    /// GPU energy + node lease + tardiness + worst-case penalties; minimized.
    MinCost,
    /// Accumulated `max_exec / (gpu_cost + tardiness_cost)`; maximized.
    ThroughputMax,
}

impl ProxyCost {
    pub fn order(self) -> CostOrder {
        match self {
            ProxyCost::MinCost => CostOrder::Minimize,
            ProxyCost::ThroughputMax => CostOrder::Maximize,
        }
    }

    /// Score a solution, filling in the per-schedule execution time, GPU
    /// cost, tardiness and tardiness cost as a side effect.
    pub fn evaluate(self, solution: &mut Solution, jobs: &JobMap, catalogue: &GpuCatalogue) -> f64 {
        match self {
            ProxyCost::MinCost => min_cost(solution, jobs, catalogue),
            ProxyCost::ThroughputMax => throughput_max(solution, jobs, catalogue),
        }
    }
}

fn min_cost(solution: &mut Solution, jobs: &JobMap, catalogue: &GpuCatalogue) -> f64 {
    let current_time = solution.current_time();
    let elapsed = solution.first_finish_time();
    let sim_time = current_time + elapsed;

    let mut gpu_cost = 0.0;
    let mut tardi_cost = 0.0;
    let mut worst_tardi_cost = 0.0;

    let used: Vec<(crate::core::JobId, Option<(u32, f64)>)> = solution
        .schedule()
        .iter()
        .map(|(id, sch)| {
            let usage = sch.assignment().map(|a| {
                let g = solution.used_gpus(&a.gpu_type, &a.node);
                (g, catalogue.cost(&a.gpu_type, g))
            });
            (id.clone(), usage)
        })
        .collect();

    for (id, usage) in used {
        let Some(job) = jobs.get(&id) else {
            debug_assert!(false, "schedule for unknown job {id}");
            continue;
        };
        let sch = solution.schedule_mut().get_mut(&id).expect("own key");
        match usage {
            Some((g, unit_cost)) => {
                sch.execution_time = elapsed;
                sch.compute_gpu_cost(g, unit_cost);
                gpu_cost += sch.gpu_cost;

                let tardiness = (sim_time - job.deadline).max(0.0);
                sch.set_tardiness(tardiness);
                sch.compute_tardiness_cost(job.tardiness_weight);
                tardi_cost += sch.tardiness_cost;
            }
            None => {
                // postponed job: charge the worst case it can still reach
                let wct = (current_time + job.max_exec_time - job.deadline).max(0.0);
                worst_tardi_cost += 100.0 * wct * job.tardiness_weight;
            }
        }
    }

    let node_cost = solution.compute_node_cost(elapsed);
    tracing::trace!(gpu_cost, node_cost, tardi_cost, worst_tardi_cost, "min-cost proxy");

    gpu_cost + node_cost + tardi_cost + worst_tardi_cost
}

fn throughput_max(solution: &mut Solution, jobs: &JobMap, catalogue: &GpuCatalogue) -> f64 {
    let current_time = solution.current_time();
    let mut time_gain = 0.0;

    let used: Vec<(crate::core::JobId, u32, f64)> = solution
        .schedule()
        .iter()
        .filter_map(|(id, sch)| {
            sch.assignment().map(|a| {
                let g = solution.used_gpus(&a.gpu_type, &a.node);
                (id.clone(), g, catalogue.cost(&a.gpu_type, g))
            })
        })
        .collect();

    for (id, g, unit_cost) in used {
        let Some(job) = jobs.get(&id) else {
            debug_assert!(false, "schedule for unknown job {id}");
            continue;
        };
        let sch = solution.schedule_mut().get_mut(&id).expect("own key");
        let finish_time = sch.selected_time();
        sch.execution_time = finish_time;
        sch.compute_gpu_cost(g, unit_cost);

        let tardiness = (current_time + finish_time - job.deadline).max(0.0);
        sch.set_tardiness(tardiness);
        sch.compute_tardiness_cost(job.tardiness_weight);

        let denom = sch.gpu_cost + sch.tardiness_cost;
        if denom > 0.0 {
            time_gain += job.max_exec_time / denom;
        }
    }

    tracing::trace!(time_gain, "throughput-max proxy");
    time_gain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{index_jobs, Job};
    use crate::core::node::Node;
    use crate::core::resources::ResourceMap;
    use crate::core::schedule::{Assignment, Schedule};
    use crate::core::{JobId, TOL};
    use std::collections::BTreeMap;

    fn catalogue() -> GpuCatalogue {
        let mut c = GpuCatalogue::new();
        c.insert("A100", 1, 3.6);
        c.insert("A100", 2, 7.2);
        c
    }

    fn running_job(id: &str, deadline: f64, weight: f64) -> Job {
        let mut j = Job::builder()
            .id(id)
            .deadline(deadline)
            .tardiness_weight(weight)
            .build();
        j.max_exec_time = 500.0;
        j
    }

    fn one_job_solution(selected_time: f64) -> Solution {
        let mut resources = ResourceMap::from_nodes([Node::new("n1", "A100", 4, 36.0)]);
        resources.assign("A100", 2, 1.0, false, None).unwrap();
        let mut schedule = BTreeMap::new();
        schedule.insert(
            JobId::from("j1"),
            Schedule::with_assignment(Assignment {
                node: "n1".into(),
                gpu_type: "A100".into(),
                selected_time,
                gpus: 2,
                gpu_frac: 1.0,
                gpu_index: None,
            }),
        );
        Solution::new(schedule, resources, 0.0)
    }

    #[test]
    fn test_min_cost_on_time_job_pays_gpu_and_node_only() {
        let jobs = index_jobs(&[running_job("j1", 1000.0, 2.0)]);
        let mut sol = one_job_solution(100.0);
        let cost = ProxyCost::MinCost.evaluate(&mut sol, &jobs, &catalogue());

        // gpu: 100 * 7.2 / 3600 * 2/2 * 1.0 = 0.2; node: 36/h for 100s = 1.0
        assert!((cost - 1.2).abs() < TOL);
        let sch = &sol.schedule()["j1"];
        assert_eq!(sch.tardiness, 0.0);
        assert_eq!(sch.tardiness_cost, 0.0);
    }

    #[test]
    fn test_min_cost_charges_tardiness() {
        let jobs = index_jobs(&[running_job("j1", 40.0, 2.0)]);
        let mut sol = one_job_solution(100.0);
        let cost = ProxyCost::MinCost.evaluate(&mut sol, &jobs, &catalogue());

        // tardiness 60 at weight 2 on top of the 1.2 energy cost
        assert!((cost - 121.2).abs() < TOL);
        assert_eq!(sol.schedule()["j1"].tardiness, 60.0);
    }

    #[test]
    fn test_min_cost_penalizes_postponed_jobs() {
        let jobs = index_jobs(&[running_job("j1", 200.0, 3.0)]);
        let mut schedule = BTreeMap::new();
        schedule.insert(JobId::from("j1"), Schedule::empty());
        let mut sol = Solution::new(schedule, ResourceMap::new(), 0.0);

        let cost = ProxyCost::MinCost.evaluate(&mut sol, &jobs, &catalogue());
        // 100 * max(0 + 500 - 200, 0) * 3
        assert!((cost - 90_000.0).abs() < TOL);
    }

    #[test]
    fn test_throughput_max_accumulates_figure_of_merit() {
        let jobs = index_jobs(&[running_job("j1", 1000.0, 2.0)]);
        let mut sol = one_job_solution(100.0);
        let gain = ProxyCost::ThroughputMax.evaluate(&mut sol, &jobs, &catalogue());

        // gpu cost 0.2, no tardiness: 500 / 0.2 = 2500
        assert!((gain - 2500.0).abs() < TOL);
        assert_eq!(ProxyCost::ThroughputMax.order(), CostOrder::Maximize);
    }
}

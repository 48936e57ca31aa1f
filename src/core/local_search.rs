use crate::core::catalogue::GpuCatalogue;
use crate::core::elite::EliteSet;
use crate::core::engine::{preprocess_jobs, EngineParams};
use crate::core::job::{by_pressure, index_jobs, Job, JobMap};
use crate::core::proxy::ProxyCost;
use crate::core::schedule::{Assignment, Schedule};
use crate::core::solution::Solution;
use crate::core::system::System;
use crate::core::timetable::{Setup, TimeTable};
use crate::core::JobId;

/// Neighbourhood-based improver over an elite pool.
///
/// Each sweep rebuilds the pool: the incumbent best is carried over
/// unconditionally, and every other solution contributes the best
/// strictly-improving neighbour among three moves — tardy-for-expensive
/// swap, tardy-for-low-pressure swap, and postponed-for-running adoption.
/// Candidates are scored against clones of their solution's own resource
/// snapshot; the live cluster state is never touched from here.
pub struct LocalSearch<'a> {
    proxy: ProxyCost,
    ttime: &'a TimeTable,
    catalogue: &'a GpuCatalogue,
    params: &'a EngineParams,
    current_time: f64,
}

/// A schedule slot relevant to the swap moves: who runs where, on what.
#[derive(Debug, Clone)]
struct Slot {
    job: JobId,
    assignment: Assignment,
}

impl<'a> LocalSearch<'a> {
    pub fn new(
        proxy: ProxyCost,
        ttime: &'a TimeTable,
        catalogue: &'a GpuCatalogue,
        params: &'a EngineParams,
        current_time: f64,
    ) -> Self {
        Self {
            proxy,
            ttime,
            catalogue,
            params,
            current_time,
        }
    }

    pub fn improve(&self, elite: &mut EliteSet, system: &System) {
        let mut queue = system.jobs.clone();
        preprocess_jobs(&mut queue, self.ttime, self.current_time);
        queue.sort_by(by_pressure);
        let jobs = index_jobs(&queue);

        for sweep in 0..self.params.ls_iterations {
            if elite.len() <= 1 {
                break;
            }
            tracing::debug!(sweep, pool = elite.len(), "local search sweep");
            self.sweep(elite, &queue, &jobs);
        }
    }

    fn sweep(&self, elite: &mut EliteSet, queue: &[Job], jobs: &JobMap) {
        let mut next = EliteSet::new(elite.capacity(), elite.order());
        let (best_cost, best_solution) = elite.best().expect("non-empty pool").clone();
        next.try_insert(best_cost, best_solution);

        for (cost, solution) in elite.entries().iter().skip(1) {
            let mut best_change: Option<(f64, Solution)> = None;

            let (tardy, expensive) = self.sorted_slots(solution);

            // postponed <-> running adoption
            self.third_neighborhood(solution, queue, *cost, jobs, &mut best_change);

            if !tardy.is_empty() {
                // tardy x expensive swaps
                for s1 in &tardy {
                    for s2 in &expensive {
                        self.try_swap(s1, s2, solution, *cost, jobs, &mut best_change);
                    }
                }
                // tardy x lowest-pressure swaps
                for s1 in &tardy {
                    for j2 in queue.iter().rev() {
                        if j2.id == s1.job {
                            continue;
                        }
                        let Some(sch2) = solution.schedule().get(&j2.id) else {
                            continue;
                        };
                        let Some(a2) = sch2.assignment() else { continue };
                        let s2 = Slot {
                            job: j2.id.clone(),
                            assignment: a2.clone(),
                        };
                        self.try_swap(s1, &s2, solution, *cost, jobs, &mut best_change);
                    }
                }
            }

            if let Some((new_cost, improved)) = best_change {
                tracing::debug!(old = *cost, new = new_cost, "improving neighbour kept");
                next.try_insert(new_cost, improved);
            }
        }

        *elite = next;
    }

    /// Top-k1 running jobs by descending tardiness and, separately, the
    /// top-k1 non-tardy ones by descending GPU cost. Relies on the proxy
    /// having filled both fields when the solution was scored.
    fn sorted_slots(&self, solution: &Solution) -> (Vec<Slot>, Vec<Slot>) {
        let mut tardy: Vec<(f64, Slot)> = Vec::new();
        let mut expensive: Vec<(f64, Slot)> = Vec::new();

        for (id, sch) in solution.schedule() {
            let Some(a) = sch.assignment() else { continue };
            let slot = Slot {
                job: id.clone(),
                assignment: a.clone(),
            };
            if sch.tardiness > 0.0 {
                tardy.push((sch.tardiness, slot));
            } else {
                expensive.push((sch.gpu_cost, slot));
            }
        }

        tardy.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.job.cmp(&b.1.job)));
        expensive.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.job.cmp(&b.1.job)));
        tardy.truncate(self.params.k1);
        expensive.truncate(self.params.k1);

        (
            tardy.into_iter().map(|(_, s)| s).collect(),
            expensive.into_iter().map(|(_, s)| s).collect(),
        )
    }

    /// Swap the placements of two jobs running on different nodes, looking
    /// both up at full-GPU setups, and keep the move when it strictly
    /// improves on the solution and on the best change found so far.
    fn try_swap(
        &self,
        s1: &Slot,
        s2: &Slot,
        solution: &Solution,
        cost: f64,
        jobs: &JobMap,
        best_change: &mut Option<(f64, Solution)>,
    ) {
        if s1.job == s2.job || s1.assignment.node == s2.assignment.node {
            return;
        }
        let a1 = &s1.assignment;
        let a2 = &s2.assignment;
        let Some(time1) = self
            .ttime
            .time(&s1.job, &Setup::new(a2.gpu_type.clone(), a2.gpus, 1.0))
        else {
            return;
        };
        let Some(time2) = self
            .ttime
            .time(&s2.job, &Setup::new(a1.gpu_type.clone(), a1.gpus, 1.0))
        else {
            return;
        };
        if !time1.is_finite() || !time2.is_finite() {
            return;
        }

        let mut schedule = solution.schedule().clone();
        schedule.insert(
            s1.job.clone(),
            Schedule::with_assignment(Assignment {
                node: a2.node.clone(),
                gpu_type: a2.gpu_type.clone(),
                selected_time: time1,
                gpus: a2.gpus,
                gpu_frac: 1.0,
                gpu_index: None,
            }),
        );
        schedule.insert(
            s2.job.clone(),
            Schedule::with_assignment(Assignment {
                node: a1.node.clone(),
                gpu_type: a1.gpu_type.clone(),
                selected_time: time2,
                gpus: a1.gpus,
                gpu_frac: 1.0,
                gpu_index: None,
            }),
        );

        self.consider(schedule, solution, cost, jobs, best_change);
    }

    /// For every postponed job with at least as much pressure as a running
    /// one, hand the runner's whole placement over and postpone the runner.
    fn third_neighborhood(
        &self,
        solution: &Solution,
        queue: &[Job],
        cost: f64,
        jobs: &JobMap,
        best_change: &mut Option<(f64, Solution)>,
    ) {
        for j1 in queue {
            let Some(sch1) = solution.schedule().get(&j1.id) else {
                continue;
            };
            if !sch1.is_empty() {
                continue;
            }
            for j2 in queue.iter().rev() {
                if j1.id == j2.id || j1.pressure < j2.pressure {
                    continue;
                }
                let Some(sch2) = solution.schedule().get(&j2.id) else {
                    continue;
                };
                let Some(a2) = sch2.assignment() else { continue };
                let setup = Setup::new(a2.gpu_type.clone(), a2.gpus, a2.gpu_frac);
                let Some(time1) = self.ttime.time(&j1.id, &setup) else {
                    continue;
                };
                if !time1.is_finite() {
                    continue;
                }

                let mut schedule = solution.schedule().clone();
                schedule.insert(
                    j1.id.clone(),
                    Schedule::with_assignment(Assignment {
                        node: a2.node.clone(),
                        gpu_type: a2.gpu_type.clone(),
                        selected_time: time1,
                        gpus: a2.gpus,
                        gpu_frac: a2.gpu_frac,
                        gpu_index: a2.gpu_index,
                    }),
                );
                schedule.insert(j2.id.clone(), Schedule::empty());

                self.consider(schedule, solution, cost, jobs, best_change);
            }
        }
    }

    /// Score a modified schedule against a clone of the solution's snapshot
    /// and keep it when strictly better than both the original cost and the
    /// best change so far.
    fn consider(
        &self,
        schedule: std::collections::BTreeMap<JobId, Schedule>,
        solution: &Solution,
        cost: f64,
        jobs: &JobMap,
        best_change: &mut Option<(f64, Solution)>,
    ) {
        let order = self.proxy.order();
        let mut candidate = Solution::new(schedule, solution.resources().clone(), self.current_time);
        let new_cost = self.proxy.evaluate(&mut candidate, jobs, self.catalogue);

        let beats_incumbent = match best_change {
            Some((best_cost, _)) => order.is_better(new_cost, *best_cost),
            None => true,
        };
        if order.is_better(new_cost, cost) && beats_incumbent {
            *best_change = Some((new_cost, candidate));
        }
    }
}

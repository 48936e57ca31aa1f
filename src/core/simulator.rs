use crate::core::catalogue::GpuCatalogue;
use crate::core::engine::{preprocess_jobs, run_method, EngineParams, Method};
use crate::core::job::{index_jobs, Job, JobMap};
use crate::core::resources::{Placement, ResourceMap};
use crate::core::solution::Solution;
use crate::core::system::System;
use crate::core::timetable::{Setup, TimeTable};
use crate::core::{JobId, INF, TOL};
use serde::{Deserialize, Serialize};

/// Running totals over a whole simulation. Energy is the sum of the node
/// lease and GPU shares; the grand total adds weighted tardiness on top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_tardiness: f64,
    pub total_tardiness_cost: f64,
    pub total_node_cost: f64,
    pub total_gpu_cost: f64,
    pub total_energy_cost: f64,
    pub total_cost: f64,
}

/// Discrete-event driver: submits jobs as their release times pass, hands
/// the queue to the scheduling engine at every decision instant, accounts
/// completed work against the committed solution, and releases the
/// resources of finished jobs.
pub struct Simulator {
    /// Pending jobs, sorted by submission time.
    jobs: Vec<Job>,
    /// Immutable attributes of every loaded job, for schedule-row lookups
    /// after a job leaves the queue.
    catalog: JobMap,
    resources: ResourceMap,
    ttime: TimeTable,
    catalogue: GpuCatalogue,
    params: EngineParams,
    stochastic: bool,
    current_time: f64,
    old_solution: Solution,
    totals: CostSummary,
}

impl Simulator {
    pub fn from_parts(
        mut jobs: Vec<Job>,
        resources: ResourceMap,
        ttime: TimeTable,
        catalogue: GpuCatalogue,
        params: EngineParams,
        stochastic: bool,
    ) -> Self {
        jobs.sort_by(crate::core::job::by_submission_time);
        let catalog = index_jobs(&jobs);
        Self {
            jobs,
            catalog,
            resources,
            ttime,
            catalogue,
            params,
            stochastic,
            current_time: 0.0,
            old_solution: Solution::default(),
            totals: CostSummary::default(),
        }
    }

    /// All inputs present and non-degenerate; a simulator that is not
    /// initialized declines to run.
    pub fn initialized(&self) -> bool {
        !self.jobs.is_empty()
            && !self.resources.is_empty()
            && !self.ttime.is_empty()
            && !self.catalogue.is_empty()
    }

    pub fn totals(&self) -> &CostSummary {
        &self.totals
    }

    pub fn job_catalog(&self) -> &JobMap {
        &self.catalog
    }

    /// Run the chosen method once over the full job list at `current_time`,
    /// without advancing a timeline.
    pub fn schedule_once(&mut self, method: Method, current_time: f64, seed: u64) -> Option<Solution> {
        self.current_time = current_time;
        let mut submitted = self.jobs.clone();
        preprocess_jobs(&mut submitted, &self.ttime, current_time);
        let system = System::new(submitted, self.resources.clone());
        run_method(
            method,
            &system,
            &self.ttime,
            &self.catalogue,
            &self.params,
            current_time,
            seed,
        )
    }

    /// Drive the event loop to completion. `on_account` fires once per
    /// iteration with the freshly accounted solution (one schedule row per
    /// job) right before it becomes the previous solution.
    pub fn run<F>(&mut self, method: Method, start_time: f64, seed: u64, mut on_account: F) -> CostSummary
    where
        F: FnMut(&Solution, &JobMap),
    {
        let mut iter: u32 = 0;
        let mut first_finish = INF;
        let mut elapsed = 0.0;
        let mut all_completed = false;
        let mut stop = false;
        let mut submitted: Vec<Job> = Vec::new();
        let mut current_solution = Solution::default();

        self.current_time = start_time;
        self.old_solution = Solution::default();
        self.totals = CostSummary::default();

        while !stop {
            if iter > 0 {
                elapsed = self.params.interval().min(first_finish);
            }
            let old_count = submitted.len();
            let last_time = self.current_time;
            self.current_time = self.submit_jobs(elapsed, &mut submitted);
            elapsed = self.current_time - last_time;

            if iter > 0 && !elapsed.is_finite() {
                // nothing left to submit and nothing will ever finish
                tracing::warn!("no further progress possible, aborting simulation");
                break;
            }
            tracing::debug!(
                iter,
                current_time = self.current_time,
                elapsed,
                submitted = submitted.len(),
                "simulation step"
            );

            if iter > 0 {
                all_completed = self.update_scheduled_jobs(iter, elapsed, &mut current_solution);
                on_account(&current_solution, &self.catalog);
                std::mem::swap(&mut current_solution, &mut self.old_solution);

                // a gap between the last completion and the next submission:
                // fast-forward to the next arrival
                if all_completed && submitted.len() == old_count && !self.jobs.is_empty() {
                    self.current_time = self.submit_jobs(INF, &mut submitted);
                    elapsed = self.current_time - last_time;
                }
            }

            stop = submitted.len() == old_count && all_completed;
            if iter == 0 && submitted.is_empty() && self.jobs.is_empty() {
                stop = true;
            }
            if stop {
                break;
            }

            let is_fpm = method.is_first_principle();
            let mut system: Option<System> = None;
            if iter > 0 {
                let ended = self.remove_ended_jobs(&mut submitted);
                self.update_execution_times();
                preprocess_jobs(&mut submitted, &self.ttime, self.current_time);
                if method == Method::Stochastic {
                    self.update_epochs(&mut submitted, last_time);
                }
                if is_fpm {
                    let waiting = self.waiting_jobs(&submitted);
                    let mut available = self.old_solution.resources().clone();
                    available.release(&ended);
                    system = Some(System::new(waiting, available));
                }
            } else {
                preprocess_jobs(&mut submitted, &self.ttime, self.current_time);
            }
            let system = system
                .unwrap_or_else(|| System::new(submitted.clone(), self.resources.clone()));

            current_solution = run_method(
                method,
                &system,
                &self.ttime,
                &self.catalogue,
                &self.params,
                self.current_time,
                seed,
            )
            // an empty queue still needs the availability snapshot, so the
            // merged-back running jobs account against real used counts
            .unwrap_or_else(|| {
                Solution::new(Default::default(), system.resources.clone(), self.current_time)
            });

            if is_fpm && iter > 0 {
                self.merge_previously_running(&mut current_solution, &submitted);
            }

            first_finish = if self.stochastic {
                self.real_first_finish(&current_solution)
            } else {
                current_solution.first_finish_time()
            };
            iter += 1;
        }

        self.totals.clone()
    }

    /// Admit every pending job inside the window, clamped to the earliest
    /// pending arrival; returns the new current time.
    fn submit_jobs(&mut self, elapsed: f64, submitted: &mut Vec<Job>) -> f64 {
        let mut check_t = self.current_time + elapsed;
        if let Some(front) = self.jobs.first() {
            check_t = check_t.min(front.submission_time);
            let admitted = self
                .jobs
                .iter()
                .take_while(|j| j.submission_time <= check_t + TOL)
                .count();
            for job in self.jobs.drain(..admitted) {
                tracing::debug!(job = %job.id, t = job.submission_time, "job submitted");
                submitted.push(job);
            }
        }
        check_t
    }

    /// Advance every schedule of the committed solution by the elapsed
    /// window: completion percent, GPU cost contribution, start/finish
    /// times, tardiness. Returns whether everything reached 100%.
    fn update_scheduled_jobs(&mut self, iter: u32, elapsed: f64, solution: &mut Solution) -> bool {
        let mut all_completed = true;
        let mut gpu_cost = 0.0;
        let mut tardiness_total = 0.0;
        let mut tardiness_cost = 0.0;
        let sim_time = self.current_time;

        let ids: Vec<JobId> = solution.schedule().keys().cloned().collect();
        for id in ids {
            let Some(job) = self.catalog.get(&id).cloned() else {
                debug_assert!(false, "committed schedule for unknown job {id}");
                continue;
            };

            let usage = solution.schedule()[&id].assignment().map(|a| {
                let g = solution.used_gpus(&a.gpu_type, &a.node);
                (g, self.catalogue.cost(&a.gpu_type, g))
            });
            let real_time = if self.stochastic {
                solution.schedule()[&id].assignment().and_then(|a| {
                    self.ttime
                        .real_time(&id, &Setup::new(a.gpu_type.clone(), a.gpus, a.gpu_frac))
                })
            } else {
                None
            };
            let previous = self
                .old_solution
                .schedule()
                .get(&id)
                .map(|p| (p.start_time, p.completion_percent));

            let sch = solution.schedule_mut().get_mut(&id).expect("own key");
            sch.iter = iter;
            sch.sim_time = sim_time;

            let mut cp = 0.0;
            if let Some((g, unit_cost)) = usage {
                sch.execution_time = elapsed;
                sch.cp_step = elapsed * 100.0 / sch.selected_time();
                cp = match real_time {
                    Some(rt) => elapsed * 100.0 / rt,
                    None => sch.cp_step,
                };
                sch.compute_gpu_cost(g, unit_cost);
                gpu_cost += sch.gpu_cost;
                tracing::debug!(job = %id, cp_step = sch.cp_step, gpu_cost = sch.gpu_cost, "accounted");
            }

            match previous {
                Some((start, prev_cp)) if iter > 1 => {
                    sch.start_time = start;
                    cp = if self.stochastic {
                        prev_cp + cp
                    } else {
                        prev_cp + cp * (100.0 - prev_cp) / 100.0
                    };
                }
                _ => sch.start_time = self.current_time - elapsed,
            }
            sch.completion_percent = cp;

            if cp >= 100.0 - TOL {
                sch.finish_time = sim_time;
                sch.set_tardiness((sim_time - job.deadline).max(0.0));
                sch.compute_tardiness_cost(job.tardiness_weight);
                tardiness_total += sch.tardiness;
                tardiness_cost += sch.tardiness_cost;
            } else {
                sch.set_tardiness(0.0);
                all_completed = false;
            }
        }

        let node_cost = solution.compute_node_cost(elapsed);
        self.totals.total_tardiness += tardiness_total;
        self.totals.total_tardiness_cost += tardiness_cost;
        self.totals.total_node_cost += node_cost;
        self.totals.total_gpu_cost += gpu_cost;
        self.totals.total_energy_cost += node_cost + gpu_cost;
        self.totals.total_cost += tardiness_cost + node_cost + gpu_cost;

        all_completed
    }

    /// Drop completed jobs from the queue, collecting their placements so
    /// the resources can be released.
    fn remove_ended_jobs(&mut self, submitted: &mut Vec<Job>) -> Vec<(JobId, Placement)> {
        let mut ended = Vec::new();
        for (id, sch) in self.old_solution.schedule() {
            if sch.completion_percent < 100.0 - TOL {
                continue;
            }
            if let Some(pos) = submitted.iter().position(|j| j.id == *id) {
                submitted.remove(pos);
                if let Some(placement) = sch.placement() {
                    ended.push((id.clone(), placement));
                }
            }
        }
        ended
    }

    /// Shrink the execution times of partially completed jobs by the work
    /// done in the last window.
    fn update_execution_times(&mut self) {
        for (id, sch) in self.old_solution.schedule() {
            if !sch.is_empty() && sch.completion_percent < 100.0 - TOL {
                let ratio = self.catalog.get(id).map(|j| j.ratio_avg).unwrap_or(0.0);
                self.ttime.decay(id, sch.cp_step, ratio);
            }
        }
    }

    /// Jobs with no running assignment in the committed solution.
    fn waiting_jobs(&self, submitted: &[Job]) -> Vec<Job> {
        submitted
            .iter()
            .filter(|j| {
                self.old_solution
                    .schedule()
                    .get(&j.id)
                    .is_none_or(|sch| sch.is_empty())
            })
            .cloned()
            .collect()
    }

    /// First-principle methods keep running jobs where they are: carry the
    /// previous schedule over with the execution time refreshed from the
    /// decayed table.
    fn merge_previously_running(&self, solution: &mut Solution, submitted: &[Job]) {
        for job in submitted {
            let Some(previous) = self.old_solution.schedule().get(&job.id) else {
                continue;
            };
            let Some(a) = previous.assignment() else {
                continue;
            };
            let setup = Setup::new(a.gpu_type.clone(), a.gpus, a.gpu_frac);
            let refreshed = self.ttime.time(&job.id, &setup).unwrap_or(INF);
            let mut sch = previous.clone();
            if let Some(am) = sch.assignment_mut() {
                am.selected_time = refreshed;
            }
            solution.schedule_mut().insert(job.id.clone(), sch);
        }
        solution.recompute_first_finish_time();
    }

    /// Stochastic accounting advances epochs and remembers the current
    /// configuration of every partially executed job.
    fn update_epochs(&self, submitted: &mut [Job], previous_time: f64) {
        for (id, sch) in self.old_solution.schedule() {
            if sch.is_empty() || sch.completion_percent >= 100.0 - TOL {
                continue;
            }
            let Some(job) = submitted.iter_mut().find(|j| j.id == *id) else {
                continue;
            };
            job.advance_epochs(sch.cp_step / 100.0);
            if let Some(a) = sch.assignment() {
                job.current_gpus = a.gpus;
                job.current_gpu_frac = a.gpu_frac;
                job.rescheduling_time = sch.selected_time() + previous_time;
            }
        }
    }

    /// First finish under real execution times, discounted by the progress
    /// already made, capped by the nominal first finish.
    fn real_first_finish(&self, solution: &Solution) -> f64 {
        let mut fft = INF;
        for (id, sch) in solution.schedule() {
            let Some(a) = sch.assignment() else { continue };
            let setup = Setup::new(a.gpu_type.clone(), a.gpus, a.gpu_frac);
            let Some(mut rt) = self.ttime.real_time(id, &setup) else {
                continue;
            };
            if let Some(previous) = self.old_solution.schedule().get(id) {
                rt -= rt * previous.completion_percent / 100.0;
            }
            fft = fft.min(rt);
        }
        fft.min(solution.first_finish_time())
    }
}

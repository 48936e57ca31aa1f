use crate::core::catalogue::GpuCatalogue;
use crate::core::elite::EliteSet;
use crate::core::job::{
    by_deadline, by_pressure, by_submission_time, by_tardiness_weight, index_jobs, Job,
};
use crate::core::local_search::LocalSearch;
use crate::core::proxy::ProxyCost;
use crate::core::resources::ResourceMap;
use crate::core::schedule::{Assignment, Schedule};
use crate::core::solution::Solution;
use crate::core::system::System;
use crate::core::timetable::{Setup, TimeTable};
use crate::core::{JobId, TOL};
use crate::stochastic::{DeterministicSolver, SolverClient, SolverRequest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// The method codes accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum Method {
    #[strum(to_string = "FIFO", serialize = "fifo")]
    Fifo,
    #[strum(to_string = "EDF", serialize = "edf")]
    Edf,
    #[strum(to_string = "PS", serialize = "ps")]
    Priority,
    #[strum(to_string = "G", serialize = "g")]
    Greedy,
    #[strum(to_string = "RG", serialize = "rg")]
    RandomGreedy,
    #[strum(to_string = "LS", serialize = "ls")]
    LocalSearch,
    #[strum(to_string = "PR", serialize = "pr")]
    PathRelinking,
    #[strum(to_string = "STS", serialize = "sts")]
    Stochastic,
}

impl Method {
    /// FIFO, EDF and PS renew running jobs in place instead of reshuffling
    /// the whole queue every instant.
    pub fn is_first_principle(self) -> bool {
        matches!(self, Method::Fifo | Method::Edf | Method::Priority)
    }

    /// Methods whose result files carry the seed in their name.
    pub fn is_randomized(self) -> bool {
        matches!(
            self,
            Method::RandomGreedy | Method::LocalSearch | Method::PathRelinking
        )
    }
}

/// Construction flavour: how the queue is ordered and how candidates are
/// popped. The engine loop itself is shared by all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Fifo,
    Edf,
    Priority,
    Greedy,
    RandomGreedy,
    Stochastic,
}

impl Strategy {
    fn sort_queue(self, queue: &mut [Job]) {
        match self {
            Strategy::Fifo => queue.sort_by(by_submission_time),
            Strategy::Edf => queue.sort_by(by_deadline),
            Strategy::Priority => queue.sort_by(by_tardiness_weight),
            Strategy::Greedy | Strategy::RandomGreedy | Strategy::Stochastic => {
                queue.sort_by(by_pressure)
            }
        }
    }

    /// The first-principle family pins one job per node: the node is marked
    /// full on assignment no matter how many GPUs are left on it.
    fn one_job_per_node(self) -> bool {
        matches!(self, Strategy::Fifo | Strategy::Edf | Strategy::Priority)
    }
}

/// Engine tunables, surfaced through the configuration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Elite-pool capacity for the randomized construction.
    pub elite_capacity: usize,
    /// Neighbourhood size of the local search.
    pub k1: usize,
    /// Local-search sweeps (1 = first-improving).
    pub ls_iterations: u32,
    /// Candidate-window parameter of the randomized greedy.
    pub alpha: f64,
    /// Adjacent-swap bias of the randomized greedy.
    pub pi: f64,
    /// Randomized construction passes, clamped to nodes x jobs x gpus.
    pub max_random_iter: u32,
    /// Upper bound on the scheduling window, seconds (None = unbounded).
    pub scheduling_interval: Option<f64>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            elite_capacity: 10,
            k1: 10,
            ls_iterations: 1,
            alpha: 0.05,
            pi: 0.05,
            max_random_iter: 1000,
            scheduling_interval: None,
        }
    }
}

impl EngineParams {
    pub fn interval(&self) -> f64 {
        self.scheduling_interval.unwrap_or(crate::core::INF)
    }
}

/// Refresh the derived fields of every queued job from the current
/// execution-time table.
pub fn preprocess_jobs(jobs: &mut [Job], ttime: &TimeTable, current_time: f64) {
    for job in jobs.iter_mut() {
        job.min_exec_time = ttime.min_exec(&job.id);
        job.max_exec_time = ttime.max_exec(&job.id);
        job.update_pressure(current_time);
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    setup: Setup,
    time: f64,
    energy: f64,
}

/// A job's setups split by deadline feasibility: candidates that still meet
/// the deadline, cheapest energy first, and the rest, fastest first.
struct CandidatePool {
    feasible: Vec<Candidate>,
    infeasible: Vec<Candidate>,
}

impl CandidatePool {
    fn partition(job: &Job, ttime: &TimeTable, catalogue: &GpuCatalogue, now: f64) -> Option<Self> {
        let setups = ttime.setups(&job.id)?;
        let mut feasible = Vec::new();
        let mut infeasible = Vec::new();
        for (setup, &time) in setups {
            let energy = catalogue.cost(&setup.gpu_type, setup.gpus) * time;
            let candidate = Candidate {
                setup: setup.clone(),
                time,
                energy,
            };
            if time + now <= job.deadline {
                feasible.push(candidate);
            } else {
                infeasible.push(candidate);
            }
        }
        feasible.sort_by(|a, b| a.energy.total_cmp(&b.energy).then_with(|| a.setup.cmp(&b.setup)));
        infeasible.sort_by(|a, b| a.time.total_cmp(&b.time).then_with(|| a.setup.cmp(&b.setup)));
        Some(Self {
            feasible,
            infeasible,
        })
    }

    fn is_empty(&self) -> bool {
        self.feasible.is_empty() && self.infeasible.is_empty()
    }

    fn active(&mut self) -> &mut Vec<Candidate> {
        if self.feasible.is_empty() {
            &mut self.infeasible
        } else {
            &mut self.feasible
        }
    }

    fn pop_front(&mut self) -> Option<Candidate> {
        if self.is_empty() {
            return None;
        }
        let list = self.active();
        Some(list.remove(0))
    }

    /// Pop uniformly from the first `ceil(alpha * len)` candidates.
    fn pop_windowed(&mut self, rng: &mut StdRng, alpha: f64) -> Option<Candidate> {
        if self.is_empty() {
            return None;
        }
        let list = self.active();
        let window = if alpha > 0.0 {
            ((list.len() as f64 * alpha).ceil() as usize).clamp(1, list.len())
        } else {
            1
        };
        let idx = rng.random_range(0..window);
        Some(list.remove(idx))
    }

    fn pop_feasible_at(&mut self, idx: usize) -> Option<Candidate> {
        if self.feasible.is_empty() {
            return None;
        }
        let idx = idx.min(self.feasible.len() - 1);
        Some(self.feasible.remove(idx))
    }
}

/// One construction engine: a strategy, a proxy to score with, and the
/// tables it consults. Produces solutions into an elite pool.
pub struct HeuristicEngine<'a> {
    strategy: Strategy,
    proxy: ProxyCost,
    ttime: &'a TimeTable,
    catalogue: &'a GpuCatalogue,
    params: &'a EngineParams,
    current_time: f64,
    rng: StdRng,
    solver: Option<Box<dyn SolverClient>>,
}

impl<'a> HeuristicEngine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy: Strategy,
        proxy: ProxyCost,
        ttime: &'a TimeTable,
        catalogue: &'a GpuCatalogue,
        params: &'a EngineParams,
        current_time: f64,
        seed: u64,
    ) -> Self {
        Self {
            strategy,
            proxy,
            ttime,
            catalogue,
            params,
            current_time,
            rng: StdRng::seed_from_u64(seed),
            solver: None,
        }
    }

    pub fn with_solver(mut self, solver: Box<dyn SolverClient>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Run the construction loop once (or `max_random_iter` times for the
    /// randomized strategy), inserting every scored solution into `elite`.
    pub fn perform_scheduling(&mut self, system: &System, elite: &mut EliteSet) {
        let mut queue = system.jobs.clone();
        preprocess_jobs(&mut queue, self.ttime, self.current_time);
        let jobs_index = index_jobs(&queue);
        tracing::debug!(
            strategy = ?self.strategy,
            jobs = queue.len(),
            nodes = system.resources.total_nodes(),
            "scheduling step"
        );

        if self.strategy == Strategy::RandomGreedy {
            let total_gpus: u64 = system.resources.nodes().map(|n| n.gpus as u64).sum();
            let cap = (system.resources.total_nodes() as u64)
                .saturating_mul(queue.len() as u64)
                .saturating_mul(total_gpus)
                .max(1);
            let passes = (self.params.max_random_iter as u64).min(cap) as u32;

            for pass in 0..passes {
                let mut q = queue.clone();
                self.strategy.sort_queue(&mut q);
                let randomize = pass > 0;
                if randomize {
                    self.random_swap(&mut q);
                }
                let mut solution = self.construct(&q, system, randomize);
                let cost = self.proxy.evaluate(&mut solution, &jobs_index, self.catalogue);
                if elite.try_insert(cost, solution) {
                    tracing::debug!(pass, cost, "new elite solution");
                }
            }
        } else {
            self.strategy.sort_queue(&mut queue);
            let mut solution = self.construct(&queue, system, false);
            let cost = self.proxy.evaluate(&mut solution, &jobs_index, self.catalogue);
            tracing::debug!(cost, "constructed solution");
            elite.try_insert(cost, solution);
        }
    }

    /// Walk the sorted queue, placing each job until resources run out;
    /// jobs that cannot be placed are carried as empty schedules.
    fn construct(&mut self, queue: &[Job], system: &System, randomize: bool) -> Solution {
        let mut resources = system.resources.clone();
        let mut schedule = BTreeMap::new();
        let mut available = resources.has_available();

        for job in queue {
            let sch = if available {
                let sch = self
                    .assign_job(job, &mut resources, randomize)
                    .unwrap_or_else(Schedule::empty);
                available = resources.has_available();
                sch
            } else {
                Schedule::empty()
            };
            schedule.insert(job.id.clone(), sch);
        }

        let mut solution = Solution::new(schedule, resources, self.current_time);
        self.postprocess(&mut solution);
        solution
    }

    /// Pop candidates best-first until one fits somewhere. Infinite
    /// execution times never place (the job keeps an empty schedule).
    fn assign_job(
        &mut self,
        job: &Job,
        resources: &mut ResourceMap,
        randomize: bool,
    ) -> Option<Schedule> {
        let mut pool =
            CandidatePool::partition(job, self.ttime, self.catalogue, self.current_time)?;
        let unique = self.strategy.one_job_per_node();

        loop {
            let candidate = if randomize {
                pool.pop_windowed(&mut self.rng, self.params.alpha)
            } else if self.strategy == Strategy::Stochastic {
                self.pop_via_solver(job, &mut pool)
            } else {
                pool.pop_front()
            }?;

            if !candidate.time.is_finite() {
                continue;
            }
            let setup = &candidate.setup;
            if let Some(assigned) =
                resources.assign(&setup.gpu_type, setup.gpus, setup.frac(), unique, None)
            {
                tracing::trace!(job = %job.id, placed = %assigned, time = candidate.time, "assigned");
                return Some(Schedule::with_assignment(Assignment {
                    node: assigned.node,
                    gpu_type: setup.gpu_type.clone(),
                    selected_time: candidate.time,
                    gpus: setup.gpus,
                    gpu_frac: setup.frac(),
                    gpu_index: assigned.gpu_index,
                }));
            }
        }
    }

    /// Let the external solver elect among the deadline-feasible setups;
    /// fall back to the cheapest one when it cannot.
    fn pop_via_solver(&mut self, job: &Job, pool: &mut CandidatePool) -> Option<Candidate> {
        if pool.feasible.is_empty() {
            return pool.pop_front();
        }
        let Some(solver) = &self.solver else {
            return pool.pop_front();
        };
        let request = SolverRequest {
            s: pool.feasible.iter().map(|c| c.time).collect(),
            p: pool.feasible.iter().map(|c| c.energy).collect(),
            d: job.deadline,
            e: job.epochs,
            max_e: job.max_epochs,
            distribution: job.distribution.to_string(),
        };
        match solver.solve(&request) {
            Ok(response) => {
                let idx = response
                    .x
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                pool.pop_feasible_at(idx)
            }
            Err(err) => {
                tracing::warn!(job = %job.id, %err, "solver unavailable, using cheapest setup");
                pool.pop_front()
            }
        }
    }

    /// Walk the queue swapping adjacent pairs with probability `0.5 + pi`
    /// when the left job carries the higher tardiness weight, `0.5 - pi`
    /// otherwise.
    fn random_swap(&mut self, queue: &mut [Job]) {
        if queue.len() < 2 {
            return;
        }
        for i in 0..queue.len() - 1 {
            let p = if queue[i].tardiness_weight > queue[i + 1].tardiness_weight {
                0.5 + self.params.pi
            } else {
                0.5 - self.params.pi
            };
            if self.rng.random_bool(p.clamp(0.0, 1.0)) {
                queue.swap(i, i + 1);
            }
        }
    }

    /// Hand idle capacity to the co-located job whose upgraded setup buys
    /// the biggest speed-up: first whole GPUs left over on open nodes, then
    /// the idle fractions of shared GPUs (descending remaining), each
    /// repeated until no upgrade helps. Saturated shared GPUs migrate to
    /// the full-shared map.
    fn postprocess(&self, solution: &mut Solution) {
        self.grant_idle_whole_gpus(solution);
        self.grant_shared_surplus(solution);
        solution.recompute_first_finish_time();
    }

    fn grant_idle_whole_gpus(&self, solution: &mut Solution) {
        let mut hosts: Vec<(crate::core::GpuType, crate::core::NodeId)> = solution
            .resources()
            .nodes()
            .filter(|n| n.is_open() && n.used_gpus() > 0)
            .map(|n| (n.gpu_type.clone(), n.id.clone()))
            .collect();
        hosts.sort();

        for (gpu_type, node_id) in hosts {
            loop {
                let remaining = solution.resources().remaining_gpus(&gpu_type, &node_id);
                if remaining == 0 {
                    break;
                }

                let mut best: Option<(JobId, Setup, f64, f64)> = None;
                for (id, sch) in solution.schedule() {
                    let Some(a) = sch.assignment() else { continue };
                    if a.node != node_id || a.gpu_type != gpu_type || a.gpu_frac < 1.0 {
                        continue;
                    }
                    let Some(setups) = self.ttime.setups(id) else {
                        continue;
                    };
                    for (setup, &time) in setups {
                        if setup.gpu_type != gpu_type
                            || setup.is_fractional()
                            || setup.gpus != a.gpus + remaining
                            || !time.is_finite()
                        {
                            continue;
                        }
                        let delta = a.selected_time - time;
                        let better = match &best {
                            None => delta > TOL,
                            Some((_, _, _, best_delta)) => delta > *best_delta,
                        };
                        if better {
                            best = Some((id.clone(), setup.clone(), time, delta));
                        }
                    }
                }

                let Some((id, setup, time, delta)) = best else { break };
                if solution
                    .resources_mut()
                    .assign(&gpu_type, remaining, 1.0, false, Some(&node_id))
                    .is_none()
                {
                    break;
                }
                tracing::trace!(job = %id, node = %node_id, gpus = setup.gpus, delta, "idle-GPU upgrade");
                let sch = solution.schedule_mut().get_mut(&id).expect("own key");
                let a = sch.assignment_mut().expect("non-empty by selection");
                a.gpus = setup.gpus;
                a.selected_time = time;
            }
        }
    }

    fn grant_shared_surplus(&self, solution: &mut Solution) {
        let snapshot = solution.resources().shared_snapshot();
        for (gpu_type, sg) in snapshot {
            loop {
                let Some(remaining) =
                    solution
                        .resources()
                        .shared_remaining(&gpu_type, &sg.node, sg.index)
                else {
                    break;
                };
                if remaining <= TOL {
                    break;
                }

                let mut best: Option<(JobId, Setup, f64, f64)> = None;
                for (id, sch) in solution.schedule() {
                    let Some(a) = sch.assignment() else { continue };
                    if a.node != sg.node || a.gpu_index != Some(sg.index) {
                        continue;
                    }
                    let Some(setups) = self.ttime.setups(id) else {
                        continue;
                    };
                    for (setup, &time) in setups {
                        if setup.gpu_type != gpu_type
                            || setup.gpus != a.gpus
                            || !time.is_finite()
                        {
                            continue;
                        }
                        let extra = setup.frac() - a.gpu_frac;
                        if extra <= TOL || extra > remaining + TOL {
                            continue;
                        }
                        let delta = a.selected_time - time;
                        let better = match &best {
                            None => delta > TOL,
                            Some((_, _, _, best_delta)) => delta > *best_delta,
                        };
                        if better {
                            best = Some((id.clone(), setup.clone(), time, delta));
                        }
                    }
                }

                let Some((id, setup, time, delta)) = best else { break };
                let current_frac = solution.schedule()[&id]
                    .assignment()
                    .map(|a| a.gpu_frac)
                    .unwrap_or(0.0);
                let extra = setup.frac() - current_frac;
                if !solution
                    .resources_mut()
                    .take_shared_fraction(&gpu_type, &sg.node, sg.index, extra)
                {
                    break;
                }
                tracing::trace!(job = %id, node = %sg.node, gpu = sg.index, delta, "surplus upgrade");
                let sch = solution.schedule_mut().get_mut(&id).expect("own key");
                let a = sch.assignment_mut().expect("non-empty by selection");
                a.gpu_frac = setup.frac();
                a.selected_time = time;
            }
        }
    }
}

/// Reproduce the optimizer pipelines: which strategies run, with which
/// proxy, feeding one shared elite pool. Returns the best solution found,
/// or `None` when the system has neither jobs nor resources.
#[allow(clippy::too_many_arguments)]
pub fn run_method(
    method: Method,
    system: &System,
    ttime: &TimeTable,
    catalogue: &GpuCatalogue,
    params: &EngineParams,
    current_time: f64,
    seed: u64,
) -> Option<Solution> {
    if system.jobs.is_empty() {
        return None;
    }

    let proxy = if method == Method::PathRelinking {
        ProxyCost::ThroughputMax
    } else {
        ProxyCost::MinCost
    };
    let mut elite = EliteSet::new(1, proxy.order());

    let greedy = |strategy: Strategy, elite: &mut EliteSet| {
        HeuristicEngine::new(strategy, proxy, ttime, catalogue, params, current_time, seed)
            .perform_scheduling(system, elite);
    };

    match method {
        Method::Fifo => greedy(Strategy::Fifo, &mut elite),
        Method::Edf => greedy(Strategy::Edf, &mut elite),
        Method::Priority => greedy(Strategy::Priority, &mut elite),
        Method::Greedy => greedy(Strategy::Greedy, &mut elite),
        Method::RandomGreedy | Method::LocalSearch | Method::PathRelinking => {
            greedy(Strategy::Greedy, &mut elite);
            elite.set_capacity(params.elite_capacity);
            HeuristicEngine::new(
                Strategy::RandomGreedy,
                proxy,
                ttime,
                catalogue,
                params,
                current_time,
                seed,
            )
            .perform_scheduling(system, &mut elite);

            if method == Method::LocalSearch {
                LocalSearch::new(proxy, ttime, catalogue, params, current_time)
                    .improve(&mut elite, system);
            }
        }
        Method::Stochastic => {
            HeuristicEngine::new(
                Strategy::Stochastic,
                proxy,
                ttime,
                catalogue,
                params,
                current_time,
                seed,
            )
            .with_solver(Box::new(DeterministicSolver))
            .perform_scheduling(system, &mut elite);
        }
    }

    elite.into_best()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::Node;
    use crate::core::INF;

    fn params() -> EngineParams {
        EngineParams::default()
    }

    fn job(id: &str, deadline: f64, weight: f64) -> Job {
        Job::builder()
            .id(id)
            .deadline(deadline)
            .tardiness_weight(weight)
            .build()
    }

    fn catalogue() -> GpuCatalogue {
        let mut c = GpuCatalogue::new();
        for n in 1..=8 {
            c.insert("X", n, n as f64 * 1.5);
            c.insert("Z", n, n as f64 * 2.0);
        }
        c
    }

    #[test]
    fn test_method_codes_parse() {
        use std::str::FromStr;
        assert_eq!(Method::from_str("FIFO").unwrap(), Method::Fifo);
        assert_eq!(Method::from_str("PS").unwrap(), Method::Priority);
        assert_eq!(Method::from_str("RG").unwrap(), Method::RandomGreedy);
        assert_eq!(Method::from_str("STS").unwrap(), Method::Stochastic);
        assert!(Method::from_str("nope").is_err());
        assert_eq!(Method::RandomGreedy.to_string(), "RG");
        assert!(Method::Edf.is_first_principle());
        assert!(!Method::Greedy.is_first_principle());
    }

    #[test]
    fn test_empty_cluster_yields_all_empty_schedules() {
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("X", 1, 1.0), 100.0);
        let system = System::new(vec![job("j1", 50.0, 2.0)], ResourceMap::new());

        let solution = run_method(
            Method::Greedy,
            &system,
            &ttime,
            &catalogue(),
            &params(),
            0.0,
            4010,
        )
        .unwrap();

        assert_eq!(solution.schedule().len(), 1);
        assert!(solution.schedule()["j1"].is_empty());
        assert_eq!(solution.first_finish_time(), INF);
    }

    #[test]
    fn test_exact_fit_single_job() {
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("X", 4, 1.0), 100.0);
        let resources = ResourceMap::from_nodes([Node::new("n1", "X", 4, 1.0)]);
        let system = System::new(vec![job("j1", 50.0, 1.0)], resources);

        let solution = run_method(
            Method::Greedy,
            &system,
            &ttime,
            &catalogue(),
            &params(),
            0.0,
            4010,
        )
        .unwrap();

        let sch = &solution.schedule()["j1"];
        let a = sch.assignment().unwrap();
        assert_eq!(a.node, "n1");
        assert_eq!(a.gpus, 4);
        assert_eq!(a.selected_time, 100.0);
        assert_eq!(solution.first_finish_time(), 100.0);
        assert_eq!(solution.used_gpus("X", "n1"), 4);
    }

    #[test]
    fn test_greedy_prefers_cheapest_feasible_setup() {
        let mut ttime = TimeTable::new();
        // both feasible; 1 GPU is slower but cheaper in energy
        ttime.insert("j1", Setup::new("X", 1, 1.0), 100.0); // energy 150
        ttime.insert("j1", Setup::new("X", 2, 1.0), 60.0); // energy 180
        let resources = ResourceMap::from_nodes([Node::new("n1", "X", 3, 1.0)]);
        let system = System::new(vec![job("j1", 1000.0, 1.0)], resources);

        let solution = run_method(
            Method::Greedy,
            &system,
            &ttime,
            &catalogue(),
            &params(),
            0.0,
            4010,
        )
        .unwrap();
        assert_eq!(solution.schedule()["j1"].assignment().unwrap().gpus, 1);
    }

    #[test]
    fn test_greedy_falls_back_to_fastest_when_deadline_hopeless() {
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("X", 1, 1.0), 100.0);
        ttime.insert("j1", Setup::new("X", 4, 1.0), 40.0);
        let resources = ResourceMap::from_nodes([Node::new("n1", "X", 4, 1.0)]);
        // nothing meets a deadline of 10
        let system = System::new(vec![job("j1", 10.0, 1.0)], resources);

        let solution = run_method(
            Method::Greedy,
            &system,
            &ttime,
            &catalogue(),
            &params(),
            0.0,
            4010,
        )
        .unwrap();
        assert_eq!(solution.schedule()["j1"].assignment().unwrap().gpus, 4);
    }

    #[test]
    fn test_fractional_sharing_between_two_jobs() {
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("Y", 1, 0.5), 80.0);
        ttime.insert("j2", Setup::new("Y", 1, 0.5), 80.0);
        let mut cat = GpuCatalogue::new();
        cat.insert("Y", 1, 2.0);
        let resources = ResourceMap::from_nodes([Node::new("n1", "Y", 1, 1.0)]);
        let system = System::new(
            vec![job("j1", 10_000.0, 1.0), job("j2", 10_000.0, 1.0)],
            resources,
        );

        let solution =
            run_method(Method::Greedy, &system, &ttime, &cat, &params(), 0.0, 4010).unwrap();

        let a1 = solution.schedule()["j1"].assignment().unwrap();
        let a2 = solution.schedule()["j2"].assignment().unwrap();
        assert_eq!(a1.node, "n1");
        assert_eq!(a2.node, "n1");
        // both ride the same shared GPU
        assert_eq!(a1.gpu_index, Some(1));
        assert_eq!(a2.gpu_index, Some(1));
        assert_eq!(solution.used_gpus("Y", "n1"), 1);
    }

    #[test]
    fn test_postprocessing_grants_idle_whole_gpus() {
        // the cheaper 2-GPU setup wins construction, then the 2 idle GPUs
        // buy the 4-GPU setup for free
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("Z", 2, 1.0), 100.0);
        ttime.insert("j1", Setup::new("Z", 4, 1.0), 60.0);
        let resources = ResourceMap::from_nodes([Node::new("n1", "Z", 4, 1.0)]);
        let system = System::new(vec![job("j1", 10_000.0, 1.0)], resources);

        let solution = run_method(
            Method::Greedy,
            &system,
            &ttime,
            &catalogue(),
            &params(),
            0.0,
            4010,
        )
        .unwrap();

        let a = solution.schedule()["j1"].assignment().unwrap();
        assert_eq!(a.gpus, 4);
        assert_eq!(a.selected_time, 60.0);
        assert_eq!(solution.first_finish_time(), 60.0);
        assert_eq!(solution.resources().remaining_gpus("Z", "n1"), 0);
    }

    #[test]
    fn test_postprocessing_grants_shared_surplus() {
        use crate::core::solution::Solution;
        use std::collections::BTreeMap;

        // hand-built: j1 holds 0.5 of a shared GPU whose other half idles
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("Z", 1, 0.5), 100.0);
        ttime.insert("j1", Setup::new("Z", 1, 0.75), 70.0);
        ttime.insert("j1", Setup::new("Z", 1, 1.0), 60.0);
        let mut resources = ResourceMap::from_nodes([Node::new("n1", "Z", 2, 1.0)]);
        let assigned = resources.assign("Z", 1, 0.5, false, None).unwrap();
        let mut schedule = BTreeMap::new();
        schedule.insert(
            crate::core::JobId::from("j1"),
            Schedule::with_assignment(Assignment {
                node: assigned.node.clone(),
                gpu_type: "Z".into(),
                selected_time: 100.0,
                gpus: 1,
                gpu_frac: 0.5,
                gpu_index: assigned.gpu_index,
            }),
        );
        let mut solution = Solution::new(schedule, resources, 0.0);

        let cat = catalogue();
        let p = params();
        let engine = HeuristicEngine::new(
            Strategy::Greedy,
            ProxyCost::MinCost,
            &ttime,
            &cat,
            &p,
            0.0,
            4010,
        );
        engine.postprocess(&mut solution);

        // the full-GPU setup (delta 40) beats the 0.75 one (delta 30)
        let a = solution.schedule()["j1"].assignment().unwrap();
        assert_eq!(a.gpu_frac, 1.0);
        assert_eq!(a.selected_time, 60.0);
        assert!(solution
            .resources()
            .shared_remaining("Z", "n1", 1)
            .is_none());

        // and the sweep is a fixed point
        let before = format!("{:?}", solution.schedule());
        engine.postprocess(&mut solution);
        assert_eq!(before, format!("{:?}", solution.schedule()));
    }

    #[test]
    fn test_postprocessing_is_a_fixed_point_after_construction() {
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("Z", 2, 1.0), 100.0);
        ttime.insert("j1", Setup::new("Z", 4, 1.0), 60.0);
        ttime.insert("j2", Setup::new("Z", 1, 1.0), 150.0);
        let resources = ResourceMap::from_nodes([
            Node::new("n1", "Z", 4, 1.0),
            Node::new("n2", "Z", 2, 1.0),
        ]);
        let system = System::new(
            vec![job("j1", 10_000.0, 1.0), job("j2", 10_000.0, 1.0)],
            resources,
        );

        let cat = catalogue();
        let p = params();
        let solution =
            run_method(Method::Greedy, &system, &ttime, &cat, &p, 0.0, 4010).unwrap();
        let first = format!("{:?}", solution.schedule());

        let engine = HeuristicEngine::new(
            Strategy::Greedy,
            ProxyCost::MinCost,
            &ttime,
            &cat,
            &p,
            0.0,
            4010,
        );
        let mut again = solution.clone();
        engine.postprocess(&mut again);
        assert_eq!(first, format!("{:?}", again.schedule()));
    }

    #[test]
    fn test_first_principle_pins_one_job_per_node() {
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("X", 1, 1.0), 50.0);
        ttime.insert("j2", Setup::new("X", 1, 1.0), 50.0);
        let resources = ResourceMap::from_nodes([Node::new("n1", "X", 4, 1.0)]);
        let system = System::new(
            vec![job("j1", 1000.0, 1.0), job("j2", 1000.0, 2.0)],
            resources,
        );

        let solution = run_method(
            Method::Fifo,
            &system,
            &ttime,
            &catalogue(),
            &params(),
            0.0,
            4010,
        )
        .unwrap();

        // the node closed after j1, so j2 was postponed
        assert!(!solution.schedule()["j1"].is_empty());
        assert!(solution.schedule()["j2"].is_empty());
    }

    #[test]
    fn test_random_greedy_is_deterministic_per_seed() {
        let mut ttime = TimeTable::new();
        for id in ["a", "b", "c", "d"] {
            ttime.insert(id, Setup::new("X", 1, 1.0), 120.0);
            ttime.insert(id, Setup::new("X", 2, 1.0), 70.0);
            ttime.insert(id, Setup::new("X", 4, 1.0), 45.0);
        }
        let mk_system = || {
            System::new(
                vec![
                    job("a", 100.0, 3.0),
                    job("b", 150.0, 1.0),
                    job("c", 80.0, 2.0),
                    job("d", 400.0, 0.5),
                ],
                ResourceMap::from_nodes([
                    Node::new("n1", "X", 4, 1.0),
                    Node::new("n2", "X", 4, 1.0),
                ]),
            )
        };
        let mut p = params();
        p.max_random_iter = 50;

        let run = |seed| {
            run_method(
                Method::RandomGreedy,
                &mk_system(),
                &ttime,
                &catalogue(),
                &p,
                0.0,
                seed,
            )
            .unwrap()
        };
        assert_eq!(
            format!("{:?}", run(7).schedule()),
            format!("{:?}", run(7).schedule())
        );
    }

    #[test]
    fn test_sts_stub_matches_greedy_choice() {
        let mut ttime = TimeTable::new();
        ttime.insert("j1", Setup::new("X", 1, 1.0), 100.0);
        ttime.insert("j1", Setup::new("X", 2, 1.0), 60.0);
        let mk_system = || {
            System::new(
                vec![job("j1", 1000.0, 1.0)],
                ResourceMap::from_nodes([Node::new("n1", "X", 4, 1.0)]),
            )
        };

        let sts = run_method(
            Method::Stochastic,
            &mk_system(),
            &ttime,
            &catalogue(),
            &params(),
            0.0,
            4010,
        )
        .unwrap();
        let greedy = run_method(
            Method::Greedy,
            &mk_system(),
            &ttime,
            &catalogue(),
            &params(),
            0.0,
            4010,
        )
        .unwrap();

        assert_eq!(
            sts.schedule()["j1"].assignment(),
            greedy.schedule()["j1"].assignment()
        );
    }
}

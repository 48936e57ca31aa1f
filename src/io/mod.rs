use crate::core::catalogue::GpuCatalogue;
use crate::core::engine::Method;
use crate::core::job::{Job, JobMap};
use crate::core::node::Node;
use crate::core::resources::ResourceMap;
use crate::core::simulator::CostSummary;
use crate::core::solution::Solution;
use crate::core::timetable::{Setup, TimeTable};
use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const JOBS_FILE: &str = "Lof_Selectjobs.csv";
pub const TIMES_FILE: &str = "SelectJobs_times.csv";
pub const NODES_FILE: &str = "tNodes.csv";
pub const COSTS_FILE: &str = "GPU-costs.csv";
pub const TOTALS_FILE: &str = "all_costs.csv";

/// What can go wrong while reading the input tables. Both kinds are fatal
/// at startup; nothing else in the input path is.
#[derive(Debug)]
pub enum InputError {
    /// A required file is absent.
    Missing(PathBuf),
    /// A row lacks a required column or holds an unparsable cell.
    Schema { file: PathBuf, detail: String },
}

impl std::error::Error for InputError {}
impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Missing(path) => write!(f, "input file {} is missing", path.display()),
            InputError::Schema { file, detail } => {
                write!(f, "malformed input file {}: {}", file.display(), detail)
            }
        }
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>, InputError> {
    if !path.exists() {
        return Err(InputError::Missing(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| InputError::Schema {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file))
}

fn schema_err(path: &Path, err: impl fmt::Display) -> InputError {
    InputError::Schema {
        file: path.to_path_buf(),
        detail: err.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct JobRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "SubmissionTime")]
    submission_time: f64,
    #[serde(rename = "Deadline")]
    deadline: f64,
    #[serde(rename = "TardinessWeight")]
    tardiness_weight: f64,
    #[serde(rename = "MinExecTime")]
    min_exec_time: f64,
    #[serde(rename = "MaxExecTime")]
    max_exec_time: f64,
    #[serde(rename = "RatioAvg", default)]
    ratio_avg: Option<f64>,
    #[serde(rename = "Epochs", default)]
    epochs: Option<f64>,
    #[serde(rename = "Distribution", default)]
    distribution: Option<String>,
}

pub fn load_jobs(path: &Path) -> Result<Vec<Job>, InputError> {
    let mut reader = open_reader(path)?;
    let mut jobs = Vec::new();
    for row in reader.deserialize::<JobRow>() {
        let row = row.map_err(|e| schema_err(path, e))?;
        let mut job = Job::builder()
            .id(row.id)
            .submission_time(row.submission_time)
            .deadline(row.deadline)
            .tardiness_weight(row.tardiness_weight)
            .ratio_avg(row.ratio_avg.unwrap_or(0.0))
            .max_epochs(row.epochs.unwrap_or(0.0))
            .distribution(row.distribution.unwrap_or_default())
            .build();
        job.min_exec_time = row.min_exec_time;
        job.max_exec_time = row.max_exec_time;
        jobs.push(job);
    }
    tracing::info!(count = jobs.len(), file = %path.display(), "loaded jobs");
    Ok(jobs)
}

#[derive(Debug, Deserialize)]
struct TimeRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "GPUtype")]
    gpu_type: String,
    #[serde(rename = "nGPUs")]
    gpus: u32,
    #[serde(rename = "GPUf")]
    gpu_frac: f64,
    #[serde(rename = "ExecutionTime")]
    execution_time: f64,
    #[serde(rename = "RealExecutionTime", default)]
    real_execution_time: Option<f64>,
}

/// Load the execution-time table; `with_real` additionally requires the
/// RealExecutionTime column (stochastic runs).
pub fn load_time_table(path: &Path, with_real: bool) -> Result<TimeTable, InputError> {
    let mut reader = open_reader(path)?;
    let mut ttime = if with_real {
        TimeTable::with_real_times()
    } else {
        TimeTable::new()
    };
    for row in reader.deserialize::<TimeRow>() {
        let row = row.map_err(|e| schema_err(path, e))?;
        let setup = Setup::new(row.gpu_type, row.gpus, row.gpu_frac);
        ttime.insert(row.id.clone(), setup.clone(), row.execution_time);
        if with_real {
            let real = row.real_execution_time.ok_or_else(|| {
                schema_err(path, "missing RealExecutionTime column in stochastic mode")
            })?;
            ttime.insert_real(row.id, setup, real);
        }
    }
    tracing::info!(file = %path.display(), "loaded time table");
    Ok(ttime)
}

#[derive(Debug, Deserialize)]
struct NodeRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "GPUtype")]
    gpu_type: String,
    #[serde(rename = "nGPUs")]
    gpus: u32,
    #[serde(rename = "cost")]
    cost: f64,
}

pub fn load_nodes(path: &Path) -> Result<ResourceMap, InputError> {
    let mut reader = open_reader(path)?;
    let mut nodes = Vec::new();
    for row in reader.deserialize::<NodeRow>() {
        let row = row.map_err(|e| schema_err(path, e))?;
        nodes.push(Node::new(row.id, row.gpu_type, row.gpus, row.cost));
    }
    tracing::info!(count = nodes.len(), file = %path.display(), "loaded nodes");
    Ok(ResourceMap::from_nodes(nodes))
}

#[derive(Debug, Deserialize)]
struct CostRow {
    #[serde(rename = "GPUtype")]
    gpu_type: String,
    #[serde(rename = "nGPUs")]
    gpus: u32,
    #[serde(rename = "cost")]
    cost: f64,
}

pub fn load_catalogue(path: &Path) -> Result<GpuCatalogue, InputError> {
    let mut reader = open_reader(path)?;
    let mut catalogue = GpuCatalogue::new();
    for row in reader.deserialize::<CostRow>() {
        let row = row.map_err(|e| schema_err(path, e))?;
        catalogue.insert(row.gpu_type, row.gpus, row.cost);
    }
    tracing::info!(file = %path.display(), "loaded GPU cost catalogue");
    Ok(catalogue)
}

/// Load the four input tables from a data directory.
pub fn load_inputs(
    dir: &Path,
    stochastic: bool,
) -> Result<(Vec<Job>, ResourceMap, TimeTable, GpuCatalogue), InputError> {
    let jobs = load_jobs(&dir.join(JOBS_FILE))?;
    let ttime = load_time_table(&dir.join(TIMES_FILE), stochastic)?;
    let resources = load_nodes(&dir.join(NODES_FILE))?;
    let catalogue = load_catalogue(&dir.join(COSTS_FILE))?;
    Ok((jobs, resources, ttime, catalogue))
}

const SCHEDULE_HEADER: &[&str] = &[
    "n_iterate",
    "sim_time",
    "ID",
    "SubmissionTime",
    "Deadline",
    "TardinessWeight",
    "MinExecTime",
    "MaxExecTime",
    "SelectedTime",
    "ExecutionTime",
    "CompletionPercent",
    "StartTime",
    "FinishTime",
    "node_ID",
    "GPUtype",
    "n_assigned_GPUs",
    "assigned_GPU_f",
    "GPU_ID",
    "Tardiness",
    "GPUcost",
    "TardinessCost",
    "TotalCost",
];

/// Streams one schedule row per job per accounted iteration.
pub struct ScheduleWriter {
    writer: csv::Writer<File>,
}

impl ScheduleWriter {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(SCHEDULE_HEADER)?;
        Ok(Self { writer })
    }

    pub fn write_solution(&mut self, solution: &Solution, jobs: &JobMap) -> anyhow::Result<()> {
        for (id, sch) in solution.schedule() {
            let Some(job) = jobs.get(id) else {
                anyhow::bail!("schedule row for unknown job {id}");
            };
            let (node, gpu_type, gpus, frac, gpu_id, selected) = match sch.assignment() {
                Some(a) => (
                    a.node.to_string(),
                    a.gpu_type.to_string(),
                    a.gpus.to_string(),
                    a.gpu_frac.to_string(),
                    a.gpu_index.map(|i| i.to_string()).unwrap_or_default(),
                    a.selected_time.to_string(),
                ),
                None => Default::default(),
            };
            self.writer.write_record([
                sch.iter.to_string(),
                sch.sim_time.to_string(),
                id.to_string(),
                job.submission_time.to_string(),
                job.deadline.to_string(),
                job.tardiness_weight.to_string(),
                job.min_exec_time.to_string(),
                job.max_exec_time.to_string(),
                selected,
                sch.execution_time.to_string(),
                sch.completion_percent.to_string(),
                sch.start_time.to_string(),
                sch.finish_time.to_string(),
                node,
                gpu_type,
                gpus,
                frac,
                gpu_id,
                sch.tardiness.to_string(),
                sch.gpu_cost.to_string(),
                sch.tardiness_cost.to_string(),
                (sch.gpu_cost + sch.tardiness_cost).to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Append one totals row; writes the header first when the file is new.
pub fn append_totals(
    path: &Path,
    method: Method,
    seed: u64,
    totals: &CostSummary,
) -> anyhow::Result<()> {
    let fresh = !path.exists();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    if fresh {
        writer.write_record([
            "method",
            "seed",
            "total_tardi",
            "total_tardiCost",
            "total_nodeCost",
            "total_GPUcost",
            "total_energyCost",
            "total_cost",
        ])?;
    }
    writer.write_record([
        method.to_string(),
        seed.to_string(),
        totals.total_tardiness.to_string(),
        totals.total_tardiness_cost.to_string(),
        totals.total_node_cost.to_string(),
        totals.total_gpu_cost.to_string(),
        totals.total_energy_cost.to_string(),
        totals.total_cost.to_string(),
    ])?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_jobs_with_optional_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            JOBS_FILE,
            "ID,SubmissionTime,Deadline,TardinessWeight,MinExecTime,MaxExecTime,RatioAvg,Epochs,Distribution\n\
             j1,0.0,100.0,2.5,10.0,50.0,0.9,30,exponential\n\
             j2,5.0,200.0,1.0,20.0,80.0,0.0,,\n",
        );

        let jobs = load_jobs(&path).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "j1");
        assert_eq!(jobs[0].tardiness_weight, 2.5);
        assert_eq!(jobs[0].ratio_avg, 0.9);
        assert_eq!(jobs[0].max_epochs, 30.0);
        assert_eq!(jobs[0].distribution, "exponential");
        assert_eq!(jobs[1].max_epochs, 0.0);
    }

    #[test]
    fn test_load_jobs_without_optional_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            JOBS_FILE,
            "ID,SubmissionTime,Deadline,TardinessWeight,MinExecTime,MaxExecTime,RatioAvg\n\
             j1,0.0,100.0,2.5,10.0,50.0,0.0\n",
        );
        let jobs = load_jobs(&path).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].epochs, 0.0);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = load_jobs(&dir.path().join(JOBS_FILE)).unwrap_err();
        assert!(matches!(err, InputError::Missing(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_missing_column_is_a_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, JOBS_FILE, "ID,SubmissionTime\nj1,0.0\n");
        let err = load_jobs(&path).unwrap_err();
        assert!(matches!(err, InputError::Schema { .. }));
    }

    #[test]
    fn test_load_time_table_with_and_without_real_times() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            TIMES_FILE,
            "ID,GPUtype,nGPUs,GPUf,ExecutionTime,RealExecutionTime\n\
             j1,A100,2,1.0,100.0,140.0\n\
             j1,A100,1,0.5,250.0,300.0\n",
        );

        let plain = load_time_table(&path, false).unwrap();
        assert_eq!(plain.time("j1", &Setup::new("A100", 2, 1.0)), Some(100.0));
        assert!(!plain.has_real_times());

        let real = load_time_table(&path, true).unwrap();
        assert_eq!(
            real.real_time("j1", &Setup::new("A100", 1, 0.5)),
            Some(300.0)
        );
    }

    #[test]
    fn test_stochastic_load_requires_real_column() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            TIMES_FILE,
            "ID,GPUtype,nGPUs,GPUf,ExecutionTime\nj1,A100,2,1.0,100.0\n",
        );
        assert!(load_time_table(&path, false).is_ok());
        assert!(matches!(
            load_time_table(&path, true),
            Err(InputError::Schema { .. })
        ));
    }

    #[test]
    fn test_load_nodes_and_costs() {
        let dir = TempDir::new().unwrap();
        let nodes_path = write_file(
            &dir,
            NODES_FILE,
            "ID,GPUtype,nGPUs,cost\nn1,A100,4,2.0\nn2,V100,2,1.0\n",
        );
        let costs_path = write_file(
            &dir,
            COSTS_FILE,
            "GPUtype,nGPUs,cost\nA100,1,2.0\nA100,4,7.0\nV100,2,3.0\n",
        );

        let resources = load_nodes(&nodes_path).unwrap();
        assert_eq!(resources.total_nodes(), 2);
        assert_eq!(resources.remaining_gpus("A100", "n1"), 4);

        let catalogue = load_catalogue(&costs_path).unwrap();
        assert_eq!(catalogue.cost("A100", 4), 7.0);
        assert_eq!(catalogue.total_gpus(), 7);
    }

    #[test]
    fn test_schedule_writer_emits_rows() {
        use crate::core::job::index_jobs;
        use crate::core::schedule::{Assignment, Schedule};
        use std::collections::BTreeMap;

        let dir = TempDir::new().unwrap();
        let out = dir.path().join("results").join("G_schedule.csv");

        let job = Job::builder().id("j1").deadline(50.0).build();
        let jobs = index_jobs(&[job]);
        let mut schedule = BTreeMap::new();
        let mut sch = Schedule::with_assignment(Assignment {
            node: "n1".into(),
            gpu_type: "A100".into(),
            selected_time: 100.0,
            gpus: 4,
            gpu_frac: 1.0,
            gpu_index: None,
        });
        sch.iter = 1;
        sch.completion_percent = 100.0;
        sch.tardiness = 50.0;
        schedule.insert(crate::core::JobId::from("j1"), sch);
        let solution = Solution::new(schedule, ResourceMap::new(), 0.0);

        let mut writer = ScheduleWriter::create(&out).unwrap();
        writer.write_solution(&solution, &jobs).unwrap();
        drop(writer);

        let content = std::fs::read_to_string(&out).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("n_iterate,sim_time,ID"));
        let row = lines.next().unwrap();
        assert!(row.contains("j1"));
        assert!(row.contains("n1"));
        assert!(row.contains("100"));
    }

    #[test]
    fn test_append_totals_keeps_single_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TOTALS_FILE);
        let totals = CostSummary {
            total_tardiness: 50.0,
            total_tardiness_cost: 100.0,
            total_node_cost: 1.0,
            total_gpu_cost: 2.0,
            total_energy_cost: 3.0,
            total_cost: 103.0,
        };

        append_totals(&path, Method::Greedy, 4010, &totals).unwrap();
        append_totals(&path, Method::RandomGreedy, 7, &totals).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("method,seed"));
        assert!(lines[1].starts_with("G,4010"));
        assert!(lines[2].starts_with("RG,7"));
    }
}

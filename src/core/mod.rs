use compact_str::CompactString;

pub mod catalogue;
pub mod elite;
pub mod engine;
pub mod job;
pub mod local_search;
pub mod node;
pub mod proxy;
pub mod resources;
pub mod schedule;
pub mod simulator;
pub mod solution;
pub mod system;
pub mod timetable;

/// Job identifiers double as the key of every schedule map.
pub type JobId = CompactString;
pub type NodeId = CompactString;
pub type GpuType = CompactString;

/// Sentinel for "no finite execution time" (empty schedules, decayed-out
/// table entries, first finish of an empty solution).
pub const INF: f64 = f64::INFINITY;

/// Tolerance shared by cost and completion-percent comparisons.
pub const TOL: f64 = 1e-7;

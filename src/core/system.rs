use crate::core::job::Job;
use crate::core::resources::ResourceMap;

/// What the scheduling engine sees at one decision instant: the queue it
/// may place and the resources it may place on.
///
/// The simulator decides what goes in here — the full submitted queue with
/// an idle cluster for the greedy family, or only the not-yet-running jobs
/// with the currently available resources for the first-principle methods.
#[derive(Debug, Clone, Default)]
pub struct System {
    pub jobs: Vec<Job>,
    pub resources: ResourceMap,
}

impl System {
    pub fn new(jobs: Vec<Job>, resources: ResourceMap) -> Self {
        Self { jobs, resources }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.resources.is_empty()
    }
}

use crate::core::solution::Solution;
use serde::{Deserialize, Serialize};

/// Which direction the proxy cost runs: minimize for billed-cost proxies,
/// maximize for throughput figures of merit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostOrder {
    Minimize,
    Maximize,
}

impl CostOrder {
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            CostOrder::Minimize => candidate < incumbent,
            CostOrder::Maximize => candidate > incumbent,
        }
    }
}

/// Best-K pool of solutions ordered by proxy cost under an explicit
/// comparator value.
///
/// Entries are kept best-first; the pool never exceeds its capacity and a
/// candidate with a cost already present is dropped (a map keyed by cost
/// cannot hold it twice, and keeping near-identical rebuilds around adds
/// nothing to the pool's diversity).
#[derive(Debug, Clone)]
pub struct EliteSet {
    entries: Vec<(f64, Solution)>,
    capacity: usize,
    order: CostOrder,
}

impl Default for CostOrder {
    fn default() -> Self {
        CostOrder::Minimize
    }
}

impl EliteSet {
    pub fn new(capacity: usize, order: CostOrder) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            order,
        }
    }

    pub fn order(&self) -> CostOrder {
        self.order
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grow or shrink the pool; shrinking evicts from the worst end.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.entries.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn best(&self) -> Option<&(f64, Solution)> {
        self.entries.first()
    }

    pub fn worst_cost(&self) -> Option<f64> {
        self.entries.last().map(|(c, _)| *c)
    }

    pub fn entries(&self) -> &[(f64, Solution)] {
        &self.entries
    }

    /// Insert a scored solution if it earns a slot: the pool is not full
    /// yet, or the candidate beats the current worst. Returns whether the
    /// candidate was kept.
    pub fn try_insert(&mut self, cost: f64, solution: Solution) -> bool {
        if self.entries.iter().any(|(c, _)| *c == cost) {
            return false;
        }
        let full = self.entries.len() >= self.capacity;
        if full && !self.order.is_better(cost, self.worst_cost().unwrap()) {
            return false;
        }
        let pos = self
            .entries
            .partition_point(|(c, _)| !self.order.is_better(cost, *c));
        self.entries.insert(pos, (cost, solution));
        self.entries.truncate(self.capacity);
        true
    }

    pub fn into_best(mut self) -> Option<Solution> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0).1)
        }
    }
}

use crate::core::{GpuType, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A cluster node: a fixed number of GPUs of one type, leased per hour.
///
/// Only `used` mutates over the node's lifetime; nodes are never destroyed,
/// they open and close as jobs come and go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gpu_type: GpuType,
    pub gpus: u32,
    /// Lease cost per hour.
    pub cost: f64,
    used: u32,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, gpu_type: impl Into<GpuType>, gpus: u32, cost: f64) -> Self {
        Self {
            id: id.into(),
            gpu_type: gpu_type.into(),
            gpus,
            cost,
            used: 0,
        }
    }

    pub fn used_gpus(&self) -> u32 {
        self.used
    }

    pub fn remaining_gpus(&self) -> u32 {
        self.gpus - self.used
    }

    pub fn is_open(&self) -> bool {
        self.used < self.gpus
    }

    /// Reserve `g` whole GPUs. Callers must have checked capacity.
    pub fn reserve(&mut self, g: u32) {
        debug_assert!(g <= self.remaining_gpus(), "over-reserving node {}", self.id);
        self.used += g;
    }

    /// Give back `g` whole GPUs. Releasing more than is used clamps to zero.
    pub fn free(&mut self, g: u32) {
        self.used = self.used.saturating_sub(g);
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Node {}

/// Best-fit key: fewest remaining GPUs first, then id for determinism.
pub fn by_best_fit(a: &Node, b: &Node) -> Ordering {
    a.remaining_gpus()
        .cmp(&b.remaining_gpus())
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_free() {
        let mut n = Node::new("n1", "A100", 4, 2.5);
        assert!(n.is_open());
        n.reserve(3);
        assert_eq!(n.remaining_gpus(), 1);
        n.reserve(1);
        assert!(!n.is_open());
        n.free(4);
        assert_eq!(n.used_gpus(), 0);
    }

    #[test]
    fn test_free_is_clamped() {
        let mut n = Node::new("n1", "A100", 4, 2.5);
        n.reserve(1);
        n.free(10);
        assert_eq!(n.used_gpus(), 0);
    }

    #[test]
    fn test_best_fit_order() {
        let mut a = Node::new("a", "V100", 8, 1.0);
        let b = Node::new("b", "V100", 4, 1.0);
        a.reserve(6); // remaining 2
        assert_eq!(by_best_fit(&a, &b), Ordering::Less);

        let c = Node::new("c", "V100", 4, 1.0);
        assert_eq!(by_best_fit(&b, &c), Ordering::Less);
    }
}

use crate::core::{GpuType, INF};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Energy price list: cost of running `n` GPUs of a given type, indexed by
/// count. Counts without a listed price cost infinitely much, so they never
/// win a cheapest-setup comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuCatalogue {
    costs: HashMap<GpuType, Vec<f64>>,
    total_gpus: u32,
}

impl GpuCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    pub fn total_gpus(&self) -> u32 {
        self.total_gpus
    }

    pub fn insert(&mut self, gpu_type: impl Into<GpuType>, gpus: u32, cost: f64) {
        let entry = self.costs.entry(gpu_type.into()).or_default();
        if entry.len() < gpus as usize {
            entry.resize(gpus as usize, INF);
        }
        entry[gpus as usize - 1] = cost;
        self.total_gpus += gpus;
    }

    pub fn cost(&self, gpu_type: &str, gpus: u32) -> f64 {
        if gpus == 0 {
            return INF;
        }
        self.costs
            .get(gpu_type)
            .and_then(|c| c.get(gpus as usize - 1))
            .copied()
            .unwrap_or(INF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_lookup() {
        let mut c = GpuCatalogue::new();
        c.insert("A100", 1, 2.0);
        c.insert("A100", 4, 7.0);
        c.insert("V100", 2, 3.0);

        assert_eq!(c.cost("A100", 1), 2.0);
        assert_eq!(c.cost("A100", 4), 7.0);
        // count 2 and 3 were never listed
        assert_eq!(c.cost("A100", 2), INF);
        assert_eq!(c.cost("V100", 2), 3.0);
        assert_eq!(c.cost("T4", 1), INF);
        assert_eq!(c.cost("A100", 0), INF);
        assert_eq!(c.total_gpus(), 7);
    }
}

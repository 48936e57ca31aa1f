use crate::core::node::{by_best_fit, Node};
use crate::core::{GpuType, JobId, NodeId, TOL};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// One physical GPU split into sub-unit fractions across jobs on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedGpu {
    pub remaining: f64,
    pub node: NodeId,
    pub index: u32,
}

type SharedList = SmallVec<[SharedGpu; 4]>;

/// Where a schedule landed, as needed to give the resources back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub node: NodeId,
    pub gpu_type: GpuType,
    pub gpus: u32,
    pub gpu_frac: f64,
    pub gpu_index: Option<u32>,
}

/// The id handed back by a successful assignment: the node, plus the
/// within-node GPU index when only a fraction was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedGpu {
    pub node: NodeId,
    pub gpu_index: Option<u32>,
}

impl fmt::Display for AssignedGpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gpu_index {
            Some(idx) => write!(f, "{}_{}", self.node, idx),
            None => write!(f, "{}", self.node),
        }
    }
}

/// The cluster model: nodes grouped by GPU type and partitioned into open
/// and full, plus the fractional-GPU sub-maps.
///
/// Invariants kept after every mutation:
/// - each node sits in exactly one of `open` / `full` for its type;
/// - `open` lists are sorted by (remaining GPUs, id) ascending;
/// - `shared` lists are sorted by remaining fraction descending and only
///   hold GPUs with a usable fraction; saturated ones live in `full_shared`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMap {
    open: BTreeMap<GpuType, Vec<Node>>,
    full: BTreeMap<GpuType, Vec<Node>>,
    shared: BTreeMap<GpuType, SharedList>,
    full_shared: BTreeMap<GpuType, SharedList>,
    /// Monotonic per-node counter handing out within-node GPU indices.
    gpu_counters: BTreeMap<NodeId, u32>,
}

fn sort_shared(list: &mut SharedList) {
    list.sort_by(|a, b| {
        b.remaining
            .total_cmp(&a.remaining)
            .then_with(|| a.node.cmp(&b.node))
            .then_with(|| a.index.cmp(&b.index))
    });
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut map = Self::new();
        for n in nodes {
            map.add_node(n);
        }
        map
    }

    pub fn add_node(&mut self, node: Node) {
        let list = self.open.entry(node.gpu_type.clone()).or_default();
        list.push(node);
        list.sort_by(by_best_fit);
    }

    pub fn is_empty(&self) -> bool {
        self.total_nodes() == 0
    }

    pub fn total_nodes(&self) -> usize {
        self.open_count() + self.full_count()
    }

    pub fn open_count(&self) -> usize {
        self.open.values().map(Vec::len).sum()
    }

    pub fn full_count(&self) -> usize {
        self.full.values().map(Vec::len).sum()
    }

    pub fn is_full(&self) -> bool {
        self.open_count() == 0
    }

    /// True while anything can still be placed: a free whole GPU on an open
    /// node, or a usable fraction on a shared GPU.
    pub fn has_available(&self) -> bool {
        self.open
            .values()
            .any(|list| list.iter().any(|n| n.remaining_gpus() > 0))
            || self
                .shared
                .values()
                .any(|list| list.iter().any(|g| g.remaining > TOL))
    }

    /// Whole GPUs in use on a node; searches full nodes first, then open.
    pub fn used_gpus(&self, gpu_type: &str, node_id: &str) -> u32 {
        let found = self
            .full
            .get(gpu_type)
            .and_then(|l| l.iter().find(|n| n.id == node_id))
            .or_else(|| {
                self.open
                    .get(gpu_type)
                    .and_then(|l| l.iter().find(|n| n.id == node_id))
            });
        debug_assert!(
            found.is_some(),
            "used_gpus on unknown node {node_id} ({gpu_type})"
        );
        found.map(Node::used_gpus).unwrap_or(0)
    }

    /// Free whole GPUs on an open node; 0 for full or unknown nodes.
    pub fn remaining_gpus(&self, gpu_type: &str, node_id: &str) -> u32 {
        self.open
            .get(gpu_type)
            .and_then(|l| l.iter().find(|n| n.id == node_id))
            .map(Node::remaining_gpus)
            .unwrap_or(0)
    }

    /// Lease cost of the whole fleet for `elapsed` seconds.
    pub fn compute_node_cost(&self, elapsed: f64) -> f64 {
        self.open
            .values()
            .chain(self.full.values())
            .flatten()
            .map(|n| n.cost * elapsed / 3600.0)
            .sum()
    }

    /// Remaining fraction of a specific shared GPU, if it is still open.
    pub fn shared_remaining(&self, gpu_type: &str, node_id: &str, index: u32) -> Option<f64> {
        self.shared
            .get(gpu_type)?
            .iter()
            .find(|g| g.node == node_id && g.index == index)
            .map(|g| g.remaining)
    }

    /// Snapshot of the open shared GPUs of every type, ordered by descending
    /// remaining fraction within each type.
    pub fn shared_snapshot(&self) -> Vec<(GpuType, SharedGpu)> {
        self.shared
            .iter()
            .flat_map(|(t, list)| list.iter().map(move |g| (t.clone(), g.clone())))
            .collect()
    }

    /// Place `g` whole GPUs (or a fraction `f` of one) of `gpu_type`.
    ///
    /// Fractions first try to squeeze into an already-shared GPU with enough
    /// room; otherwise the open node with the fewest sufficient remaining
    /// GPUs is picked (best-fit), and a fraction converts one of its freshly
    /// reserved GPUs into a new shared GPU. `unique` closes the node
    /// regardless of leftover capacity. Returns `None` when nothing fits.
    pub fn assign(
        &mut self,
        gpu_type: &str,
        g: u32,
        f: f64,
        unique: bool,
        node_filter: Option<&str>,
    ) -> Option<AssignedGpu> {
        if f < 1.0 - TOL {
            if let Some(assigned) = self.assign_to_shared(gpu_type, f, node_filter) {
                return Some(assigned);
            }
        }

        let nodes = self.open.get_mut(gpu_type)?;
        let pos = nodes.iter().position(|n| {
            node_filter.is_none_or(|id| n.id == id) && n.remaining_gpus() >= g
        })?;
        let mut node = nodes.remove(pos);
        node.reserve(g);
        let node_id = node.id.clone();

        let gpu_index = if f < 1.0 - TOL {
            let counter = self.gpu_counters.entry(node_id.clone()).or_insert(0);
            *counter += 1;
            let index = *counter;
            self.insert_shared(
                gpu_type,
                SharedGpu {
                    remaining: 1.0 - f,
                    node: node_id.clone(),
                    index,
                },
            );
            Some(index)
        } else {
            None
        };

        if unique || node.remaining_gpus() == 0 {
            self.full.entry(node.gpu_type.clone()).or_default().push(node);
        } else {
            let list = self.open.entry(node.gpu_type.clone()).or_default();
            list.push(node);
            list.sort_by(by_best_fit);
        }

        Some(AssignedGpu {
            node: node_id,
            gpu_index,
        })
    }

    fn assign_to_shared(
        &mut self,
        gpu_type: &str,
        f: f64,
        node_filter: Option<&str>,
    ) -> Option<AssignedGpu> {
        let list = self.shared.get_mut(gpu_type)?;
        // The list is sorted by descending remaining fraction, so the last
        // fitting entry has the tightest sufficient room.
        let pos = list
            .iter()
            .rposition(|sg| node_filter.is_none_or(|id| sg.node == id) && sg.remaining >= f - TOL)?;
        let mut sg = list.remove(pos);
        sg.remaining = (sg.remaining - f).max(0.0);
        let assigned = AssignedGpu {
            node: sg.node.clone(),
            gpu_index: Some(sg.index),
        };
        self.insert_shared(gpu_type, sg);
        Some(assigned)
    }

    fn insert_shared(&mut self, gpu_type: &str, sg: SharedGpu) {
        if sg.remaining <= TOL {
            self.full_shared
                .entry(GpuType::from(gpu_type))
                .or_default()
                .push(sg);
        } else {
            let list = self.shared.entry(GpuType::from(gpu_type)).or_default();
            list.push(sg);
            sort_shared(list);
        }
    }

    /// Reclaim a fraction of the shared GPU surplus (postprocessing upgrades).
    /// Saturated GPUs migrate to the full-shared map.
    pub fn take_shared_fraction(
        &mut self,
        gpu_type: &str,
        node_id: &str,
        index: u32,
        f: f64,
    ) -> bool {
        let Some(list) = self.shared.get_mut(gpu_type) else {
            return false;
        };
        let Some(pos) = list
            .iter()
            .position(|g| g.node == node_id && g.index == index && g.remaining >= f - TOL)
        else {
            return false;
        };
        let mut sg = list.remove(pos);
        sg.remaining = (sg.remaining - f).max(0.0);
        self.insert_shared(gpu_type, sg);
        true
    }

    /// Give back the resources of ended jobs. Unknown placements are ignored.
    pub fn release(&mut self, ended: &[(JobId, Placement)]) {
        for (job, p) in ended {
            tracing::debug!(job = %job, node = %p.node, gpus = p.gpus, frac = p.gpu_frac, "releasing resources");
            if p.gpu_frac < 1.0 - TOL {
                self.release_fraction(p);
            } else {
                self.free_on_node(&p.gpu_type, &p.node, p.gpus);
            }
        }
    }

    fn release_fraction(&mut self, p: &Placement) {
        let Some(index) = p.gpu_index else {
            debug_assert!(false, "fractional placement without a GPU index");
            return;
        };

        let take = |list: &mut SharedList| {
            list.iter()
                .position(|g| g.node == p.node && g.index == index)
                .map(|pos| list.remove(pos))
        };

        let found = self
            .full_shared
            .get_mut(&p.gpu_type)
            .and_then(take)
            .or_else(|| self.shared.get_mut(&p.gpu_type).and_then(take));
        let Some(mut sg) = found else {
            return;
        };

        sg.remaining += p.gpu_frac;
        if sg.remaining >= 1.0 - TOL {
            // Last fraction gone: the backing whole GPU frees up as well.
            self.free_on_node(&p.gpu_type, &p.node, p.gpus);
        } else {
            self.insert_shared(&p.gpu_type, sg);
        }
    }

    fn free_on_node(&mut self, gpu_type: &str, node_id: &str, g: u32) {
        if let Some(list) = self.full.get_mut(gpu_type) {
            if let Some(pos) = list.iter().position(|n| n.id == node_id) {
                let mut node = list.remove(pos);
                node.free(g);
                let open = self.open.entry(node.gpu_type.clone()).or_default();
                open.push(node);
                open.sort_by(by_best_fit);
                return;
            }
        }
        if let Some(list) = self.open.get_mut(gpu_type) {
            if let Some(node) = list.iter_mut().find(|n| n.id == node_id) {
                node.free(g);
                list.sort_by(by_best_fit);
            }
        }
    }

    /// Reset the whole map to an idle cluster: full nodes merge back into
    /// open, used counts drop to zero, shared-GPU state is discarded. The
    /// GPU-index counters keep counting.
    pub fn close_all(&mut self) {
        let full = std::mem::take(&mut self.full);
        for (gpu_type, nodes) in full {
            self.open.entry(gpu_type).or_default().extend(nodes);
        }
        for list in self.open.values_mut() {
            for n in list.iter_mut() {
                n.reset();
            }
            list.sort_by(by_best_fit);
        }
        self.shared.clear();
        self.full_shared.clear();
    }

    /// All nodes of every type, open and full, for fleet-wide sweeps.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.open.values().chain(self.full.values()).flatten()
    }
}

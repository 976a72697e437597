use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use log::info;

use crate::HashMap;
use crate::ir::{Graph, NodeId, NodeKind, SuperId, SuperKind, SuperNode};
use crate::scheduler::{TopoOrder, is_computing};

struct Cluster {
    kind: SuperKind,
    members: Vec<NodeId>,
    /// Smallest topological position among the members.
    position: usize,
    preds: BTreeSet<usize>,
    succs: BTreeSet<usize>,
}

fn kind_of(graph: &Graph, id: NodeId) -> SuperKind {
    match graph.node(id).kind {
        NodeKind::RegDst => SuperKind::Register,
        NodeKind::PortMember(_) => SuperKind::MemoryPort,
        NodeKind::Printf | NodeKind::Assert => SuperKind::Active,
        _ => SuperKind::Comb,
    }
}

struct Clusters {
    slots: Vec<Option<Cluster>>,
    max_size: usize,
}

impl Clusters {
    fn get(&self, i: usize) -> Option<&Cluster> {
        self.slots[i].as_ref()
    }

    fn mergeable(&self, a: usize, b: usize) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(x), Some(y)) => {
                x.kind == SuperKind::Comb
                    && y.kind == SuperKind::Comb
                    && x.members.len() + y.members.len() <= self.max_size
            }
            _ => false,
        }
    }

    /// Moves `from` into `into`, rewiring both adjacency sets.
    fn absorb(&mut self, from: usize, into: usize) {
        let Some(gone) = self.slots[from].take() else {
            return;
        };
        for p in &gone.preds {
            if let Some(c) = self.slots[*p].as_mut() {
                c.succs.remove(&from);
                if *p != into {
                    c.succs.insert(into);
                }
            }
        }
        for s in &gone.succs {
            if let Some(c) = self.slots[*s].as_mut() {
                c.preds.remove(&from);
                if *s != into {
                    c.preds.insert(into);
                }
            }
        }
        if let Some(target) = self.slots[into].as_mut() {
            target.members.extend(gone.members);
            target.position = target.position.min(gone.position);
            target.preds.extend(gone.preds.into_iter().filter(|p| *p != into));
            target.succs.extend(gone.succs.into_iter().filter(|s| *s != into));
            target.preds.remove(&from);
            target.succs.remove(&from);
        }
    }

    /// Merges clusters into their only successor.
    fn merge_out1(&mut self) -> usize {
        let mut merged = 0;
        for i in 0..self.slots.len() {
            let only = match self.get(i) {
                Some(c) if c.succs.len() == 1 => c.succs.iter().next().copied(),
                _ => None,
            };
            if let Some(succ) = only {
                if self.mergeable(i, succ) {
                    self.absorb(i, succ);
                    merged += 1;
                }
            }
        }
        merged
    }

    /// Merges clusters into their only predecessor.
    fn merge_in1(&mut self) -> usize {
        let mut merged = 0;
        for i in 0..self.slots.len() {
            let only = match self.get(i) {
                Some(c) if c.preds.len() == 1 => c.preds.iter().next().copied(),
                _ => None,
            };
            if let Some(pred) = only {
                if self.mergeable(i, pred) {
                    self.absorb(i, pred);
                    merged += 1;
                }
            }
        }
        merged
    }

    /// Kahn's algorithm, always taking the ready cluster that appears
    /// earliest in the node order.
    fn sorted(&self) -> Vec<usize> {
        let mut in_degree: HashMap<usize, usize> = HashMap::default();
        let mut heap = BinaryHeap::new();
        for (i, c) in self.slots.iter().enumerate() {
            if let Some(c) = c {
                in_degree.insert(i, c.preds.len());
                if c.preds.is_empty() {
                    heap.push(Reverse((c.position, i)));
                }
            }
        }
        let mut out = Vec::new();
        while let Some(Reverse((_, i))) = heap.pop() {
            out.push(i);
            let Some(c) = self.get(i) else { continue };
            for s in &c.succs {
                if let Some(d) = in_degree.get_mut(s) {
                    *d -= 1;
                    if *d == 0 {
                        if let Some(next) = self.get(*s) {
                            heap.push(Reverse((next.position, *s)));
                        }
                    }
                }
            }
        }
        out
    }
}

/// Groups computing nodes into clusters and stores the evaluation order in
/// the graph. Returns the number of clusters.
///
/// Combinational clusters come first, then printf/assert clusters, then one
/// cluster per register destination in `dsts` order. Keeping register
/// updates behind every other cluster means all reads of an in-place
/// register's current value happen before it is overwritten.
pub fn form_clusters(
    graph: &mut Graph,
    order: &TopoOrder,
    dsts: &[NodeId],
    max_size: usize,
) -> usize {
    let main: Vec<NodeId> = order
        .main
        .iter()
        .copied()
        .filter(|id| is_computing(graph, *id))
        .collect();
    let position: HashMap<NodeId, usize> = main.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut clusters = Clusters {
        slots: main
            .iter()
            .enumerate()
            .map(|(i, id)| {
                Some(Cluster {
                    kind: kind_of(graph, *id),
                    members: vec![*id],
                    position: i,
                    preds: BTreeSet::new(),
                    succs: BTreeSet::new(),
                })
            })
            .collect(),
        max_size: max_size.max(1),
    };
    for (i, id) in main.iter().enumerate() {
        for prev in &graph.node(*id).prev {
            if let Some(p) = position.get(prev) {
                if let Some(c) = clusters.slots[*p].as_mut() {
                    c.succs.insert(i);
                }
                if let Some(c) = clusters.slots[i].as_mut() {
                    c.preds.insert(*p);
                }
            }
        }
    }

    let before = main.len();
    loop {
        let merged = clusters.merge_out1() + clusters.merge_in1();
        if merged == 0 {
            break;
        }
    }
    let comb_order = clusters.sorted();
    info!(
        "[mergeNodes] remove {} superNodes",
        before - comb_order.len()
    );

    let mut groups: Vec<(SuperKind, Vec<NodeId>)> = Vec::new();
    for i in comb_order {
        if let Some(c) = clusters.slots[i].take() {
            let mut members = c.members;
            members.sort_by_key(|m| position.get(m).copied().unwrap_or(usize::MAX));
            groups.push((c.kind, members));
        }
    }
    for id in &order.actives {
        groups.push((SuperKind::Active, vec![*id]));
    }
    for id in dsts {
        groups.push((SuperKind::Register, vec![*id]));
    }

    for node in &mut graph.nodes {
        node.super_id = None;
    }
    graph.supers.clear();
    graph.order.clear();
    for (index, (kind, members)) in groups.into_iter().enumerate() {
        let id = SuperId(index);
        for m in &members {
            graph.node_mut(*m).super_id = Some(id);
        }
        graph.supers.push(SuperNode { id, kind, members });
        graph.order.push(id);
    }
    graph.supers.len()
}

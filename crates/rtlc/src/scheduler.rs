//! Dependency ordering of the graph.
//!
//! Scheduling runs in three steps: a topological sort (splitting arrays that
//! close a combinational cycle until the sort succeeds), register ordering
//! (which registers may update in place), and cluster formation.

use log::{debug, info};
use thiserror::Error;

use crate::HashSet;
use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::ir::{Graph, MemberRole, NodeId, NodeKind};

mod cluster;
mod registers;
mod split_array;

pub use split_array::split_array;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Combinational loop detected: {}", .nodes.join(" -> "))]
    CombinationalLoop { nodes: Vec<String> },
}

/// Topological order of the live computing nodes.
#[derive(Debug, Clone, Default)]
pub struct TopoOrder {
    /// Combinational nodes in evaluation order.
    pub main: Vec<NodeId>,
    /// Printf and assert nodes.
    pub actives: Vec<NodeId>,
    /// Register destinations.
    pub dsts: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub arrays_split: usize,
    pub registers_split: usize,
    pub clusters: usize,
}

/// Whether `id` takes part in ordering at all.
fn is_scheduled(graph: &Graph, id: NodeId) -> bool {
    graph.node(id).kind != NodeKind::Memory
}

fn is_trailing(graph: &Graph, id: NodeId) -> bool {
    let node = graph.node(id);
    node.kind == NodeKind::RegDst || node.is_active()
}

/// Kahn's algorithm with a LIFO ready stack. Returns the nodes left over
/// when the graph has a cycle.
pub fn topo_sort(graph: &Graph) -> Result<TopoOrder, Vec<NodeId>> {
    let mut in_degree = vec![0usize; graph.nodes.len()];
    let mut ready = Vec::new();
    let mut total = 0;
    for id in graph.live_nodes().filter(|id| is_scheduled(graph, *id)) {
        total += 1;
        in_degree[id.0] = graph.node(id).prev.len();
        if in_degree[id.0] == 0 {
            ready.push(id);
        }
    }
    ready.reverse();

    let mut order = TopoOrder::default();
    let mut visited = 0;
    while let Some(id) = ready.pop() {
        visited += 1;
        if is_trailing(graph, id) {
            if graph.node(id).is_active() {
                order.actives.push(id);
            } else {
                order.dsts.push(id);
            }
        } else {
            order.main.push(id);
        }
        for next in &graph.node(id).next {
            in_degree[next.0] -= 1;
            if in_degree[next.0] == 0 {
                ready.push(*next);
            }
        }
    }
    if visited == total {
        return Ok(order);
    }
    Err(graph
        .live_nodes()
        .filter(|id| is_scheduled(graph, *id) && in_degree[id.0] > 0)
        .collect())
}

struct TarjanContext {
    index: usize,
    stack: Vec<usize>,
    on_stack: HashSet<usize>,
    indices: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    sccs: Vec<Vec<usize>>,
}

fn strong_connect(u: usize, adj: &[Vec<usize>], ctx: &mut TarjanContext) {
    ctx.indices[u] = Some(ctx.index);
    ctx.lowlink[u] = ctx.index;
    ctx.index += 1;
    ctx.stack.push(u);
    ctx.on_stack.insert(u);

    for &v in &adj[u] {
        match ctx.indices[v] {
            None => {
                strong_connect(v, adj, ctx);
                ctx.lowlink[u] = ctx.lowlink[u].min(ctx.lowlink[v]);
            }
            Some(index) if ctx.on_stack.contains(&v) => {
                ctx.lowlink[u] = ctx.lowlink[u].min(index);
            }
            Some(_) => {}
        }
    }

    if Some(ctx.lowlink[u]) == ctx.indices[u] {
        let mut scc = Vec::new();
        while let Some(w) = ctx.stack.pop() {
            ctx.on_stack.remove(&w);
            scc.push(w);
            if w == u {
                break;
            }
        }
        ctx.sccs.push(scc);
    }
}

/// Strongly connected components of `nodes` that contain a cycle.
pub fn cyclic_components(graph: &Graph, nodes: &[NodeId]) -> Vec<Vec<NodeId>> {
    let local: crate::HashMap<NodeId, usize> =
        nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let adj: Vec<Vec<usize>> = nodes
        .iter()
        .map(|id| {
            graph
                .node(*id)
                .next
                .iter()
                .filter_map(|n| local.get(n).copied())
                .collect()
        })
        .collect();
    let mut ctx = TarjanContext {
        index: 0,
        stack: Vec::new(),
        on_stack: HashSet::default(),
        indices: vec![None; nodes.len()],
        lowlink: vec![0; nodes.len()],
        sccs: Vec::new(),
    };
    for i in 0..nodes.len() {
        if ctx.indices[i].is_none() {
            strong_connect(i, &adj, &mut ctx);
        }
    }
    ctx.sccs
        .into_iter()
        .filter(|scc| scc.len() > 1 || adj[scc[0]].contains(&scc[0]))
        .map(|scc| {
            let mut ids: Vec<NodeId> = scc.into_iter().map(|i| nodes[i]).collect();
            ids.sort();
            ids
        })
        .collect()
}

/// One cycle through `component`, starting at its first node.
fn cycle_path(graph: &Graph, component: &[NodeId]) -> Vec<NodeId> {
    let members: HashSet<NodeId> = component.iter().copied().collect();
    let start = component[0];
    let mut parent: crate::HashMap<NodeId, NodeId> = crate::HashMap::default();
    let mut queue = std::collections::VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        for next in &graph.node(id).next {
            if *next == start {
                let mut path = vec![id];
                let mut cur = id;
                while let Some(p) = parent.get(&cur) {
                    path.push(*p);
                    cur = *p;
                }
                path.reverse();
                return path;
            }
            if members.contains(next) && !parent.contains_key(next) && *next != start {
                parent.insert(*next, id);
                queue.push_back(*next);
            }
        }
    }
    component.to_vec()
}

/// Splits arrays on combinational cycles until the graph sorts.
fn sort_with_array_splitting(graph: &mut Graph) -> Result<(TopoOrder, usize), CompileError> {
    let mut arrays_split = 0;
    loop {
        let leftover = match topo_sort(graph) {
            Ok(order) => return Ok((order, arrays_split)),
            Err(leftover) => leftover,
        };
        let components = cyclic_components(graph, &leftover);
        let candidate = components.iter().flatten().copied().find(|id| {
            let node = graph.node(*id);
            node.is_array() && node.kind == NodeKind::Wire
        });
        match candidate {
            Some(array) => {
                debug!("split array {} on a combinational cycle", graph.node(array).name);
                split_array(graph, array)?;
                arrays_split += 1;
            }
            None => {
                let component = components.first().cloned().unwrap_or(leftover);
                let nodes = cycle_path(graph, &component)
                    .into_iter()
                    .map(|id| graph.node(id).name.clone())
                    .collect();
                return Err(SchedulerError::CombinationalLoop { nodes }.into());
            }
        }
    }
}

/// Whether `id` computes a value during a step.
pub(crate) fn is_computing(graph: &Graph, id: NodeId) -> bool {
    let node = graph.node(id);
    match node.kind {
        NodeKind::Input | NodeKind::Memory => false,
        NodeKind::RegSrc => !node.assigns.is_empty(),
        NodeKind::PortMember(m) if m.role == MemberRole::RData => !node.assigns.is_empty(),
        _ => true,
    }
}

pub fn schedule(graph: &mut Graph, options: &CompileOptions) -> Result<ScheduleSummary, CompileError> {
    graph.rebuild_edges();
    let (order, arrays_split) = sort_with_array_splitting(graph)?;
    let dsts = registers::order_registers(graph, &order, options.merge_registers);
    let registers_split = graph
        .live_regs()
        .iter()
        .filter(|r| graph.node(**r).reg_split)
        .count();
    let clusters = cluster::form_clusters(graph, &order, &dsts, options.max_cluster_size);
    info!(
        "split {} registers ({} in place)",
        registers_split,
        graph.live_regs().len() - registers_split
    );
    Ok(ScheduleSummary {
        arrays_split,
        registers_split,
        clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ENode, ExpTree, Node, PrimOp};

    fn wire(g: &mut Graph, name: &str) -> NodeId {
        g.add_node(Node::new(name, NodeKind::Wire, 4, false))
    }

    #[test]
    fn sort_respects_dependencies() {
        let mut g = Graph::new("Top");
        let a = g.add_node(Node::new("a", NodeKind::Input, 4, false));
        let b = wire(&mut g, "b");
        let c = wire(&mut g, "c");
        g.node_mut(c).assigns.push(ExpTree::new(ENode::reference(b)));
        g.node_mut(b).assigns.push(ExpTree::new(ENode::reference(a)));
        g.rebuild_edges();
        let order = topo_sort(&g).unwrap();
        let pos = |id| order.main.iter().position(|x| *x == id).unwrap();
        assert!(pos(a) < pos(b) && pos(b) < pos(c));
    }

    #[test]
    fn loop_is_reported_in_order() {
        let mut g = Graph::new("Top");
        let x = wire(&mut g, "x");
        let y = wire(&mut g, "y");
        g.node_mut(x).assigns.push(ExpTree::new(ENode::prim(
            PrimOp::Not,
            vec![ENode::reference(y)],
        )));
        g.node_mut(y).assigns.push(ExpTree::new(ENode::reference(x)));
        let err = schedule(&mut g, &CompileOptions::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Combinational loop detected: x -> y"
        );
    }
}

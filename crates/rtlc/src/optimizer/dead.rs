use log::info;

use crate::HashSet;
use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::ir::{Graph, MemberRole, NodeId, NodeKind, PortKind};
use crate::optimizer::GraphPass;

/// Removes nodes that cannot influence an output or a side effect.
pub struct DeadNodeElimination;

impl GraphPass for DeadNodeElimination {
    fn name(&self) -> &'static str {
        "dead-node elimination"
    }

    fn run(&self, graph: &mut Graph, _options: &CompileOptions) -> Result<bool, CompileError> {
        Ok(remove_dead_nodes(graph) > 0)
    }
}

pub fn remove_dead_nodes(graph: &mut Graph) -> usize {
    let live = live_set(graph);
    let mut removed = 0;
    let ids: Vec<NodeId> = graph.live_nodes().collect();
    for id in ids {
        if live.contains(&id) || graph.node(id).kind == NodeKind::Input {
            continue;
        }
        graph.mark_dead(id);
        removed += 1;
    }
    if removed > 0 {
        graph.rebuild_edges();
        info!("remove {} dead nodes", removed);
    }
    removed
}

fn live_set(graph: &Graph) -> HashSet<NodeId> {
    let mut live = HashSet::default();
    let mut stack: Vec<NodeId> = graph
        .outputs
        .iter()
        .chain(&graph.actives)
        .copied()
        .filter(|id| graph.node(*id).is_live())
        .collect();

    while let Some(id) = stack.pop() {
        if !live.insert(id) {
            continue;
        }
        let node = graph.node(id);
        for tree in &node.assigns {
            stack.extend(tree.refs());
        }
        match node.kind {
            NodeKind::RegSrc => stack.extend(node.partner),
            NodeKind::Memory => {
                let ports = node.mem.iter().flat_map(|m| &m.ports);
                for port in ports.filter(|p| p.kind == PortKind::Writer) {
                    stack.extend([port.addr, port.en, port.clk, port.data]);
                    stack.extend(port.mask);
                }
            }
            NodeKind::PortMember(m) if m.role == MemberRole::RData => {
                stack.push(m.mem);
                let mem = graph.node(m.mem);
                if let Some(port) = mem.mem.as_ref().and_then(|info| info.ports.get(m.port)) {
                    if mem.mem.as_ref().is_some_and(|info| info.read_latency > 0) {
                        stack.extend([port.addr, port.en, port.clk]);
                    }
                }
            }
            _ => {}
        }
    }
    live
}

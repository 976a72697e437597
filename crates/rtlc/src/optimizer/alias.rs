use log::info;

use crate::HashSet;
use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::ir::{Graph, NodeId, NodeKind};
use crate::optimizer::GraphPass;

/// Collapses wires that are plain copies of another node.
pub struct AliasAnalysis;

impl GraphPass for AliasAnalysis {
    fn name(&self) -> &'static str {
        "alias analysis"
    }

    fn run(&self, graph: &mut Graph, options: &CompileOptions) -> Result<bool, CompileError> {
        Ok(remove_aliases(graph, options.alias_fixpoint_limit) > 0)
    }
}

/// The node `id` copies, if it is a removable alias.
pub fn alias_target(graph: &Graph, id: NodeId) -> Option<NodeId> {
    let node = graph.node(id);
    if node.kind != NodeKind::Wire || node.is_array() || node.assigns.len() != 1 {
        return None;
    }
    let tree = &node.assigns[0];
    let target = tree.root.as_bare_ref()?;
    let source = graph.node(target);
    let same_type = source.width == node.width && source.sign == node.sign;
    (target != id && source.is_live() && !source.is_array() && same_type).then_some(target)
}

/// Runs alias rounds until none is found or `limit` rounds have run.
///
/// Each round only removes aliases whose target is not itself removed in
/// the same round, so chains shrink by one link per round.
pub fn remove_aliases(graph: &mut Graph, limit: usize) -> usize {
    let mut total = 0;
    for _ in 0..limit.max(1) {
        graph.rebuild_edges();
        let candidates: Vec<(NodeId, NodeId)> = graph
            .live_nodes()
            .filter_map(|id| alias_target(graph, id).map(|t| (id, t)))
            .collect();
        let aliases: HashSet<NodeId> = candidates.iter().map(|(id, _)| *id).collect();
        let mut removed = 0;
        for (id, target) in candidates {
            if aliases.contains(&target) {
                continue;
            }
            graph.replace_refs(id, target);
            graph.mark_dead(id);
            removed += 1;
        }
        if removed == 0 {
            break;
        }
        total += removed;
    }
    graph.rebuild_edges();
    if total > 0 {
        info!("remove {} alias", total);
    }
    total
}

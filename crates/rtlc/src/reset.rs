//! Register reset classification.
//!
//! Every register with a reset gets its destination rewritten to
//! `when(reset, value, update)`. Asynchronous registers additionally get an
//! `async_reset(reset, value)` tree on their source so the reset is visible
//! within the same step.

use log::debug;

use crate::error::BuildError;
use crate::ir::{ENode, ENodeKind, ExpTree, Graph, NodeId, PrimOp, ResetKind};
use crate::width::infer_tree;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResetSummary {
    pub sync: usize,
    pub asynchronous: usize,
    pub removed: usize,
}

pub fn analyze_resets(graph: &mut Graph) -> Result<ResetSummary, BuildError> {
    let mut summary = ResetSummary::default();
    for src in graph.live_regs() {
        let Some(mut reset) = graph.node_mut(src).reset.take() else {
            continue;
        };
        if reset.cond.literal_value().is_some_and(|v| v.bits() == 0) {
            summary.removed += 1;
            continue;
        }
        reset.kind = classify(graph, &reset.cond);
        let Some(dst) = graph.node(src).partner else {
            continue;
        };

        let update = graph
            .node_mut(dst)
            .assigns
            .pop()
            .map(|t| t.root)
            .unwrap_or_else(|| ENode::reference(src));
        let mut tree = ENode::when(reset.cond.clone(), reset.value.clone(), update);
        infer_tree(graph, &mut tree)?;
        graph.node_mut(dst).assigns = vec![ExpTree::new(tree)];

        match reset.kind {
            ResetKind::Async => {
                let mut tree = ENode::new(
                    ENodeKind::AsyncReset,
                    vec![reset.cond.clone(), reset.value.clone()],
                );
                infer_tree(graph, &mut tree)?;
                graph.node_mut(src).assigns = vec![ExpTree::new(tree)];
                summary.asynchronous += 1;
            }
            _ => summary.sync += 1,
        }
        graph.node_mut(src).reset = Some(reset);
    }
    graph.rebuild_edges();
    debug!(
        "reset analysis: {} sync, {} async, {} constant-false",
        summary.sync, summary.asynchronous, summary.removed
    );
    Ok(summary)
}

fn classify(graph: &Graph, cond: &ENode) -> ResetKind {
    let is_async_ref = |id: NodeId| graph.node(id).is_async_reset;
    match cond.kind {
        ENodeKind::Prim(PrimOp::AsAsyncReset) => ResetKind::Async,
        ENodeKind::Ref(id) if is_async_ref(id) => ResetKind::Async,
        _ => ResetKind::Sync,
    }
}

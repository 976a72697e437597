use num_traits::ToPrimitive;

use crate::error::{CompileError, InternalError};
use crate::ir::{ENode, ENodeKind, ExpTree, Graph, Node, NodeId, PrimOp};
use crate::width::{infer_exp_tree, infer_tree};

/// Row-major coordinates of flat element `flat`.
fn coordinates(dims: &[usize], mut flat: usize) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (slot, dim) in coords.iter_mut().zip(dims).rev() {
        *slot = flat % dim;
        flat /= dim;
    }
    coords
}

/// How an index list selects one element.
enum Selects {
    Never,
    Always,
    When(ENode),
}

fn selects(indices: &[ENode], coords: &[usize]) -> Selects {
    let mut cond: Option<ENode> = None;
    for (index, coord) in indices.iter().zip(coords) {
        match index.literal_value() {
            Some(v) if v.to_usize() == Some(*coord) => {}
            Some(_) => return Selects::Never,
            None => {
                let eq = ENode::prim(PrimOp::Eq, vec![index.clone(), ENode::uint(*coord as u64)]);
                cond = Some(match cond {
                    Some(prev) => ENode::prim(PrimOp::And, vec![prev, eq]),
                    None => eq,
                });
            }
        }
    }
    match cond {
        Some(c) => Selects::When(c),
        None => Selects::Always,
    }
}

/// Expression reading `array[indices]` from the split elements.
///
/// An index that selects no element reads 0, as it does on the unsplit array.
fn select_read(elements: &[NodeId], dims: &[usize], indices: &[ENode], width: usize) -> ENode {
    let mut candidates = Vec::new();
    for (flat, elem) in elements.iter().enumerate() {
        match selects(indices, &coordinates(dims, flat)) {
            Selects::Never => {}
            Selects::Always => return ENode::reference(*elem),
            Selects::When(cond) => candidates.push((cond, *elem)),
        }
    }
    candidates
        .into_iter()
        .rev()
        .fold(ENode::zero(width), |acc, (cond, elem)| {
            ENode::mux(cond, ENode::reference(elem), acc)
        })
}

/// Replaces the wire array `array` by one scalar node per element.
///
/// Element `k` replays every write whose index can select it, in source
/// order; dynamic indices become a guard on the write. Reads become the
/// element itself or a mux over the elements the index may select.
pub fn split_array(graph: &mut Graph, array: NodeId) -> Result<(), CompileError> {
    let node = graph.node(array).clone();
    let dims = node.dims.clone();
    for tree in &node.assigns {
        if tree.lhs_index.len() != dims.len() {
            return Err(InternalError::IndexDepth {
                node: node.name.clone(),
                expected: dims.len(),
                found: tree.lhs_index.len(),
            }
            .into());
        }
    }

    let elements: Vec<NodeId> = (0..node.element_count())
        .map(|flat| {
            graph.add_node(Node::new(
                format!("{}__{}", node.name, flat),
                node.kind,
                node.width,
                node.sign,
            ))
        })
        .collect();

    for (flat, elem) in elements.iter().enumerate() {
        let coords = coordinates(&dims, flat);
        let mut current = ENode::invalid();
        for tree in &node.assigns {
            let mut value = match selects(&tree.lhs_index, &coords) {
                Selects::Never => continue,
                Selects::Always => tree.root.clone(),
                Selects::When(cond) => ENode::when(cond, tree.root.clone(), ENode::empty()),
            };
            value.fill_empty(&current);
            current = value;
        }
        graph.node_mut(*elem).assigns.push(ExpTree::new(current));
    }
    graph.mark_dead(array);

    let mut rewrite = |e: &mut ENode| {
        if e.kind == ENodeKind::Ref(array) {
            *e = select_read(&elements, &dims, &e.children, node.width);
        }
    };
    let ids: Vec<NodeId> = graph.live_nodes().collect();
    for id in &ids {
        let target = graph.node_mut(*id);
        for tree in &mut target.assigns {
            tree.root.visit_mut(&mut rewrite);
            for index in &mut tree.lhs_index {
                index.visit_mut(&mut rewrite);
            }
        }
        if let Some(reset) = &mut target.reset {
            reset.cond.visit_mut(&mut rewrite);
            reset.value.visit_mut(&mut rewrite);
        }
    }

    for id in ids {
        let mut assigns = std::mem::take(&mut graph.node_mut(id).assigns);
        let mut reset = graph.node_mut(id).reset.take();
        let mut outcome = Ok(());
        for tree in &mut assigns {
            outcome = outcome.and_then(|_| infer_exp_tree(graph, tree));
        }
        if let Some(reset) = &mut reset {
            outcome = outcome
                .and_then(|_| infer_tree(graph, &mut reset.cond))
                .and_then(|_| infer_tree(graph, &mut reset.value));
        }
        let target = graph.node_mut(id);
        target.assigns = assigns;
        target.reset = reset;
        outcome?;
    }
    graph.rebuild_edges();
    Ok(())
}

use std::collections::BTreeSet;

use crate::ir::{Graph, NodeId, NodeKind};
use crate::scheduler::{TopoOrder, is_trailing};

/// Registers whose destination reads `src` through combinational logic.
fn readers(graph: &Graph, src: NodeId) -> BTreeSet<NodeId> {
    let mut found = BTreeSet::new();
    let mut seen = BTreeSet::new();
    let mut stack: Vec<NodeId> = graph.node(src).next.iter().copied().collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let node = graph.node(id);
        match node.kind {
            NodeKind::RegDst => found.extend(node.partner),
            NodeKind::RegSrc => {}
            _ if is_trailing(graph, id) => {}
            _ => stack.extend(node.next.iter().copied()),
        }
    }
    found
}

enum Mark {
    Active,
    Done,
}

/// Orders register destinations so that readers update first, and flags
/// the registers that must keep their next value in separate storage.
///
/// A register updates in place when every register reading it is ordered
/// before it. Registers reached again while still on the DFS stack cannot
/// satisfy that and are split.
pub fn order_registers(graph: &mut Graph, order: &TopoOrder, merge: bool) -> Vec<NodeId> {
    let regs: Vec<NodeId> = order
        .dsts
        .iter()
        .filter_map(|d| graph.node(*d).partner)
        .collect();
    let reader_sets: crate::HashMap<NodeId, BTreeSet<NodeId>> =
        regs.iter().map(|r| (*r, readers(graph, *r))).collect();

    let mut marks: crate::HashMap<NodeId, Mark> = crate::HashMap::default();
    let mut split = BTreeSet::new();
    let mut post = Vec::new();
    for root in &regs {
        if marks.contains_key(root) {
            continue;
        }
        // Iterative DFS: (register, next reader index).
        let mut stack = vec![(*root, 0usize)];
        marks.insert(*root, Mark::Active);
        while let Some((reg, index)) = stack.pop() {
            let next = reader_sets
                .get(&reg)
                .and_then(|set| set.iter().nth(index))
                .copied();
            let Some(reader) = next else {
                marks.insert(reg, Mark::Done);
                post.push(reg);
                continue;
            };
            stack.push((reg, index + 1));
            if reader == reg {
                continue;
            }
            match marks.get(&reader) {
                Some(Mark::Active) => {
                    split.insert(reg);
                }
                Some(Mark::Done) => {}
                None if reader_sets.contains_key(&reader) => {
                    marks.insert(reader, Mark::Active);
                    stack.push((reader, 0));
                }
                None => {}
            }
        }
    }

    // Array updates are a sequence of element stores, so they always
    // write a separate copy.
    for reg in &regs {
        let node = graph.node_mut(*reg);
        node.reg_split = !merge || split.contains(reg) || node.is_array();
    }
    post.iter().filter_map(|r| graph.node(*r).partner).collect()
}

use std::collections::BTreeMap;

use crate::ir::{ENode, NodeId, PrimOp};

/// Assignments made to scalar targets within one conditional scope.
#[derive(Debug, Default)]
pub(super) struct WhenFrame {
    assigned: BTreeMap<NodeId, ENode>,
}

/// Conditional-assignment state of one module body.
///
/// Scalar targets are tracked per scope: an assignment replaces the value
/// recorded in the innermost scope, and leaving a `when` merges both branch
/// scopes into `when(cond, then, else)` trees whose `Empty` holes are filled
/// with the value the enclosing scope held before the block. Holes that
/// survive to the outermost scope are filled with the target's default.
#[derive(Debug)]
pub(super) struct WhenStack {
    frames: Vec<WhenFrame>,
    conds: Vec<(ENode, bool)>,
}

impl WhenStack {
    pub fn new() -> Self {
        Self {
            frames: vec![WhenFrame::default()],
            conds: Vec::new(),
        }
    }

    pub fn assign(&mut self, target: NodeId, value: ENode) {
        if let Some(frame) = self.frames.last_mut() {
            frame.assigned.insert(target, value);
        }
    }

    pub fn enter(&mut self, cond: ENode, polarity: bool) {
        self.conds.push((cond, polarity));
        self.frames.push(WhenFrame::default());
    }

    pub fn leave(&mut self) -> WhenFrame {
        self.conds.pop();
        self.frames.pop().unwrap_or_default()
    }

    pub fn merge(&mut self, cond: &ENode, mut then: WhenFrame, mut otherwise: WhenFrame) {
        let mut targets: Vec<NodeId> = then.assigned.keys().copied().collect();
        targets.extend(otherwise.assigned.keys().copied());
        targets.sort();
        targets.dedup();
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        for target in targets {
            let t = then.assigned.remove(&target).unwrap_or_else(ENode::empty);
            let e = otherwise.assigned.remove(&target).unwrap_or_else(ENode::empty);
            let mut merged = ENode::when(cond.clone(), t, e);
            if let Some(prev) = frame.assigned.get(&target) {
                merged.fill_empty(prev);
            }
            frame.assigned.insert(target, merged);
        }
    }

    /// Wraps an array write in the active conditions; `Empty` means "no write".
    pub fn wrap(&self, value: ENode) -> ENode {
        self.conds.iter().rev().fold(value, |inner, (cond, polarity)| {
            if *polarity {
                ENode::when(cond.clone(), inner, ENode::empty())
            } else {
                ENode::when(cond.clone(), ENode::empty(), inner)
            }
        })
    }

    /// ANDs the active conditions into a side-effect enable.
    pub fn guard(&self, en: ENode) -> ENode {
        self.conds.iter().rev().fold(en, |inner, (cond, polarity)| {
            let op = if *polarity { PrimOp::Neq } else { PrimOp::Eq };
            let test = ENode::prim(op, vec![cond.clone(), ENode::uint(0)]);
            ENode::prim(PrimOp::And, vec![test, inner])
        })
    }

    pub fn finish(mut self) -> BTreeMap<NodeId, ENode> {
        self.frames
            .drain(..)
            .next()
            .map(|f| f.assigned)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ENodeKind;

    fn r(i: usize) -> ENode {
        ENode::reference(NodeId(i))
    }

    #[test]
    fn last_write_in_scope_wins() {
        let mut whens = WhenStack::new();
        whens.assign(NodeId(5), ENode::uint(1));
        whens.assign(NodeId(5), ENode::uint(2));
        let out = whens.finish();
        assert_eq!(out[&NodeId(5)], ENode::uint(2));
    }

    #[test]
    fn branch_hole_takes_prior_value() {
        let mut whens = WhenStack::new();
        whens.assign(NodeId(5), ENode::uint(1));
        whens.enter(r(0), true);
        whens.assign(NodeId(5), ENode::uint(2));
        let then = whens.leave();
        whens.enter(r(0), false);
        let otherwise = whens.leave();
        whens.merge(&r(0), then, otherwise);
        let out = whens.finish();
        assert_eq!(
            out[&NodeId(5)],
            ENode::when(r(0), ENode::uint(2), ENode::uint(1))
        );
    }

    #[test]
    fn unassigned_prior_stays_empty() {
        let mut whens = WhenStack::new();
        whens.enter(r(0), true);
        whens.assign(NodeId(5), ENode::uint(2));
        let then = whens.leave();
        whens.enter(r(0), false);
        let otherwise = whens.leave();
        whens.merge(&r(0), then, otherwise);
        let out = whens.finish();
        assert!(out[&NodeId(5)].children[2].is_empty());
    }

    #[test]
    fn wrap_nests_innermost_last() {
        let mut whens = WhenStack::new();
        whens.enter(r(0), true);
        whens.enter(r(1), false);
        let wrapped = whens.wrap(ENode::uint(3));
        assert_eq!(wrapped.kind, ENodeKind::When);
        assert_eq!(wrapped.children[0], r(0));
        let inner = &wrapped.children[1];
        assert_eq!(inner.children[0], r(1));
        assert!(inner.children[1].is_empty());
        assert_eq!(inner.children[2], ENode::uint(3));
    }
}

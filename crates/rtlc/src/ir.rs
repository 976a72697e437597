//! Graph IR: an arena of [`Node`]s addressed by stable [`NodeId`] handles.
//!
//! Nodes are never freed during compilation. Removal marks a node
//! [`NodeStatus::Dead`] (or [`NodeStatus::Constant`]); every traversal goes
//! through [`Graph::live_nodes`] so dead entries are skipped.

use std::collections::BTreeSet;
use std::fmt;

mod display;
mod enode;

pub use display::ENodeDisplay;
pub use enode::{ENode, ENodeKind, ExpTree, PrimOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuperId(pub usize);

impl fmt::Display for SuperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRole {
    Addr,
    En,
    Clk,
    /// Write data.
    Data,
    Mask,
    /// Read data.
    RData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMember {
    pub mem: NodeId,
    pub port: usize,
    pub role: MemberRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Input,
    Output,
    Wire,
    RegSrc,
    RegDst,
    Memory,
    PortMember(PortMember),
    Printf,
    Assert,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Input => write!(f, "input"),
            NodeKind::Output => write!(f, "output"),
            NodeKind::Wire => write!(f, "wire"),
            NodeKind::RegSrc => write!(f, "reg_src"),
            NodeKind::RegDst => write!(f, "reg_dst"),
            NodeKind::Memory => write!(f, "memory"),
            NodeKind::PortMember(m) => write!(f, "port_member({:?})", m.role),
            NodeKind::Printf => write!(f, "printf"),
            NodeKind::Assert => write!(f, "assert"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Valid,
    Dead,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetKind {
    None,
    Sync,
    Async,
}

/// Reset attached to a register source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegReset {
    pub kind: ResetKind,
    pub cond: ENode,
    pub value: ENode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Reader,
    Writer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemPort {
    pub name: String,
    pub kind: PortKind,
    pub addr: NodeId,
    pub en: NodeId,
    pub clk: NodeId,
    /// Read data for readers, write data for writers.
    pub data: NodeId,
    pub mask: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemInfo {
    pub depth: usize,
    pub read_latency: usize,
    pub write_latency: usize,
    pub ports: Vec<MemPort>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub width: usize,
    pub sign: bool,
    /// Array extents, empty for scalars.
    pub dims: Vec<usize>,
    pub kind: NodeKind,
    pub status: NodeStatus,
    /// Width comes from the assigned expression (`node` statements).
    pub width_inferred: bool,
    pub is_async_reset: bool,
    pub assigns: Vec<ExpTree>,
    pub prev: BTreeSet<NodeId>,
    pub next: BTreeSet<NodeId>,
    pub super_id: Option<SuperId>,
    /// The other half of a register.
    pub partner: Option<NodeId>,
    pub reset: Option<RegReset>,
    /// Next value lives in its own storage and is committed at the end of a step.
    pub reg_split: bool,
    pub mem: Option<MemInfo>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind, width: usize, sign: bool) -> Self {
        Self {
            name: name.into(),
            width,
            sign,
            dims: Vec::new(),
            kind,
            status: NodeStatus::Valid,
            width_inferred: false,
            is_async_reset: false,
            assigns: Vec::new(),
            prev: BTreeSet::new(),
            next: BTreeSet::new(),
            super_id: None,
            partner: None,
            reset: None,
            reg_split: false,
            mem: None,
        }
    }

    pub fn with_dims(mut self, dims: Vec<usize>) -> Self {
        self.dims = dims;
        self
    }

    pub fn is_live(&self) -> bool {
        self.status == NodeStatus::Valid
    }

    pub fn is_array(&self) -> bool {
        !self.dims.is_empty()
    }

    /// Number of scalar elements.
    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Nodes whose value is visible outside the combinational graph.
    pub fn is_observable(&self) -> bool {
        !matches!(self.kind, NodeKind::Wire)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.kind, NodeKind::Printf | NodeKind::Assert)
    }

    pub fn member(&self) -> Option<PortMember> {
        match self.kind {
            NodeKind::PortMember(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuperKind {
    Comb,
    Register,
    MemoryPort,
    Active,
}

/// A scheduling cluster evaluated under one activation flag.
#[derive(Debug, Clone)]
pub struct SuperNode {
    pub id: SuperId,
    pub kind: SuperKind,
    pub members: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
    /// Register sources.
    pub regs: Vec<NodeId>,
    pub memories: Vec<NodeId>,
    pub actives: Vec<NodeId>,
    pub supers: Vec<SuperNode>,
    /// Cluster evaluation order.
    pub order: Vec<SuperId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_live())
            .map(|(i, _)| NodeId(i))
    }

    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_live()).count()
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.live_nodes().find(|id| self.node(*id).name == name)
    }

    pub fn mark_dead(&mut self, id: NodeId) {
        self.nodes[id.0].status = NodeStatus::Dead;
        self.nodes[id.0].assigns.clear();
    }

    pub fn super_node(&self, id: SuperId) -> &SuperNode {
        &self.supers[id.0]
    }

    /// Register sources still present in the graph.
    pub fn live_regs(&self) -> Vec<NodeId> {
        self.regs
            .iter()
            .copied()
            .filter(|r| self.node(*r).is_live())
            .collect()
    }

    /// Nodes `id` reads through its assignment trees.
    ///
    /// Reset trees are not edges: their reads already appear in the
    /// destination's `When(reset, value, ..)`, and a sync register source
    /// must stay a scheduling source.
    fn tree_refs(&self, id: NodeId) -> Vec<NodeId> {
        let node = self.node(id);
        let mut out = Vec::new();
        for tree in &node.assigns {
            out.extend(tree.refs());
        }
        out
    }

    /// Recomputes every `prev`/`next` set from the assignment trees.
    ///
    /// Reads of memory storage and of register sources through the
    /// register commit are not edges; a latency-0 read data node depends
    /// only on its address.
    pub fn rebuild_edges(&mut self) {
        for node in &mut self.nodes {
            node.prev.clear();
            node.next.clear();
        }
        let ids: Vec<NodeId> = self.live_nodes().collect();
        for id in ids {
            for src in self.tree_refs(id) {
                if !self.node(src).is_live() || self.node(src).kind == NodeKind::Memory {
                    continue;
                }
                self.nodes[id.0].prev.insert(src);
                self.nodes[src.0].next.insert(id);
            }
        }
    }

    /// Replaces every read of `from` with `to` in all live trees.
    ///
    /// Consumers are found through `next`, so edges must be current. Reset
    /// trees are not edges and are rewritten on every live register.
    pub fn replace_refs(&mut self, from: NodeId, to: NodeId) -> usize {
        let mut count = 0;
        let consumers: Vec<NodeId> = self.node(from).next.iter().copied().collect();
        for consumer in consumers {
            for tree in &mut self.nodes[consumer.0].assigns {
                if tree.replace_ref(from, to) {
                    count += 1;
                }
            }
        }
        self.rewrite_resets(|e| {
            e.replace_ref(from, to);
        });
        count
    }

    /// Applies `f` to the reset condition and value of every live register.
    pub fn rewrite_resets<F: FnMut(&mut ENode)>(&mut self, mut f: F) {
        for index in 0..self.regs.len() {
            let src = self.regs[index];
            let node = &mut self.nodes[src.0];
            if !node.is_live() {
                continue;
            }
            if let Some(reset) = &mut node.reset {
                f(&mut reset.cond);
                f(&mut reset.value);
            }
        }
    }

    pub fn memory_info(&self, id: NodeId) -> Option<&MemInfo> {
        self.node(id).mem.as_ref()
    }

    pub fn display<'a>(&'a self, enode: &'a ENode) -> ENodeDisplay<'a> {
        ENodeDisplay { graph: self, enode }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display() {
        assert_eq!(format!("{}", NodeId(3)), "n3");
        assert_eq!(format!("{}", SuperId(12)), "s12");
    }

    #[test]
    fn rebuild_edges_follows_trees() {
        let mut g = Graph::new("Top");
        let a = g.add_node(Node::new("a", NodeKind::Input, 4, false));
        let b = g.add_node(Node::new("b", NodeKind::Wire, 4, false));
        let c = g.add_node(Node::new("c", NodeKind::Output, 5, false));
        g.node_mut(b).assigns.push(ExpTree::new(ENode::reference(a)));
        g.node_mut(c).assigns.push(ExpTree::new(ENode::prim(
            PrimOp::Add,
            vec![ENode::reference(a), ENode::reference(b)],
        )));
        g.rebuild_edges();
        assert_eq!(g.node(a).next.iter().copied().collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(g.node(c).prev.len(), 2);

        g.replace_refs(b, a);
        g.mark_dead(b);
        g.rebuild_edges();
        assert_eq!(g.node(c).prev.iter().copied().collect::<Vec<_>>(), vec![a]);
        assert_eq!(g.live_count(), 2);
    }

    #[test]
    fn replace_refs_reaches_reset_trees() {
        let mut g = Graph::new("Top");
        let a = g.add_node(Node::new("a", NodeKind::Input, 4, false));
        let b = g.add_node(Node::new("b", NodeKind::Wire, 4, false));
        let r = g.add_node(Node::new("r", NodeKind::RegSrc, 4, false));
        g.node_mut(b).assigns.push(ExpTree::new(ENode::reference(a)));
        g.node_mut(r).reset = Some(RegReset {
            kind: ResetKind::Sync,
            cond: ENode::reference(a),
            value: ENode::reference(b),
        });
        g.regs.push(r);
        g.rebuild_edges();
        assert!(g.node(b).next.is_empty());

        g.replace_refs(b, a);
        let reset = g.node(r).reset.as_ref().unwrap();
        assert_eq!(reset.value.as_bare_ref(), Some(a));
    }
}

//! Value synthesis: lowers every scheduled node to a [`ValInfo`], folding
//! constants and propagating them through a work list until nothing changes.

use std::collections::VecDeque;

use log::{debug, info};
use num_traits::ToPrimitive;

use crate::codegen::{Expr, Instr};
use crate::error::{CompileError, InternalError};
use crate::ir::{
    ENode, ENodeKind, Graph, MemberRole, NodeId, NodeKind, NodeStatus, PortKind, SuperId,
};
use crate::value::{Value, eval_prim};
use crate::{HashMap, HashSet};

/// Synthesis-time value of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValInfo {
    /// Scalar value. Arrays and side-effect nodes carry a zero-width constant.
    pub value: Expr<NodeId>,
    /// Stores, copies and side effects, in execution order.
    pub instrs: Vec<Instr<NodeId>>,
    pub width: usize,
    pub sign: bool,
    /// Known constant elements of a wire array.
    pub members: Vec<Option<Value>>,
}

impl ValInfo {
    fn scalar(value: Expr<NodeId>, width: usize, sign: bool) -> Self {
        Self {
            value,
            instrs: Vec::new(),
            width,
            sign,
            members: Vec::new(),
        }
    }

    fn effects(instrs: Vec<Instr<NodeId>>) -> Self {
        Self {
            value: Expr::Const(Value::zero(0)),
            instrs,
            width: 0,
            sign: false,
            members: Vec::new(),
        }
    }

    pub fn as_const(&self) -> Option<&Value> {
        match &self.value {
            Expr::Const(v) if self.instrs.is_empty() && self.members.is_empty() => Some(v),
            _ => None,
        }
    }
}

/// Result of [`synthesize`].
#[derive(Debug, Clone, Default)]
pub struct Synthesis {
    pub values: HashMap<NodeId, ValInfo>,
    pub constants: HashMap<NodeId, Value>,
    /// Nodes whose value is a plain read of another node's storage.
    pub aliases: HashMap<NodeId, NodeId>,
}

impl Synthesis {
    pub fn is_constant(&self, id: NodeId) -> bool {
        self.constants.contains_key(&id)
    }

    pub fn alias_of(&self, id: NodeId) -> Option<NodeId> {
        self.aliases.get(&id).copied()
    }
}

/// Expression lowering for one owner node.
struct Lowering<'a> {
    graph: &'a Graph,
    state: &'a Synthesis,
    owner: NodeId,
    /// Value assumed for one node while testing whether a register is constant.
    assume: Option<(NodeId, &'a Value)>,
}

impl Lowering<'_> {
    fn unexpected_empty(&self) -> CompileError {
        InternalError::UnexpectedEmpty {
            node: self.graph.node(self.owner).name.clone(),
        }
        .into()
    }

    fn read(&self, id: NodeId, width: usize, sign: bool) -> Expr<NodeId> {
        if let Some((assumed, value)) = self.assume {
            if assumed == id {
                return Expr::Const(value.cast(width, sign));
            }
        }
        if let Some(value) = self.state.constants.get(&id) {
            return Expr::Const(value.cast(width, sign));
        }
        let src = self.state.alias_of(id).unwrap_or(id);
        Expr::Read { src, width, sign }
    }

    fn read_indexed(&self, src: NodeId, dims: Vec<usize>, indices: Vec<Expr<NodeId>>, e: &ENode) -> Expr<NodeId> {
        let statics: Option<Vec<usize>> = indices
            .iter()
            .map(|i| i.as_const().and_then(|v| v.bits.to_usize()))
            .collect();
        if let Some(statics) = statics {
            match flat_index(&dims, &statics) {
                None => return Expr::Const(Value::zero(e.width)),
                Some(flat) => {
                    let known = self
                        .state
                        .values
                        .get(&src)
                        .and_then(|info| info.members.get(flat).cloned().flatten());
                    if let Some(v) = known {
                        return Expr::Const(v.cast(e.width, e.sign));
                    }
                }
            }
        }
        Expr::ReadIndexed {
            src,
            indices,
            dims,
            width: e.width,
            sign: e.sign,
        }
    }

    fn mux(&self, cond: Expr<NodeId>, then: Expr<NodeId>, otherwise: Expr<NodeId>, width: usize, sign: bool) -> Expr<NodeId> {
        if let Some(c) = cond.as_const() {
            let chosen = if c.is_zero() { otherwise } else { then };
            return chosen.fit(width, sign);
        }
        if let (Some(a), Some(b)) = (then.as_const(), otherwise.as_const()) {
            if a.cast(width, sign) == b.cast(width, sign) {
                return Expr::Const(a.cast(width, sign));
            }
        }
        Expr::Mux {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
            width,
            sign,
        }
    }

    fn expr(&self, e: &ENode) -> Result<Expr<NodeId>, CompileError> {
        match &e.kind {
            ENodeKind::Literal(v) => Ok(Expr::Const(Value::new(v.clone(), e.width, e.sign))),
            ENodeKind::Ref(id) if e.children.is_empty() => Ok(self.read(*id, e.width, e.sign)),
            ENodeKind::Ref(id) => {
                let node = self.graph.node(*id);
                if node.dims.len() != e.children.len() {
                    return Err(InternalError::IndexDepth {
                        node: node.name.clone(),
                        expected: node.dims.len(),
                        found: e.children.len(),
                    }
                    .into());
                }
                let indices = self.exprs(&e.children)?;
                Ok(self.read_indexed(*id, node.dims.clone(), indices, e))
            }
            ENodeKind::ReadMem(mem) => {
                let depth = self.graph.node(*mem).element_count();
                let indices = self.exprs(&e.children)?;
                Ok(self.read_indexed(*mem, vec![depth], indices, e))
            }
            ENodeKind::Prim(op) => {
                let args = self.exprs(&e.children)?;
                let consts: Option<Vec<Value>> = args.iter().map(|a| a.as_const().cloned()).collect();
                Ok(match consts {
                    Some(values) => Expr::Const(eval_prim(*op, &values, e.width, e.sign)),
                    None => Expr::Prim {
                        op: *op,
                        args,
                        width: e.width,
                        sign: e.sign,
                    },
                })
            }
            ENodeKind::Mux | ENodeKind::When => {
                if e.children[1].is_empty() || e.children[2].is_empty() {
                    return Err(self.unexpected_empty());
                }
                let cond = self.expr(&e.children[0])?;
                let then = self.expr(&e.children[1])?;
                let otherwise = self.expr(&e.children[2])?;
                Ok(self.mux(cond, then, otherwise, e.width, e.sign))
            }
            ENodeKind::AsyncReset => {
                let cond = self.expr(&e.children[0])?;
                let value = self.expr(&e.children[1])?;
                let hold = self.read(self.owner, e.width, e.sign);
                Ok(self.mux(cond, value, hold, e.width, e.sign))
            }
            ENodeKind::Invalid => Ok(Expr::Const(Value::zero(e.width))),
            ENodeKind::Empty | ENodeKind::Printf(_) | ENodeKind::Assert(_) => {
                Err(self.unexpected_empty())
            }
        }
    }

    fn exprs(&self, es: &[ENode]) -> Result<Vec<Expr<NodeId>>, CompileError> {
        es.iter().map(|e| self.expr(e)).collect()
    }

    /// Lowers an element write whose `Empty` leaves mean "no write".
    fn store(
        &self,
        root: &ENode,
        dst: NodeId,
        indices: &[Expr<NodeId>],
        dims: &[usize],
    ) -> Result<Vec<Instr<NodeId>>, CompileError> {
        if root.is_empty() {
            return Ok(Vec::new());
        }
        if matches!(root.kind, ENodeKind::When | ENodeKind::Mux) && root.contains_empty() {
            let cond = self.expr(&root.children[0])?;
            if let Some(c) = cond.as_const() {
                let branch = if c.is_zero() { &root.children[2] } else { &root.children[1] };
                return self.store(branch, dst, indices, dims);
            }
            let then = self.store(&root.children[1], dst, indices, dims)?;
            let otherwise = self.store(&root.children[2], dst, indices, dims)?;
            if then.is_empty() && otherwise.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Instr::If {
                cond,
                then,
                otherwise,
            }]);
        }
        Ok(vec![Instr::Store {
            dst,
            indices: indices.to_vec(),
            dims: dims.to_vec(),
            value: self.expr(root)?,
        }])
    }

    fn active(&self, root: &ENode) -> Result<Vec<Instr<NodeId>>, CompileError> {
        match &root.kind {
            ENodeKind::Printf(format) => {
                let enable = self.expr(&root.children[0])?;
                if enable.as_const().is_some_and(|v| v.is_zero()) {
                    return Ok(Vec::new());
                }
                Ok(vec![Instr::Printf {
                    enable,
                    format: format.clone(),
                    args: self.exprs(&root.children[1..])?,
                }])
            }
            ENodeKind::Assert(message) => {
                let pred = self.expr(&root.children[0])?;
                let enable = self.expr(&root.children[1])?;
                let never_fires = enable.as_const().is_some_and(|v| v.is_zero())
                    || pred.as_const().is_some_and(|v| !v.is_zero());
                if never_fires {
                    return Ok(Vec::new());
                }
                Ok(vec![Instr::Assert {
                    pred,
                    enable,
                    message: message.clone(),
                }])
            }
            _ => Err(self.unexpected_empty()),
        }
    }
}

/// Row-major flat offset of in-range static indices.
fn flat_index(dims: &[usize], indices: &[usize]) -> Option<usize> {
    let mut flat = 0;
    for (index, dim) in indices.iter().zip(dims) {
        if index >= dim {
            return None;
        }
        flat = flat * dim + index;
    }
    Some(flat)
}

struct Synthesizer<'a> {
    graph: &'a Graph,
    state: Synthesis,
    queue: VecDeque<NodeId>,
    dirty: HashSet<NodeId>,
}

impl<'a> Synthesizer<'a> {
    fn lowering(&self, owner: NodeId) -> Lowering<'_> {
        Lowering {
            graph: self.graph,
            state: &self.state,
            owner,
            assume: None,
        }
    }

    fn compute(&self, id: NodeId) -> Result<ValInfo, CompileError> {
        let node = self.graph.node(id);
        if let Some(value) = self.state.constants.get(&id) {
            return Ok(ValInfo::scalar(Expr::Const(value.clone()), node.width, node.sign));
        }
        let lower = self.lowering(id);
        if node.is_active() {
            let mut instrs = Vec::new();
            for tree in &node.assigns {
                instrs.extend(lower.active(&tree.root)?);
            }
            return Ok(ValInfo::effects(instrs));
        }
        if node.is_array() {
            return self.compute_array(id, &lower);
        }
        match node.assigns.as_slice() {
            [tree] => Ok(ValInfo::scalar(lower.expr(&tree.root)?, node.width, node.sign)),
            [] => Err(InternalError::MissingValue {
                node: node.name.clone(),
            }
            .into()),
            trees => Err(InternalError::MultipleAssignments {
                node: node.name.clone(),
                count: trees.len(),
            }
            .into()),
        }
    }

    fn compute_array(&self, id: NodeId, lower: &Lowering<'_>) -> Result<ValInfo, CompileError> {
        let node = self.graph.node(id);
        let tracks_members = node.kind == NodeKind::Wire;
        let mut members = if tracks_members {
            vec![Some(Value::zero(node.width)); node.element_count()]
        } else {
            Vec::new()
        };
        let mut instrs = Vec::new();
        if node.kind == NodeKind::RegDst {
            if let Some(src) = node.partner {
                instrs.push(Instr::Copy { dst: id, src });
            }
        }
        for tree in &node.assigns {
            let indices = lower.exprs(&tree.lhs_index)?;
            let stores = lower.store(&tree.root, id, &indices, &node.dims)?;
            if tracks_members && !stores.is_empty() {
                let statics: Option<Vec<usize>> = indices
                    .iter()
                    .map(|i| i.as_const().and_then(|v| v.bits.to_usize()))
                    .collect();
                match statics.and_then(|s| flat_index(&node.dims, &s)) {
                    Some(flat) => {
                        members[flat] = match stores.as_slice() {
                            [Instr::Store { value: Expr::Const(v), .. }] => {
                                Some(v.cast(node.width, node.sign))
                            }
                            _ => None,
                        };
                    }
                    None => members.iter_mut().for_each(|m| *m = None),
                }
            }
            instrs.extend(stores);
        }
        Ok(ValInfo {
            value: Expr::Const(Value::zero(0)),
            instrs,
            width: node.width,
            sign: node.sign,
            members,
        })
    }

    /// Constant value of the register whose destination is `dst`, if every
    /// next value it can take equals its reset (or power-on) value.
    ///
    /// A register with a constant reset value and a hold-only update reads
    /// its reset value from cycle 0, before any reset is applied, instead of
    /// the power-on 0.
    fn constant_register(&self, dst: NodeId) -> Result<Option<(NodeId, Value)>, CompileError> {
        let node = self.graph.node(dst);
        let Some(src) = node.partner else {
            return Ok(None);
        };
        let [tree] = node.assigns.as_slice() else {
            return Ok(None);
        };
        if node.is_array() {
            return Ok(None);
        }
        let src_node = self.graph.node(src);
        let held = match &src_node.reset {
            Some(reset) => match self.lowering(src).expr(&reset.value)?.as_const() {
                Some(v) => v.cast(src_node.width, src_node.sign),
                None => return Ok(None),
            },
            None => Value::zero(src_node.width).cast(src_node.width, src_node.sign),
        };
        let lower = Lowering {
            graph: self.graph,
            state: &self.state,
            owner: dst,
            assume: Some((src, &held)),
        };
        let next = lower.expr(&tree.root)?;
        let stays = next
            .as_const()
            .is_some_and(|v| v.cast(src_node.width, src_node.sign) == held);
        Ok(stays.then_some((src, held)))
    }

    fn mark_constant(&mut self, id: NodeId, value: Value) {
        if self.state.constants.contains_key(&id) {
            return;
        }
        let node = self.graph.node(id);
        debug!("constant {} = {}", node.name, value);
        self.state.constants.insert(id, value.clone());
        self.state.aliases.remove(&id);
        self.state
            .values
            .insert(id, ValInfo::scalar(Expr::Const(value), node.width, node.sign));
        self.enqueue_consumers(id);
        if let Some(member) = node.member() {
            if matches!(member.role, MemberRole::En | MemberRole::Mask) {
                self.disable_port(member.mem, member.port);
            }
        }
    }

    fn enqueue_consumers(&mut self, id: NodeId) {
        for next in &self.graph.node(id).next {
            if self.state.values.contains_key(next) && self.dirty.insert(*next) {
                self.queue.push_back(*next);
            }
        }
    }

    /// A port whose enable or mask is constant zero never transfers data.
    fn disable_port(&mut self, mem: NodeId, port: usize) {
        let graph = self.graph;
        let Some(info) = graph.memory_info(mem) else {
            return;
        };
        let Some(port) = info.ports.get(port) else {
            return;
        };
        let disabled = |id: NodeId| {
            self.state
                .constants
                .get(&id)
                .is_some_and(|v| v.is_zero())
        };
        let off = disabled(port.en) || port.mask.is_some_and(disabled);
        if !off {
            return;
        }
        let zeroed = match port.kind {
            PortKind::Reader => vec![port.addr, port.data],
            PortKind::Writer => vec![port.addr, port.data, port.en],
        };
        for id in zeroed {
            let node = graph.node(id);
            self.mark_constant(id, Value::zero(node.width).cast(node.width, node.sign));
        }
    }

    fn visit(&mut self, id: NodeId) -> Result<(), CompileError> {
        let graph = self.graph;
        let info = self.compute(id)?;
        let node = graph.node(id);
        let previous = self.state.values.insert(id, info.clone());

        if node.kind == NodeKind::RegDst {
            if let Some((src, value)) = self.constant_register(id)? {
                let dst_value = value.clone();
                self.mark_constant(src, value);
                self.mark_constant(id, dst_value);
            }
            return Ok(());
        }

        let eligible = matches!(
            node.kind,
            NodeKind::Wire | NodeKind::Output | NodeKind::PortMember(_)
        ) && !node.is_array();
        if eligible {
            if let Some(value) = info.as_const() {
                self.mark_constant(id, value.cast(node.width, node.sign));
                return Ok(());
            }
            let aliased = match &info.value {
                Expr::Read { src, width, sign } => {
                    let target = graph.node(*src);
                    let plain = !target.is_array() && *width == node.width && *sign == node.sign;
                    let wire_like = matches!(node.kind, NodeKind::Wire | NodeKind::Output);
                    (plain && wire_like && *src != id).then_some(*src)
                }
                _ => None,
            };
            match aliased {
                Some(target) => {
                    self.state.aliases.insert(id, target);
                }
                None => {
                    self.state.aliases.remove(&id);
                }
            }
        }
        let members_changed = previous.is_some_and(|p| p.members != info.members);
        if members_changed {
            self.enqueue_consumers(id);
        }
        Ok(())
    }
}

/// Synthesizes every scheduled node and removes the constant ones.
///
/// Nodes are visited in cluster order. A node that becomes constant queues
/// the consumers already visited; queued nodes are recomputed until the
/// queue drains.
pub fn synthesize(graph: &mut Graph) -> Result<Synthesis, CompileError> {
    let order: Vec<NodeId> = graph
        .order
        .iter()
        .flat_map(|s| graph.super_node(*s).members.iter().copied())
        .collect();
    let mut synth = Synthesizer {
        graph: &*graph,
        state: Synthesis::default(),
        queue: VecDeque::new(),
        dirty: HashSet::default(),
    };
    for id in order {
        synth.visit(id)?;
    }
    while let Some(id) = synth.queue.pop_front() {
        synth.dirty.remove(&id);
        synth.visit(id)?;
    }
    let state = synth.state;

    for id in state.constants.keys() {
        graph.node_mut(*id).status = NodeStatus::Constant;
    }
    // Outputs keep their port even when their value folds away.
    for id in &graph.outputs.clone() {
        if state.constants.contains_key(id) {
            graph.node_mut(*id).status = NodeStatus::Valid;
        }
    }
    info!("constant nodes: {}", state.constants.len());
    drop_constant_members(graph, &state);
    graph.rebuild_edges();
    Ok(state)
}

/// Removes constant nodes from their clusters and drops emptied clusters.
fn drop_constant_members(graph: &mut Graph, state: &Synthesis) {
    let order = std::mem::take(&mut graph.order);
    let mut supers = std::mem::take(&mut graph.supers);
    for node in &mut graph.nodes {
        node.super_id = None;
    }
    for sid in order {
        let mut cluster = std::mem::replace(
            &mut supers[sid.0],
            crate::ir::SuperNode {
                id: sid,
                kind: crate::ir::SuperKind::Comb,
                members: Vec::new(),
            },
        );
        cluster.members.retain(|m| !state.constants.contains_key(m));
        if cluster.members.is_empty() {
            continue;
        }
        let id = SuperId(graph.supers.len());
        cluster.id = id;
        for m in &cluster.members {
            graph.node_mut(*m).super_id = Some(id);
        }
        graph.supers.push(cluster);
        graph.order.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExpTree, Node, PrimOp};
    use num_bigint::BigUint;

    fn scheduled(mut g: Graph) -> Graph {
        g.rebuild_edges();
        crate::scheduler::schedule(&mut g, &crate::config::CompileOptions::default()).unwrap();
        g
    }

    fn typed(g: &Graph, mut e: ENode) -> ENode {
        crate::width::infer_tree(g, &mut e).unwrap();
        e
    }

    #[test]
    fn constants_propagate_through_wires() {
        let mut g = Graph::new("Top");
        let a = g.add_node(Node::new("a", NodeKind::Input, 4, false));
        let k = g.add_node(Node::new("k", NodeKind::Wire, 4, false));
        let w = g.add_node(Node::new("w", NodeKind::Wire, 5, false));
        let o = g.add_node(Node::new("o", NodeKind::Output, 5, false));
        g.outputs.push(o);
        g.node_mut(k).assigns.push(ExpTree::new(ENode::literal(BigUint::from(3u8), 4, false)));
        let sum = typed(&g, ENode::prim(PrimOp::Add, vec![ENode::reference(k), ENode::reference(k)]));
        g.node_mut(w).assigns.push(ExpTree::new(sum));
        let out = typed(&g, ENode::mux(ENode::reference(a), ENode::reference(w), ENode::reference(w)));
        g.node_mut(o).assigns.push(ExpTree::new(out));
        let mut g = scheduled(g);

        let synth = synthesize(&mut g).unwrap();
        assert_eq!(synth.constants.get(&w).and_then(|v| v.to_u64()), Some(6));
        assert_eq!(synth.constants.get(&o).and_then(|v| v.to_u64()), Some(6));
        assert_eq!(g.node(k).status, NodeStatus::Constant);
        assert!(g.node(o).is_live());
    }

    #[test]
    fn wire_copy_becomes_storage_alias() {
        let mut g = Graph::new("Top");
        let a = g.add_node(Node::new("a", NodeKind::Input, 4, false));
        let o = g.add_node(Node::new("o", NodeKind::Output, 4, false));
        g.outputs.push(o);
        let a_ref = typed(&g, ENode::reference(a));
        g.node_mut(o).assigns.push(ExpTree::new(a_ref));
        let mut g = scheduled(g);
        let synth = synthesize(&mut g).unwrap();
        assert_eq!(synth.alias_of(o), Some(a));
    }

    #[test]
    fn unassigned_register_folds_to_zero() {
        let mut g = Graph::new("Top");
        let r = g.add_node(Node::new("r", NodeKind::RegSrc, 4, false));
        let d = g.add_node(Node::new("r$next", NodeKind::RegDst, 4, false));
        let o = g.add_node(Node::new("o", NodeKind::Output, 4, false));
        g.node_mut(r).partner = Some(d);
        g.node_mut(d).partner = Some(r);
        g.regs.push(r);
        g.outputs.push(o);
        let r_ref = typed(&g, ENode::reference(r));
        g.node_mut(d).assigns.push(ExpTree::new(r_ref));
        let plus = typed(&g, ENode::prim(PrimOp::Not, vec![ENode::reference(r)]));
        g.node_mut(o).assigns.push(ExpTree::new(plus));
        let mut g = scheduled(g);

        let synth = synthesize(&mut g).unwrap();
        assert!(synth.is_constant(r) && synth.is_constant(d));
        assert_eq!(synth.constants.get(&o).and_then(|v| v.to_u64()), Some(0xf));
        assert!(g.supers.iter().all(|s| !s.members.contains(&d)));
    }
}

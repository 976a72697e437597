use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use std::fmt;

use super::NodeId;

/// Primitive operators after parameter resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Leq,
    Gt,
    Geq,
    Eq,
    Neq,
    Dshl,
    Dshr,
    And,
    Or,
    Xor,
    Cat,
    AsUInt,
    AsSInt,
    AsClock,
    AsAsyncReset,
    Cvt,
    Neg,
    Not,
    Andr,
    Orr,
    Xorr,
    Pad(usize),
    Shl(usize),
    Shr(usize),
    Head(usize),
    Tail(usize),
    Bits { hi: usize, lo: usize },
}

impl PrimOp {
    pub fn operand_count(&self) -> usize {
        use PrimOp::*;
        match self {
            Add | Sub | Mul | Div | Rem | Lt | Leq | Gt | Geq | Eq | Neq | Dshl | Dshr | And
            | Or | Xor | Cat => 2,
            _ => 1,
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            PrimOp::Lt | PrimOp::Leq | PrimOp::Gt | PrimOp::Geq | PrimOp::Eq | PrimOp::Neq
        )
    }
}

impl fmt::Display for PrimOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PrimOp::*;
        match self {
            Add => write!(f, "add"),
            Sub => write!(f, "sub"),
            Mul => write!(f, "mul"),
            Div => write!(f, "div"),
            Rem => write!(f, "rem"),
            Lt => write!(f, "lt"),
            Leq => write!(f, "leq"),
            Gt => write!(f, "gt"),
            Geq => write!(f, "geq"),
            Eq => write!(f, "eq"),
            Neq => write!(f, "neq"),
            Dshl => write!(f, "dshl"),
            Dshr => write!(f, "dshr"),
            And => write!(f, "and"),
            Or => write!(f, "or"),
            Xor => write!(f, "xor"),
            Cat => write!(f, "cat"),
            AsUInt => write!(f, "asUInt"),
            AsSInt => write!(f, "asSInt"),
            AsClock => write!(f, "asClock"),
            AsAsyncReset => write!(f, "asAsyncReset"),
            Cvt => write!(f, "cvt"),
            Neg => write!(f, "neg"),
            Not => write!(f, "not"),
            Andr => write!(f, "andr"),
            Orr => write!(f, "orr"),
            Xorr => write!(f, "xorr"),
            Pad(n) => write!(f, "pad<{}>", n),
            Shl(n) => write!(f, "shl<{}>", n),
            Shr(n) => write!(f, "shr<{}>", n),
            Head(n) => write!(f, "head<{}>", n),
            Tail(n) => write!(f, "tail<{}>", n),
            Bits { hi, lo } => write!(f, "bits<{}, {}>", hi, lo),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ENodeKind {
    Literal(BigUint),
    /// Read of a node. Children are index expressions, one per array dimension.
    Ref(NodeId),
    Prim(PrimOp),
    /// Children: condition, then, else.
    Mux,
    /// Children: condition, then, else. Either branch may be `Empty`.
    When,
    /// No assignment on this path.
    Empty,
    Invalid,
    /// Children: address.
    ReadMem(NodeId),
    /// Children: enable, arguments.
    Printf(String),
    /// Children: predicate, enable.
    Assert(String),
    /// Children: reset condition, reset value.
    AsyncReset,
}

/// One operator or leaf of an expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ENode {
    pub kind: ENodeKind,
    pub children: Vec<ENode>,
    pub width: usize,
    pub sign: bool,
}

impl ENode {
    pub fn new(kind: ENodeKind, children: Vec<ENode>) -> Self {
        Self {
            kind,
            children,
            width: 0,
            sign: false,
        }
    }

    pub fn literal(value: BigUint, width: usize, sign: bool) -> Self {
        Self {
            kind: ENodeKind::Literal(value),
            children: Vec::new(),
            width,
            sign,
        }
    }

    /// Unsigned literal sized to its value.
    pub fn uint(value: u64) -> Self {
        let value = BigUint::from(value);
        let width = (value.bits() as usize).max(1);
        Self::literal(value, width, false)
    }

    pub fn zero(width: usize) -> Self {
        Self::literal(BigUint::zero(), width, false)
    }

    pub fn reference(id: NodeId) -> Self {
        Self::new(ENodeKind::Ref(id), Vec::new())
    }

    pub fn indexed(id: NodeId, indices: Vec<ENode>) -> Self {
        Self::new(ENodeKind::Ref(id), indices)
    }

    pub fn prim(op: PrimOp, children: Vec<ENode>) -> Self {
        Self::new(ENodeKind::Prim(op), children)
    }

    pub fn mux(cond: ENode, then: ENode, otherwise: ENode) -> Self {
        Self::new(ENodeKind::Mux, vec![cond, then, otherwise])
    }

    pub fn when(cond: ENode, then: ENode, otherwise: ENode) -> Self {
        Self::new(ENodeKind::When, vec![cond, then, otherwise])
    }

    pub fn empty() -> Self {
        Self::new(ENodeKind::Empty, Vec::new())
    }

    pub fn invalid() -> Self {
        Self::new(ENodeKind::Invalid, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, ENodeKind::Empty)
    }

    pub fn literal_value(&self) -> Option<&BigUint> {
        match &self.kind {
            ENodeKind::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// `Ref` without index children.
    pub fn as_bare_ref(&self) -> Option<NodeId> {
        match self.kind {
            ENodeKind::Ref(id) if self.children.is_empty() => Some(id),
            _ => None,
        }
    }

    pub fn contains_empty(&self) -> bool {
        self.is_empty() || self.children.iter().any(|c| c.contains_empty())
    }

    pub fn has_side_effects(&self) -> bool {
        matches!(self.kind, ENodeKind::Printf(_) | ENodeKind::Assert(_))
            || self.children.iter().any(|c| c.has_side_effects())
    }

    /// Pre-order traversal.
    pub fn visit<F: FnMut(&ENode)>(&self, f: &mut F) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    /// Post-order mutable traversal.
    pub fn visit_mut<F: FnMut(&mut ENode)>(&mut self, f: &mut F) {
        for child in &mut self.children {
            child.visit_mut(f);
        }
        f(self);
    }

    /// Every node read by this tree, including memories.
    pub fn refs(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.visit(&mut |e| match e.kind {
            ENodeKind::Ref(id) | ENodeKind::ReadMem(id) => out.push(id),
            _ => {}
        });
        out
    }

    pub fn replace_ref(&mut self, from: NodeId, to: NodeId) -> bool {
        let mut changed = false;
        self.visit_mut(&mut |e| {
            if e.kind == ENodeKind::Ref(from) {
                e.kind = ENodeKind::Ref(to);
                changed = true;
            }
        });
        changed
    }

    /// Substitutes every `Empty` leaf with `prev`.
    pub fn fill_empty(&mut self, prev: &ENode) {
        if self.is_empty() {
            *self = prev.clone();
            return;
        }
        for child in &mut self.children {
            child.fill_empty(prev);
        }
    }

    pub fn size(&self) -> usize {
        1 + self.children.iter().map(|c| c.size()).sum::<usize>()
    }
}

/// One assignment: optional array index on the left, expression on the right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpTree {
    pub lhs_index: Vec<ENode>,
    pub root: ENode,
}

impl ExpTree {
    pub fn new(root: ENode) -> Self {
        Self {
            lhs_index: Vec::new(),
            root,
        }
    }

    pub fn indexed(lhs_index: Vec<ENode>, root: ENode) -> Self {
        Self { lhs_index, root }
    }

    /// Flat element offset when every index is a literal.
    pub fn static_index(&self, dims: &[usize]) -> Option<usize> {
        if self.lhs_index.len() != dims.len() {
            return None;
        }
        let mut flat = 0usize;
        for (idx, dim) in self.lhs_index.iter().zip(dims) {
            let v = idx.literal_value()?;
            let v = v.to_usize()?;
            if v >= *dim {
                return None;
            }
            flat = flat * dim + v;
        }
        Some(flat)
    }

    pub fn refs(&self) -> Vec<NodeId> {
        let mut out = self.root.refs();
        for idx in &self.lhs_index {
            out.extend(idx.refs());
        }
        out
    }

    pub fn replace_ref(&mut self, from: NodeId, to: NodeId) -> bool {
        let mut changed = self.root.replace_ref(from, to);
        for idx in &mut self.lhs_index {
            changed |= idx.replace_ref(from, to);
        }
        changed
    }
}

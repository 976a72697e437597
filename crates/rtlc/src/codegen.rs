//! Storage layout and the step program.
//!
//! [`generate`] turns a synthesized graph into a [`Program`]: one storage
//! slot per stored node, one update block per node grouped by cluster, and
//! the memory phase run at the end of every step. The program is executed by
//! the [`Simulator`](crate::Simulator) and rendered as C++ by [`cpp::emit`].

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, info};

use crate::config::CompileOptions;
use crate::error::{CompileError, InternalError};
use crate::ir::{Graph, NodeId, NodeKind, PortKind, PrimOp, SuperKind};
use crate::synth::Synthesis;
use crate::value::Value;
use crate::{HashMap, HashSet};

pub mod cpp;
mod layout;

pub use layout::{Layout, Slot, SlotInfo, StorageClass};

/// A lowered expression. `A` names storage: a node during synthesis, a
/// [`Slot`] in the final program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr<A> {
    Const(Value),
    Read {
        src: A,
        width: usize,
        sign: bool,
    },
    /// Element of an array or memory. Out-of-range indices read zero.
    ReadIndexed {
        src: A,
        indices: Vec<Expr<A>>,
        dims: Vec<usize>,
        width: usize,
        sign: bool,
    },
    Prim {
        op: PrimOp,
        args: Vec<Expr<A>>,
        width: usize,
        sign: bool,
    },
    Mux {
        cond: Box<Expr<A>>,
        then: Box<Expr<A>>,
        otherwise: Box<Expr<A>>,
        width: usize,
        sign: bool,
    },
}

impl<A> Expr<A> {
    pub fn width(&self) -> usize {
        match self {
            Expr::Const(v) => v.width,
            Expr::Read { width, .. }
            | Expr::ReadIndexed { width, .. }
            | Expr::Prim { width, .. }
            | Expr::Mux { width, .. } => *width,
        }
    }

    pub fn sign(&self) -> bool {
        match self {
            Expr::Const(v) => v.sign,
            Expr::Read { sign, .. }
            | Expr::ReadIndexed { sign, .. }
            | Expr::Prim { sign, .. }
            | Expr::Mux { sign, .. } => *sign,
        }
    }

    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Expr::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Extends the expression to `width` bits and retypes it as `sign`.
    pub fn fit(self, width: usize, sign: bool) -> Self {
        if self.width() == width && self.sign() == sign {
            return self;
        }
        match self {
            Expr::Const(v) => Expr::Const(v.cast(width, sign)),
            other => {
                let from_sign = other.sign();
                let padded = match other.width() {
                    w if w < width => Expr::Prim {
                        op: PrimOp::Pad(width),
                        args: vec![other],
                        width,
                        sign: from_sign,
                    },
                    w if w > width => Expr::Prim {
                        op: PrimOp::Bits {
                            hi: width.saturating_sub(1),
                            lo: 0,
                        },
                        args: vec![other],
                        width,
                        sign: false,
                    },
                    _ => other,
                };
                if padded.sign() == sign {
                    return padded;
                }
                let op = if sign { PrimOp::AsSInt } else { PrimOp::AsUInt };
                let width = padded.width();
                Expr::Prim {
                    op,
                    args: vec![padded],
                    width,
                    sign,
                }
            }
        }
    }

    /// Rewrites every storage reference.
    pub fn try_map<B, E>(&self, f: &mut impl FnMut(&A) -> Result<B, E>) -> Result<Expr<B>, E> {
        Ok(match self {
            Expr::Const(v) => Expr::Const(v.clone()),
            Expr::Read { src, width, sign } => Expr::Read {
                src: f(src)?,
                width: *width,
                sign: *sign,
            },
            Expr::ReadIndexed {
                src,
                indices,
                dims,
                width,
                sign,
            } => Expr::ReadIndexed {
                src: f(src)?,
                indices: indices.iter().map(|i| i.try_map(f)).collect::<Result<_, _>>()?,
                dims: dims.clone(),
                width: *width,
                sign: *sign,
            },
            Expr::Prim {
                op,
                args,
                width,
                sign,
            } => Expr::Prim {
                op: *op,
                args: args.iter().map(|a| a.try_map(f)).collect::<Result<_, _>>()?,
                width: *width,
                sign: *sign,
            },
            Expr::Mux {
                cond,
                then,
                otherwise,
                width,
                sign,
            } => Expr::Mux {
                cond: Box::new(cond.try_map(f)?),
                then: Box::new(then.try_map(f)?),
                otherwise: Box::new(otherwise.try_map(f)?),
                width: *width,
                sign: *sign,
            },
        })
    }

    pub fn for_each_read(&self, f: &mut impl FnMut(&A)) {
        match self {
            Expr::Const(_) => {}
            Expr::Read { src, .. } => f(src),
            Expr::ReadIndexed { src, indices, .. } => {
                f(src);
                indices.iter().for_each(|i| i.for_each_read(f));
            }
            Expr::Prim { args, .. } => args.iter().for_each(|a| a.for_each_read(f)),
            Expr::Mux {
                cond,
                then,
                otherwise,
                ..
            } => {
                cond.for_each_read(f);
                then.for_each_read(f);
                otherwise.for_each_read(f);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr<A> {
    /// Whole-value write, converted to the destination's type.
    Assign { dst: A, value: Expr<A> },
    /// Element write. Out-of-range indices write nothing.
    Store {
        dst: A,
        indices: Vec<Expr<A>>,
        dims: Vec<usize>,
        value: Expr<A>,
    },
    /// Whole-array copy.
    Copy { dst: A, src: A },
    If {
        cond: Expr<A>,
        then: Vec<Instr<A>>,
        otherwise: Vec<Instr<A>>,
    },
    Printf {
        enable: Expr<A>,
        format: String,
        args: Vec<Expr<A>>,
    },
    Assert {
        pred: Expr<A>,
        enable: Expr<A>,
        message: String,
    },
}

impl<A> Instr<A> {
    pub fn try_map<B, E>(&self, f: &mut impl FnMut(&A) -> Result<B, E>) -> Result<Instr<B>, E> {
        Ok(match self {
            Instr::Assign { dst, value } => Instr::Assign {
                dst: f(dst)?,
                value: value.try_map(f)?,
            },
            Instr::Store {
                dst,
                indices,
                dims,
                value,
            } => Instr::Store {
                dst: f(dst)?,
                indices: indices.iter().map(|i| i.try_map(f)).collect::<Result<_, _>>()?,
                dims: dims.clone(),
                value: value.try_map(f)?,
            },
            Instr::Copy { dst, src } => Instr::Copy {
                dst: f(dst)?,
                src: f(src)?,
            },
            Instr::If {
                cond,
                then,
                otherwise,
            } => Instr::If {
                cond: cond.try_map(f)?,
                then: then.iter().map(|i| i.try_map(f)).collect::<Result<_, _>>()?,
                otherwise: otherwise.iter().map(|i| i.try_map(f)).collect::<Result<_, _>>()?,
            },
            Instr::Printf {
                enable,
                format,
                args,
            } => Instr::Printf {
                enable: enable.try_map(f)?,
                format: format.clone(),
                args: args.iter().map(|a| a.try_map(f)).collect::<Result<_, _>>()?,
            },
            Instr::Assert {
                pred,
                enable,
                message,
            } => Instr::Assert {
                pred: pred.try_map(f)?,
                enable: enable.try_map(f)?,
                message: message.clone(),
            },
        })
    }

    pub fn for_each_read(&self, f: &mut impl FnMut(&A)) {
        match self {
            Instr::Assign { value, .. } => value.for_each_read(f),
            Instr::Store { indices, value, .. } => {
                indices.iter().for_each(|i| i.for_each_read(f));
                value.for_each_read(f);
            }
            Instr::Copy { src, .. } => f(src),
            Instr::If {
                cond,
                then,
                otherwise,
            } => {
                cond.for_each_read(f);
                then.iter().chain(otherwise).for_each(|i| i.for_each_read(f));
            }
            Instr::Printf { enable, args, .. } => {
                enable.for_each_read(f);
                args.iter().for_each(|a| a.for_each_read(f));
            }
            Instr::Assert { pred, enable, .. } => {
                pred.for_each_read(f);
                enable.for_each_read(f);
            }
        }
    }

    pub fn for_each_write(&self, f: &mut impl FnMut(&A)) {
        match self {
            Instr::Assign { dst, .. } | Instr::Store { dst, .. } | Instr::Copy { dst, .. } => f(dst),
            Instr::If { then, otherwise, .. } => {
                then.iter().chain(otherwise).for_each(|i| i.for_each_write(f))
            }
            Instr::Printf { .. } | Instr::Assert { .. } => {}
        }
    }
}

/// Update block of one node inside a cluster.
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    pub name: String,
    pub instrs: Vec<Instr<Slot>>,
    /// Clusters to activate when the block changed a stored value.
    pub activates: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub kind: SuperKind,
    /// Runs on every step regardless of its activation flag.
    pub always_active: bool,
    pub updates: Vec<NodeUpdate>,
}

#[derive(Debug, Clone)]
pub struct InputPort {
    pub name: String,
    pub slot: Slot,
    pub width: usize,
    pub sign: bool,
    pub activates: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct OutputPort {
    pub name: String,
    pub width: usize,
    pub sign: bool,
    pub value: Expr<Slot>,
}

/// Latency-1 read sampled before the step's writes land.
#[derive(Debug, Clone)]
pub struct LatchedRead {
    pub mem: Slot,
    pub addr: Expr<Slot>,
    pub en: Expr<Slot>,
    pub data: Slot,
    pub activates: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct MemWrite {
    pub mem: Slot,
    pub addr: Expr<Slot>,
    pub en: Expr<Slot>,
    pub mask: Expr<Slot>,
    pub data: Expr<Slot>,
    /// Clusters reading the memory combinationally.
    pub activates: Vec<usize>,
}

/// End-of-step copy of a split register's next value.
#[derive(Debug, Clone)]
pub struct Commit {
    pub src: Slot,
    pub dst: Slot,
    pub activates: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramStats {
    pub nodes: usize,
    pub clusters: usize,
    pub slots: usize,
    pub constants: usize,
    pub aliases: usize,
    pub split_registers: usize,
}

/// The compiled step function.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub layout: Layout,
    pub clusters: Vec<Cluster>,
    /// `clusters[..settle]` are combinational. The rest (side effects and
    /// register updates) run once per step.
    pub settle: usize,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
    pub mem_reads: Vec<LatchedRead>,
    pub mem_writes: Vec<MemWrite>,
    pub commits: Vec<Commit>,
    pub stats: ProgramStats,
}

impl Program {
    pub fn input(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name == name)
    }
}

/// Where a node's value is kept: in-place register updates write the
/// register itself.
fn storage_of(graph: &Graph, id: NodeId) -> NodeId {
    let node = graph.node(id);
    match (node.kind, node.partner) {
        (NodeKind::RegDst, Some(src)) if !graph.node(src).reg_split => src,
        _ => id,
    }
}

/// Nodes that keep a value between evaluations.
fn wants_storage(graph: &Graph, synth: &Synthesis, id: NodeId) -> bool {
    let node = graph.node(id);
    if !node.is_live() || synth.is_constant(id) {
        return false;
    }
    match node.kind {
        NodeKind::Input | NodeKind::RegSrc | NodeKind::Memory | NodeKind::PortMember(_) => true,
        NodeKind::Wire | NodeKind::Output => synth.alias_of(id).is_none(),
        NodeKind::RegDst => node.partner.is_some_and(|src| graph.node(src).reg_split),
        NodeKind::Printf | NodeKind::Assert => false,
    }
}

/// Instructions computing `id`, still addressed by node.
fn node_instrs(graph: &Graph, synth: &Synthesis, id: NodeId) -> Vec<Instr<NodeId>> {
    let node = graph.node(id);
    let Some(info) = synth.values.get(&id) else {
        return Vec::new();
    };
    if node.is_active() || node.is_array() {
        return info.instrs.clone();
    }
    vec![Instr::Assign {
        dst: storage_of(graph, id),
        value: info.value.clone(),
    }]
}

/// Expression reading a port member from the memory phase.
fn member_expr(graph: &Graph, synth: &Synthesis, id: NodeId) -> Expr<NodeId> {
    let node = graph.node(id);
    match synth.constants.get(&id) {
        Some(v) => Expr::Const(v.cast(node.width, node.sign)),
        None => Expr::Read {
            src: id,
            width: node.width,
            sign: node.sign,
        },
    }
}

struct MemoryPhase {
    reads: Vec<(NodeId, Expr<NodeId>, Expr<NodeId>, NodeId)>,
    writes: Vec<(NodeId, [Expr<NodeId>; 4])>,
}

fn memory_phase(graph: &Graph, synth: &Synthesis) -> MemoryPhase {
    let mut phase = MemoryPhase {
        reads: Vec::new(),
        writes: Vec::new(),
    };
    for mem in graph.memories.iter().copied() {
        if !graph.node(mem).is_live() {
            continue;
        }
        let Some(info) = graph.memory_info(mem) else {
            continue;
        };
        for port in &info.ports {
            let expr = |id| member_expr(graph, synth, id);
            let disabled = |e: &Expr<NodeId>| e.as_const().is_some_and(|v| v.is_zero());
            match port.kind {
                PortKind::Reader if info.read_latency > 0 => {
                    if synth.is_constant(port.data) || !graph.node(port.data).is_live() {
                        continue;
                    }
                    phase.reads.push((mem, expr(port.addr), expr(port.en), port.data));
                }
                PortKind::Reader => {}
                PortKind::Writer => {
                    let en = expr(port.en);
                    let mask = port
                        .mask
                        .map(expr)
                        .unwrap_or_else(|| Expr::Const(Value::from_u64(1, 1)));
                    if disabled(&en) || disabled(&mask) {
                        continue;
                    }
                    phase
                        .writes
                        .push((mem, [expr(port.addr), en, mask, expr(port.data)]));
                }
            }
        }
    }
    phase
}

/// Drops stored wires nobody reads.
fn prune_unread(graph: &Graph, synth: &Synthesis, stored: &mut BTreeSet<NodeId>, phase: &MemoryPhase) {
    loop {
        let mut read: HashSet<NodeId> = HashSet::default();
        let mut note = |id: &NodeId| {
            read.insert(*id);
        };
        for id in graph.live_nodes() {
            if stored.contains(&id) || graph.node(id).is_active() || graph.node(id).kind == NodeKind::RegDst {
                for instr in node_instrs(graph, synth, id) {
                    instr.for_each_read(&mut note);
                }
            }
        }
        for (_, addr, en, _) in &phase.reads {
            addr.for_each_read(&mut note);
            en.for_each_read(&mut note);
        }
        for (_, exprs) in &phase.writes {
            exprs.iter().for_each(|e| e.for_each_read(&mut note));
        }
        for out in &graph.outputs {
            if let Some(target) = synth.alias_of(*out) {
                note(&target);
            }
        }
        let unread: Vec<NodeId> = stored
            .iter()
            .copied()
            .filter(|id| graph.node(*id).kind == NodeKind::Wire && !read.contains(id))
            .collect();
        if unread.is_empty() {
            return;
        }
        debug!("drop {} unread wires", unread.len());
        for id in unread {
            stored.remove(&id);
        }
    }
}

/// Builds the step program from a scheduled and synthesized graph.
pub fn generate(graph: &Graph, synth: &Synthesis, options: &CompileOptions) -> Result<Program, CompileError> {
    let phase = memory_phase(graph, synth);
    let mut stored: BTreeSet<NodeId> = graph
        .live_nodes()
        .filter(|id| wants_storage(graph, synth, *id))
        .collect();
    prune_unread(graph, synth, &mut stored, &phase);

    let mut layout = Layout::new(options.native_limit());
    let mut slots: HashMap<NodeId, Slot> = HashMap::default();
    for id in &stored {
        let node = graph.node(*id);
        let len = if node.is_array() { node.element_count() } else { 1 };
        slots.insert(*id, layout.add(&node.name, node.width, node.sign, len));
    }
    let slot_of = |id: &NodeId| -> Result<Slot, CompileError> {
        slots.get(id).copied().ok_or_else(|| {
            InternalError::MissingValue {
                node: graph.node(*id).name.clone(),
            }
            .into()
        })
    };

    let mut clusters = Vec::new();
    for sid in &graph.order {
        let sup = graph.super_node(*sid);
        let mut updates = Vec::new();
        for id in &sup.members {
            let node = graph.node(*id);
            let target = storage_of(graph, *id);
            if !node.is_active() && !stored.contains(&target) {
                continue;
            }
            let instrs = node_instrs(graph, synth, *id)
                .iter()
                .map(|i| i.try_map(&mut |a: &NodeId| slot_of(a)))
                .collect::<Result<Vec<_>, _>>()?;
            if instrs.is_empty() {
                continue;
            }
            updates.push(NodeUpdate {
                name: node.name.clone(),
                instrs,
                activates: Vec::new(),
            });
        }
        if !updates.is_empty() {
            clusters.push(Cluster {
                kind: sup.kind,
                always_active: sup.kind == SuperKind::Active,
                updates,
            });
        }
    }
    let settle = clusters
        .iter()
        .position(|c| matches!(c.kind, SuperKind::Active | SuperKind::Register))
        .unwrap_or(clusters.len());

    let mut readers: HashMap<Slot, BTreeSet<usize>> = HashMap::default();
    for (index, cluster) in clusters.iter().enumerate() {
        for update in &cluster.updates {
            for instr in &update.instrs {
                instr.for_each_read(&mut |s: &Slot| {
                    readers.entry(*s).or_default().insert(index);
                });
            }
        }
    }
    let activates = |slot: Slot, own: Option<usize>| -> Vec<usize> {
        readers
            .get(&slot)
            .map(|set| set.iter().copied().filter(|c| Some(*c) != own).collect())
            .unwrap_or_default()
    };
    for (index, cluster) in clusters.iter_mut().enumerate() {
        // A combinational cluster never needs to rerun for its own writes.
        let own = (index < settle).then_some(index);
        for update in &mut cluster.updates {
            let mut written = BTreeSet::new();
            for instr in &update.instrs {
                instr.for_each_write(&mut |s: &Slot| {
                    written.insert(*s);
                });
            }
            let mut targets: BTreeSet<usize> = BTreeSet::new();
            for slot in written {
                targets.extend(activates(slot, own));
            }
            update.activates = targets.into_iter().collect();
        }
    }

    let inputs = graph
        .inputs
        .iter()
        .filter(|id| stored.contains(id))
        .map(|id| {
            let node = graph.node(*id);
            let slot = slot_of(id)?;
            Ok(InputPort {
                name: node.name.clone(),
                slot,
                width: node.width,
                sign: node.sign,
                activates: activates(slot, None),
            })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;

    let outputs = graph
        .outputs
        .iter()
        .map(|id| {
            let node = graph.node(*id);
            let value = match (synth.constants.get(id), synth.alias_of(*id)) {
                (Some(v), _) => Expr::Const(v.cast(node.width, node.sign)),
                (None, Some(target)) => Expr::Read {
                    src: slot_of(&target)?,
                    width: node.width,
                    sign: node.sign,
                },
                (None, None) => Expr::Read {
                    src: slot_of(id)?,
                    width: node.width,
                    sign: node.sign,
                },
            };
            Ok(OutputPort {
                name: node.name.clone(),
                width: node.width,
                sign: node.sign,
                value,
            })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;

    let map = |e: &Expr<NodeId>| e.try_map(&mut |a: &NodeId| slot_of(a));
    let mut mem_reads = Vec::new();
    for (mem, addr, en, data) in &phase.reads {
        let data = slot_of(data)?;
        mem_reads.push(LatchedRead {
            mem: slot_of(mem)?,
            addr: map(addr)?,
            en: map(en)?,
            data,
            activates: activates(data, None),
        });
    }
    let mut mem_writes = Vec::new();
    for (mem, [addr, en, mask, data]) in &phase.writes {
        let mem = slot_of(mem)?;
        mem_writes.push(MemWrite {
            mem,
            addr: map(addr)?,
            en: map(en)?,
            mask: map(mask)?,
            data: map(data)?,
            activates: activates(mem, None),
        });
    }

    let mut commits = Vec::new();
    for src in graph.live_regs() {
        let node = graph.node(src);
        let Some(dst) = node.partner else { continue };
        if !node.reg_split || !stored.contains(&src) || !stored.contains(&dst) {
            continue;
        }
        let src_slot = slot_of(&src)?;
        commits.push(Commit {
            src: src_slot,
            dst: slot_of(&dst)?,
            activates: activates(src_slot, None),
        });
    }

    let stats = ProgramStats {
        nodes: stored.len(),
        clusters: clusters.len(),
        slots: layout.len(),
        constants: synth.constants.len(),
        aliases: synth.aliases.len(),
        split_registers: commits.len(),
    };
    info!(
        "generated {} clusters over {} slots ({} bytes of narrow storage)",
        stats.clusters,
        stats.slots,
        layout.narrow_size()
    );
    Ok(Program {
        name: graph.name.clone(),
        layout,
        clusters,
        settle,
        inputs,
        outputs,
        mem_reads,
        mem_writes,
        commits,
        stats,
    })
}

struct SlotName<'a> {
    layout: &'a Layout,
    slot: Slot,
}

impl fmt::Display for SlotName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.layout.info(self.slot).name)
    }
}

impl Program {
    fn write_expr(&self, f: &mut fmt::Formatter<'_>, e: &Expr<Slot>) -> fmt::Result {
        match e {
            Expr::Const(v) => write!(f, "{}", v),
            Expr::Read { src, .. } => write!(f, "{}", SlotName { layout: &self.layout, slot: *src }),
            Expr::ReadIndexed { src, indices, .. } => {
                write!(f, "{}", SlotName { layout: &self.layout, slot: *src })?;
                for i in indices {
                    write!(f, "[")?;
                    self.write_expr(f, i)?;
                    write!(f, "]")?;
                }
                Ok(())
            }
            Expr::Prim { op, args, .. } => {
                write!(f, "{}(", op)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.write_expr(f, a)?;
                }
                write!(f, ")")
            }
            Expr::Mux {
                cond,
                then,
                otherwise,
                ..
            } => {
                write!(f, "mux(")?;
                self.write_expr(f, cond)?;
                write!(f, ", ")?;
                self.write_expr(f, then)?;
                write!(f, ", ")?;
                self.write_expr(f, otherwise)?;
                write!(f, ")")
            }
        }
    }

    fn write_instr(&self, f: &mut fmt::Formatter<'_>, instr: &Instr<Slot>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        let name = |slot: &Slot| SlotName { layout: &self.layout, slot: *slot };
        match instr {
            Instr::Assign { dst, value } => {
                write!(f, "{}{} = ", pad, name(dst))?;
                self.write_expr(f, value)?;
                writeln!(f)
            }
            Instr::Store {
                dst,
                indices,
                value,
                ..
            } => {
                write!(f, "{}{}", pad, name(dst))?;
                for i in indices {
                    write!(f, "[")?;
                    self.write_expr(f, i)?;
                    write!(f, "]")?;
                }
                write!(f, " = ")?;
                self.write_expr(f, value)?;
                writeln!(f)
            }
            Instr::Copy { dst, src } => writeln!(f, "{}{} = {}", pad, name(dst), name(src)),
            Instr::If {
                cond,
                then,
                otherwise,
            } => {
                write!(f, "{}if ", pad)?;
                self.write_expr(f, cond)?;
                writeln!(f, " {{")?;
                for i in then {
                    self.write_instr(f, i, indent + 1)?;
                }
                if !otherwise.is_empty() {
                    writeln!(f, "{}}} else {{", pad)?;
                    for i in otherwise {
                        self.write_instr(f, i, indent + 1)?;
                    }
                }
                writeln!(f, "{}}}", pad)
            }
            Instr::Printf { enable, format, args } => {
                write!(f, "{}printf({:?}", pad, format)?;
                for a in args {
                    write!(f, ", ")?;
                    self.write_expr(f, a)?;
                }
                write!(f, ") if ")?;
                self.write_expr(f, enable)?;
                writeln!(f)
            }
            Instr::Assert { pred, enable, message } => {
                write!(f, "{}assert(", pad)?;
                self.write_expr(f, pred)?;
                write!(f, ", {:?}) if ", message)?;
                self.write_expr(f, enable)?;
                writeln!(f)
            }
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program {} {{", self.name)?;
        for (index, cluster) in self.clusters.iter().enumerate() {
            let marker = if index == self.settle { " <settle>" } else { "" };
            writeln!(f, "  cluster {} {:?}{}", index, cluster.kind, marker)?;
            for update in &cluster.updates {
                for instr in &update.instrs {
                    self.write_instr(f, instr, 2)?;
                }
                if !update.activates.is_empty() {
                    writeln!(f, "    -> {:?}", update.activates)?;
                }
            }
        }
        for port in &self.outputs {
            write!(f, "  output {} = ", port.name)?;
            self.write_expr(f, &port.value)?;
            writeln!(f)?;
        }
        writeln!(f, "}}")
    }
}

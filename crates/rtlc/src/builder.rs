//! Lowers the front-end syntax tree into the graph IR.
//!
//! Module instances are flattened by prefixing every declaration with its
//! instance path, and conditional assignments are flattened into `when`
//! trees as they are encountered (see [`when::WhenStack`]).

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};

use crate::HashMap;
use crate::ast::{self, Circuit, Direction, Expr, MemDecl, Module, Statement, StatementKind, Type};
use crate::error::{BuildError, Location};
use crate::ir::{
    ENode, ENodeKind, ExpTree, Graph, MemInfo, MemPort, MemberRole, Node, NodeId, NodeKind,
    PortKind, PortMember, PrimOp, RegReset, ResetKind,
};

mod symbols;
mod when;

use symbols::{Symbol, SymbolTable};
use when::WhenStack;

/// Builds the flattened graph of `circuit.main`.
pub fn build_graph(circuit: &Circuit) -> Result<Graph, BuildError> {
    let top = circuit
        .find_module(&circuit.main)
        .ok_or_else(|| BuildError::UnknownModule {
            name: circuit.main.clone(),
        })?;
    let mut builder = GraphBuilder {
        circuit,
        graph: Graph::new(&top.name),
        instance_stack: vec![top.name.clone()],
        active_count: 0,
    };
    builder.build_top(top)?;
    Ok(builder.finish())
}

struct ResolvedType {
    width: usize,
    sign: bool,
    dims: Vec<usize>,
    is_async_reset: bool,
}

/// Result of resolving a reference expression.
enum Path {
    Node(NodeId, Vec<ENode>),
    Value(NodeId),
    Reg { src: NodeId, dst: NodeId, indices: Vec<ENode> },
    Instance(String),
    Memory(String),
    MemPort(String, String),
}

struct GraphBuilder<'c> {
    circuit: &'c Circuit,
    graph: Graph,
    instance_stack: Vec<String>,
    active_count: usize,
}

impl GraphBuilder<'_> {
    fn build_top(&mut self, module: &Module) -> Result<(), BuildError> {
        let mut table = SymbolTable::new(&module.name, "");
        let location = Location::default();
        for port in &module.ports {
            let ty = self.resolve_type(&table, &port.name, &port.ty, &location)?;
            if !ty.dims.is_empty() {
                return Err(BuildError::Unsupported {
                    module: module.name.clone(),
                    feature: "top-level port type",
                    detail: format!("`{}` has aggregate type {}", port.name, port.ty),
                    location,
                });
            }
            let kind = match port.direction {
                Direction::Input => NodeKind::Input,
                Direction::Output => NodeKind::Output,
            };
            let mut node = Node::new(&port.name, kind, ty.width, ty.sign);
            node.is_async_reset = ty.is_async_reset;
            let id = self.graph.add_node(node);
            match port.direction {
                Direction::Input => self.graph.inputs.push(id),
                Direction::Output => self.graph.outputs.push(id),
            }
            table.declare(&port.name, Symbol::Node(id), &location)?;
        }
        self.build_body(module, &mut table)
    }

    fn build_body(&mut self, module: &Module, table: &mut SymbolTable) -> Result<(), BuildError> {
        let mut whens = WhenStack::new();
        self.build_block(&module.body, table, &mut whens)?;
        for (target, mut tree) in whens.finish() {
            let default = self.default_value(target);
            tree.fill_empty(&default);
            self.graph.node_mut(target).assigns = vec![ExpTree::new(tree)];
        }
        Ok(())
    }

    /// Value of a scalar target on paths that never assign it.
    fn default_value(&self, target: NodeId) -> ENode {
        let node = self.graph.node(target);
        match (node.kind, node.partner) {
            (NodeKind::RegDst, Some(src)) => ENode::reference(src),
            _ => ENode::invalid(),
        }
    }

    fn finish(mut self) -> Graph {
        let ids: Vec<NodeId> = (0..self.graph.nodes.len()).map(NodeId).collect();
        for id in ids {
            let node = self.graph.node(id);
            if !node.assigns.is_empty() || node.is_array() {
                continue;
            }
            let needs_default = match node.kind {
                NodeKind::Wire | NodeKind::Output | NodeKind::RegDst => true,
                NodeKind::PortMember(m) => m.role != MemberRole::RData,
                _ => false,
            };
            if needs_default {
                let default = self.default_value(id);
                self.graph.node_mut(id).assigns.push(ExpTree::new(default));
            }
        }
        self.graph.rebuild_edges();
        self.graph
    }

    fn build_block(
        &mut self,
        stmts: &[Statement],
        table: &mut SymbolTable,
        whens: &mut WhenStack,
    ) -> Result<(), BuildError> {
        for stmt in stmts {
            let location = Location::from(stmt.info.as_ref());
            match &stmt.kind {
                StatementKind::Wire { name, ty } => {
                    let ty = self.resolve_type(table, name, ty, &location)?;
                    let mut node = Node::new(table.qualified(name), NodeKind::Wire, ty.width, ty.sign)
                        .with_dims(ty.dims);
                    node.is_async_reset = ty.is_async_reset;
                    let id = self.graph.add_node(node);
                    table.declare(name, Symbol::Node(id), &location)?;
                }
                StatementKind::Reg {
                    name,
                    ty,
                    clock,
                    reset,
                } => {
                    self.expr(clock, table, &location)?;
                    let ty = self.resolve_type(table, name, ty, &location)?;
                    let reset = match reset {
                        Some(r) => {
                            if !ty.dims.is_empty() {
                                return Err(BuildError::Unsupported {
                                    module: table.module.clone(),
                                    feature: "register reset",
                                    detail: format!("`{}` is an aggregate register", name),
                                    location,
                                });
                            }
                            Some(RegReset {
                                kind: ResetKind::Sync,
                                cond: self.expr(&r.signal, table, &location)?,
                                value: self.expr(&r.value, table, &location)?,
                            })
                        }
                        None => None,
                    };
                    let qualified = table.qualified(name);
                    let mut src = Node::new(&qualified, NodeKind::RegSrc, ty.width, ty.sign)
                        .with_dims(ty.dims.clone());
                    src.reset = reset;
                    let src = self.graph.add_node(src);
                    let mut dst = Node::new(
                        format!("{}$next", qualified),
                        NodeKind::RegDst,
                        ty.width,
                        ty.sign,
                    )
                    .with_dims(ty.dims);
                    dst.partner = Some(src);
                    let dst = self.graph.add_node(dst);
                    self.graph.node_mut(src).partner = Some(dst);
                    self.graph.regs.push(src);
                    table.declare(name, Symbol::Register { src, dst }, &location)?;
                }
                StatementKind::Node { name, value } => {
                    let value = self.expr(value, table, &location)?;
                    let mut node = Node::new(table.qualified(name), NodeKind::Wire, 0, false);
                    node.width_inferred = true;
                    node.assigns.push(ExpTree::new(value));
                    let id = self.graph.add_node(node);
                    table.declare(name, Symbol::Value(id), &location)?;
                }
                StatementKind::Mem(decl) => self.declare_memory(decl, table, &location)?,
                StatementKind::Inst { name, module } => {
                    self.instantiate(name, module, table, &location)?
                }
                StatementKind::Connect { loc, value } => {
                    self.connect(loc, value, table, whens, &location)?
                }
                StatementKind::Invalidate { loc } => {
                    if let Path::Reg { .. } = self.resolve(loc, table, &location)? {
                        continue;
                    }
                    let (target, indices) = self.lvalue(loc, table, &location)?;
                    let depth = self.graph.node(target).dims.len();
                    if indices.len() == depth {
                        self.assign(target, indices, ENode::invalid(), whens);
                    } else {
                        for suffix in self.suffixes(target, indices.len()) {
                            let mut full = indices.clone();
                            full.extend(suffix.iter().map(|i| ENode::uint(*i as u64)));
                            self.assign(target, full, ENode::invalid(), whens);
                        }
                    }
                }
                StatementKind::When {
                    cond,
                    then,
                    otherwise,
                } => {
                    let cond = self.expr(cond, table, &location)?;
                    whens.enter(cond.clone(), true);
                    self.build_block(then, table, whens)?;
                    let then_frame = whens.leave();
                    whens.enter(cond.clone(), false);
                    self.build_block(otherwise, table, whens)?;
                    let else_frame = whens.leave();
                    whens.merge(&cond, then_frame, else_frame);
                }
                StatementKind::Printf {
                    clock,
                    en,
                    format,
                    args,
                } => {
                    self.expr(clock, table, &location)?;
                    let en = whens.guard(self.expr(en, table, &location)?);
                    let mut children = vec![en];
                    for arg in args {
                        children.push(self.expr(arg, table, &location)?);
                    }
                    let tree = ENode::new(ENodeKind::Printf(format.clone()), children);
                    self.add_active("printf", NodeKind::Printf, tree, table);
                }
                StatementKind::Assert {
                    clock,
                    pred,
                    en,
                    message,
                } => {
                    self.expr(clock, table, &location)?;
                    let pred = self.expr(pred, table, &location)?;
                    let en = whens.guard(self.expr(en, table, &location)?);
                    let tree = ENode::new(ENodeKind::Assert(message.clone()), vec![pred, en]);
                    self.add_active("assert", NodeKind::Assert, tree, table);
                }
                StatementKind::Attach { .. } => {
                    return Err(BuildError::Unsupported {
                        module: table.module.clone(),
                        feature: "statement",
                        detail: "attach".to_owned(),
                        location,
                    });
                }
                StatementKind::Skip => {}
            }
        }
        Ok(())
    }

    fn add_active(&mut self, base: &str, kind: NodeKind, tree: ENode, table: &SymbolTable) {
        let name = table.qualified(&format!("{}_{}", base, self.active_count));
        self.active_count += 1;
        let mut node = Node::new(name, kind, 0, false);
        node.assigns.push(ExpTree::new(tree));
        let id = self.graph.add_node(node);
        self.graph.actives.push(id);
    }

    fn resolve_type(
        &self,
        table: &SymbolTable,
        name: &str,
        ty: &Type,
        location: &Location,
    ) -> Result<ResolvedType, BuildError> {
        let ground = |width: usize, sign: bool, is_async_reset: bool| ResolvedType {
            width,
            sign,
            dims: Vec::new(),
            is_async_reset,
        };
        match ty {
            Type::UInt(Some(w)) => Ok(ground(*w, false, false)),
            Type::SInt(Some(w)) => Ok(ground(*w, true, false)),
            Type::UInt(None) | Type::SInt(None) => Err(BuildError::UnresolvedWidth {
                module: table.module.clone(),
                name: name.to_owned(),
                ty: ty.to_string(),
            }),
            Type::Clock | Type::Reset => Ok(ground(1, false, false)),
            Type::AsyncReset => Ok(ground(1, false, true)),
            Type::Vector(elem, len) => {
                let mut inner = self.resolve_type(table, name, elem, location)?;
                inner.dims.insert(0, *len);
                Ok(inner)
            }
            Type::Bundle(_) => Err(BuildError::Unsupported {
                module: table.module.clone(),
                feature: "type",
                detail: format!("bundle type of `{}`", name),
                location: location.clone(),
            }),
        }
    }

    fn instantiate(
        &mut self,
        name: &str,
        module_name: &str,
        table: &mut SymbolTable,
        location: &Location,
    ) -> Result<(), BuildError> {
        let circuit = self.circuit;
        let module = circuit
            .find_module(module_name)
            .ok_or_else(|| BuildError::UnknownModule {
                name: module_name.to_owned(),
            })?;
        if self.instance_stack.iter().any(|m| m == module_name) {
            return Err(BuildError::Unsupported {
                module: table.module.clone(),
                feature: "instance",
                detail: format!("recursive instantiation of `{}`", module_name),
                location: location.clone(),
            });
        }
        let prefix = table.qualified(name);
        let mut child = SymbolTable::new(module_name, &prefix);
        let mut ports = HashMap::default();
        for port in &module.ports {
            let ty = self.resolve_type(&child, &port.name, &port.ty, location)?;
            let mut node = Node::new(child.qualified(&port.name), NodeKind::Wire, ty.width, ty.sign)
                .with_dims(ty.dims);
            node.is_async_reset = ty.is_async_reset;
            let id = self.graph.add_node(node);
            child.declare(&port.name, Symbol::Node(id), location)?;
            ports.insert(port.name.clone(), id);
        }
        table.declare(
            name,
            Symbol::Instance {
                module: module_name.to_owned(),
                ports,
            },
            location,
        )?;
        self.instance_stack.push(module_name.to_owned());
        let result = self.build_body(module, &mut child);
        self.instance_stack.pop();
        result
    }

    fn declare_memory(
        &mut self,
        decl: &MemDecl,
        table: &mut SymbolTable,
        location: &Location,
    ) -> Result<(), BuildError> {
        let unsupported = |detail: String| BuildError::Unsupported {
            module: table.module.clone(),
            feature: "memory",
            detail,
            location: location.clone(),
        };
        let ty = self.resolve_type(table, &decl.name, &decl.data_type, location)?;
        if !ty.dims.is_empty() {
            return Err(unsupported(format!("aggregate data type of `{}`", decl.name)));
        }
        if !decl.readwriters.is_empty() {
            return Err(unsupported(format!("read-write ports of `{}`", decl.name)));
        }
        if decl.read_latency > 1 || decl.write_latency != 1 {
            return Err(unsupported(format!(
                "latencies read={} write={} of `{}`",
                decl.read_latency, decl.write_latency, decl.name
            )));
        }
        if decl.depth == 0 {
            return Err(unsupported(format!("zero depth of `{}`", decl.name)));
        }

        let mem_name = table.qualified(&decl.name);
        let mem = self.graph.add_node(
            Node::new(&mem_name, NodeKind::Memory, ty.width, ty.sign).with_dims(vec![decl.depth]),
        );
        let addr_width = (usize::BITS - (decl.depth - 1).leading_zeros()).max(1) as usize;

        let mut ports = Vec::new();
        let mut port_symbols = HashMap::default();
        let port_names = decl
            .readers
            .iter()
            .map(|n| (n, PortKind::Reader))
            .chain(decl.writers.iter().map(|n| (n, PortKind::Writer)));
        for (index, (port_name, kind)) in port_names.enumerate() {
            let mut member = |role: MemberRole, label: &str, width: usize, sign: bool| {
                let node = Node::new(
                    format!("{}${}${}", mem_name, port_name, label),
                    NodeKind::PortMember(PortMember {
                        mem,
                        port: index,
                        role,
                    }),
                    width,
                    sign,
                );
                self.graph.add_node(node)
            };
            let addr = member(MemberRole::Addr, "addr", addr_width, false);
            let en = member(MemberRole::En, "en", 1, false);
            let clk = member(MemberRole::Clk, "clk", 1, false);
            let (data, mask) = match kind {
                PortKind::Reader => (member(MemberRole::RData, "data", ty.width, ty.sign), None),
                PortKind::Writer => (
                    member(MemberRole::Data, "data", ty.width, ty.sign),
                    Some(member(MemberRole::Mask, "mask", 1, false)),
                ),
            };
            if kind == PortKind::Reader && decl.read_latency == 0 {
                let read = ENode::new(ENodeKind::ReadMem(mem), vec![ENode::reference(addr)]);
                let gated = ENode::mux(ENode::reference(en), read, ENode::zero(ty.width));
                self.graph.node_mut(data).assigns.push(ExpTree::new(gated));
            }
            let mut members = HashMap::default();
            members.insert("addr".to_owned(), addr);
            members.insert("en".to_owned(), en);
            members.insert("clk".to_owned(), clk);
            members.insert("data".to_owned(), data);
            if let Some(mask) = mask {
                members.insert("mask".to_owned(), mask);
            }
            if port_symbols.insert(port_name.clone(), members).is_some() {
                return Err(BuildError::DuplicateDeclaration {
                    module: table.module.clone(),
                    name: format!("{}.{}", decl.name, port_name),
                    location: location.clone(),
                });
            }
            ports.push(MemPort {
                name: port_name.clone(),
                kind,
                addr,
                en,
                clk,
                data,
                mask,
            });
        }
        self.graph.node_mut(mem).mem = Some(MemInfo {
            depth: decl.depth,
            read_latency: decl.read_latency,
            write_latency: decl.write_latency,
            ports,
        });
        self.graph.memories.push(mem);
        table.declare(
            &decl.name,
            Symbol::Memory {
                ports: port_symbols,
            },
            location,
        )
    }

    fn connect(
        &mut self,
        loc: &Expr,
        value: &Expr,
        table: &SymbolTable,
        whens: &mut WhenStack,
        location: &Location,
    ) -> Result<(), BuildError> {
        let (target, indices) = self.lvalue(loc, table, location)?;
        let depth = self.graph.node(target).dims.len();
        if indices.len() == depth {
            let value = self.expr(value, table, location)?;
            self.assign(target, indices, value, whens);
            return Ok(());
        }

        // Aggregate connect: expand element-wise.
        let (source, source_indices) = match self.resolve(value, table, location)? {
            Path::Node(id, idx) => (id, idx),
            Path::Reg { src, indices, .. } => (src, indices),
            _ => {
                return Err(BuildError::Unsupported {
                    module: table.module.clone(),
                    feature: "connect",
                    detail: "aggregate value is not a reference".to_owned(),
                    location: location.clone(),
                });
            }
        };
        let target_rest = &self.graph.node(target).dims[indices.len()..];
        let source_rest = &self.graph.node(source).dims[source_indices.len()..];
        if target_rest != source_rest {
            return Err(BuildError::InvalidLhs {
                module: table.module.clone(),
                target: self.graph.node(target).name.clone(),
                detail: format!(
                    "shape {:?} does not match source shape {:?}",
                    target_rest, source_rest
                ),
                location: location.clone(),
            });
        }
        for suffix in self.suffixes(target, indices.len()) {
            let literal = suffix.iter().map(|i| ENode::uint(*i as u64));
            let mut lhs = indices.clone();
            lhs.extend(literal.clone());
            let mut rhs = source_indices.clone();
            rhs.extend(literal);
            self.assign(target, lhs, ENode::indexed(source, rhs), whens);
        }
        Ok(())
    }

    /// Every index combination over the dimensions after `from`.
    fn suffixes(&self, target: NodeId, from: usize) -> Vec<Vec<usize>> {
        let dims = &self.graph.node(target).dims[from..];
        let mut out = vec![Vec::new()];
        for dim in dims {
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    (0..*dim).map(move |i| {
                        let mut next = prefix.clone();
                        next.push(i);
                        next
                    })
                })
                .collect();
        }
        out
    }

    fn assign(&mut self, target: NodeId, indices: Vec<ENode>, value: ENode, whens: &mut WhenStack) {
        if self.graph.node(target).is_array() {
            let tree = ExpTree::indexed(indices, whens.wrap(value));
            self.graph.node_mut(target).assigns.push(tree);
        } else {
            whens.assign(target, value);
        }
    }

    fn lvalue(
        &self,
        loc: &Expr,
        table: &SymbolTable,
        location: &Location,
    ) -> Result<(NodeId, Vec<ENode>), BuildError> {
        let invalid = |target: String, detail: &str| BuildError::InvalidLhs {
            module: table.module.clone(),
            target,
            detail: detail.to_owned(),
            location: location.clone(),
        };
        match self.resolve(loc, table, location)? {
            Path::Node(id, indices) => {
                let node = self.graph.node(id);
                match node.kind {
                    NodeKind::Input => Err(invalid(node.name.clone(), "input port")),
                    NodeKind::PortMember(m) if m.role == MemberRole::RData => {
                        Err(invalid(node.name.clone(), "memory read data"))
                    }
                    _ => Ok((id, indices)),
                }
            }
            Path::Reg { dst, indices, .. } => Ok((dst, indices)),
            Path::Value(id) => Err(invalid(self.graph.node(id).name.clone(), "named value")),
            Path::Instance(name) | Path::Memory(name) | Path::MemPort(name, _) => {
                Err(invalid(name, "aggregate target"))
            }
        }
    }

    fn resolve(
        &self,
        expr: &Expr,
        table: &SymbolTable,
        location: &Location,
    ) -> Result<Path, BuildError> {
        let unsupported = |detail: String| BuildError::Unsupported {
            module: table.module.clone(),
            feature: "reference",
            detail,
            location: location.clone(),
        };
        match expr {
            Expr::Ref(name) => Ok(match table.lookup(name, location)? {
                Symbol::Node(id) => Path::Node(*id, Vec::new()),
                Symbol::Value(id) => Path::Value(*id),
                Symbol::Register { src, dst } => Path::Reg {
                    src: *src,
                    dst: *dst,
                    indices: Vec::new(),
                },
                Symbol::Instance { .. } => Path::Instance(name.clone()),
                Symbol::Memory { .. } => Path::Memory(name.clone()),
            }),
            Expr::SubField(base, field) => match self.resolve(base, table, location)? {
                Path::Instance(inst) => match table.lookup(&inst, location)? {
                    Symbol::Instance { module, ports } => ports
                        .get(field)
                        .map(|id| Path::Node(*id, Vec::new()))
                        .ok_or_else(|| BuildError::UndeclaredReference {
                            module: module.clone(),
                            name: field.clone(),
                            location: location.clone(),
                        }),
                    _ => Err(unsupported(format!("`{}` is not an instance", inst))),
                },
                Path::Memory(mem) => match table.lookup(&mem, location)? {
                    Symbol::Memory { ports, .. } if ports.contains_key(field) => {
                        Ok(Path::MemPort(mem, field.clone()))
                    }
                    _ => Err(BuildError::UndeclaredReference {
                        module: table.module.clone(),
                        name: format!("{}.{}", mem, field),
                        location: location.clone(),
                    }),
                },
                Path::MemPort(mem, port) => match table.lookup(&mem, location)? {
                    Symbol::Memory { ports, .. } => ports
                        .get(&port)
                        .and_then(|members| members.get(field))
                        .map(|id| Path::Node(*id, Vec::new()))
                        .ok_or_else(|| BuildError::UndeclaredReference {
                            module: table.module.clone(),
                            name: format!("{}.{}.{}", mem, port, field),
                            location: location.clone(),
                        }),
                    _ => Err(unsupported(format!("`{}` is not a memory", mem))),
                },
                _ => Err(unsupported(format!("field `{}` of a non-aggregate", field))),
            },
            Expr::SubIndex(base, index) => {
                let literal = ENode::uint(*index as u64);
                self.resolve_index(base, Some(*index), literal, table, location)
            }
            Expr::SubAccess(base, index) => {
                let index = self.expr(index, table, location)?;
                self.resolve_index(base, None, index, table, location)
            }
            _ => Err(unsupported("expression is not a reference".to_owned())),
        }
    }

    fn resolve_index(
        &self,
        base: &Expr,
        literal: Option<usize>,
        index: ENode,
        table: &SymbolTable,
        location: &Location,
    ) -> Result<Path, BuildError> {
        let push = |id: NodeId, mut indices: Vec<ENode>| -> Result<Vec<ENode>, BuildError> {
            let node = self.graph.node(id);
            let Some(size) = node.dims.get(indices.len()).copied() else {
                return Err(BuildError::Unsupported {
                    module: table.module.clone(),
                    feature: "reference",
                    detail: format!("`{}` indexed beyond its dimensions", node.name),
                    location: location.clone(),
                });
            };
            if let Some(i) = literal {
                if i >= size {
                    return Err(BuildError::IndexOutOfRange {
                        module: table.module.clone(),
                        name: node.name.clone(),
                        index: i,
                        size,
                        location: location.clone(),
                    });
                }
            }
            indices.push(index.clone());
            Ok(indices)
        };
        match self.resolve(base, table, location)? {
            Path::Node(id, indices) => Ok(Path::Node(id, push(id, indices)?)),
            Path::Reg { src, dst, indices } => Ok(Path::Reg {
                src,
                dst,
                indices: push(src, indices)?,
            }),
            _ => Err(BuildError::Unsupported {
                module: table.module.clone(),
                feature: "reference",
                detail: "index into a non-vector".to_owned(),
                location: location.clone(),
            }),
        }
    }

    fn expr(&self, expr: &Expr, table: &SymbolTable, location: &Location) -> Result<ENode, BuildError> {
        match expr {
            Expr::Ref(_) | Expr::SubField(..) | Expr::SubIndex(..) | Expr::SubAccess(..) => {
                let (id, indices) = match self.resolve(expr, table, location)? {
                    Path::Node(id, indices) => (id, indices),
                    Path::Value(id) => (id, Vec::new()),
                    Path::Reg { src, indices, .. } => (src, indices),
                    Path::Instance(name) | Path::Memory(name) | Path::MemPort(name, _) => {
                        return Err(BuildError::Unsupported {
                            module: table.module.clone(),
                            feature: "expression",
                            detail: format!("`{}` is an aggregate", name),
                            location: location.clone(),
                        });
                    }
                };
                let node = self.graph.node(id);
                if indices.len() != node.dims.len() {
                    return Err(BuildError::Unsupported {
                        module: table.module.clone(),
                        feature: "expression",
                        detail: format!("partial read of vector `{}`", node.name),
                        location: location.clone(),
                    });
                }
                Ok(ENode::indexed(id, indices))
            }
            Expr::UIntLit { value, width } => {
                let needed = (value.bits() as usize).max(1);
                let width = width.unwrap_or(needed);
                if value.bits() as usize > width {
                    return Err(BuildError::InvalidLiteral {
                        module: table.module.clone(),
                        value: value.to_string(),
                        width,
                        location: location.clone(),
                    });
                }
                Ok(ENode::literal(value.clone(), width, false))
            }
            Expr::SIntLit { value, width } => {
                let needed = signed_width(value);
                let width = width.unwrap_or(needed);
                if needed > width {
                    return Err(BuildError::InvalidLiteral {
                        module: table.module.clone(),
                        value: value.to_string(),
                        width,
                        location: location.clone(),
                    });
                }
                Ok(ENode::literal(twos_complement(value, width), width, true))
            }
            Expr::Mux(cond, then, otherwise) => Ok(ENode::mux(
                self.expr(cond, table, location)?,
                self.expr(then, table, location)?,
                self.expr(otherwise, table, location)?,
            )),
            Expr::ValidIf(cond, value) => {
                self.expr(cond, table, location)?;
                self.expr(value, table, location)
            }
            Expr::Prim { op, args, params } => {
                let (expected_args, expected_params) = op.arity();
                if args.len() != expected_args || params.len() != expected_params {
                    return Err(BuildError::ArityMismatch {
                        module: table.module.clone(),
                        op: op.to_string(),
                        expected_args,
                        expected_params,
                        found_args: args.len(),
                        found_params: params.len(),
                        location: location.clone(),
                    });
                }
                let children = args
                    .iter()
                    .map(|a| self.expr(a, table, location))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ENode::prim(lower_op(*op, params), children))
            }
        }
    }
}

fn lower_op(op: ast::PrimOp, params: &[usize]) -> PrimOp {
    let p = |i: usize| params.get(i).copied().unwrap_or(0);
    match op {
        ast::PrimOp::Add => PrimOp::Add,
        ast::PrimOp::Sub => PrimOp::Sub,
        ast::PrimOp::Mul => PrimOp::Mul,
        ast::PrimOp::Div => PrimOp::Div,
        ast::PrimOp::Rem => PrimOp::Rem,
        ast::PrimOp::Lt => PrimOp::Lt,
        ast::PrimOp::Leq => PrimOp::Leq,
        ast::PrimOp::Gt => PrimOp::Gt,
        ast::PrimOp::Geq => PrimOp::Geq,
        ast::PrimOp::Eq => PrimOp::Eq,
        ast::PrimOp::Neq => PrimOp::Neq,
        ast::PrimOp::Pad => PrimOp::Pad(p(0)),
        ast::PrimOp::AsUInt => PrimOp::AsUInt,
        ast::PrimOp::AsSInt => PrimOp::AsSInt,
        ast::PrimOp::AsClock => PrimOp::AsClock,
        ast::PrimOp::AsAsyncReset => PrimOp::AsAsyncReset,
        ast::PrimOp::Shl => PrimOp::Shl(p(0)),
        ast::PrimOp::Shr => PrimOp::Shr(p(0)),
        ast::PrimOp::Dshl => PrimOp::Dshl,
        ast::PrimOp::Dshr => PrimOp::Dshr,
        ast::PrimOp::Cvt => PrimOp::Cvt,
        ast::PrimOp::Neg => PrimOp::Neg,
        ast::PrimOp::Not => PrimOp::Not,
        ast::PrimOp::And => PrimOp::And,
        ast::PrimOp::Or => PrimOp::Or,
        ast::PrimOp::Xor => PrimOp::Xor,
        ast::PrimOp::Andr => PrimOp::Andr,
        ast::PrimOp::Orr => PrimOp::Orr,
        ast::PrimOp::Xorr => PrimOp::Xorr,
        ast::PrimOp::Cat => PrimOp::Cat,
        ast::PrimOp::Bits => PrimOp::Bits { hi: p(0), lo: p(1) },
        ast::PrimOp::Head => PrimOp::Head(p(0)),
        ast::PrimOp::Tail => PrimOp::Tail(p(0)),
    }
}

/// Minimum two's-complement width of a signed literal.
fn signed_width(value: &BigInt) -> usize {
    let magnitude = if value.sign() == Sign::Minus {
        -value - BigInt::one()
    } else {
        value.clone()
    };
    magnitude.bits() as usize + 1
}

fn twos_complement(value: &BigInt, width: usize) -> BigUint {
    let modulus = BigInt::one() << width;
    let wrapped = ((value % &modulus) + &modulus) % &modulus;
    wrapped.to_biguint().unwrap_or_else(BigUint::zero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, PrimOp as AstOp};

    fn counter() -> Circuit {
        Circuit::new("Top").module(
            Module::new("Top")
                .input("clock", Type::Clock)
                .input("en", Type::uint(1))
                .output("out", Type::uint(4))
                .stmt(Statement::reg("r", Type::uint(4), Expr::r("clock")))
                .stmt(Statement::when(
                    Expr::r("en"),
                    vec![Statement::connect(
                        Expr::r("r"),
                        Expr::op(AstOp::Add, vec![Expr::r("r"), Expr::uint(1, 4)]).tail(1),
                    )],
                    vec![],
                ))
                .stmt(Statement::connect(Expr::r("out"), Expr::r("r"))),
        )
    }

    #[test]
    fn register_halves_are_linked() {
        let g = build_graph(&counter()).unwrap();
        let src = g.find("r").unwrap();
        let dst = g.find("r$next").unwrap();
        assert_eq!(g.node(src).partner, Some(dst));
        assert_eq!(g.node(dst).partner, Some(src));
        assert_eq!(g.regs, vec![src]);
    }

    #[test]
    fn conditional_update_holds_register() {
        let g = build_graph(&counter()).unwrap();
        let src = g.find("r").unwrap();
        let dst = g.find("r$next").unwrap();
        let tree = &g.node(dst).assigns[0].root;
        assert_eq!(tree.kind, ENodeKind::When);
        assert_eq!(tree.children[2], ENode::reference(src));
        assert!(g.node(dst).prev.contains(&src));
    }

    #[test]
    fn undeclared_reference_is_reported() {
        let c = Circuit::new("Top").module(
            Module::new("Top")
                .output("o", Type::uint(1))
                .stmt(Statement::connect(Expr::r("o"), Expr::r("missing")).at("top.fir", 7)),
        );
        let err = build_graph(&c).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Undeclared reference `missing` in module `Top` at top.fir:7"
        );
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let c = Circuit::new("Top").module(
            Module::new("Top")
                .input("a", Type::uint(4))
                .output("o", Type::uint(4))
                .stmt(Statement::connect(
                    Expr::r("o"),
                    Expr::op(AstOp::Add, vec![Expr::r("a")]),
                )),
        );
        assert!(matches!(
            build_graph(&c),
            Err(BuildError::ArityMismatch { found_args: 1, .. })
        ));
    }

    #[test]
    fn instances_are_flattened_with_prefix() {
        let inner = Module::new("Inner")
            .input("i", Type::uint(8))
            .output("o", Type::uint(8))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("i")));
        let top = Module::new("Top")
            .input("a", Type::uint(8))
            .output("b", Type::uint(8))
            .stmt(Statement::inst("u", "Inner"))
            .stmt(Statement::connect(Expr::r("u").field("i"), Expr::r("a")))
            .stmt(Statement::connect(Expr::r("b"), Expr::r("u").field("o")));
        let g = build_graph(&Circuit::new("Top").module(top).module(inner)).unwrap();
        let ui = g.find("u$i").unwrap();
        let uo = g.find("u$o").unwrap();
        assert_eq!(g.node(uo).assigns[0].root, ENode::reference(ui));
    }

    #[test]
    fn vector_connect_expands_per_element() {
        let top = Module::new("Top")
            .input("a", Type::uint(8))
            .output("o", Type::uint(8))
            .stmt(Statement::wire("x", Type::vector(Type::uint(8), 2)))
            .stmt(Statement::wire("y", Type::vector(Type::uint(8), 2)))
            .stmt(Statement::connect(Expr::r("x").index(0), Expr::r("a")))
            .stmt(Statement::connect(Expr::r("x").index(1), Expr::r("a")))
            .stmt(Statement::connect(Expr::r("y"), Expr::r("x")))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("y").index(1)));
        let g = build_graph(&Circuit::new("Top").module(top)).unwrap();
        let y = g.find("y").unwrap();
        assert_eq!(g.node(y).assigns.len(), 2);
        assert_eq!(g.node(y).assigns[1].static_index(&[2]), Some(1));
    }

    #[test]
    fn signed_literals_are_encoded() {
        assert_eq!(signed_width(&BigInt::from(-1)), 1);
        assert_eq!(signed_width(&BigInt::from(3)), 3);
        assert_eq!(twos_complement(&BigInt::from(-2), 4), BigUint::from(14u32));
    }

    #[test]
    fn missing_width_is_rejected() {
        let c = Circuit::new("Top").module(
            Module::new("Top").stmt(Statement::wire("w", Type::UInt(None))),
        );
        assert!(matches!(
            build_graph(&c),
            Err(BuildError::UnresolvedWidth { name, .. }) if name == "w"
        ));
    }
}

use std::fmt;

use super::{ENode, ENodeKind, Graph, NodeKind};

/// Renders an expression tree with node names resolved through the graph.
pub struct ENodeDisplay<'a> {
    pub graph: &'a Graph,
    pub enode: &'a ENode,
}

impl ENodeDisplay<'_> {
    fn child<'b>(&'b self, enode: &'b ENode) -> ENodeDisplay<'b> {
        ENodeDisplay {
            graph: self.graph,
            enode,
        }
    }
}

impl fmt::Display for ENodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.enode;
        match &e.kind {
            ENodeKind::Literal(v) => {
                if e.sign {
                    write!(f, "{}'sh{:x}", e.width, v)
                } else {
                    write!(f, "{}'h{:x}", e.width, v)
                }
            }
            ENodeKind::Ref(id) => {
                write!(f, "{}", self.graph.node(*id).name)?;
                for idx in &e.children {
                    write!(f, "[{}]", self.child(idx))?;
                }
                Ok(())
            }
            ENodeKind::Empty => write!(f, "_"),
            ENodeKind::Invalid => write!(f, "invalid"),
            ENodeKind::ReadMem(mem) => {
                write!(f, "{}[", self.graph.node(*mem).name)?;
                for c in &e.children {
                    write!(f, "{}", self.child(c))?;
                }
                write!(f, "]")
            }
            kind => {
                match kind {
                    ENodeKind::Prim(op) => write!(f, "{}", op)?,
                    ENodeKind::Mux => write!(f, "mux")?,
                    ENodeKind::When => write!(f, "when")?,
                    ENodeKind::Printf(fmt) => write!(f, "printf{:?}", fmt)?,
                    ENodeKind::Assert(msg) => write!(f, "assert{:?}", msg)?,
                    ENodeKind::AsyncReset => write!(f, "async_reset")?,
                    _ => unreachable!(),
                }
                write!(f, "(")?;
                for (i, c) in e.children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", self.child(c))?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {} {{", self.name)?;
        for id in self.live_nodes() {
            let node = self.node(id);
            write!(
                f,
                "  {} {}: {}{}<{}>",
                id,
                node.name,
                node.kind,
                if node.sign { " SInt" } else { " UInt" },
                node.width
            )?;
            for d in &node.dims {
                write!(f, "[{}]", d)?;
            }
            if node.reg_split {
                write!(f, " split")?;
            }
            if let Some(s) = node.super_id {
                write!(f, " @{}", s)?;
            }
            writeln!(f)?;
            if let Some(reset) = &node.reset {
                writeln!(
                    f,
                    "    reset {:?} {} -> {}",
                    reset.kind,
                    self.display(&reset.cond),
                    self.display(&reset.value)
                )?;
            }
            for tree in &node.assigns {
                write!(f, "    ")?;
                if !tree.lhs_index.is_empty() {
                    for idx in &tree.lhs_index {
                        write!(f, "[{}]", self.display(idx))?;
                    }
                    write!(f, " ")?;
                }
                writeln!(f, "= {}", self.display(&tree.root))?;
            }
        }
        if !self.order.is_empty() {
            writeln!(f, "  schedule:")?;
            for sid in &self.order {
                let s = self.super_node(*sid);
                let names: Vec<&str> = s
                    .members
                    .iter()
                    .map(|m| self.node(*m).name.as_str())
                    .collect();
                writeln!(f, "    {} {:?} [{}]", sid, s.kind, names.join(", "))?;
            }
        }
        let inputs = self.inputs.len();
        let regs = self
            .regs
            .iter()
            .filter(|r| self.node(**r).is_live() && self.node(**r).kind == NodeKind::RegSrc)
            .count();
        writeln!(f, "}} // {} inputs, {} registers", inputs, regs)
    }
}

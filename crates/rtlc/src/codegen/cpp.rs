//! C++ rendering of a [`Program`].
//!
//! Values up to the native limit live in fixed-width integers and are
//! computed in `uint64_t`, masked to their width. Wider values use the
//! `wide::Value` type and `wide::` helper calls, which the embedding
//! provides.

use std::fmt::Write;

use itertools::Itertools;

use super::{Expr, Instr, Layout, Program, Slot, StorageClass};
use crate::ir::PrimOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CppOutput {
    pub header: String,
    pub source: String,
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn mask_literal(width: usize) -> String {
    if width >= 64 {
        "0xffffffffffffffffULL".to_string()
    } else {
        format!("0x{:x}ULL", (1u128 << width) - 1)
    }
}

fn op_name(op: PrimOp) -> &'static str {
    match op {
        PrimOp::Add => "add",
        PrimOp::Sub => "sub",
        PrimOp::Mul => "mul",
        PrimOp::Div => "div",
        PrimOp::Rem => "rem",
        PrimOp::Lt => "lt",
        PrimOp::Leq => "leq",
        PrimOp::Gt => "gt",
        PrimOp::Geq => "geq",
        PrimOp::Eq => "eq",
        PrimOp::Neq => "neq",
        PrimOp::Dshl => "dshl",
        PrimOp::Dshr => "dshr",
        PrimOp::And => "and_",
        PrimOp::Or => "or_",
        PrimOp::Xor => "xor_",
        PrimOp::Cat => "cat",
        PrimOp::AsUInt | PrimOp::AsSInt | PrimOp::AsClock | PrimOp::AsAsyncReset => "cast",
        PrimOp::Cvt => "cvt",
        PrimOp::Neg => "neg",
        PrimOp::Not => "not_",
        PrimOp::Andr => "andr",
        PrimOp::Orr => "orr",
        PrimOp::Xorr => "xorr",
        PrimOp::Pad(_) => "pad",
        PrimOp::Shl(_) => "shl",
        PrimOp::Shr(_) => "shr",
        PrimOp::Head(_) => "head",
        PrimOp::Tail(_) => "tail",
        PrimOp::Bits { .. } => "bits",
    }
}

struct Emitter<'a> {
    program: &'a Program,
    limit: usize,
}

impl<'a> Emitter<'a> {
    fn layout(&self) -> &'a Layout {
        &self.program.layout
    }

    fn field(&self, slot: Slot) -> String {
        format!("s{}_{}", slot.0, sanitize(&self.layout().info(slot).name))
    }

    fn is_wide(&self, width: usize) -> bool {
        width > self.limit
    }

    fn flat_index(&self, indices: &[Expr<Slot>], dims: &[usize]) -> (String, String) {
        let mut flat = String::from("0");
        let mut bounds = Vec::new();
        for (index, dim) in indices.iter().zip(dims) {
            let i = self.narrow(index);
            bounds.push(format!("({}) < {}ULL", i, dim));
            flat = format!("({}) * {} + ({})", flat, dim, i);
        }
        let check = if bounds.is_empty() {
            "true".to_string()
        } else {
            bounds.iter().join(" && ")
        };
        (check, flat)
    }

    /// Sign-extended view of a narrow operand.
    fn signed(&self, e: &Expr<Slot>) -> String {
        let w = e.width();
        if w == 0 {
            return "0LL".to_string();
        }
        let shift = 64 - w.min(64);
        format!("((int64_t)(({}) << {}) >> {})", self.narrow(e), shift, shift)
    }

    /// Expression yielding a `uint64_t` holding exactly `e.width()` bits.
    fn narrow(&self, e: &Expr<Slot>) -> String {
        match e {
            Expr::Const(v) => match v.to_u64() {
                Some(n) => format!("{}ULL", n),
                None => format!("wide::to_u64(wide::parse(\"{:x}\", {}))", v.bits, v.width),
            },
            Expr::Read { src, .. } if self.layout().info(*src).class.is_wide() => {
                format!("wide::to_u64({})", self.field(*src))
            }
            Expr::Read { src, .. } => format!("(uint64_t){}", self.field(*src)),
            Expr::ReadIndexed {
                src, indices, dims, ..
            } => {
                let (check, flat) = self.flat_index(indices, dims);
                let read = if self.layout().info(*src).class.is_wide() {
                    format!("wide::to_u64({}[{}])", self.field(*src), flat)
                } else {
                    format!("(uint64_t){}[{}]", self.field(*src), flat)
                };
                format!("(({}) ? {} : 0ULL)", check, read)
            }
            Expr::Mux {
                cond,
                then,
                otherwise,
                ..
            } => format!(
                "(({}) ? ({}) : ({}))",
                self.narrow(cond),
                self.narrow(then),
                self.narrow(otherwise)
            ),
            Expr::Prim {
                op,
                args,
                width,
                sign,
            } => {
                if args.iter().any(|a| self.is_wide(a.width())) {
                    return format!("wide::to_u64({})", self.wide_prim(*op, args, *width, *sign));
                }
                self.narrow_prim(*op, args, *width)
            }
        }
    }

    fn narrow_prim(&self, op: PrimOp, args: &[Expr<Slot>], width: usize) -> String {
        let mask = mask_literal(width);
        let a = args.first().map(|e| self.narrow(e)).unwrap_or_default();
        let b = args.get(1).map(|e| self.narrow(e)).unwrap_or_default();
        let signed = args.first().is_some_and(|e| e.sign());
        let sa = || args.first().map(|e| self.signed(e)).unwrap_or_default();
        let sb = || args.get(1).map(|e| self.signed(e)).unwrap_or_default();
        let arith = |sym: &str| {
            if signed {
                format!("((uint64_t)({} {} {}) & {})", sa(), sym, sb(), mask)
            } else {
                format!("(({} {} {}) & {})", a, sym, b, mask)
            }
        };
        let cmp = |sym: &str| {
            if signed {
                format!("(uint64_t)({} {} {})", sa(), sym, sb())
            } else {
                format!("(uint64_t)({} {} {})", a, sym, b)
            }
        };
        let extended = |x: &str, e: Option<&Expr<Slot>>| match e {
            Some(e) if e.sign() => format!("((uint64_t){} & {})", self.signed(e), mask),
            _ => x.to_string(),
        };
        match op {
            PrimOp::Add => arith("+"),
            PrimOp::Sub => arith("-"),
            PrimOp::Mul => arith("*"),
            PrimOp::Div | PrimOp::Rem => {
                let sym = if op == PrimOp::Div { "/" } else { "%" };
                format!("(({}) == 0 ? 0ULL : {})", b, arith(sym))
            }
            PrimOp::Lt => cmp("<"),
            PrimOp::Leq => cmp("<="),
            PrimOp::Gt => cmp(">"),
            PrimOp::Geq => cmp(">="),
            PrimOp::Eq => cmp("=="),
            PrimOp::Neq => cmp("!="),
            PrimOp::Dshl => format!("(({}) >= 64 ? 0ULL : (({} << ({})) & {}))", b, a, b, mask),
            PrimOp::Dshr if signed => format!(
                "((uint64_t)({} >> (({}) > 63 ? 63 : ({}))) & {})",
                sa(),
                b,
                b,
                mask
            ),
            PrimOp::Dshr => format!("(({}) >= 64 ? 0ULL : ({} >> ({})))", b, a, b),
            PrimOp::And | PrimOp::Or | PrimOp::Xor => {
                let sym = match op {
                    PrimOp::And => "&",
                    PrimOp::Or => "|",
                    _ => "^",
                };
                format!(
                    "(({} {} {}) & {})",
                    extended(&a, args.first()),
                    sym,
                    extended(&b, args.get(1)),
                    mask
                )
            }
            PrimOp::Cat => {
                let wb = args.get(1).map(|e| e.width()).unwrap_or(0);
                format!("((({}) << {}) | ({}))", a, wb, b)
            }
            PrimOp::AsUInt | PrimOp::AsSInt => a,
            PrimOp::AsClock | PrimOp::AsAsyncReset => format!("(({}) & 1ULL)", a),
            PrimOp::Cvt | PrimOp::Pad(_) => extended(&a, args.first()),
            PrimOp::Neg => format!("((uint64_t)(-{}) & {})", sa(), mask),
            PrimOp::Not => format!("((~{}) & {})", a, mask),
            PrimOp::Andr => {
                let wa = args.first().map(|e| e.width()).unwrap_or(0);
                format!("(uint64_t)({} == {})", a, mask_literal(wa))
            }
            PrimOp::Orr => format!("(uint64_t)({} != 0)", a),
            PrimOp::Xorr => format!("(uint64_t)(__builtin_popcountll({}) & 1)", a),
            PrimOp::Shl(n) if n >= 64 => "0ULL".to_string(),
            PrimOp::Shl(n) => format!("(({} << {}) & {})", a, n, mask),
            PrimOp::Shr(n) if signed => format!("((uint64_t)({} >> {}) & {})", sa(), n.min(63), mask),
            PrimOp::Shr(n) if n >= 64 => "0ULL".to_string(),
            PrimOp::Shr(n) => format!("({} >> {})", a, n),
            PrimOp::Head(n) => {
                let wa = args.first().map(|e| e.width()).unwrap_or(0);
                format!("({} >> {})", a, wa.saturating_sub(n))
            }
            PrimOp::Tail(_) => format!("({} & {})", a, mask),
            PrimOp::Bits { lo, .. } => format!("(({} >> {}) & {})", a, lo, mask),
        }
    }

    fn wide_prim(&self, op: PrimOp, args: &[Expr<Slot>], width: usize, sign: bool) -> String {
        let mut call = format!("wide::{}(", op_name(op));
        for a in args {
            let _ = write!(call, "{}, ", self.wide(a));
        }
        match op {
            PrimOp::Pad(n) | PrimOp::Shl(n) | PrimOp::Shr(n) | PrimOp::Head(n) | PrimOp::Tail(n) => {
                let _ = write!(call, "{}, ", n);
            }
            PrimOp::Bits { hi, lo } => {
                let _ = write!(call, "{}, {}, ", hi, lo);
            }
            _ => {}
        }
        let _ = write!(call, "{}, {})", width, sign);
        call
    }

    /// Expression yielding a `wide::Value` of `e.width()` bits.
    fn wide(&self, e: &Expr<Slot>) -> String {
        match e {
            Expr::Const(v) => format!("wide::parse(\"{:x}\", {})", v.bits, v.width),
            Expr::Read { src, width, .. } if !self.layout().info(*src).class.is_wide() => {
                format!("wide::from_u64({}, {})", self.field(*src), width)
            }
            Expr::Read { src, .. } => self.field(*src),
            Expr::ReadIndexed {
                src,
                indices,
                dims,
                width,
                ..
            } => {
                let (check, flat) = self.flat_index(indices, dims);
                let read = if self.layout().info(*src).class.is_wide() {
                    format!("{}[{}]", self.field(*src), flat)
                } else {
                    format!("wide::from_u64({}[{}], {})", self.field(*src), flat, width)
                };
                format!("(({}) ? {} : wide::zero({}))", check, read, width)
            }
            Expr::Mux {
                cond,
                then,
                otherwise,
                ..
            } => format!(
                "(({}) ? ({}) : ({}))",
                self.narrow(cond),
                self.wide(then),
                self.wide(otherwise)
            ),
            Expr::Prim {
                op,
                args,
                width,
                sign,
            } => {
                if self.is_wide(*width) || args.iter().any(|a| self.is_wide(a.width())) {
                    self.wide_prim(*op, args, *width, *sign)
                } else {
                    format!("wide::from_u64({}, {})", self.narrow_prim(*op, args, *width), width)
                }
            }
        }
    }

    fn value_for(&self, slot: Slot, e: &Expr<Slot>) -> String {
        let info = self.layout().info(slot);
        let e = e.clone().fit(info.width, info.sign);
        if info.class.is_wide() {
            self.wide(&e)
        } else {
            self.narrow(&e)
        }
    }

    fn instr(&self, out: &mut String, instr: &Instr<Slot>, indent: usize) {
        let pad = "  ".repeat(indent);
        match instr {
            Instr::Assign { dst, value } => {
                let _ = writeln!(out, "{}{} = {};", pad, self.field(*dst), self.value_for(*dst, value));
            }
            Instr::Store {
                dst,
                indices,
                dims,
                value,
            } => {
                let (check, flat) = self.flat_index(indices, dims);
                let _ = writeln!(
                    out,
                    "{}if ({}) {}[{}] = {};",
                    pad,
                    check,
                    self.field(*dst),
                    flat,
                    self.value_for(*dst, value)
                );
            }
            Instr::Copy { dst, src } => {
                let _ = writeln!(
                    out,
                    "{}std::copy(std::begin({}), std::end({}), std::begin({}));",
                    pad,
                    self.field(*src),
                    self.field(*src),
                    self.field(*dst)
                );
            }
            Instr::If {
                cond,
                then,
                otherwise,
            } => {
                let _ = writeln!(out, "{}if ({}) {{", pad, self.narrow(cond));
                for i in then {
                    self.instr(out, i, indent + 1);
                }
                if !otherwise.is_empty() {
                    let _ = writeln!(out, "{}}} else {{", pad);
                    for i in otherwise {
                        self.instr(out, i, indent + 1);
                    }
                }
                let _ = writeln!(out, "{}}}", pad);
            }
            Instr::Printf {
                enable,
                format,
                args,
            } => {
                let _ = writeln!(
                    out,
                    "{}if ({}) rt::print({:?}, {{{}}});",
                    pad,
                    self.narrow(enable),
                    format,
                    args.iter().map(|a| self.wide(a)).join(", ")
                );
            }
            Instr::Assert {
                pred,
                enable,
                message,
            } => {
                let _ = writeln!(
                    out,
                    "{}if (({}) && !({})) rt::fail({:?}, cycles);",
                    pad,
                    self.narrow(enable),
                    self.narrow(pred),
                    message
                );
            }
        }
    }

    fn activate(&self, out: &mut String, pad: &str, targets: &[usize]) {
        for t in targets {
            let _ = writeln!(out, "{}active[{}] = true;", pad, t);
        }
    }

    fn header(&self) -> String {
        let p = self.program;
        let class = sanitize(&p.name);
        let mut out = String::new();
        let _ = writeln!(out, "#pragma once");
        let _ = writeln!(out, "#include <algorithm>");
        let _ = writeln!(out, "#include <cstdint>");
        let _ = writeln!(out, "#include <iterator>");
        let _ = writeln!(out, "#include \"wide.h\"");
        let _ = writeln!(out, "#include \"rt.h\"");
        let _ = writeln!(out);
        let _ = writeln!(out, "class S{} {{", class);
        let _ = writeln!(out, "public:");
        for port in &p.inputs {
            let info = self.layout().info(port.slot);
            if info.class.is_wide() {
                let _ = writeln!(out, "  void set_{}(const wide::Value& v);", sanitize(&port.name));
            } else {
                let _ = writeln!(out, "  void set_{}(uint64_t v);", sanitize(&port.name));
            }
        }
        for port in &p.outputs {
            let ty = if self.is_wide(port.width) {
                "wide::Value"
            } else {
                "uint64_t"
            };
            let _ = writeln!(out, "  {} get_{}();", ty, sanitize(&port.name));
        }
        let _ = writeln!(out, "  void eval();");
        let _ = writeln!(out, "  void step();");
        let _ = writeln!(out, "  uint64_t cycles = 0;");
        let _ = writeln!(out);
        let _ = writeln!(out, "private:");
        for (slot, info) in self.layout().iter() {
            let ty = match info.class {
                StorageClass::U8 => "uint8_t",
                StorageClass::U16 => "uint16_t",
                StorageClass::U32 => "uint32_t",
                StorageClass::U64 => "uint64_t",
                StorageClass::Wide => "wide::Value",
            };
            let init = if info.class.is_wide() {
                format!("wide::zero({})", info.width)
            } else {
                "0".to_string()
            };
            if info.len > 1 {
                let _ = writeln!(out, "  {} {}[{}] = {{}};", ty, self.field(slot), info.len);
            } else {
                let _ = writeln!(out, "  {} {} = {};", ty, self.field(slot), init);
            }
        }
        let _ = writeln!(out, "  bool active[{}];", p.clusters.len().max(1));
        for index in 0..p.clusters.len() {
            let _ = writeln!(out, "  void subStep{}();", index);
        }
        let _ = writeln!(out, "  void writeMem();");
        let _ = writeln!(out, "  void commit();");
        let _ = writeln!(out);
        let _ = writeln!(out, "public:");
        let _ = writeln!(
            out,
            "  S{}() {{ std::fill(std::begin(active), std::end(active), true); }}",
            class
        );
        let _ = writeln!(out, "}};");
        out
    }

    fn source(&self) -> String {
        let p = self.program;
        let class = format!("S{}", sanitize(&p.name));
        let mut out = String::new();
        let _ = writeln!(out, "#include \"{}.h\"", sanitize(&p.name));
        let _ = writeln!(out);

        for port in &p.inputs {
            let wide = self.layout().info(port.slot).class.is_wide();
            let (param, value) = if wide {
                ("const wide::Value& v", format!("wide::trunc(v, {})", port.width))
            } else {
                ("uint64_t v", format!("v & {}", mask_literal(port.width)))
            };
            let _ = writeln!(out, "void {}::set_{}({}) {{", class, sanitize(&port.name), param);
            let field = self.field(port.slot);
            let _ = writeln!(out, "  auto next = {};", value);
            let _ = writeln!(out, "  if (next == {}) return;", field);
            let _ = writeln!(out, "  {} = next;", field);
            self.activate(&mut out, "  ", &port.activates);
            let _ = writeln!(out, "}}");
            let _ = writeln!(out);
        }
        for port in &p.outputs {
            let (ty, value) = if self.is_wide(port.width) {
                ("wide::Value", self.wide(&port.value))
            } else {
                ("uint64_t", self.narrow(&port.value))
            };
            let _ = writeln!(out, "{} {}::get_{}() {{", ty, class, sanitize(&port.name));
            let _ = writeln!(out, "  eval();");
            let _ = writeln!(out, "  return {};", value);
            let _ = writeln!(out, "}}");
            let _ = writeln!(out);
        }

        for (index, cluster) in p.clusters.iter().enumerate() {
            let _ = writeln!(out, "void {}::subStep{}() {{", class, index);
            for update in &cluster.updates {
                let _ = writeln!(out, "  // {}", update.name);
                let scalar = match update.instrs.as_slice() {
                    [Instr::Assign { dst, .. }] if !update.activates.is_empty() => Some(*dst),
                    _ => None,
                };
                if let Some(dst) = scalar {
                    let _ = writeln!(out, "  {{");
                    let _ = writeln!(out, "    auto old = {};", self.field(dst));
                    for i in &update.instrs {
                        self.instr(&mut out, i, 2);
                    }
                    let _ = writeln!(out, "    if (old != {}) {{", self.field(dst));
                    self.activate(&mut out, "      ", &update.activates);
                    let _ = writeln!(out, "    }}");
                    let _ = writeln!(out, "  }}");
                } else {
                    for i in &update.instrs {
                        self.instr(&mut out, i, 1);
                    }
                    self.activate(&mut out, "  ", &update.activates);
                }
            }
            let _ = writeln!(out, "}}");
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "void {}::writeMem() {{", class);
        for (k, read) in p.mem_reads.iter().enumerate() {
            let info = self.layout().info(read.mem);
            let index = [read.addr.clone()];
            let (check, flat) = self.flat_index(&index, &[info.len]);
            let zero = if info.class.is_wide() {
                format!("wide::zero({})", info.width)
            } else {
                "0".to_string()
            };
            let _ = writeln!(
                out,
                "  auto latched{} = (({}) && ({})) ? {}[{}] : {};",
                k,
                self.narrow(&read.en),
                check,
                self.field(read.mem),
                flat,
                zero
            );
        }
        for write in &p.mem_writes {
            let info = self.layout().info(write.mem);
            let index = [write.addr.clone()];
            let (check, flat) = self.flat_index(&index, &[info.len]);
            let _ = writeln!(
                out,
                "  if (({}) && ({}) && ({})) {{",
                self.narrow(&write.en),
                self.narrow(&write.mask),
                check
            );
            let _ = writeln!(
                out,
                "    {}[{}] = {};",
                self.field(write.mem),
                flat,
                self.value_for(write.mem, &write.data)
            );
            self.activate(&mut out, "    ", &write.activates);
            let _ = writeln!(out, "  }}");
        }
        for (k, read) in p.mem_reads.iter().enumerate() {
            let field = self.field(read.data);
            let _ = writeln!(out, "  if ({} != latched{}) {{", field, k);
            let _ = writeln!(out, "    {} = latched{};", field, k);
            self.activate(&mut out, "    ", &read.activates);
            let _ = writeln!(out, "  }}");
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);

        let _ = writeln!(out, "void {}::commit() {{", class);
        for commit in &p.commits {
            let (src, dst) = (self.field(commit.src), self.field(commit.dst));
            if self.layout().info(commit.src).len > 1 {
                let _ = writeln!(
                    out,
                    "  std::copy(std::begin({}), std::end({}), std::begin({}));",
                    dst, dst, src
                );
                self.activate(&mut out, "  ", &commit.activates);
            } else {
                let _ = writeln!(out, "  if ({} != {}) {{", src, dst);
                let _ = writeln!(out, "    {} = {};", src, dst);
                self.activate(&mut out, "    ", &commit.activates);
                let _ = writeln!(out, "  }}");
            }
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);

        let _ = writeln!(out, "void {}::eval() {{", class);
        for index in 0..p.settle {
            let _ = writeln!(
                out,
                "  if (active[{0}]) {{ active[{0}] = false; subStep{0}(); }}",
                index
            );
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);

        let _ = writeln!(out, "void {}::step() {{", class);
        let _ = writeln!(out, "  eval();");
        for (index, cluster) in p.clusters.iter().enumerate().skip(p.settle) {
            if cluster.always_active {
                let _ = writeln!(out, "  subStep{}();", index);
            } else {
                let _ = writeln!(
                    out,
                    "  if (active[{0}]) {{ active[{0}] = false; subStep{0}(); }}",
                    index
                );
            }
        }
        let _ = writeln!(out, "  writeMem();");
        let _ = writeln!(out, "  commit();");
        let _ = writeln!(out, "  cycles++;");
        let _ = writeln!(out, "}}");
        out
    }
}

/// Renders `program` as a C++ class.
pub fn emit(program: &Program) -> CppOutput {
    let emitter = Emitter {
        program,
        limit: program.layout.native_limit(),
    };
    CppOutput {
        header: emitter.header(),
        source: emitter.source(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize("top$r$next"), "top_r_next");
        assert_eq!(mask_literal(4), "0xfULL");
        assert_eq!(mask_literal(64), "0xffffffffffffffffULL");
    }
}

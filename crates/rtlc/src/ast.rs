//! Front-end syntax tree consumed by the graph builder.
//!
//! The tree mirrors a FIRRTL-style circuit after parsing: modules with
//! ports, declarations, connects and nested `when` blocks. It is produced
//! by an external front end (or built directly in code with the helper
//! constructors below) and is serde-serializable so it can be exchanged
//! as JSON.

use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    pub main: String,
    pub modules: Vec<Module>,
}

impl Circuit {
    pub fn new(main: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            modules: Vec::new(),
        }
    }

    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn find_module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub ports: Vec<Port>,
    pub body: Vec<Statement>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.ports.push(Port {
            name: name.into(),
            direction: Direction::Input,
            ty,
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.ports.push(Port {
            name: name.into(),
            direction: Direction::Output,
            ty,
        });
        self
    }

    pub fn stmt(mut self, stmt: Statement) -> Self {
        self.body.push(stmt);
        self
    }

    pub fn stmts(mut self, stmts: impl IntoIterator<Item = Statement>) -> Self {
        self.body.extend(stmts);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub direction: Direction,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    UInt(Option<usize>),
    SInt(Option<usize>),
    Clock,
    Reset,
    AsyncReset,
    Vector(Box<Type>, usize),
    Bundle(Vec<Field>),
}

impl Type {
    pub fn uint(width: usize) -> Self {
        Type::UInt(Some(width))
    }

    pub fn sint(width: usize) -> Self {
        Type::SInt(Some(width))
    }

    pub fn vector(elem: Type, len: usize) -> Self {
        Type::Vector(Box::new(elem), len)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::UInt(Some(w)) => write!(f, "UInt<{}>", w),
            Type::UInt(None) => write!(f, "UInt"),
            Type::SInt(Some(w)) => write!(f, "SInt<{}>", w),
            Type::SInt(None) => write!(f, "SInt"),
            Type::Clock => write!(f, "Clock"),
            Type::Reset => write!(f, "Reset"),
            Type::AsyncReset => write!(f, "AsyncReset"),
            Type::Vector(elem, len) => write!(f, "{}[{}]", elem, len),
            Type::Bundle(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if field.flip {
                        write!(f, "flip ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub flip: bool,
    pub ty: Type,
}

/// Position of a statement in the original source text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceInfo {
    pub file: String,
    pub line: usize,
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<SourceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegReset {
    pub signal: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemDecl {
    pub name: String,
    pub data_type: Type,
    pub depth: usize,
    pub read_latency: usize,
    pub write_latency: usize,
    #[serde(default)]
    pub readers: Vec<String>,
    #[serde(default)]
    pub writers: Vec<String>,
    #[serde(default)]
    pub readwriters: Vec<String>,
}

impl MemDecl {
    pub fn new(name: impl Into<String>, data_type: Type, depth: usize) -> Self {
        Self {
            name: name.into(),
            data_type,
            depth,
            read_latency: 0,
            write_latency: 1,
            readers: Vec::new(),
            writers: Vec::new(),
            readwriters: Vec::new(),
        }
    }

    pub fn latency(mut self, read: usize, write: usize) -> Self {
        self.read_latency = read;
        self.write_latency = write;
        self
    }

    pub fn reader(mut self, name: impl Into<String>) -> Self {
        self.readers.push(name.into());
        self
    }

    pub fn writer(mut self, name: impl Into<String>) -> Self {
        self.writers.push(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Wire {
        name: String,
        ty: Type,
    },
    Reg {
        name: String,
        ty: Type,
        clock: Expr,
        reset: Option<RegReset>,
    },
    Node {
        name: String,
        value: Expr,
    },
    Mem(MemDecl),
    Inst {
        name: String,
        module: String,
    },
    Connect {
        loc: Expr,
        value: Expr,
    },
    Invalidate {
        loc: Expr,
    },
    When {
        cond: Expr,
        then: Vec<Statement>,
        otherwise: Vec<Statement>,
    },
    Printf {
        clock: Expr,
        en: Expr,
        format: String,
        args: Vec<Expr>,
    },
    Assert {
        clock: Expr,
        pred: Expr,
        en: Expr,
        message: String,
    },
    Attach {
        exprs: Vec<Expr>,
    },
    Skip,
}

impl From<StatementKind> for Statement {
    fn from(kind: StatementKind) -> Self {
        Statement { kind, info: None }
    }
}

impl Statement {
    /// Attaches a source location used in diagnostics.
    pub fn at(mut self, file: impl Into<String>, line: usize) -> Self {
        self.info = Some(SourceInfo {
            file: file.into(),
            line,
        });
        self
    }

    pub fn wire(name: impl Into<String>, ty: Type) -> Self {
        StatementKind::Wire {
            name: name.into(),
            ty,
        }
        .into()
    }

    pub fn reg(name: impl Into<String>, ty: Type, clock: Expr) -> Self {
        StatementKind::Reg {
            name: name.into(),
            ty,
            clock,
            reset: None,
        }
        .into()
    }

    pub fn reg_with_reset(
        name: impl Into<String>,
        ty: Type,
        clock: Expr,
        signal: Expr,
        value: Expr,
    ) -> Self {
        StatementKind::Reg {
            name: name.into(),
            ty,
            clock,
            reset: Some(RegReset { signal, value }),
        }
        .into()
    }

    pub fn node(name: impl Into<String>, value: Expr) -> Self {
        StatementKind::Node {
            name: name.into(),
            value,
        }
        .into()
    }

    pub fn mem(decl: MemDecl) -> Self {
        StatementKind::Mem(decl).into()
    }

    pub fn inst(name: impl Into<String>, module: impl Into<String>) -> Self {
        StatementKind::Inst {
            name: name.into(),
            module: module.into(),
        }
        .into()
    }

    pub fn connect(loc: Expr, value: Expr) -> Self {
        StatementKind::Connect { loc, value }.into()
    }

    pub fn invalidate(loc: Expr) -> Self {
        StatementKind::Invalidate { loc }.into()
    }

    pub fn when(cond: Expr, then: Vec<Statement>, otherwise: Vec<Statement>) -> Self {
        StatementKind::When {
            cond,
            then,
            otherwise,
        }
        .into()
    }

    pub fn printf(clock: Expr, en: Expr, format: impl Into<String>, args: Vec<Expr>) -> Self {
        StatementKind::Printf {
            clock,
            en,
            format: format.into(),
            args,
        }
        .into()
    }

    pub fn assert(clock: Expr, pred: Expr, en: Expr, message: impl Into<String>) -> Self {
        StatementKind::Assert {
            clock,
            pred,
            en,
            message: message.into(),
        }
        .into()
    }

    pub fn skip() -> Self {
        StatementKind::Skip.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
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
    Pad,
    AsUInt,
    AsSInt,
    AsClock,
    AsAsyncReset,
    Shl,
    Shr,
    Dshl,
    Dshr,
    Cvt,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Andr,
    Orr,
    Xorr,
    Cat,
    Bits,
    Head,
    Tail,
}

impl PrimOp {
    /// Number of expression operands and integer parameters.
    pub fn arity(self) -> (usize, usize) {
        use PrimOp::*;
        match self {
            Add | Sub | Mul | Div | Rem | Lt | Leq | Gt | Geq | Eq | Neq | Dshl | Dshr | And
            | Or | Xor | Cat => (2, 0),
            AsUInt | AsSInt | AsClock | AsAsyncReset | Cvt | Neg | Not | Andr | Orr | Xorr => {
                (1, 0)
            }
            Pad | Shl | Shr | Head | Tail => (1, 1),
            Bits => (1, 2),
        }
    }

    pub fn name(self) -> &'static str {
        use PrimOp::*;
        match self {
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Rem => "rem",
            Lt => "lt",
            Leq => "leq",
            Gt => "gt",
            Geq => "geq",
            Eq => "eq",
            Neq => "neq",
            Pad => "pad",
            AsUInt => "asUInt",
            AsSInt => "asSInt",
            AsClock => "asClock",
            AsAsyncReset => "asAsyncReset",
            Shl => "shl",
            Shr => "shr",
            Dshl => "dshl",
            Dshr => "dshr",
            Cvt => "cvt",
            Neg => "neg",
            Not => "not",
            And => "and",
            Or => "or",
            Xor => "xor",
            Andr => "andr",
            Orr => "orr",
            Xorr => "xorr",
            Cat => "cat",
            Bits => "bits",
            Head => "head",
            Tail => "tail",
        }
    }
}

impl fmt::Display for PrimOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Ref(String),
    SubField(Box<Expr>, String),
    SubIndex(Box<Expr>, usize),
    SubAccess(Box<Expr>, Box<Expr>),
    UIntLit {
        value: BigUint,
        width: Option<usize>,
    },
    SIntLit {
        value: BigInt,
        width: Option<usize>,
    },
    Mux(Box<Expr>, Box<Expr>, Box<Expr>),
    ValidIf(Box<Expr>, Box<Expr>),
    Prim {
        op: PrimOp,
        args: Vec<Expr>,
        params: Vec<usize>,
    },
}

impl Expr {
    pub fn r(name: impl Into<String>) -> Self {
        Expr::Ref(name.into())
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        Expr::SubField(Box::new(self), name.into())
    }

    pub fn index(self, index: usize) -> Self {
        Expr::SubIndex(Box::new(self), index)
    }

    pub fn access(self, index: Expr) -> Self {
        Expr::SubAccess(Box::new(self), Box::new(index))
    }

    pub fn uint(value: u64, width: usize) -> Self {
        Expr::UIntLit {
            value: BigUint::from(value),
            width: Some(width),
        }
    }

    pub fn sint(value: i64, width: usize) -> Self {
        Expr::SIntLit {
            value: BigInt::from(value),
            width: Some(width),
        }
    }

    pub fn mux(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Mux(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn valid_if(cond: Expr, value: Expr) -> Self {
        Expr::ValidIf(Box::new(cond), Box::new(value))
    }

    pub fn prim(op: PrimOp, args: Vec<Expr>, params: Vec<usize>) -> Self {
        Expr::Prim { op, args, params }
    }

    /// Primitive operation without integer parameters.
    pub fn op(op: PrimOp, args: Vec<Expr>) -> Self {
        Expr::prim(op, args, Vec::new())
    }

    pub fn bits(self, hi: usize, lo: usize) -> Self {
        Expr::prim(PrimOp::Bits, vec![self], vec![hi, lo])
    }

    pub fn tail(self, n: usize) -> Self {
        Expr::prim(PrimOp::Tail, vec![self], vec![n])
    }
}

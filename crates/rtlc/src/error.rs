use std::fmt;
use thiserror::Error;

use crate::ast::SourceInfo;
use crate::scheduler::SchedulerError;

/// Optional source position rendered as a ` at file:line` suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location(pub Option<SourceInfo>);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(info) => write!(f, " at {}", info),
            None => Ok(()),
        }
    }
}

impl From<Option<&SourceInfo>> for Location {
    fn from(info: Option<&SourceInfo>) -> Self {
        Location(info.cloned())
    }
}

/// Malformed or unsupported input detected while building or typing the graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Unknown module `{name}`")]
    UnknownModule { name: String },

    #[error("Undeclared reference `{name}` in module `{module}`{location}")]
    UndeclaredReference {
        module: String,
        name: String,
        location: Location,
    },

    #[error("`{name}` is declared twice in module `{module}`{location}")]
    DuplicateDeclaration {
        module: String,
        name: String,
        location: Location,
    },

    #[error(
        "`{op}` expects {expected_args} operand(s) and {expected_params} parameter(s), found {found_args} and {found_params} in module `{module}`{location}"
    )]
    ArityMismatch {
        module: String,
        op: String,
        expected_args: usize,
        expected_params: usize,
        found_args: usize,
        found_params: usize,
        location: Location,
    },

    #[error("Unsupported {feature} in module `{module}`: {detail}{location}")]
    Unsupported {
        module: String,
        feature: &'static str,
        detail: String,
        location: Location,
    },

    #[error("Width of `{name}` ({ty}) in module `{module}` is not specified")]
    UnresolvedWidth {
        module: String,
        name: String,
        ty: String,
    },

    #[error("Cannot assign to `{target}` in module `{module}`: {detail}{location}")]
    InvalidLhs {
        module: String,
        target: String,
        detail: String,
        location: Location,
    },

    #[error("Index {index} out of range for `{name}` of size {size} in module `{module}`{location}")]
    IndexOutOfRange {
        module: String,
        name: String,
        index: usize,
        size: usize,
        location: Location,
    },

    #[error("Literal {value} does not fit in {width} bit(s) in module `{module}`{location}")]
    InvalidLiteral {
        module: String,
        value: String,
        width: usize,
        location: Location,
    },

    #[error("Invalid parameter for `{op}` on a {width}-bit operand: {detail}")]
    InvalidParameter {
        op: String,
        width: usize,
        detail: String,
    },

    #[error("Result of `{op}` would be {width} bits wide")]
    WidthOverflow { op: String, width: usize },
}

/// Violated optimizer invariant. Always a compiler bug.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("Internal error: `when` with two empty branches in `{node}`")]
    EmptyWhen { node: String },

    #[error("Internal error: `{node}` indexed with {found} dimension(s), declared {expected}")]
    IndexDepth {
        node: String,
        expected: usize,
        found: usize,
    },

    #[error("Internal error: unassigned path reaches expression context in `{node}`")]
    UnexpectedEmpty { node: String },

    #[error("Internal error: `{node}` has no synthesized value")]
    MissingValue { node: String },

    #[error("Internal error: `{node}` has {count} assignment trees after flattening")]
    MultipleAssignments { node: String, count: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Internal(#[from] InternalError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

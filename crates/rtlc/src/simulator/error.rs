use thiserror::Error;

use crate::error::CompileError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulatorError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("No port named `{name}`")]
    UnknownSignal { name: String },
    #[error("`{name}` is not an input port")]
    NotAnInput { name: String },
    #[error("`{name}` is not an output port")]
    NotAnOutput { name: String },
    #[error("Assertion failed at cycle {cycle}: {message}")]
    AssertionFailed { message: String, cycle: u64 },
    #[error("Value does not fit in {width}-bit input `{name}`")]
    ValueTooWide { name: String, width: usize },
}

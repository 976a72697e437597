//! Compiler from RTL circuit graphs to cycle-accurate simulators.
//!
//! A front-end [`ast::Circuit`] is flattened into a node graph, typed,
//! optimized, scheduled into activation clusters and lowered to a step
//! [`Program`]. The program runs in the bundled [`Simulator`] or is rendered
//! as C++ with [`codegen::cpp::emit`].

pub mod ast;
pub mod builder;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod debug;
pub mod error;
pub mod ir;
pub mod optimizer;
pub mod reset;
pub mod scheduler;
pub mod simulator;
pub mod synth;
pub mod value;
pub mod width;

pub(crate) use fxhash::FxHashMap as HashMap;
pub(crate) use fxhash::FxHashSet as HashSet;

pub use codegen::Program;
pub use codegen::cpp::CppOutput;
pub use compiler::{compile, compile_with_trace};
pub use config::{CompileOptions, ConfigError};
pub use debug::{CompilationTrace, CompilationTraceResult, TraceOptions};
pub use error::{BuildError, CompileError, InternalError};
pub use scheduler::SchedulerError;
pub use simulator::{InputHandle, OutputHandle, Simulator, SimulatorBuilder, SimulatorError};
pub use value::Value;

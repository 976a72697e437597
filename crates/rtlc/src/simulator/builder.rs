use super::{Simulator, SimulatorError};
use crate::ast::Circuit;
use crate::compiler::compile_with_trace;
use crate::config::CompileOptions;
use crate::debug::{CompilationTrace, CompilationTraceResult, TraceOptions};

/// A fluent builder that compiles a [`Circuit`] into a [`Simulator`].
pub struct SimulatorBuilder<'a> {
    circuit: &'a Circuit,
    options: CompileOptions,
    trace: TraceOptions,
}

impl<'a> SimulatorBuilder<'a> {
    pub fn new(circuit: &'a Circuit) -> Self {
        Self {
            circuit,
            options: CompileOptions::default(),
            trace: TraceOptions::default(),
        }
    }

    /// Replaces every compile option at once.
    pub fn options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Enable or disable the graph optimization passes.
    pub fn optimize(mut self, enable: bool) -> Self {
        self.options.optimize = enable;
        self
    }

    pub fn max_cluster_size(mut self, size: usize) -> Self {
        self.options.max_cluster_size = size;
        self
    }

    /// Allow registers to be updated in place when no reader observes the
    /// new value early.
    pub fn merge_registers(mut self, enable: bool) -> Self {
        self.options.merge_registers = enable;
        self
    }

    pub fn split_registers(mut self, enable: bool) -> Self {
        self.options.split_registers = enable;
        self
    }

    pub fn wide_threshold(mut self, width: usize) -> Self {
        self.options.wide_threshold = width;
        self
    }

    /// Configure compilation tracing options.
    pub fn trace(mut self, trace: TraceOptions) -> Self {
        self.trace = trace;
        self
    }

    pub fn trace_scheduled_graph(mut self) -> Self {
        self.trace.scheduled_graph = true;
        self
    }

    pub fn trace_program(mut self) -> Self {
        self.trace.program = true;
        self
    }

    pub fn trace_cpp(mut self) -> Self {
        self.trace.cpp = true;
        self
    }

    pub fn trace_on_build(mut self) -> Self {
        self.trace.output_to_stdout = true;
        self
    }

    pub fn build(self) -> Result<Simulator, SimulatorError> {
        let program = compile_with_trace(self.circuit, &self.options, &self.trace, None)?;
        Ok(Simulator::new(program))
    }

    /// Like [`build`](Self::build), also returning the stages selected with
    /// the `trace_*` methods.
    pub fn build_with_trace(self) -> CompilationTraceResult {
        let mut trace = CompilationTrace::default();
        let res = compile_with_trace(self.circuit, &self.options, &self.trace, Some(&mut trace))
            .map(Simulator::new)
            .map_err(SimulatorError::from);
        if self.trace.output_to_stdout {
            trace.print();
        }
        CompilationTraceResult { res, trace }
    }
}

//! The compilation pipeline from syntax tree to step program.

use log::info;

use crate::ast::Circuit;
use crate::builder::build_graph;
use crate::codegen::{self, Program};
use crate::config::CompileOptions;
use crate::debug::{CompilationTrace, TraceOptions};
use crate::error::CompileError;
use crate::ir::Graph;
use crate::optimizer::optimize;
use crate::reset::analyze_resets;
use crate::scheduler::schedule;
use crate::synth::synthesize;
use crate::width::infer_widths;

fn capture(
    trace: &mut Option<&mut CompilationTrace>,
    enabled: bool,
    graph: &Graph,
    stage: impl FnOnce(&mut CompilationTrace) -> &mut Option<String>,
) {
    if let (true, Some(t)) = (enabled, trace.as_deref_mut()) {
        *stage(t) = Some(graph.to_string());
    }
}

/// Compiles `circuit`, recording the stages selected by `trace_opts` into
/// `trace`.
pub fn compile_with_trace(
    circuit: &Circuit,
    options: &CompileOptions,
    trace_opts: &TraceOptions,
    mut trace: Option<&mut CompilationTrace>,
) -> Result<Program, CompileError> {
    let mut graph = build_graph(circuit)?;
    capture(&mut trace, trace_opts.built_graph, &graph, |t| &mut t.built_graph);

    infer_widths(&mut graph)?;
    let resets = analyze_resets(&mut graph)?;
    info!(
        "resets: {} sync, {} async, {} removed",
        resets.sync, resets.asynchronous, resets.removed
    );
    capture(&mut trace, trace_opts.typed_graph, &graph, |t| &mut t.typed_graph);

    if options.optimize {
        optimize(&mut graph, options)?;
    }
    capture(&mut trace, trace_opts.optimized_graph, &graph, |t| &mut t.optimized_graph);

    let summary = schedule(&mut graph, options)?;
    info!(
        "{} clusters, {} arrays split",
        summary.clusters, summary.arrays_split
    );
    capture(&mut trace, trace_opts.scheduled_graph, &graph, |t| &mut t.scheduled_graph);

    let synth = synthesize(&mut graph)?;
    capture(&mut trace, trace_opts.synthesized_graph, &graph, |t| &mut t.synthesized_graph);

    let program = codegen::generate(&graph, &synth, options)?;
    if let Some(t) = trace {
        if trace_opts.program {
            t.program = Some(program.to_string());
        }
        if trace_opts.cpp {
            t.cpp = Some(codegen::cpp::emit(&program));
        }
    }
    Ok(program)
}

pub fn compile(circuit: &Circuit, options: &CompileOptions) -> Result<Program, CompileError> {
    compile_with_trace(circuit, options, &TraceOptions::default(), None)
}

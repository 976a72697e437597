//! Structural passes over the graph IR.

use log::debug;

use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::ir::Graph;

pub mod alias;
pub mod dead;
pub mod split_reg;
pub mod tree_opt;

pub trait GraphPass {
    fn name(&self) -> &'static str;
    /// Returns whether the graph changed.
    fn run(&self, graph: &mut Graph, options: &CompileOptions) -> Result<bool, CompileError>;
}

#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: GraphPass + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    pub fn run(&self, graph: &mut Graph, options: &CompileOptions) -> Result<bool, CompileError> {
        let mut changed = false;
        for pass in &self.passes {
            let before = graph.live_count();
            let pass_changed = pass.run(graph, options)?;
            debug!(
                "{}: changed={} live {} -> {}",
                pass.name(),
                pass_changed,
                before,
                graph.live_count()
            );
            changed |= pass_changed;
        }
        Ok(changed)
    }
}

/// The default pipeline: dead nodes, simplification, aliases, register
/// splitting, then another simplification and dead-node sweep.
pub fn optimize(graph: &mut Graph, options: &CompileOptions) -> Result<bool, CompileError> {
    let mut manager = PassManager::new();
    manager.add_pass(dead::DeadNodeElimination);
    manager.add_pass(tree_opt::TreeSimplify);
    manager.add_pass(alias::AliasAnalysis);
    if options.split_registers {
        manager.add_pass(split_reg::SplitRegisters);
    }
    manager.add_pass(tree_opt::TreeSimplify);
    manager.add_pass(dead::DeadNodeElimination);
    manager.run(graph, options)
}

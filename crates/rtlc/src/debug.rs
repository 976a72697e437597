use crate::simulator::{Simulator, SimulatorError};

/// Which intermediate forms to capture while compiling.
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    /// Graph straight out of the builder, before width inference.
    pub built_graph: bool,
    pub typed_graph: bool,
    pub optimized_graph: bool,
    pub scheduled_graph: bool,
    pub synthesized_graph: bool,
    pub program: bool,
    pub cpp: bool,
    pub output_to_stdout: bool,
}

impl TraceOptions {
    /// Enables the graph dump named `stage`. Returns false for an unknown name.
    pub fn enable(&mut self, stage: &str) -> bool {
        let flag = match stage {
            "built" => &mut self.built_graph,
            "typed" => &mut self.typed_graph,
            "optimized" => &mut self.optimized_graph,
            "scheduled" => &mut self.scheduled_graph,
            "synthesized" => &mut self.synthesized_graph,
            "program" => &mut self.program,
            "cpp" => &mut self.cpp,
            _ => return false,
        };
        *flag = true;
        true
    }

    pub fn any(&self) -> bool {
        self.built_graph
            || self.typed_graph
            || self.optimized_graph
            || self.scheduled_graph
            || self.synthesized_graph
            || self.program
            || self.cpp
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompilationTrace {
    pub built_graph: Option<String>,
    pub typed_graph: Option<String>,
    pub optimized_graph: Option<String>,
    pub scheduled_graph: Option<String>,
    pub synthesized_graph: Option<String>,
    pub program: Option<String>,
    pub cpp: Option<crate::codegen::cpp::CppOutput>,
}

impl CompilationTrace {
    /// Captured sections in pipeline order, with their titles.
    pub fn sections(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        let graphs = [
            ("Built graph", &self.built_graph),
            ("Typed graph", &self.typed_graph),
            ("Optimized graph", &self.optimized_graph),
            ("Scheduled graph", &self.scheduled_graph),
            ("Synthesized graph", &self.synthesized_graph),
            ("Step program", &self.program),
        ];
        for (title, text) in graphs {
            if let Some(text) = text {
                out.push((title, text.clone()));
            }
        }
        if let Some(cpp) = &self.cpp {
            out.push(("C++ header", cpp.header.clone()));
            out.push(("C++ source", cpp.source.clone()));
        }
        out
    }

    pub fn print(&self) {
        for (title, text) in self.sections() {
            println!("=== {} ===\n{}", title, text);
        }
    }
}

pub struct CompilationTraceResult {
    pub res: Result<Simulator, SimulatorError>,
    pub trace: CompilationTrace,
}

impl CompilationTraceResult {
    pub fn expect(self, msg: &str) -> Simulator {
        match self.res {
            Ok(sim) => sim,
            Err(err) => {
                self.trace.print();
                panic!("{}: {:?}", msg, err);
            }
        }
    }

    pub fn unwrap(self) -> Simulator {
        match self.res {
            Ok(sim) => sim,
            Err(err) => {
                self.trace.print();
                panic!("{:?}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_enabled_by_name() {
        let mut opts = TraceOptions::default();
        assert!(!opts.any());
        assert!(opts.enable("scheduled"));
        assert!(!opts.enable("parsed"));
        assert!(opts.scheduled_graph && opts.any());
    }
}

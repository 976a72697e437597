use insta::assert_snapshot;
use rtlc::ast::{Circuit, Expr, Module, PrimOp, Statement, Type};
use rtlc::{Simulator, TraceOptions};

fn passthrough() -> Circuit {
    Circuit::new("Top").module(
        Module::new("Top")
            .input("a", Type::uint(8))
            .output("b", Type::uint(8))
            .stmt(Statement::connect(Expr::r("b"), Expr::r("a"))),
    )
}

#[test]
fn test_program_trace_of_alias() {
    let circuit = passthrough();
    let result = Simulator::builder(&circuit).trace_program().build_with_trace();
    let trace = result.trace;
    result.res.expect("build should succeed");

    let program = trace.program.expect("program should be captured");
    assert_snapshot!(program, @r"
    program Top {
      output b = a
    }
    ");
    assert!(trace.scheduled_graph.is_none());
    assert!(trace.cpp.is_none());
}

#[test]
fn test_trace_is_kept_on_error() {
    let circuit = Circuit::new("Loop").module(
        Module::new("Loop")
            .output("o", Type::uint(1))
            .stmt(Statement::wire("x", Type::uint(1)))
            .stmt(Statement::connect(Expr::r("x"), Expr::op(PrimOp::Not, vec![Expr::r("x")])))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("x"))),
    );
    let options = TraceOptions {
        built_graph: true,
        typed_graph: true,
        program: true,
        ..TraceOptions::default()
    };
    let result = Simulator::builder(&circuit).trace(options).build_with_trace();
    assert!(result.res.is_err());

    let typed = result.trace.typed_graph.expect("typed graph should be captured");
    assert!(typed.starts_with("graph Loop {"), "{}", typed);
    assert!(typed.contains("x"));
    assert!(result.trace.built_graph.is_some());
    assert!(result.trace.program.is_none());
}

#[test]
fn test_sections_follow_pipeline_order() {
    let circuit = passthrough();
    let mut options = TraceOptions::default();
    for stage in ["cpp", "scheduled", "built"] {
        assert!(options.enable(stage));
    }
    assert!(!options.enable("parsed"));

    let result = Simulator::builder(&circuit).trace(options).build_with_trace();
    let titles: Vec<&str> = result.trace.sections().into_iter().map(|(t, _)| t).collect();
    assert_eq!(
        titles,
        vec!["Built graph", "Scheduled graph", "C++ header", "C++ source"]
    );
    let sim = result.unwrap();
    assert_eq!(sim.cycles(), 0);
}

#[test]
fn test_cpp_exposes_ports() {
    let circuit = Circuit::new("Acc").module(
        Module::new("Acc")
            .input("clock", Type::Clock)
            .input("inc", Type::uint(8))
            .output("total", Type::uint(8))
            .stmt(Statement::reg("acc", Type::uint(8), Expr::r("clock")))
            .stmt(Statement::connect(
                Expr::r("acc"),
                Expr::op(PrimOp::Add, vec![Expr::r("acc"), Expr::r("inc")]).tail(1),
            ))
            .stmt(Statement::connect(Expr::r("total"), Expr::r("acc"))),
    );
    let result = Simulator::builder(&circuit).trace_cpp().build_with_trace();
    let cpp = result.trace.cpp.clone().expect("cpp should be captured");
    assert!(cpp.header.contains("class SAcc"), "{}", cpp.header);
    assert!(cpp.header.contains("set_inc"));
    assert!(cpp.header.contains("get_total"));
    assert!(cpp.source.contains("step"));

    let mut sim = result.expect("build should succeed");
    let inc = sim.input("inc").unwrap();
    let total = sim.output("total").unwrap();
    sim.set(inc, 100u8).unwrap();
    sim.step_n(3).unwrap();
    assert_eq!(sim.get_u64(total).unwrap(), 44);
}

use insta::assert_snapshot;
use rtlc::ast::{Circuit, Expr, MemDecl, Module, PrimOp, Statement, Type};
use rtlc::{BuildError, CompileError, SchedulerError, Simulator, SimulatorError};

fn passthrough() -> Circuit {
    Circuit::new("Top").module(
        Module::new("Top")
            .input("a", Type::uint(4))
            .output("o", Type::uint(4))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("a"))),
    )
}

#[test]
fn test_combinational_loop_is_fatal() {
    let circuit = Circuit::new("Loop").module(
        Module::new("Loop")
            .output("o", Type::uint(1))
            .stmt(Statement::wire("x", Type::uint(1)))
            .stmt(Statement::wire("y", Type::uint(1)))
            .stmt(Statement::connect(Expr::r("x"), Expr::op(PrimOp::Not, vec![Expr::r("y")])))
            .stmt(Statement::connect(Expr::r("y"), Expr::r("x")))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("x"))),
    );
    for optimize in [true, false] {
        let err = Simulator::builder(&circuit).optimize(optimize).build().unwrap_err();
        match err {
            SimulatorError::Compile(CompileError::Scheduler(SchedulerError::CombinationalLoop {
                nodes,
            })) => assert!(nodes.iter().any(|n| n == "x"), "{:?}", nodes),
            other => panic!("expected a combinational loop, got {:?}", other),
        }
    }
}

#[test]
fn test_unknown_and_misdirected_ports() {
    let sim = Simulator::builder(&passthrough()).build().unwrap();
    assert_eq!(
        sim.input("nope").unwrap_err(),
        SimulatorError::UnknownSignal {
            name: "nope".to_owned()
        }
    );
    assert_eq!(
        sim.input("o").unwrap_err(),
        SimulatorError::NotAnInput {
            name: "o".to_owned()
        }
    );
    assert_eq!(
        sim.output("a").unwrap_err(),
        SimulatorError::NotAnOutput {
            name: "a".to_owned()
        }
    );
}

#[test]
fn test_value_too_wide_is_rejected() {
    let mut sim = Simulator::builder(&passthrough()).build().unwrap();
    let a = sim.input("a").unwrap();
    let o = sim.output("o").unwrap();
    sim.set(a, 15u8).unwrap();
    let err = sim.set(a, 16u8).unwrap_err();
    assert_snapshot!(err.to_string(), @"Value does not fit in 4-bit input `a`");
    // The rejected write leaves the previous value in place.
    assert_eq!(sim.get_u64(o).unwrap(), 15);
}

#[test]
fn test_unknown_top_module() {
    let circuit = Circuit::new("Missing").module(Module::new("Top"));
    let err = Simulator::builder(&circuit).build().unwrap_err();
    assert!(matches!(
        err,
        SimulatorError::Compile(CompileError::Build(BuildError::UnknownModule { name })) if name == "Missing"
    ));
}

#[test]
fn test_undeclared_reference_message() {
    let circuit = Circuit::new("Top").module(
        Module::new("Top")
            .output("o", Type::uint(1))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("missing")).at("top.fir", 7)),
    );
    let err = Simulator::builder(&circuit).build().unwrap_err();
    assert_snapshot!(err.to_string(), @"Undeclared reference `missing` in module `Top` at top.fir:7");
}

#[test]
fn test_duplicate_declaration() {
    let circuit = Circuit::new("Top").module(
        Module::new("Top")
            .stmt(Statement::wire("w", Type::uint(1)))
            .stmt(Statement::wire("w", Type::uint(2))),
    );
    let err = Simulator::builder(&circuit).build().unwrap_err();
    assert!(matches!(
        err,
        SimulatorError::Compile(CompileError::Build(BuildError::DuplicateDeclaration { name, .. })) if name == "w"
    ));
}

#[test]
fn test_unsupported_memory_shapes() {
    let with = |decl: MemDecl| {
        Circuit::new("Top").module(Module::new("Top").stmt(Statement::mem(decl)))
    };
    let cases = [
        MemDecl::new("slow", Type::uint(8), 4).latency(2, 1).reader("r"),
        MemDecl::new("late", Type::uint(8), 4).latency(1, 2).writer("w"),
        MemDecl::new("empty", Type::uint(8), 0).latency(1, 1).reader("r"),
    ];
    for decl in cases {
        let name = decl.name.clone();
        let err = Simulator::builder(&with(decl)).build().unwrap_err();
        assert!(
            matches!(
                err,
                SimulatorError::Compile(CompileError::Build(BuildError::Unsupported { .. }))
            ),
            "{}: {:?}",
            name,
            err
        );
    }
}

#[test]
fn test_out_of_range_static_index() {
    let circuit = Circuit::new("Top").module(
        Module::new("Top")
            .input("a", Type::uint(4))
            .stmt(Statement::wire("v", Type::vector(Type::uint(4), 2)))
            .stmt(Statement::connect(Expr::r("v").index(2), Expr::r("a"))),
    );
    let err = Simulator::builder(&circuit).build().unwrap_err();
    assert!(matches!(
        err,
        SimulatorError::Compile(CompileError::Build(BuildError::IndexOutOfRange { index: 2, size: 2, .. }))
    ));
}

#[test]
fn test_config_rejects_unknown_keys() {
    let err = rtlc::CompileOptions::from_toml_str("optimise = true").unwrap_err();
    assert!(err.to_string().contains("optimise"), "{}", err);
    let options = rtlc::CompileOptions::from_toml_str("merge_registers = false").unwrap();
    assert!(!options.merge_registers);
    assert!(options.optimize);
}

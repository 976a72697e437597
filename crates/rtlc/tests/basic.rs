use num_bigint::{BigInt, BigUint};
use num_traits::One;
use rtlc::Simulator;
use rtlc::ast::{Circuit, Expr, Module, PrimOp, Statement, Type};
use rtlc::codegen::Expr as ProgramExpr;
use test_case::test_case;

fn top(module: Module) -> Circuit {
    Circuit::new(module.name.clone()).module(module)
}

#[test]
fn test_simple_assignment() {
    let circuit = top(
        Module::new("Top")
            .input("a", Type::uint(32))
            .output("b", Type::uint(32))
            .stmt(Statement::connect(Expr::r("b"), Expr::r("a"))),
    );
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let a = sim.input("a").unwrap();
    let b = sim.output("b").unwrap();

    sim.set(a, 0xDEADBEEFu32).unwrap();
    assert_eq!(sim.get_u64(b).unwrap(), 0xDEADBEEF);
}

#[test]
fn test_dependency_chain() {
    // Wires declared in reverse dependency order.
    let circuit = top(
        Module::new("Top")
            .input("a", Type::uint(16))
            .output("o", Type::uint(17))
            .stmt(Statement::wire("c", Type::uint(17)))
            .stmt(Statement::wire("b", Type::uint(16)))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("c")))
            .stmt(Statement::connect(
                Expr::r("c"),
                Expr::op(PrimOp::Add, vec![Expr::r("b"), Expr::uint(1, 16)]),
            ))
            .stmt(Statement::connect(Expr::r("b"), Expr::r("a"))),
    );
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let a = sim.input("a").unwrap();
    let o = sim.output("o").unwrap();

    sim.set(a, 0xFFFFu32).unwrap();
    assert_eq!(sim.get_u64(o).unwrap(), 0x10000);
    sim.set(a, 41u32).unwrap();
    assert_eq!(sim.get_u64(o).unwrap(), 42);
}

#[test_case(true; "optimized")]
#[test_case(false; "plain")]
fn test_ports_read_later_nodes(optimize: bool) {
    // `out` and `w` are declared before the nodes they read.
    let circuit = top(
        Module::new("Top")
            .input("a", Type::uint(8))
            .output("out", Type::uint(10))
            .output("w_out", Type::uint(9))
            .stmt(Statement::wire("w", Type::uint(9)))
            .stmt(Statement::node(
                "n",
                Expr::op(PrimOp::Add, vec![Expr::r("a"), Expr::uint(1, 1)]),
            ))
            .stmt(Statement::node(
                "m",
                Expr::op(PrimOp::Add, vec![Expr::r("n"), Expr::uint(1, 1)]),
            ))
            .stmt(Statement::connect(Expr::r("w"), Expr::r("n")))
            .stmt(Statement::connect(Expr::r("w_out"), Expr::r("w")))
            .stmt(Statement::connect(Expr::r("out"), Expr::r("m"))),
    );
    let mut sim = Simulator::builder(&circuit).optimize(optimize).build().unwrap();
    let a = sim.input("a").unwrap();
    let out = sim.output("out").unwrap();
    let w_out = sim.output("w_out").unwrap();

    sim.set(a, 41u8).unwrap();
    assert_eq!(sim.get_u64(w_out).unwrap(), 42);
    assert_eq!(sim.get_u64(out).unwrap(), 43);
    sim.set(a, 255u8).unwrap();
    assert_eq!(sim.get_u64(w_out).unwrap(), 256);
    assert_eq!(sim.get_u64(out).unwrap(), 257);
}

#[test]
fn test_constant_select_folds_to_alias() {
    let circuit = top(
        Module::new("Top")
            .input("a", Type::uint(8))
            .input("b", Type::uint(8))
            .output("out", Type::uint(8))
            .stmt(Statement::node("sel", Expr::uint(1, 1)))
            .stmt(Statement::node(
                "inverted_b",
                Expr::op(PrimOp::Not, vec![Expr::r("b")]),
            ))
            .stmt(Statement::connect(
                Expr::r("out"),
                Expr::mux(Expr::r("sel"), Expr::r("a"), Expr::r("inverted_b")),
            )),
    );
    let program = rtlc::compile(&circuit, &rtlc::CompileOptions::default()).unwrap();
    let out = &program.outputs[program.output("out").unwrap()];
    match &out.value {
        ProgramExpr::Read { src, .. } => assert_eq!(program.layout.info(*src).name, "a"),
        other => panic!("expected a direct read of `a`, found {:?}", other),
    }
    assert!(!program.to_string().contains("inverted_b"));
    let cpp = rtlc::codegen::cpp::emit(&program);
    assert!(!cpp.source.contains("inverted_b"));
    assert!(!cpp.header.contains("inverted_b"));

    let mut sim = Simulator::new(program);
    let a = sim.input("a").unwrap();
    let b = sim.input("b").unwrap();
    let out = sim.output("out").unwrap();
    sim.set(a, 0x5Au8).unwrap();
    sim.set(b, 0x0Fu8).unwrap();
    assert_eq!(sim.get_u64(out).unwrap(), 0x5A);
}

#[test]
fn test_last_connect_wins() {
    let circuit = top(
        Module::new("Top")
            .input("a", Type::uint(8))
            .input("b", Type::uint(8))
            .input("c", Type::uint(1))
            .output("o", Type::uint(8))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("a")))
            .stmt(Statement::when(
                Expr::r("c"),
                vec![Statement::connect(Expr::r("o"), Expr::r("b"))],
                vec![],
            )),
    );
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let a = sim.input("a").unwrap();
    let b = sim.input("b").unwrap();
    let c = sim.input("c").unwrap();
    let o = sim.output("o").unwrap();

    sim.set(a, 1u8).unwrap();
    sim.set(b, 2u8).unwrap();
    assert_eq!(sim.get_u64(o).unwrap(), 1);
    sim.set(c, 1u8).unwrap();
    assert_eq!(sim.get_u64(o).unwrap(), 2);
    sim.set(c, 0u8).unwrap();
    assert_eq!(sim.get_u64(o).unwrap(), 1);
}

#[test]
fn test_nested_when_priority() {
    let circuit = top(
        Module::new("Top")
            .input("x", Type::uint(1))
            .input("y", Type::uint(1))
            .output("o", Type::uint(2))
            .stmt(Statement::when(
                Expr::r("x"),
                vec![Statement::when(
                    Expr::r("y"),
                    vec![Statement::connect(Expr::r("o"), Expr::uint(3, 2))],
                    vec![Statement::connect(Expr::r("o"), Expr::uint(2, 2))],
                )],
                vec![Statement::connect(Expr::r("o"), Expr::uint(1, 2))],
            )),
    );
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let x = sim.input("x").unwrap();
    let y = sim.input("y").unwrap();
    let o = sim.output("o").unwrap();

    for (xv, yv, expected) in [(0u8, 0u8, 1), (0, 1, 1), (1, 0, 2), (1, 1, 3)] {
        sim.set(x, xv).unwrap();
        sim.set(y, yv).unwrap();
        assert_eq!(sim.get_u64(o).unwrap(), expected, "x={} y={}", xv, yv);
    }
}

#[test]
fn test_instance_ports_are_connected() {
    let inner = Module::new("Inc")
        .input("i", Type::uint(8))
        .output("o", Type::uint(8))
        .stmt(Statement::connect(
            Expr::r("o"),
            Expr::op(PrimOp::Add, vec![Expr::r("i"), Expr::uint(1, 8)]).tail(1),
        ));
    let outer = Module::new("Top")
        .input("a", Type::uint(8))
        .output("b", Type::uint(8))
        .stmt(Statement::inst("u0", "Inc"))
        .stmt(Statement::inst("u1", "Inc"))
        .stmt(Statement::connect(Expr::r("u0").field("i"), Expr::r("a")))
        .stmt(Statement::connect(Expr::r("u1").field("i"), Expr::r("u0").field("o")))
        .stmt(Statement::connect(Expr::r("b"), Expr::r("u1").field("o")));
    let circuit = Circuit::new("Top").module(outer).module(inner);

    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let a = sim.input("a").unwrap();
    let b = sim.output("b").unwrap();
    sim.set(a, 10u8).unwrap();
    assert_eq!(sim.get_u64(b).unwrap(), 12);
    sim.set(a, 255u8).unwrap();
    assert_eq!(sim.get_u64(b).unwrap(), 1);
}

#[test]
fn test_wide_addition() {
    let circuit = top(
        Module::new("Top")
            .input("a", Type::uint(100))
            .input("b", Type::uint(100))
            .output("o", Type::uint(101))
            .stmt(Statement::connect(
                Expr::r("o"),
                Expr::op(PrimOp::Add, vec![Expr::r("a"), Expr::r("b")]),
            )),
    );
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let a = sim.input("a").unwrap();
    let b = sim.input("b").unwrap();
    let o = sim.output("o").unwrap();

    sim.set(a, BigUint::one() << 99).unwrap();
    sim.set(b, (BigUint::one() << 99) + 5u32).unwrap();
    let value = sim.get(o).unwrap();
    assert_eq!(value.width, 101);
    assert_eq!(value.bits, (BigUint::one() << 100) + 5u32);
}

#[test]
fn test_vector_elements_route_independently() {
    let circuit = top(
        Module::new("Top")
            .input("a", Type::uint(4))
            .input("b", Type::uint(4))
            .input("sel", Type::uint(1))
            .output("o", Type::uint(4))
            .stmt(Statement::wire("v", Type::vector(Type::uint(4), 2)))
            .stmt(Statement::connect(Expr::r("v").index(0), Expr::r("a")))
            .stmt(Statement::connect(Expr::r("v").index(1), Expr::r("b")))
            .stmt(Statement::connect(Expr::r("o"), Expr::r("v").access(Expr::r("sel")))),
    );
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let a = sim.input("a").unwrap();
    let b = sim.input("b").unwrap();
    let sel = sim.input("sel").unwrap();
    let o = sim.output("o").unwrap();

    sim.set(a, 3u8).unwrap();
    sim.set(b, 9u8).unwrap();
    assert_eq!(sim.get_u64(o).unwrap(), 3);
    sim.set(sel, 1u8).unwrap();
    assert_eq!(sim.get_u64(o).unwrap(), 9);
}

#[test]
fn test_circuit_survives_json() {
    let circuit = top(
        Module::new("Top")
            .input("a", Type::sint(8))
            .output("o", Type::sint(9))
            .stmt(Statement::connect(
                Expr::r("o"),
                Expr::op(PrimOp::Sub, vec![Expr::r("a"), Expr::sint(-1, 2)]),
            )),
    );
    let text = circuit.to_json().unwrap();
    let parsed = Circuit::from_json(&text).unwrap();
    assert_eq!(parsed, circuit);

    let mut sim = Simulator::builder(&parsed).build().unwrap();
    let a = sim.input("a").unwrap();
    let o = sim.output("o").unwrap();
    // -128 - (-1) = -127
    sim.set(a, 0x80u8).unwrap();
    let value = sim.get(o).unwrap();
    assert_eq!(value.to_int(), BigInt::from(-127));
}

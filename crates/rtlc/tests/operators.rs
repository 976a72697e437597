use num_bigint::BigInt;
use proptest::prelude::*;
use rtlc::Simulator;
use rtlc::ast::{Circuit, Expr, Module, PrimOp, Statement, Type};
use test_case::test_case;

/// `o = op(a, b)` over two operands of type `operand`, with `o` of type `result`.
fn binary(op: PrimOp, operand: Type, b_type: Type, result: Type) -> Circuit {
    Circuit::new("Top").module(
        Module::new("Top")
            .input("a", operand)
            .input("b", b_type)
            .output("o", result)
            .stmt(Statement::connect(
                Expr::r("o"),
                Expr::op(op, vec![Expr::r("a"), Expr::r("b")]),
            )),
    )
}

fn run_binary(circuit: &Circuit, a: u64, b: u64) -> rtlc::Value {
    let mut sim = Simulator::builder(circuit).build().unwrap();
    let ia = sim.input("a").unwrap();
    let ib = sim.input("b").unwrap();
    let o = sim.output("o").unwrap();
    sim.set(ia, a).unwrap();
    sim.set(ib, b).unwrap();
    sim.get(o).unwrap()
}

#[test_case(PrimOp::Add, 200, 100, 9 => 300; "add")]
#[test_case(PrimOp::Sub, 5, 7, 9 => 510; "sub wraps")]
#[test_case(PrimOp::Mul, 255, 255, 16 => 65025; "mul")]
#[test_case(PrimOp::Div, 200, 7, 8 => 28; "div")]
#[test_case(PrimOp::Div, 200, 0, 8 => 0; "div by zero")]
#[test_case(PrimOp::Rem, 200, 7, 8 => 4; "rem")]
#[test_case(PrimOp::Lt, 3, 4, 1 => 1; "lt")]
#[test_case(PrimOp::Geq, 3, 4, 1 => 0; "geq")]
#[test_case(PrimOp::Eq, 9, 9, 1 => 1; "eq")]
#[test_case(PrimOp::Neq, 9, 9, 1 => 0; "neq")]
#[test_case(PrimOp::And, 0xF0, 0x3C, 8 => 0x30; "and")]
#[test_case(PrimOp::Or, 0xF0, 0x3C, 8 => 0xFC; "or")]
#[test_case(PrimOp::Xor, 0xF0, 0x3C, 8 => 0xCC; "xor")]
#[test_case(PrimOp::Cat, 0x12, 0x34, 16 => 0x1234; "cat")]
#[test_case(PrimOp::Dshr, 0x80, 3, 8 => 0x10; "dshr")]
fn test_unsigned_binary(op: PrimOp, a: u64, b: u64, width: usize) -> u64 {
    let circuit = binary(op, Type::uint(8), Type::uint(8), Type::uint(width));
    let value = run_binary(&circuit, a, b);
    assert_eq!(value.width, width);
    value.to_u64().unwrap()
}

#[test_case(PrimOp::Add, -100, -100, 9 => -200; "add")]
#[test_case(PrimOp::Sub, -128, 127, 9 => -255; "sub")]
#[test_case(PrimOp::Mul, -128, -128, 16 => 16384; "mul")]
#[test_case(PrimOp::Div, -7, 2, 9 => -3; "div truncates")]
#[test_case(PrimOp::Rem, -7, 2, 8 => -1; "rem keeps dividend sign")]
fn test_signed_binary(op: PrimOp, a: i64, b: i64, width: usize) -> i64 {
    let circuit = binary(op, Type::sint(8), Type::sint(8), Type::sint(width));
    let bits = |v: i64| (v as u64) & 0xFF;
    let value = run_binary(&circuit, bits(a), bits(b));
    i64::try_from(value.to_int()).unwrap()
}

#[test]
fn test_signed_comparison() {
    let circuit = binary(PrimOp::Lt, Type::sint(8), Type::sint(8), Type::uint(1));
    // -1 < 1
    assert_eq!(run_binary(&circuit, 0xFF, 0x01).to_u64(), Some(1));
    let circuit = binary(PrimOp::Lt, Type::uint(8), Type::uint(8), Type::uint(1));
    assert_eq!(run_binary(&circuit, 0xFF, 0x01).to_u64(), Some(0));
}

#[test]
fn test_signed_shift_is_arithmetic() {
    let circuit = binary(PrimOp::Dshr, Type::sint(8), Type::uint(3), Type::sint(8));
    let value = run_binary(&circuit, 0x80, 3);
    assert_eq!(value.to_int(), BigInt::from(-16));
}

#[test]
fn test_unary_operators() {
    let circuit = Circuit::new("Top").module(
        Module::new("Top")
            .input("a", Type::uint(8))
            .output("not_a", Type::uint(8))
            .output("orr", Type::uint(1))
            .output("andr", Type::uint(1))
            .output("xorr", Type::uint(1))
            .output("head", Type::uint(3))
            .output("slice", Type::uint(4))
            .output("neg", Type::sint(9))
            .stmts([
                Statement::connect(Expr::r("not_a"), Expr::op(PrimOp::Not, vec![Expr::r("a")])),
                Statement::connect(Expr::r("orr"), Expr::op(PrimOp::Orr, vec![Expr::r("a")])),
                Statement::connect(Expr::r("andr"), Expr::op(PrimOp::Andr, vec![Expr::r("a")])),
                Statement::connect(Expr::r("xorr"), Expr::op(PrimOp::Xorr, vec![Expr::r("a")])),
                Statement::connect(
                    Expr::r("head"),
                    Expr::prim(PrimOp::Head, vec![Expr::r("a")], vec![3]),
                ),
                Statement::connect(Expr::r("slice"), Expr::r("a").bits(5, 2)),
                Statement::connect(Expr::r("neg"), Expr::op(PrimOp::Neg, vec![Expr::r("a")])),
            ]),
    );
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let a = sim.input("a").unwrap();
    sim.set(a, 0b1011_0110u8).unwrap();

    let mut read = |name: &str| {
        let port = sim.output(name).unwrap();
        sim.get(port).unwrap()
    };
    assert_eq!(read("not_a").to_u64(), Some(0b0100_1001));
    assert_eq!(read("orr").to_u64(), Some(1));
    assert_eq!(read("andr").to_u64(), Some(0));
    assert_eq!(read("xorr").to_u64(), Some(1));
    assert_eq!(read("head").to_u64(), Some(0b101));
    assert_eq!(read("slice").to_u64(), Some(0b1101));
    assert_eq!(read("neg").to_int(), BigInt::from(-0b1011_0110));
}

/// `o = ((a + k) * b) ^ (a >> 2)` with a literal `k`.
fn arithmetic(k: u64) -> Circuit {
    let sum = Expr::op(PrimOp::Add, vec![Expr::r("a"), Expr::uint(k, 8)]);
    let product = Expr::op(PrimOp::Mul, vec![sum, Expr::r("b")]);
    let shifted = Expr::prim(PrimOp::Shr, vec![Expr::r("a")], vec![2]);
    Circuit::new("Top").module(
        Module::new("Top")
            .input("a", Type::uint(8))
            .input("b", Type::uint(8))
            .output("o", Type::uint(17))
            .stmt(Statement::connect(
                Expr::r("o"),
                Expr::op(PrimOp::Xor, vec![product, shifted]),
            )),
    )
}

proptest! {
    #[test]
    fn optimized_and_plain_builds_agree(a in any::<u8>(), b in any::<u8>(), k in any::<u8>()) {
        let circuit = arithmetic(u64::from(k));
        let expected = ((u64::from(a) + u64::from(k)) * u64::from(b)) ^ (u64::from(a) >> 2);
        for optimize in [true, false] {
            let mut sim = Simulator::builder(&circuit).optimize(optimize).build().unwrap();
            let ia = sim.input("a").unwrap();
            let ib = sim.input("b").unwrap();
            let o = sim.output("o").unwrap();
            sim.set(ia, a).unwrap();
            sim.set(ib, b).unwrap();
            prop_assert_eq!(sim.get_u64(o).unwrap(), expected);
        }
    }

    #[test]
    fn constant_operands_fold_exactly(a in any::<u8>(), b in any::<u8>()) {
        let circuit = Circuit::new("Top").module(
            Module::new("Top")
                .output("sum", Type::uint(9))
                .output("diff", Type::uint(9))
                .output("cat", Type::uint(16))
                .stmts([
                    Statement::connect(
                        Expr::r("sum"),
                        Expr::op(PrimOp::Add, vec![Expr::uint(a.into(), 8), Expr::uint(b.into(), 8)]),
                    ),
                    Statement::connect(
                        Expr::r("diff"),
                        Expr::op(PrimOp::Sub, vec![Expr::uint(a.into(), 8), Expr::uint(b.into(), 8)]),
                    ),
                    Statement::connect(
                        Expr::r("cat"),
                        Expr::op(PrimOp::Cat, vec![Expr::uint(a.into(), 8), Expr::uint(b.into(), 8)]),
                    ),
                ]),
        );
        let program = rtlc::compile(&circuit, &rtlc::CompileOptions::default()).unwrap();
        prop_assert!(program.clusters.is_empty());
        let mut sim = Simulator::new(program);
        let mut read = |name: &str| {
            let port = sim.output(name).unwrap();
            sim.get_u64(port).unwrap()
        };
        prop_assert_eq!(read("sum"), u64::from(a) + u64::from(b));
        prop_assert_eq!(read("diff"), (u64::from(a).wrapping_sub(u64::from(b))) & 0x1FF);
        prop_assert_eq!(read("cat"), (u64::from(a) << 8) | u64::from(b));
    }
}

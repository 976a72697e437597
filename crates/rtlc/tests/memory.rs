use rtlc::ast::{Circuit, Expr, MemDecl, Module, Statement, Type};
use rtlc::{InputHandle, OutputHandle, Simulator};

fn port(mem: &str, port: &str, member: &str) -> Expr {
    Expr::r(mem).field(port).field(member)
}

/// One reader and one writer on a `depth`-entry byte memory.
fn ram(depth: usize, read_latency: usize) -> Circuit {
    let addr = Type::uint(4);
    Circuit::new("Ram").module(
        Module::new("Ram")
            .input("clock", Type::Clock)
            .input("waddr", addr.clone())
            .input("wdata", Type::uint(8))
            .input("wen", Type::uint(1))
            .input("raddr", addr)
            .input("ren", Type::uint(1))
            .output("rdata", Type::uint(8))
            .stmt(Statement::mem(
                MemDecl::new("m", Type::uint(8), depth)
                    .latency(read_latency, 1)
                    .reader("r")
                    .writer("w"),
            ))
            .stmts([
                Statement::connect(port("m", "w", "clk"), Expr::r("clock")),
                Statement::connect(port("m", "w", "addr"), Expr::r("waddr")),
                Statement::connect(port("m", "w", "data"), Expr::r("wdata")),
                Statement::connect(port("m", "w", "en"), Expr::r("wen")),
                Statement::connect(port("m", "w", "mask"), Expr::uint(1, 1)),
                Statement::connect(port("m", "r", "clk"), Expr::r("clock")),
                Statement::connect(port("m", "r", "addr"), Expr::r("raddr")),
                Statement::connect(port("m", "r", "en"), Expr::r("ren")),
                Statement::connect(Expr::r("rdata"), port("m", "r", "data")),
            ]),
    )
}

struct Ports {
    waddr: InputHandle,
    wdata: InputHandle,
    wen: InputHandle,
    raddr: InputHandle,
    ren: InputHandle,
    rdata: OutputHandle,
}

fn ports(sim: &Simulator) -> Ports {
    Ports {
        waddr: sim.input("waddr").unwrap(),
        wdata: sim.input("wdata").unwrap(),
        wen: sim.input("wen").unwrap(),
        raddr: sim.input("raddr").unwrap(),
        ren: sim.input("ren").unwrap(),
        rdata: sim.output("rdata").unwrap(),
    }
}

#[test]
fn test_write_is_visible_one_step_later() {
    let circuit = ram(16, 1);
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let p = ports(&sim);

    sim.set(p.waddr, 3u8).unwrap();
    sim.set(p.wdata, 0xABu8).unwrap();
    sim.set(p.wen, 1u8).unwrap();
    sim.set(p.raddr, 3u8).unwrap();
    sim.set(p.ren, 1u8).unwrap();
    sim.step().unwrap();
    // The read issued alongside the write sees the old contents.
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 0);

    sim.set(p.wen, 0u8).unwrap();
    sim.step().unwrap();
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 0xAB);

    sim.set(p.raddr, 4u8).unwrap();
    sim.step().unwrap();
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 0);
}

#[test]
fn test_disabled_read_returns_zero() {
    let circuit = ram(16, 1);
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let p = ports(&sim);

    sim.set(p.waddr, 1u8).unwrap();
    sim.set(p.wdata, 0x5Au8).unwrap();
    sim.set(p.wen, 1u8).unwrap();
    sim.step().unwrap();
    sim.set(p.wen, 0u8).unwrap();

    sim.set(p.raddr, 1u8).unwrap();
    sim.step().unwrap();
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 0);
    sim.set(p.ren, 1u8).unwrap();
    sim.step().unwrap();
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 0x5A);
}

#[test]
fn test_combinational_read_follows_write() {
    let circuit = ram(16, 0);
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let p = ports(&sim);

    sim.set(p.ren, 1u8).unwrap();
    sim.set(p.raddr, 2u8).unwrap();
    sim.set(p.waddr, 2u8).unwrap();
    sim.set(p.wdata, 9u8).unwrap();
    sim.set(p.wen, 1u8).unwrap();
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 0);
    sim.step().unwrap();
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 9);
}

#[test]
fn test_out_of_range_accesses() {
    let circuit = ram(5, 1);
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let p = ports(&sim);

    // Writes past the last entry are dropped.
    sim.set(p.waddr, 7u8).unwrap();
    sim.set(p.wdata, 0x11u8).unwrap();
    sim.set(p.wen, 1u8).unwrap();
    sim.step().unwrap();
    sim.set(p.waddr, 4u8).unwrap();
    sim.set(p.wdata, 0x22u8).unwrap();
    sim.step().unwrap();
    sim.set(p.wen, 0u8).unwrap();

    sim.set(p.ren, 1u8).unwrap();
    sim.set(p.raddr, 7u8).unwrap();
    sim.step().unwrap();
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 0);
    sim.set(p.raddr, 4u8).unwrap();
    sim.step().unwrap();
    assert_eq!(sim.get_u64(p.rdata).unwrap(), 0x22);
}

#[test]
fn test_memory_survives_many_writes() {
    let circuit = ram(16, 1);
    let mut sim = Simulator::builder(&circuit).build().unwrap();
    let p = ports(&sim);

    sim.set(p.wen, 1u8).unwrap();
    for addr in 0..16u8 {
        sim.set(p.waddr, addr).unwrap();
        sim.set(p.wdata, addr * 3).unwrap();
        sim.step().unwrap();
    }
    sim.set(p.wen, 0u8).unwrap();
    sim.set(p.ren, 1u8).unwrap();
    for addr in (0..16u8).rev() {
        sim.set(p.raddr, addr).unwrap();
        sim.step().unwrap();
        assert_eq!(sim.get_u64(p.rdata).unwrap(), u64::from(addr) * 3);
    }
}

#[test]
fn test_port_without_enable_is_removed() {
    let circuit = Circuit::new("Rom").module(
        Module::new("Rom")
            .input("clock", Type::Clock)
            .input("raddr", Type::uint(2))
            .output("rdata", Type::uint(8))
            .stmt(Statement::mem(
                MemDecl::new("m", Type::uint(8), 4)
                    .latency(1, 1)
                    .reader("r")
                    .writer("w"),
            ))
            .stmts([
                Statement::connect(port("m", "r", "clk"), Expr::r("clock")),
                Statement::connect(port("m", "r", "addr"), Expr::r("raddr")),
                Statement::connect(port("m", "r", "en"), Expr::uint(1, 1)),
                Statement::connect(port("m", "w", "clk"), Expr::r("clock")),
                Statement::connect(port("m", "w", "en"), Expr::uint(0, 1)),
                Statement::connect(Expr::r("rdata"), port("m", "r", "data")),
            ]),
    );
    let program = rtlc::compile(&circuit, &rtlc::CompileOptions::default()).unwrap();
    assert!(program.mem_writes.is_empty());
    assert_eq!(program.mem_reads.len(), 1);

    let mut sim = Simulator::new(program);
    let rdata = sim.output("rdata").unwrap();
    sim.step_n(2).unwrap();
    assert_eq!(sim.get_u64(rdata).unwrap(), 0);
}

use clap::Parser as ClapParser;
use log::info;
use miette::{IntoDiagnostic, Result, WrapErr, bail};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use std::fs;
use std::path::PathBuf;

use rtlc::ast::Circuit;
use rtlc::{CompilationTrace, CompileOptions, TraceOptions, compile_with_trace};

mod output;

#[derive(ClapParser)]
#[command(name = "rtlc", about = "Compile an RTL circuit into a cycle-accurate C++ simulator")]
struct Cli {
    /// Circuit syntax tree in JSON
    input: PathBuf,

    /// Top module, overriding the circuit's `main`
    #[arg(long)]
    top: Option<String>,

    /// Compile options in TOML
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for the emitted sources and dumps
    #[arg(long, default_value = "generated")]
    out_dir: PathBuf,

    /// Dump an intermediate stage (built, typed, optimized, scheduled,
    /// synthesized, program, cpp)
    #[arg(long, value_name = "STAGE", num_args = 1..)]
    dump_graph: Vec<String>,

    /// Skip the graph optimization passes
    #[arg(long)]
    no_optimize: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // A logger that is already installed keeps working.
    let _ = TermLogger::init(
        level,
        ConfigBuilder::new().build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut options = match &cli.config {
        Some(path) => CompileOptions::load(path).into_diagnostic()?,
        None => CompileOptions::default(),
    };
    if cli.no_optimize {
        options.optimize = false;
    }

    let mut trace_opts = TraceOptions::default();
    for stage in &cli.dump_graph {
        if !trace_opts.enable(stage) {
            bail!("Unknown stage `{}` for --dump-graph", stage);
        }
    }

    let text = fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", cli.input.display()))?;
    let mut circuit = Circuit::from_json(&text)
        .into_diagnostic()
        .wrap_err("Malformed circuit JSON")?;
    if let Some(top) = cli.top {
        circuit.main = top;
    }

    let mut trace = CompilationTrace::default();
    let program = compile_with_trace(&circuit, &options, &trace_opts, Some(&mut trace)).into_diagnostic()?;
    let cpp = rtlc::codegen::cpp::emit(&program);

    for path in output::write_sources(&cli.out_dir, &program, &cpp).into_diagnostic()? {
        info!("wrote {}", path.display());
    }
    if trace_opts.any() {
        for path in output::write_trace(&cli.out_dir, &program.name, &trace).into_diagnostic()? {
            info!("wrote {}", path.display());
        }
    }
    eprintln!(
        "Done: {} cluster(s), {} slot(s) written to {}",
        program.stats.clusters,
        program.stats.slots,
        cli.out_dir.display()
    );
    Ok(())
}

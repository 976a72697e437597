use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rtlc::{CompilationTrace, CppOutput, Program};

/// Port description written next to the emitted sources.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub name: String,
    pub direction: &'static str,
    pub width: usize,
    pub signed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub header: String,
    pub source: String,
    pub ports: Vec<PortInfo>,
    pub clusters: usize,
    pub slots: usize,
    pub constants: usize,
    pub split_registers: usize,
}

impl Manifest {
    pub fn new(program: &Program) -> Self {
        let inputs = program.inputs.iter().map(|p| PortInfo {
            name: p.name.clone(),
            direction: "input",
            width: p.width,
            signed: p.sign,
        });
        let outputs = program.outputs.iter().map(|p| PortInfo {
            name: p.name.clone(),
            direction: "output",
            width: p.width,
            signed: p.sign,
        });
        Self {
            name: program.name.clone(),
            header: format!("{}.h", program.name),
            source: format!("{}.cpp", program.name),
            ports: inputs.chain(outputs).collect(),
            clusters: program.stats.clusters,
            slots: program.stats.slots,
            constants: program.stats.constants,
            split_registers: program.stats.split_registers,
        }
    }
}

/// Writes `<name>.h`, `<name>.cpp` and `<name>.json` into `dir`.
pub fn write_sources(dir: &Path, program: &Program, cpp: &CppOutput) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let manifest = Manifest::new(program);
    let json = serde_json::to_string_pretty(&manifest).map_err(io::Error::other)?;
    let files = [
        (dir.join(&manifest.header), cpp.header.as_str()),
        (dir.join(&manifest.source), cpp.source.as_str()),
        (dir.join(format!("{}.json", program.name)), json.as_str()),
    ];
    let mut written = Vec::new();
    for (path, text) in files {
        fs::write(&path, text)?;
        written.push(path);
    }
    Ok(written)
}

/// Writes each captured stage to `<dir>/<name>.<stage>.txt`.
pub fn write_trace(dir: &Path, name: &str, trace: &CompilationTrace) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (title, text) in trace.sections() {
        let stage = title.to_lowercase().replace([' ', '+'], "_");
        let path = dir.join(format!("{}.{}.txt", name, stage));
        fs::write(&path, text)?;
        written.push(path);
    }
    Ok(written)
}

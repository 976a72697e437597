//! Interpreter for compiled step programs.

use num_bigint::BigUint;

use crate::ast::Circuit;
use crate::codegen::Program;
use crate::value::Value;

mod builder;
mod error;
mod runtime;

pub use builder::SimulatorBuilder;
pub use error::SimulatorError;

use runtime::Runtime;

/// Resolved input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputHandle(usize);

/// Resolved output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputHandle(usize);

/// Cycle-accurate simulator over a compiled [`Program`].
///
/// Inputs written with [`set`](Self::set) take effect lazily: the
/// combinational clusters they feed are marked active and re-run on the next
/// [`get`](Self::get) or [`step`](Self::step).
pub struct Simulator {
    runtime: Runtime,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("name", &self.runtime.program.name)
            .field("cycles", &self.runtime.cycles)
            .finish()
    }
}

impl Simulator {
    pub fn builder(circuit: &Circuit) -> SimulatorBuilder<'_> {
        SimulatorBuilder::new(circuit)
    }

    pub fn new(program: Program) -> Self {
        Self {
            runtime: Runtime::new(program),
        }
    }

    pub fn program(&self) -> &Program {
        &self.runtime.program
    }

    pub fn input(&self, name: &str) -> Result<InputHandle, SimulatorError> {
        let program = &self.runtime.program;
        match program.input(name) {
            Some(index) => Ok(InputHandle(index)),
            None if program.output(name).is_some() => Err(SimulatorError::NotAnInput {
                name: name.to_string(),
            }),
            None => Err(SimulatorError::UnknownSignal {
                name: name.to_string(),
            }),
        }
    }

    pub fn output(&self, name: &str) -> Result<OutputHandle, SimulatorError> {
        let program = &self.runtime.program;
        match program.output(name) {
            Some(index) => Ok(OutputHandle(index)),
            None if program.input(name).is_some() => Err(SimulatorError::NotAnOutput {
                name: name.to_string(),
            }),
            None => Err(SimulatorError::UnknownSignal {
                name: name.to_string(),
            }),
        }
    }

    /// Drives an input with a raw bit pattern.
    pub fn set(&mut self, port: InputHandle, value: impl Into<BigUint>) -> Result<(), SimulatorError> {
        let bits = value.into();
        let input = &self.runtime.program.inputs[port.0];
        if bits.bits() as usize > input.width {
            return Err(SimulatorError::ValueTooWide {
                name: input.name.clone(),
                width: input.width,
            });
        }
        let value = Value::new(bits, input.width, input.sign);
        self.runtime.set_input(port.0, value);
        Ok(())
    }

    /// Settles combinational logic and reads an output.
    pub fn get(&mut self, port: OutputHandle) -> Result<Value, SimulatorError> {
        self.runtime.eval()?;
        let output = &self.runtime.program.outputs[port.0];
        Ok(self.runtime.eval_expr(&output.value))
    }

    /// Low 64 bits of an output.
    pub fn get_u64(&mut self, port: OutputHandle) -> Result<u64, SimulatorError> {
        let value = self.get(port)?;
        Ok(value.bits.iter_u64_digits().next().unwrap_or(0))
    }

    /// Reads any stored signal by name after settling. Signals removed by
    /// optimization have no storage and read as `None`.
    pub fn peek(&mut self, name: &str) -> Result<Option<Value>, SimulatorError> {
        self.runtime.eval()?;
        Ok(self
            .runtime
            .program
            .layout
            .lookup(name)
            .and_then(|slot| self.runtime.read(slot, 0)))
    }

    /// Advances one clock cycle.
    pub fn step(&mut self) -> Result<(), SimulatorError> {
        self.runtime.step()
    }

    pub fn step_n(&mut self, count: usize) -> Result<(), SimulatorError> {
        for _ in 0..count {
            self.runtime.step()?;
        }
        Ok(())
    }

    pub fn cycles(&self) -> u64 {
        self.runtime.cycles
    }

    /// Lines printed since the last call.
    pub fn take_prints(&mut self) -> Vec<String> {
        std::mem::take(&mut self.runtime.prints)
    }
}

use bit_set::BitSet;
use log::trace;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use smallvec::SmallVec;

use super::SimulatorError;
use crate::codegen::{Expr, Instr, Program, Slot, SlotInfo};
use crate::value::{Value, eval_prim};

/// One stored element. Narrow cells keep the bit pattern in a `u64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cell {
    Narrow(u64),
    Wide(BigUint),
}

impl Cell {
    fn zero(info: &SlotInfo) -> Self {
        if info.class.is_wide() {
            Cell::Wide(BigUint::zero())
        } else {
            Cell::Narrow(0)
        }
    }

    fn to_value(&self, info: &SlotInfo) -> Value {
        match self {
            Cell::Narrow(n) => Value::new(BigUint::from(*n), info.width, info.sign),
            Cell::Wide(b) => Value::new(b.clone(), info.width, info.sign),
        }
    }

    fn from_value(value: Value, info: &SlotInfo) -> Self {
        let value = value.cast(info.width, info.sign);
        match value.bits.to_u64() {
            Some(n) if !info.class.is_wide() => Cell::Narrow(n),
            _ => Cell::Wide(value.bits),
        }
    }
}

/// Renders a printf format against evaluated arguments.
pub(crate) fn format_print(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(spec @ ('d' | 'x' | 'b' | 'c')) => {
                let Some(v) = args.next() else {
                    continue;
                };
                match spec {
                    'd' => out.push_str(&v.to_int().to_string()),
                    'x' => out.push_str(&format!("{:x}", v.bits)),
                    'b' => out.push_str(&format!("{:b}", v.bits)),
                    _ => {
                        let code = v.bits.to_u32().and_then(char::from_u32).unwrap_or('?');
                        out.push(code);
                    }
                }
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Flat element index, or `None` when any index is out of range.
fn flat_index(indices: &[Value], dims: &[usize]) -> Option<usize> {
    let mut flat = 0usize;
    for (index, dim) in indices.iter().zip(dims) {
        let i = index.to_u64().and_then(|i| usize::try_from(i).ok())?;
        if i >= *dim {
            return None;
        }
        flat = flat * dim + i;
    }
    Some(flat)
}

/// Interpreter state for one compiled [`Program`].
pub(crate) struct Runtime {
    pub(crate) program: Program,
    cells: Vec<Vec<Cell>>,
    active: BitSet,
    pub(crate) cycles: u64,
    pub(crate) prints: Vec<String>,
}

impl Runtime {
    pub(crate) fn new(program: Program) -> Self {
        let cells = program
            .layout
            .iter()
            .map(|(_, info)| vec![Cell::zero(info); info.len])
            .collect();
        let mut active = BitSet::with_capacity(program.clusters.len());
        for index in 0..program.clusters.len() {
            active.insert(index);
        }
        Self {
            program,
            cells,
            active,
            cycles: 0,
            prints: Vec::new(),
        }
    }

    fn info(&self, slot: Slot) -> &SlotInfo {
        self.program.layout.info(slot)
    }

    pub(crate) fn read(&self, slot: Slot, index: usize) -> Option<Value> {
        self.cells[slot.0].get(index).map(|c| c.to_value(self.info(slot)))
    }

    /// Returns whether the stored element changed.
    fn write(&mut self, slot: Slot, index: usize, value: Value) -> bool {
        let cell = Cell::from_value(value, self.program.layout.info(slot));
        match self.cells[slot.0].get_mut(index) {
            Some(old) if *old != cell => {
                *old = cell;
                true
            }
            _ => false,
        }
    }

    fn activate(&mut self, targets: &[usize]) {
        for t in targets {
            self.active.insert(*t);
        }
    }

    pub(crate) fn eval_expr(&self, e: &Expr<Slot>) -> Value {
        match e {
            Expr::Const(v) => v.clone(),
            Expr::Read { src, width, sign } => self
                .read(*src, 0)
                .map(|v| v.cast(*width, *sign))
                .unwrap_or_else(|| Value::zero(*width)),
            Expr::ReadIndexed {
                src,
                indices,
                dims,
                width,
                sign,
            } => {
                let indices: SmallVec<[Value; 2]> = indices.iter().map(|i| self.eval_expr(i)).collect();
                flat_index(&indices, dims)
                    .and_then(|i| self.read(*src, i))
                    .map(|v| v.cast(*width, *sign))
                    .unwrap_or_else(|| Value::zero(*width).cast(*width, *sign))
            }
            Expr::Prim {
                op,
                args,
                width,
                sign,
            } => {
                let args: SmallVec<[Value; 2]> = args.iter().map(|a| self.eval_expr(a)).collect();
                eval_prim(*op, &args, *width, *sign)
            }
            Expr::Mux {
                cond,
                then,
                otherwise,
                width,
                sign,
            } => {
                let chosen = if self.eval_expr(cond).is_zero() {
                    otherwise
                } else {
                    then
                };
                self.eval_expr(chosen).cast(*width, *sign)
            }
        }
    }

    fn exec(&mut self, instrs: &[Instr<Slot>]) -> Result<bool, SimulatorError> {
        let mut changed = false;
        for instr in instrs {
            match instr {
                Instr::Assign { dst, value } => {
                    let v = self.eval_expr(value);
                    changed |= self.write(*dst, 0, v);
                }
                Instr::Store {
                    dst,
                    indices,
                    dims,
                    value,
                } => {
                    let indices: Vec<Value> = indices.iter().map(|i| self.eval_expr(i)).collect();
                    if let Some(flat) = flat_index(&indices, dims) {
                        let v = self.eval_expr(value);
                        changed |= self.write(*dst, flat, v);
                    }
                }
                Instr::Copy { dst, src } => {
                    if self.cells[dst.0] != self.cells[src.0] {
                        self.cells[dst.0] = self.cells[src.0].clone();
                        changed = true;
                    }
                }
                Instr::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let branch = if self.eval_expr(cond).is_zero() {
                        otherwise
                    } else {
                        then
                    };
                    changed |= self.exec(branch)?;
                }
                Instr::Printf {
                    enable,
                    format,
                    args,
                } => {
                    if !self.eval_expr(enable).is_zero() {
                        let args: Vec<Value> = args.iter().map(|a| self.eval_expr(a)).collect();
                        let line = format_print(format, &args);
                        trace!("printf at cycle {}: {}", self.cycles, line);
                        self.prints.push(line);
                    }
                }
                Instr::Assert {
                    pred,
                    enable,
                    message,
                } => {
                    if !self.eval_expr(enable).is_zero() && self.eval_expr(pred).is_zero() {
                        return Err(SimulatorError::AssertionFailed {
                            message: message.clone(),
                            cycle: self.cycles,
                        });
                    }
                }
            }
        }
        Ok(changed)
    }

    fn run_cluster(&mut self, index: usize) -> Result<(), SimulatorError> {
        self.active.remove(index);
        let count = self.program.clusters[index].updates.len();
        for u in 0..count {
            // Instructions are cloned out so `exec` can borrow the state mutably.
            let instrs = self.program.clusters[index].updates[u].instrs.clone();
            if self.exec(&instrs)? {
                let targets = self.program.clusters[index].updates[u].activates.clone();
                self.activate(&targets);
            }
        }
        Ok(())
    }

    /// Settles the combinational clusters.
    pub(crate) fn eval(&mut self) -> Result<(), SimulatorError> {
        for index in 0..self.program.settle {
            if self.active.contains(index) {
                self.run_cluster(index)?;
            }
        }
        Ok(())
    }

    pub(crate) fn set_input(&mut self, port: usize, value: Value) {
        let input = &self.program.inputs[port];
        let (slot, targets) = (input.slot, input.activates.clone());
        if self.write(slot, 0, value) {
            self.activate(&targets);
        }
    }

    pub(crate) fn step(&mut self) -> Result<(), SimulatorError> {
        self.eval()?;
        for index in self.program.settle..self.program.clusters.len() {
            if self.program.clusters[index].always_active || self.active.contains(index) {
                self.run_cluster(index)?;
            }
        }

        let reads: Vec<(Slot, Option<Value>, Vec<usize>)> = self
            .program
            .mem_reads
            .iter()
            .map(|read| {
                let value = if self.eval_expr(&read.en).is_zero() {
                    None
                } else {
                    let addr = self.eval_expr(&read.addr);
                    flat_index(&[addr], &[self.info(read.mem).len]).and_then(|i| self.read(read.mem, i))
                };
                (read.data, value, read.activates.clone())
            })
            .collect();

        let writes: Vec<(Slot, usize, Value, Vec<usize>)> = self
            .program
            .mem_writes
            .iter()
            .filter(|w| !self.eval_expr(&w.en).is_zero() && !self.eval_expr(&w.mask).is_zero())
            .filter_map(|w| {
                let addr = self.eval_expr(&w.addr);
                let index = flat_index(&[addr], &[self.info(w.mem).len])?;
                Some((w.mem, index, self.eval_expr(&w.data), w.activates.clone()))
            })
            .collect();
        for (mem, index, value, targets) in writes {
            if self.write(mem, index, value) {
                self.activate(&targets);
            }
        }

        let commits: Vec<_> = self
            .program
            .commits
            .iter()
            .map(|c| (c.src, c.dst, c.activates.clone()))
            .collect();
        for (src, dst, targets) in commits {
            if self.cells[src.0] != self.cells[dst.0] {
                self.cells[src.0] = self.cells[dst.0].clone();
                self.activate(&targets);
            }
        }

        for (data, value, targets) in reads {
            let width = self.info(data).width;
            let value = value.unwrap_or_else(|| Value::zero(width));
            if self.write(data, 0, value) {
                self.activate(&targets);
            }
        }
        self.cycles += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[test]
    fn print_formats() {
        let args = [
            Value::from_int(&BigInt::from(-3), 4, true),
            Value::from_u64(0xab, 8),
            Value::from_u64(5, 3),
            Value::from_u64(65, 8),
        ];
        assert_eq!(
            format_print("%d %x %b %c 100%%\n", &args),
            "-3 ab 101 A 100%\n"
        );
    }

    #[test]
    fn out_of_range_index_has_no_element() {
        let idx = [Value::from_u64(1, 2), Value::from_u64(3, 2)];
        assert_eq!(flat_index(&idx, &[2, 3]), None);
        let idx = [Value::from_u64(1, 2), Value::from_u64(2, 2)];
        assert_eq!(flat_index(&idx, &[2, 3]), Some(5));
    }
}

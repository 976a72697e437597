//! Bit-exact values and the operator semantics shared by constant folding
//! and the interpreter.

use std::fmt;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};

use crate::ir::PrimOp;

/// All-ones mask of `width` bits.
pub fn mask(width: usize) -> BigUint {
    (BigUint::one() << width) - BigUint::one()
}

/// A `width`-bit two's complement bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Value {
    pub bits: BigUint,
    pub width: usize,
    pub sign: bool,
}

impl Value {
    /// Truncates `bits` to `width`.
    pub fn new(bits: BigUint, width: usize, sign: bool) -> Self {
        let bits = if bits.bits() as usize > width {
            bits & mask(width)
        } else {
            bits
        };
        Self { bits, width, sign }
    }

    pub fn zero(width: usize) -> Self {
        Self {
            bits: BigUint::zero(),
            width,
            sign: false,
        }
    }

    pub fn from_u64(value: u64, width: usize) -> Self {
        Self::new(BigUint::from(value), width, false)
    }

    /// Two's complement encoding of `value` in `width` bits.
    pub fn from_int(value: &BigInt, width: usize, sign: bool) -> Self {
        let bits = match value.sign() {
            Sign::Minus => {
                let modulus = BigInt::one() << width;
                let wrapped = ((value % &modulus) + &modulus) % &modulus;
                wrapped.to_biguint().unwrap_or_default()
            }
            _ => value.magnitude().clone(),
        };
        Self::new(bits, width, sign)
    }

    fn is_negative(&self) -> bool {
        self.sign && self.width > 0 && self.bits.bit(self.width as u64 - 1)
    }

    /// The integer this value denotes under its signedness.
    pub fn to_int(&self) -> BigInt {
        let magnitude = BigInt::from(self.bits.clone());
        if self.is_negative() {
            magnitude - (BigInt::one() << self.width)
        } else {
            magnitude
        }
    }

    /// Extends (by sign for signed values) or truncates to `width`.
    pub fn resize(&self, width: usize) -> Self {
        Self::from_int(&self.to_int(), width, self.sign)
    }

    /// Reinterprets the value as `width` bits of signedness `sign`.
    pub fn cast(&self, width: usize, sign: bool) -> Self {
        let mut out = self.resize(width);
        out.sign = sign;
        out
    }

    pub fn is_zero(&self) -> bool {
        self.bits.is_zero()
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.bits.to_u64()
    }

    fn to_usize_saturating(&self) -> usize {
        self.bits.to_usize().unwrap_or(usize::MAX)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'h{:x}", self.width, self.bits)
    }
}

fn bool_value(b: bool) -> Value {
    Value::from_u64(b as u64, 1)
}

fn shift_right(a: &Value, n: usize, width: usize, sign: bool) -> Value {
    if n >= a.width {
        let fill = if a.is_negative() {
            BigInt::from(-1)
        } else {
            BigInt::zero()
        };
        return Value::from_int(&fill, width, sign);
    }
    Value::from_int(&(a.to_int() >> n), width, sign)
}

/// Applies `op` to typed operands, producing a `width`-bit result.
///
/// Division and remainder by zero produce zero. Right shifts of signed
/// operands are arithmetic. Bitwise operators see both operands extended to
/// the result width.
pub fn eval_prim(op: PrimOp, args: &[Value], width: usize, sign: bool) -> Value {
    let zero = Value::zero(0);
    let a = args.first().unwrap_or(&zero);
    let b = args.get(1).unwrap_or(&zero);
    let int = |v: BigInt| Value::from_int(&v, width, sign);
    match op {
        PrimOp::Add => int(a.to_int() + b.to_int()),
        PrimOp::Sub => int(a.to_int() - b.to_int()),
        PrimOp::Mul => int(a.to_int() * b.to_int()),
        PrimOp::Div => {
            if b.is_zero() {
                Value::new(BigUint::zero(), width, sign)
            } else {
                int(a.to_int() / b.to_int())
            }
        }
        PrimOp::Rem => {
            if b.is_zero() {
                Value::new(BigUint::zero(), width, sign)
            } else {
                int(a.to_int() % b.to_int())
            }
        }
        PrimOp::Lt => bool_value(a.to_int() < b.to_int()),
        PrimOp::Leq => bool_value(a.to_int() <= b.to_int()),
        PrimOp::Gt => bool_value(a.to_int() > b.to_int()),
        PrimOp::Geq => bool_value(a.to_int() >= b.to_int()),
        PrimOp::Eq => bool_value(a.to_int() == b.to_int()),
        PrimOp::Neq => bool_value(a.to_int() != b.to_int()),
        PrimOp::Dshl => {
            let n = b.to_usize_saturating().min(width);
            int(a.to_int() << n)
        }
        PrimOp::Dshr => shift_right(a, b.to_usize_saturating(), width, sign),
        PrimOp::And => Value::new(a.resize(width).bits & b.resize(width).bits, width, sign),
        PrimOp::Or => Value::new(a.resize(width).bits | b.resize(width).bits, width, sign),
        PrimOp::Xor => Value::new(a.resize(width).bits ^ b.resize(width).bits, width, sign),
        PrimOp::Cat => Value::new((a.bits.clone() << b.width) | &b.bits, width, sign),
        PrimOp::AsUInt | PrimOp::AsSInt => Value::new(a.bits.clone(), width, sign),
        PrimOp::AsClock | PrimOp::AsAsyncReset => Value::new(a.bits.clone() & BigUint::one(), width, sign),
        PrimOp::Cvt | PrimOp::Pad(_) => int(a.to_int()),
        PrimOp::Neg => int(-a.to_int()),
        PrimOp::Not => Value::new(a.bits.clone() ^ mask(a.width), width, sign),
        PrimOp::Andr => bool_value(a.bits == mask(a.width)),
        PrimOp::Orr => bool_value(!a.is_zero()),
        PrimOp::Xorr => bool_value(a.bits.count_ones() % 2 == 1),
        PrimOp::Shl(n) => int(a.to_int() << n),
        PrimOp::Shr(n) => shift_right(a, n, width, sign),
        PrimOp::Head(n) => Value::new(a.bits.clone() >> a.width.saturating_sub(n), width, sign),
        PrimOp::Tail(_) => Value::new(a.bits.clone(), width, sign),
        PrimOp::Bits { lo, .. } => Value::new(a.bits.clone() >> lo, width, sign),
    }
}

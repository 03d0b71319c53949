//! The arithmetic-logic unit.
//!
//! The ALU owns two single-use operand slots and an NZVC flag accumulator.
//! Reading a slot resets it to zero, so every operation must be freshly
//! supplied with operands. ADD and SUB bound their result into the signed
//! 32-bit range with an explicit overflow fold and recompute the flags;
//! the other operations leave the flags alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processor status bits.
pub mod flags {
    pub const N: i32 = 1;
    pub const Z: i32 = 2;
    pub const V: i32 = 4;
    pub const C: i32 = 8;
}

const MAX: i64 = i32::MAX as i64;
const MIN: i64 = i32::MIN as i64;
const FOLD: i64 = 1 << 31;

/// Operations the ALU performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Bitwise or. With one slot left at zero this moves the other slot
    /// through unchanged, which is how register transfers are routed.
    Or,
    /// `-(left + right)`. Negates AC when the right slot is zero.
    NegSum,
}

/// The ALU: two operand slots plus the flag accumulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Alu {
    left: i32,
    right: i32,
    pub nzvc: i32,
}

impl Alu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_left(&mut self, value: i32) {
        self.left = value;
    }

    pub fn put_right(&mut self, value: i32) {
        self.right = value;
    }

    /// Consume both slots and perform `op`.
    ///
    /// ADD and SUB overwrite the NZVC accumulator; everything else keeps it.
    pub fn apply(&mut self, op: AluOp) -> Result<i32, AluError> {
        let left = std::mem::take(&mut self.left);
        let right = std::mem::take(&mut self.right);

        let result = match op {
            AluOp::Add => bounded_add(left, right),
            AluOp::Sub => bounded_sub(left, right),
            AluOp::Mul => left.wrapping_mul(right),
            AluOp::Div => {
                if right == 0 {
                    return Err(AluError::DivisionByZero);
                }
                left.wrapping_div(right)
            }
            AluOp::Or => left | right,
            AluOp::NegSum => (-(left as i64 + right as i64)) as i32,
        };

        match op {
            AluOp::Add => self.nzvc = add_flags(left, right, result),
            AluOp::Sub => self.nzvc = sub_flags(left, right, result),
            _ => {}
        }

        Ok(result)
    }
}

/// Sum bounded into the signed 32-bit range.
///
/// Positive overflow keeps the masked low 31 bits rebased from the minimum
/// representable value; negative overflow remasks the negated operands and
/// drops one.
fn bounded_add(left: i32, right: i32) -> i32 {
    let wide = left as i64 + right as i64;
    if wide > MAX {
        (wide.rem_euclid(FOLD) + MIN) as i32
    } else if wide < MIN {
        ((-(left as i64) - right as i64).rem_euclid(FOLD) - 1) as i32
    } else {
        wide as i32
    }
}

/// Difference bounded into the signed 32-bit range; the negative-overflow
/// arm mirrors [`bounded_add`] without the trailing drop.
fn bounded_sub(left: i32, right: i32) -> i32 {
    let wide = left as i64 - right as i64;
    if wide > MAX {
        (wide.rem_euclid(FOLD) + MIN) as i32
    } else if wide < MIN {
        (-(left as i64) - right as i64).rem_euclid(FOLD) as i32
    } else {
        wide as i32
    }
}

fn add_flags(left: i32, right: i32, result: i32) -> i32 {
    use flags::{C, N, V, Z};
    if left > 0 && right > 0 && result < 0 {
        N + V + C
    } else if left < 0 && right < 0 && result >= 0 {
        if result == 0 {
            Z + V + C
        } else {
            V + C
        }
    } else if result == 0 {
        Z
    } else if result < 0 {
        N
    } else {
        0
    }
}

fn sub_flags(left: i32, right: i32, result: i32) -> i32 {
    use flags::{C, N, V, Z};
    if left > 0 && right < 0 && result < 0 {
        N + V + C
    } else if left < 0 && right > 0 && result >= 0 {
        if result == 0 {
            Z + V + C
        } else {
            V + C
        }
    } else if result == 0 {
        Z
    } else if result < 0 {
        N
    } else {
        0
    }
}

/// Errors that can occur inside the ALU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AluError {
    #[error("division by zero")]
    DivisionByZero,
}

#[cfg(test)]
mod tests {
    use super::flags::{C, N, V, Z};
    use super::*;
    use proptest::prelude::*;

    fn apply(left: i32, right: i32, op: AluOp) -> (i32, i32) {
        let mut alu = Alu::new();
        alu.put_left(left);
        alu.put_right(right);
        let result = alu.apply(op).unwrap();
        (result, alu.nzvc)
    }

    #[test]
    fn test_add_plain() {
        assert_eq!(apply(2, 3, AluOp::Add), (5, 0));
        assert_eq!(apply(2, -2, AluOp::Add), (0, Z));
        assert_eq!(apply(2, -5, AluOp::Add), (-3, N));
    }

    #[test]
    fn test_add_positive_overflow() {
        assert_eq!(apply(i32::MAX, 1, AluOp::Add), (i32::MIN, N + V + C));
        assert_eq!(apply(i32::MAX, i32::MAX, AluOp::Add), (-2, N + V + C));
    }

    #[test]
    fn test_add_negative_overflow() {
        // MIN + (-1) folds to exactly zero on this machine
        assert_eq!(apply(i32::MIN, -1, AluOp::Add), (0, Z + V + C));
        assert_eq!(apply(i32::MIN + 1, -2, AluOp::Add), (0, Z + V + C));
    }

    #[test]
    fn test_add_min_min_escapes_overflow_flags() {
        // The fold lands on -1, so the sign rule reports plain N
        assert_eq!(apply(i32::MIN, i32::MIN, AluOp::Add), (-1, N));
    }

    #[test]
    fn test_sub_plain() {
        assert_eq!(apply(5, 3, AluOp::Sub), (2, 0));
        assert_eq!(apply(3, 3, AluOp::Sub), (0, Z));
        assert_eq!(apply(3, 5, AluOp::Sub), (-2, N));
    }

    #[test]
    fn test_sub_overflow() {
        assert_eq!(apply(i32::MAX, -1, AluOp::Sub), (i32::MIN, N + V + C));
        assert_eq!(apply(i32::MIN, 1, AluOp::Sub), (i32::MAX, V + C));
    }

    #[test]
    fn test_mul_div_leave_flags() {
        let mut alu = Alu::new();
        alu.put_left(1);
        alu.put_right(2);
        alu.apply(AluOp::Sub).unwrap();
        assert_eq!(alu.nzvc, N);

        alu.put_left(6);
        alu.put_right(7);
        assert_eq!(alu.apply(AluOp::Mul).unwrap(), 42);
        assert_eq!(alu.nzvc, N);

        alu.put_left(7);
        alu.put_right(2);
        assert_eq!(alu.apply(AluOp::Div).unwrap(), 3);
        alu.put_left(-7);
        alu.put_right(2);
        assert_eq!(alu.apply(AluOp::Div).unwrap(), -3);
        assert_eq!(alu.nzvc, N);
    }

    #[test]
    fn test_div_by_zero() {
        let mut alu = Alu::new();
        alu.put_left(1);
        assert_eq!(alu.apply(AluOp::Div), Err(AluError::DivisionByZero));
    }

    #[test]
    fn test_neg_sum() {
        assert_eq!(apply(5, 0, AluOp::NegSum).0, -5);
        assert_eq!(apply(-5, 0, AluOp::NegSum).0, 5);
        assert_eq!(apply(i32::MIN, 0, AluOp::NegSum).0, i32::MIN);
    }

    #[test]
    fn test_slots_are_single_use() {
        let mut alu = Alu::new();
        alu.put_left(5);
        alu.put_right(3);
        assert_eq!(alu.apply(AluOp::Add).unwrap(), 8);
        // Both slots drained back to zero
        assert_eq!(alu.apply(AluOp::Add).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn add_flag_discipline(left in any::<i32>(), right in any::<i32>()) {
            let (result, nzvc) = apply(left, right, AluOp::Add);

            prop_assert_eq!(nzvc & Z != 0, result == 0);
            prop_assert_eq!(nzvc & N != 0, result < 0);
            prop_assert_eq!(nzvc & V != 0, nzvc & C != 0);
            let overflow = (left > 0 && right > 0 && result < 0)
                || (left < 0 && right < 0 && result >= 0);
            prop_assert_eq!(nzvc & V != 0, overflow);
        }

        #[test]
        fn add_exact_when_in_range(left in any::<i32>(), right in any::<i32>()) {
            let wide = left as i64 + right as i64;
            prop_assume!(wide >= i32::MIN as i64 && wide <= i32::MAX as i64);
            let (result, _) = apply(left, right, AluOp::Add);
            prop_assert_eq!(result as i64, wide);
        }

        #[test]
        fn sub_flag_discipline(left in any::<i32>(), right in any::<i32>()) {
            let (result, nzvc) = apply(left, right, AluOp::Sub);

            prop_assert_eq!(nzvc & Z != 0, result == 0);
            prop_assert_eq!(nzvc & N != 0, result < 0);
            let overflow = (left > 0 && right < 0 && result < 0)
                || (left < 0 && right > 0 && result >= 0);
            prop_assert_eq!(nzvc & V != 0, overflow);
        }

        #[test]
        fn sub_exact_when_in_range(left in any::<i32>(), right in any::<i32>()) {
            let wide = left as i64 - right as i64;
            prop_assume!(wide >= i32::MIN as i64 && wide <= i32::MAX as i64);
            let (result, _) = apply(left, right, AluOp::Sub);
            prop_assert_eq!(result as i64, wide);
        }
    }
}

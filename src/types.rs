// This module defines the value-type model shared by the host IR and the candidate
// expression IR. A type is (lane, bits, fp): scalars have lane == 1, vectors lane >= 2,
// and the width is always lane * bits. A "null" sentinel (lane == 0) stands for the
// not-yet-typed constant holes the enumerator threads through sketch generation; it is
// rejected everywhere a concrete type is required. The module also hosts the work-type
// helpers: given a desired result type and an operator family, they enumerate the
// lane/bits shapes the operator may legally be evaluated in.

use std::fmt;

/// Floating-point widths admitted by the IEEE-like type set.
pub const FP_BITS: [u32; 4] = [16, 32, 64, 128];

/// A scalar or fixed-width vector value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    lane: u32,
    bits: u32,
    fp: bool,
}

impl Type {
    /// Scalar integer of `bits` bits.
    pub const fn integer(bits: u32) -> Type {
        Type { lane: 1, bits, fp: false }
    }

    /// Integer shape with `lane` elements of `bits` bits; `lane == 1` is scalar.
    pub const fn integer_vectorizable(lane: u32, bits: u32) -> Type {
        Type { lane, bits, fp: false }
    }

    /// Scalar of the given total width, integer or floating point.
    pub const fn scalar(width: u32, fp: bool) -> Type {
        Type { lane: 1, bits: width, fp }
    }

    /// Floating-point shape; `bits` must be one of [`FP_BITS`].
    pub const fn float_vectorizable(lane: u32, bits: u32) -> Type {
        Type { lane, bits, fp: true }
    }

    /// The untyped sentinel used for constant-hole placeholders.
    pub const fn null() -> Type {
        Type { lane: 0, bits: 0, fp: false }
    }

    /// The boolean type `i1`.
    pub const fn bool() -> Type {
        Type::integer(1)
    }

    pub fn width(&self) -> u32 {
        self.lane * self.bits
    }

    pub fn lane(&self) -> u32 {
        self.lane
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn is_fp(&self) -> bool {
        self.fp
    }

    pub fn is_valid(&self) -> bool {
        self.lane != 0 && self.bits != 0
    }

    pub fn is_vector(&self) -> bool {
        self.lane > 1
    }

    pub fn is_bool(&self) -> bool {
        self.lane == 1 && self.bits == 1 && !self.fp
    }

    /// True when both types occupy the same number of bits.
    pub fn same_width(&self, rhs: &Type) -> bool {
        debug_assert!(self.is_valid());
        self.width() == rhs.width()
    }

    /// One element of this type.
    pub fn as_scalar(&self) -> Type {
        Type { lane: 1, bits: self.bits, fp: self.fp }
    }

    /// This element type with `lane` elements.
    pub fn as_vector(&self, lane: u32) -> Type {
        Type { lane, bits: self.bits, fp: self.fp }
    }

    /// Reinterpret as integer bits: FP becomes a single integer of equal
    /// width, integers keep their shape.
    pub fn as_integer(&self) -> Type {
        if self.fp {
            Type::integer(self.width())
        } else {
            *self
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "null");
        }
        if self.is_vector() {
            write!(f, "<{} x ", self.lane)?;
        }
        if self.fp {
            match self.bits {
                16 => write!(f, "half")?,
                32 => write!(f, "float")?,
                64 => write!(f, "double")?,
                128 => write!(f, "fp128")?,
                _ => write!(f, "f{}", self.bits)?,
            }
        } else {
            write!(f, "i{}", self.bits)?;
        }
        if self.is_vector() {
            write!(f, ">")?;
        }
        Ok(())
    }
}

/// All integer reinterpretations of `ty`'s width with element sizes drawn
/// from {64, 32, 16, 8}. Widths not divisible by 8 only reinterpret as
/// themselves.
pub fn integer_vector_types(ty: Type) -> Vec<Type> {
    let width = ty.width();
    if width % 8 != 0 {
        return vec![ty];
    }
    let mut types = Vec::new();
    for bits in [64u32, 32, 16, 8] {
        if width % bits == 0 && width >= bits {
            types.push(Type::integer_vectorizable(width / bits, bits));
        }
    }
    types
}

/// Integer and FP vectorizations of `width` used by the shuffle
/// enumeration: every element size that divides the width, FP shapes only
/// for the IEEE widths.
pub fn shuffle_work_types(expected: Type) -> Vec<Type> {
    if expected.is_fp() {
        return vec![expected];
    }
    integer_vector_types(expected)
}

pub mod workty {
    //! Per-operator work-type enumeration.

    use super::{integer_vector_types, Type};
    use crate::ops::{BinOp, UnOp};

    /// Legal work types to evaluate binary op `op` in, targeting `expected`.
    ///
    /// Bitwise ops are lane independent and run on the whole width as one
    /// scalar; logical ops additionally accept the boolean shape only when
    /// the result is boolean; FP ops require the FP result type itself;
    /// everything else admits every integer vectorization of the width.
    pub fn binary(expected: Type, op: BinOp) -> Vec<Type> {
        if op.is_fp() {
            if !expected.is_fp() {
                return Vec::new();
            }
            return vec![expected];
        }
        if expected.is_fp() {
            return Vec::new();
        }
        if expected.is_bool() {
            if op.is_logical() {
                return vec![Type::bool()];
            }
            return Vec::new();
        }
        if op.is_logical() {
            // Lane independent: one scalar covering the full width.
            return vec![Type::integer(expected.width())];
        }
        integer_vector_types(expected)
    }

    /// Legal work types for unary op `op`, targeting `expected`.
    pub fn unary(expected: Type, op: UnOp) -> Vec<Type> {
        if op.is_fp() {
            if !expected.is_fp() {
                return Vec::new();
            }
            return vec![expected];
        }
        if expected.is_fp() {
            return Vec::new();
        }
        let mut tys = Vec::new();
        for ty in integer_vector_types(expected) {
            if op == UnOp::Bswap && (ty.bits() < 16 || ty.bits() % 8 != 0) {
                continue;
            }
            tys.push(ty);
        }
        tys
    }

    /// Element shapes an insert-element sketch may build `expected` out of.
    pub fn insert_element(expected: Type) -> Vec<Type> {
        if expected.is_fp() {
            if expected.lane() < 2 {
                return Vec::new();
            }
            return vec![expected];
        }
        integer_vector_types(expected)
            .into_iter()
            .filter(|t| t.lane() >= 2)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_is_lane_times_bits() {
        for (lane, bits) in [(1, 32), (4, 8), (8, 64), (2, 16)] {
            let t = Type::integer_vectorizable(lane, bits);
            assert_eq!(t.width(), lane * bits);
        }
    }

    #[test]
    fn scalar_vector_round_trip() {
        let tys = [
            Type::integer(32),
            Type::integer_vectorizable(4, 16),
            Type::float_vectorizable(2, 64),
        ];
        for t in tys {
            assert_eq!(t.as_vector(t.lane()).as_scalar(), t.as_scalar());
        }
    }

    #[test]
    fn null_type_is_invalid() {
        assert!(!Type::null().is_valid());
        assert!(Type::integer(1).is_valid());
    }

    #[test]
    fn bool_shape() {
        assert!(Type::bool().is_bool());
        assert!(!Type::integer(8).is_bool());
        assert!(!Type::float_vectorizable(1, 32).is_bool());
    }

    #[test]
    fn as_integer_flattens_fp() {
        let t = Type::float_vectorizable(4, 32);
        assert_eq!(t.as_integer(), Type::integer(128));
        let i = Type::integer_vectorizable(2, 8);
        assert_eq!(i.as_integer(), i);
    }

    #[test]
    fn integer_vector_types_preserve_width() {
        let t = Type::integer_vectorizable(4, 32);
        let tys = integer_vector_types(t);
        assert!(!tys.is_empty());
        for v in &tys {
            assert_eq!(v.width(), t.width());
        }
        // 128 bits: i64x2, i32x4, i16x8, i8x16.
        assert_eq!(tys.len(), 4);
    }

    #[test]
    fn odd_widths_only_reinterpret_as_themselves() {
        let t = Type::integer(33);
        assert_eq!(integer_vector_types(t), vec![t]);
    }
}

// Closed catalog of target SIMD intrinsics. Every entry carries compile-time-known
// operand and result shapes as (lane, bits) pairs, a semantic family tag the
// interpreter dispatches on, and the textual name used by the IR parser/printer
// ("llvm.x86." prefix omitted). The enumerator draws candidates from the binary
// table only; the ternary table is recognized by the slicer and the interpreter.

use crate::types::Type;

/// Index into [`binop_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimdBinOpId(pub u16);

/// Index into [`ternop_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimdTernOpId(pub u16);

/// Semantic family of a binary SIMD intrinsic; drives concrete evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdBinKind {
    /// Unsigned rounding average per element.
    Avg,
    /// Byte shuffle with per-lane control (pshufb).
    Shufb,
    /// Shift left by the low 64 bits of the count vector.
    ShlWide,
    /// Logical shift right by the low 64 bits of the count vector.
    SrlWide,
    /// Arithmetic shift right by the low 64 bits of the count vector.
    SraWide,
    /// Shift left by a scalar immediate count.
    ShlImm,
    /// Logical shift right by a scalar immediate count.
    SrlImm,
    /// Arithmetic shift right by a scalar immediate count.
    SraImm,
    /// Per-element variable shift left.
    ShlVar,
    /// Per-element variable logical shift right.
    SrlVar,
    /// Per-element variable arithmetic shift right.
    SraVar,
    /// High half of signed widening multiply.
    MulHiS,
    /// High half of unsigned widening multiply.
    MulHiU,
    /// Multiply adjacent signed 16-bit pairs, add horizontally into 32 bits.
    MaddWd,
    /// Multiply unsigned bytes with signed bytes, saturating pairwise add.
    MaddUbsW,
    /// Signed saturating pack to the next narrower element.
    PackSs,
    /// Unsigned saturating pack to the next narrower element.
    PackUs,
    /// Sum of absolute byte differences per 64-bit chunk.
    Sad,
}

/// Semantic family of a ternary SIMD intrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdTernKind {
    /// Byte blend controlled by the sign bit of the third operand.
    BlendVb,
}

/// One binary intrinsic: name (without the `llvm.x86.` prefix) and the
/// statically known shapes.
#[derive(Debug, Clone, Copy)]
pub struct SimdBinOp {
    pub name: &'static str,
    pub kind: SimdBinKind,
    pub op0: (u32, u32),
    pub op1: (u32, u32),
    pub ret: (u32, u32),
}

#[derive(Debug, Clone, Copy)]
pub struct SimdTernOp {
    pub name: &'static str,
    pub kind: SimdTernKind,
    pub op0: (u32, u32),
    pub op1: (u32, u32),
    pub op2: (u32, u32),
    pub ret: (u32, u32),
}

use SimdBinKind::*;

static BINOPS: &[SimdBinOp] = &[
    // Averages.
    SimdBinOp { name: "sse2.pavg.b", kind: Avg, op0: (16, 8), op1: (16, 8), ret: (16, 8) },
    SimdBinOp { name: "sse2.pavg.w", kind: Avg, op0: (8, 16), op1: (8, 16), ret: (8, 16) },
    SimdBinOp { name: "avx2.pavg.b", kind: Avg, op0: (32, 8), op1: (32, 8), ret: (32, 8) },
    SimdBinOp { name: "avx2.pavg.w", kind: Avg, op0: (16, 16), op1: (16, 16), ret: (16, 16) },
    SimdBinOp { name: "avx512.pavg.b.512", kind: Avg, op0: (64, 8), op1: (64, 8), ret: (64, 8) },
    SimdBinOp { name: "avx512.pavg.w.512", kind: Avg, op0: (32, 16), op1: (32, 16), ret: (32, 16) },
    // Byte shuffles.
    SimdBinOp { name: "ssse3.pshuf.b.128", kind: Shufb, op0: (16, 8), op1: (16, 8), ret: (16, 8) },
    SimdBinOp { name: "avx2.pshuf.b", kind: Shufb, op0: (32, 8), op1: (32, 8), ret: (32, 8) },
    SimdBinOp { name: "avx512.pshuf.b.512", kind: Shufb, op0: (64, 8), op1: (64, 8), ret: (64, 8) },
    // Shift left, whole-vector count.
    SimdBinOp { name: "sse2.psll.w", kind: ShlWide, op0: (8, 16), op1: (8, 16), ret: (8, 16) },
    SimdBinOp { name: "sse2.psll.d", kind: ShlWide, op0: (4, 32), op1: (4, 32), ret: (4, 32) },
    SimdBinOp { name: "sse2.psll.q", kind: ShlWide, op0: (2, 64), op1: (2, 64), ret: (2, 64) },
    SimdBinOp { name: "avx2.psll.w", kind: ShlWide, op0: (16, 16), op1: (8, 16), ret: (16, 16) },
    SimdBinOp { name: "avx2.psll.d", kind: ShlWide, op0: (8, 32), op1: (4, 32), ret: (8, 32) },
    SimdBinOp { name: "avx2.psll.q", kind: ShlWide, op0: (4, 64), op1: (2, 64), ret: (4, 64) },
    SimdBinOp { name: "avx512.psll.w.512", kind: ShlWide, op0: (32, 16), op1: (8, 16), ret: (32, 16) },
    SimdBinOp { name: "avx512.psll.d.512", kind: ShlWide, op0: (16, 32), op1: (4, 32), ret: (16, 32) },
    SimdBinOp { name: "avx512.psll.q.512", kind: ShlWide, op0: (8, 64), op1: (2, 64), ret: (8, 64) },
    // Logical shift right, whole-vector count.
    SimdBinOp { name: "sse2.psrl.w", kind: SrlWide, op0: (8, 16), op1: (8, 16), ret: (8, 16) },
    SimdBinOp { name: "sse2.psrl.d", kind: SrlWide, op0: (4, 32), op1: (4, 32), ret: (4, 32) },
    SimdBinOp { name: "sse2.psrl.q", kind: SrlWide, op0: (2, 64), op1: (2, 64), ret: (2, 64) },
    SimdBinOp { name: "avx2.psrl.w", kind: SrlWide, op0: (16, 16), op1: (8, 16), ret: (16, 16) },
    SimdBinOp { name: "avx2.psrl.d", kind: SrlWide, op0: (8, 32), op1: (4, 32), ret: (8, 32) },
    SimdBinOp { name: "avx2.psrl.q", kind: SrlWide, op0: (4, 64), op1: (2, 64), ret: (4, 64) },
    SimdBinOp { name: "avx512.psrl.w.512", kind: SrlWide, op0: (32, 16), op1: (8, 16), ret: (32, 16) },
    SimdBinOp { name: "avx512.psrl.d.512", kind: SrlWide, op0: (16, 32), op1: (4, 32), ret: (16, 32) },
    SimdBinOp { name: "avx512.psrl.q.512", kind: SrlWide, op0: (8, 64), op1: (2, 64), ret: (8, 64) },
    // Arithmetic shift right, whole-vector count.
    SimdBinOp { name: "sse2.psra.w", kind: SraWide, op0: (8, 16), op1: (8, 16), ret: (8, 16) },
    SimdBinOp { name: "sse2.psra.d", kind: SraWide, op0: (4, 32), op1: (4, 32), ret: (4, 32) },
    SimdBinOp { name: "avx2.psra.w", kind: SraWide, op0: (16, 16), op1: (8, 16), ret: (16, 16) },
    SimdBinOp { name: "avx2.psra.d", kind: SraWide, op0: (8, 32), op1: (4, 32), ret: (8, 32) },
    SimdBinOp { name: "avx512.psra.q.128", kind: SraWide, op0: (2, 64), op1: (2, 64), ret: (2, 64) },
    SimdBinOp { name: "avx512.psra.q.256", kind: SraWide, op0: (4, 64), op1: (2, 64), ret: (4, 64) },
    SimdBinOp { name: "avx512.psra.w.512", kind: SraWide, op0: (32, 16), op1: (8, 16), ret: (32, 16) },
    SimdBinOp { name: "avx512.psra.d.512", kind: SraWide, op0: (16, 32), op1: (4, 32), ret: (16, 32) },
    SimdBinOp { name: "avx512.psra.q.512", kind: SraWide, op0: (8, 64), op1: (2, 64), ret: (8, 64) },
    // Immediate-count shifts.
    SimdBinOp { name: "sse2.pslli.w", kind: ShlImm, op0: (8, 16), op1: (1, 32), ret: (8, 16) },
    SimdBinOp { name: "sse2.pslli.d", kind: ShlImm, op0: (4, 32), op1: (1, 32), ret: (4, 32) },
    SimdBinOp { name: "sse2.pslli.q", kind: ShlImm, op0: (2, 64), op1: (1, 32), ret: (2, 64) },
    SimdBinOp { name: "sse2.psrli.w", kind: SrlImm, op0: (8, 16), op1: (1, 32), ret: (8, 16) },
    SimdBinOp { name: "sse2.psrli.d", kind: SrlImm, op0: (4, 32), op1: (1, 32), ret: (4, 32) },
    SimdBinOp { name: "sse2.psrli.q", kind: SrlImm, op0: (2, 64), op1: (1, 32), ret: (2, 64) },
    SimdBinOp { name: "sse2.psrai.w", kind: SraImm, op0: (8, 16), op1: (1, 32), ret: (8, 16) },
    SimdBinOp { name: "sse2.psrai.d", kind: SraImm, op0: (4, 32), op1: (1, 32), ret: (4, 32) },
    // Per-element variable shifts.
    SimdBinOp { name: "avx2.psllv.d", kind: ShlVar, op0: (4, 32), op1: (4, 32), ret: (4, 32) },
    SimdBinOp { name: "avx2.psllv.d.256", kind: ShlVar, op0: (8, 32), op1: (8, 32), ret: (8, 32) },
    SimdBinOp { name: "avx2.psllv.q", kind: ShlVar, op0: (2, 64), op1: (2, 64), ret: (2, 64) },
    SimdBinOp { name: "avx2.psllv.q.256", kind: ShlVar, op0: (4, 64), op1: (4, 64), ret: (4, 64) },
    SimdBinOp { name: "avx512.psllv.w.512", kind: ShlVar, op0: (32, 16), op1: (32, 16), ret: (32, 16) },
    SimdBinOp { name: "avx2.psrlv.d", kind: SrlVar, op0: (4, 32), op1: (4, 32), ret: (4, 32) },
    SimdBinOp { name: "avx2.psrlv.d.256", kind: SrlVar, op0: (8, 32), op1: (8, 32), ret: (8, 32) },
    SimdBinOp { name: "avx2.psrlv.q", kind: SrlVar, op0: (2, 64), op1: (2, 64), ret: (2, 64) },
    SimdBinOp { name: "avx2.psrlv.q.256", kind: SrlVar, op0: (4, 64), op1: (4, 64), ret: (4, 64) },
    SimdBinOp { name: "avx512.psrlv.w.512", kind: SrlVar, op0: (32, 16), op1: (32, 16), ret: (32, 16) },
    SimdBinOp { name: "avx2.psrav.d", kind: SraVar, op0: (4, 32), op1: (4, 32), ret: (4, 32) },
    SimdBinOp { name: "avx2.psrav.d.256", kind: SraVar, op0: (8, 32), op1: (8, 32), ret: (8, 32) },
    SimdBinOp { name: "avx512.psrav.q.128", kind: SraVar, op0: (2, 64), op1: (2, 64), ret: (2, 64) },
    SimdBinOp { name: "avx512.psrav.q.256", kind: SraVar, op0: (4, 64), op1: (4, 64), ret: (4, 64) },
    // Multiply-high.
    SimdBinOp { name: "sse2.pmulh.w", kind: MulHiS, op0: (8, 16), op1: (8, 16), ret: (8, 16) },
    SimdBinOp { name: "sse2.pmulhu.w", kind: MulHiU, op0: (8, 16), op1: (8, 16), ret: (8, 16) },
    SimdBinOp { name: "avx2.pmulh.w", kind: MulHiS, op0: (16, 16), op1: (16, 16), ret: (16, 16) },
    SimdBinOp { name: "avx2.pmulhu.w", kind: MulHiU, op0: (16, 16), op1: (16, 16), ret: (16, 16) },
    SimdBinOp { name: "avx512.pmulh.w.512", kind: MulHiS, op0: (32, 16), op1: (32, 16), ret: (32, 16) },
    SimdBinOp { name: "avx512.pmulhu.w.512", kind: MulHiU, op0: (32, 16), op1: (32, 16), ret: (32, 16) },
    // Multiply-add.
    SimdBinOp { name: "sse2.pmadd.wd", kind: MaddWd, op0: (8, 16), op1: (8, 16), ret: (4, 32) },
    SimdBinOp { name: "avx2.pmadd.wd", kind: MaddWd, op0: (16, 16), op1: (16, 16), ret: (8, 32) },
    SimdBinOp { name: "avx512.pmaddw.d.512", kind: MaddWd, op0: (32, 16), op1: (32, 16), ret: (16, 32) },
    SimdBinOp { name: "ssse3.pmadd.ub.sw.128", kind: MaddUbsW, op0: (16, 8), op1: (16, 8), ret: (8, 16) },
    SimdBinOp { name: "avx2.pmadd.ub.sw", kind: MaddUbsW, op0: (32, 8), op1: (32, 8), ret: (16, 16) },
    SimdBinOp { name: "avx512.pmaddubs.w.512", kind: MaddUbsW, op0: (64, 8), op1: (64, 8), ret: (32, 16) },
    // Saturating packs.
    SimdBinOp { name: "sse2.packsswb.128", kind: PackSs, op0: (8, 16), op1: (8, 16), ret: (16, 8) },
    SimdBinOp { name: "sse2.packssdw.128", kind: PackSs, op0: (4, 32), op1: (4, 32), ret: (8, 16) },
    SimdBinOp { name: "sse2.packuswb.128", kind: PackUs, op0: (8, 16), op1: (8, 16), ret: (16, 8) },
    SimdBinOp { name: "sse41.packusdw", kind: PackUs, op0: (4, 32), op1: (4, 32), ret: (8, 16) },
    SimdBinOp { name: "avx2.packsswb", kind: PackSs, op0: (16, 16), op1: (16, 16), ret: (32, 8) },
    SimdBinOp { name: "avx2.packssdw", kind: PackSs, op0: (8, 32), op1: (8, 32), ret: (16, 16) },
    SimdBinOp { name: "avx2.packuswb", kind: PackUs, op0: (16, 16), op1: (16, 16), ret: (32, 8) },
    SimdBinOp { name: "avx2.packusdw", kind: PackUs, op0: (8, 32), op1: (8, 32), ret: (16, 16) },
    SimdBinOp { name: "avx512.packsswb.512", kind: PackSs, op0: (32, 16), op1: (32, 16), ret: (64, 8) },
    SimdBinOp { name: "avx512.packuswb.512", kind: PackUs, op0: (32, 16), op1: (32, 16), ret: (64, 8) },
    // Sum of absolute differences.
    SimdBinOp { name: "sse2.psad.bw", kind: Sad, op0: (16, 8), op1: (16, 8), ret: (2, 64) },
    SimdBinOp { name: "avx2.psad.bw", kind: Sad, op0: (32, 8), op1: (32, 8), ret: (4, 64) },
    SimdBinOp { name: "avx512.psad.bw.512", kind: Sad, op0: (64, 8), op1: (64, 8), ret: (8, 64) },
];

static TERNOPS: &[SimdTernOp] = &[
    SimdTernOp {
        name: "sse41.pblendvb",
        kind: SimdTernKind::BlendVb,
        op0: (16, 8),
        op1: (16, 8),
        op2: (16, 8),
        ret: (16, 8),
    },
    SimdTernOp {
        name: "avx2.pblendvb",
        kind: SimdTernKind::BlendVb,
        op0: (32, 8),
        op1: (32, 8),
        op2: (32, 8),
        ret: (32, 8),
    },
];

pub fn binop_table() -> &'static [SimdBinOp] {
    BINOPS
}

pub fn ternop_table() -> &'static [SimdTernOp] {
    TERNOPS
}

pub fn binop(id: SimdBinOpId) -> &'static SimdBinOp {
    &BINOPS[id.0 as usize]
}

pub fn ternop(id: SimdTernOpId) -> &'static SimdTernOp {
    &TERNOPS[id.0 as usize]
}

pub fn find_binop(name: &str) -> Option<SimdBinOpId> {
    BINOPS
        .iter()
        .position(|op| op.name == name)
        .map(|i| SimdBinOpId(i as u16))
}

pub fn find_ternop(name: &str) -> Option<SimdTernOpId> {
    TERNOPS
        .iter()
        .position(|op| op.name == name)
        .map(|i| SimdTernOpId(i as u16))
}

fn shape_ty(shape: (u32, u32)) -> Type {
    Type::integer_vectorizable(shape.0, shape.1)
}

pub fn binop_op0_ty(id: SimdBinOpId) -> Type {
    shape_ty(binop(id).op0)
}

pub fn binop_op1_ty(id: SimdBinOpId) -> Type {
    shape_ty(binop(id).op1)
}

pub fn binop_ret_ty(id: SimdBinOpId) -> Type {
    shape_ty(binop(id).ret)
}

/// True for the AVX-512 subset (any operand or the result occupies 512 bits).
pub fn is_512(id: SimdBinOpId) -> bool {
    let op = binop(id);
    [op.op0, op.op1, op.ret]
        .iter()
        .any(|(lane, bits)| lane * bits == 512)
}

/// Intrinsic predicate used by the slicer: names our module format treats as
/// known, side-effect-free intrinsic declarations.
pub fn is_intrinsic_name(name: &str) -> bool {
    find_binop(name).is_some()
        || find_ternop(name).is_some()
        || matches!(
            name,
            "bitreverse" | "bswap" | "ctpop" | "ctlz" | "cttz" | "fabs" | "ceil" | "floor"
                | "rint" | "nearbyint" | "round" | "roundeven" | "trunc" | "umax" | "umin"
                | "smax" | "smin" | "maxnum" | "minnum" | "maximum" | "minimum" | "copysign"
        )
        || name.starts_with("__fksv")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_round_trips() {
        for (i, op) in binop_table().iter().enumerate() {
            let id = find_binop(op.name).expect("name resolves");
            assert_eq!(id.0 as usize, i);
        }
    }

    #[test]
    fn shapes_are_consistent() {
        // Every table entry has non-degenerate operand shapes and a legal
        // vector width.
        for op in binop_table() {
            for (lane, bits) in [op.op0, op.op1, op.ret] {
                assert!(lane >= 1 && bits >= 1, "{}", op.name);
                assert!(lane * bits <= 512, "{}", op.name);
            }
        }
    }

    #[test]
    fn classifies_512_bit_subset() {
        let avg512 = find_binop("avx512.pavg.b.512").unwrap();
        assert!(is_512(avg512));
        let avg128 = find_binop("sse2.pavg.b").unwrap();
        assert!(!is_512(avg128));
    }

    #[test]
    fn pack_changes_shape() {
        let pack = find_binop("sse2.packssdw.128").unwrap();
        assert_eq!(binop_op0_ty(pack), Type::integer_vectorizable(4, 32));
        assert_eq!(binop_ret_ty(pack), Type::integer_vectorizable(8, 16));
        assert!(binop_ret_ty(pack).same_width(&binop_op0_ty(pack)));
    }
}

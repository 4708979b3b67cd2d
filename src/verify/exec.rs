// The bundled verification backend: deterministic concrete execution. Small
// input spaces are checked exhaustively; everything else runs a special-value
// corpus plus seeded pseudo-random sampling. Equivalence holds when no input
// refutes it (target must refine source: source poison permits anything,
// source UB skips the input, defined source lanes must match exactly).
//
// Constant synthesis is search-based: a typed candidate pool per hole
// (special constants, constants harvested from the source, lane indexes for
// index holes, broadcast/identity/reverse patterns for shuffle masks), each
// assignment validated by the equivalence check, with previously seen
// counterexamples tried first.

use super::{Backend, Transform, VerifyError};
use crate::expr::ConstMap;
use crate::ir::interp::{eval_function, EvalError, Val};
use crate::ir::{Constant, Function};
use crate::types::Type;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Total live-in width at or below which the input space is enumerated
/// exhaustively.
const EXHAUSTIVE_BITS: u32 = 16;
/// Pseudo-random samples per equivalence query.
const RANDOM_SAMPLES: usize = 256;
/// Cap on constant-assignment combinations tried during synthesis.
const SYNTH_COMBOS: usize = 4096;

const RNG_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

pub struct ExecBackend {
    samples: usize,
}

impl ExecBackend {
    pub fn new() -> ExecBackend {
        ExecBackend { samples: RANDOM_SAMPLES }
    }
}

impl Default for ExecBackend {
    fn default() -> Self {
        ExecBackend::new()
    }
}

impl Backend for ExecBackend {
    fn equivalent(&mut self, t: &Transform<'_>) -> Result<(), VerifyError> {
        let inputs = input_corpus(t.src, self.samples);
        check_all(t, &inputs)
    }

    fn synthesize_constants(&mut self, t: &Transform<'_>) -> Result<ConstMap, VerifyError> {
        let live = t.live_in_params();
        let inputs = live_in_corpus(t.src, &live, self.samples);

        let pools: Vec<Vec<Constant>> = t
            .holes
            .iter()
            .map(|h| constant_pool(t.src, h.ty))
            .collect();
        if pools.iter().any(|p| p.is_empty()) {
            return Err(VerifyError::TypeError("empty constant pool for hole".into()));
        }

        // Counterexamples found so far, tried first against new assignments.
        let mut cex: Vec<Vec<Val>> = Vec::new();
        let mut indices = vec![0usize; pools.len()];
        let mut tried = 0usize;
        loop {
            let assignment: Vec<&Constant> =
                indices.iter().zip(&pools).map(|(i, p)| &p[*i]).collect();
            let full_inputs: Vec<Vec<Val>> = inputs
                .iter()
                .map(|live_vals| bind_holes(t, live_vals, &assignment))
                .collect();
            let cex_inputs: Vec<Vec<Val>> = cex
                .iter()
                .map(|live_vals| bind_holes(t, live_vals, &assignment))
                .collect();

            let mut refuted = None;
            for input in cex_inputs.iter().chain(full_inputs.iter()) {
                match check_one(t, input) {
                    Ok(()) => {}
                    Err(VerifyError::CounterExample) => {
                        refuted = Some(strip_holes(t, input));
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            match refuted {
                None => {
                    let mut map = ConstMap::new();
                    for (h, c) in t.holes.iter().zip(&assignment) {
                        map.insert(h.hole, (*c).clone());
                    }
                    return Ok(map);
                }
                Some(bad) => {
                    if !cex.contains(&bad) {
                        cex.push(bad);
                    }
                }
            }

            tried += 1;
            if tried >= SYNTH_COMBOS || !bump(&mut indices, &pools) {
                return Err(VerifyError::CounterExample);
            }
        }
    }
}

fn bump(indices: &mut [usize], pools: &[Vec<Constant>]) -> bool {
    for (i, p) in indices.iter_mut().zip(pools) {
        *i += 1;
        if *i < p.len() {
            return true;
        }
        *i = 0;
    }
    false
}

/// Bind a live-in vector into a full argument vector with holes filled.
fn bind_holes(t: &Transform<'_>, live_vals: &[Val], assignment: &[&Constant]) -> Vec<Val> {
    let mut args: Vec<Option<Val>> = vec![None; t.src.params.len()];
    for (h, c) in t.holes.iter().zip(assignment) {
        args[h.param as usize] = Some(Val::from_const(c));
    }
    let mut live_iter = live_vals.iter();
    for slot in args.iter_mut() {
        if slot.is_none() {
            *slot = live_iter.next().cloned();
        }
    }
    args.into_iter().map(|v| v.expect("argument bound")).collect()
}

/// Project a full argument vector back onto the live-in positions.
fn strip_holes(t: &Transform<'_>, input: &[Val]) -> Vec<Val> {
    t.live_in_params().into_iter().map(|i| input[i].clone()).collect()
}

fn check_all(t: &Transform<'_>, inputs: &[Vec<Val>]) -> Result<(), VerifyError> {
    for input in inputs {
        check_one(t, input)?;
    }
    Ok(())
}

fn check_one(t: &Transform<'_>, input: &[Val]) -> Result<(), VerifyError> {
    let src_out = match eval_function(t.src_module, t.src, input) {
        Ok(v) => v,
        Err(EvalError::Ub) => return Ok(()),
        Err(EvalError::Unsupported(msg)) => {
            log::debug!(target: "peepopt::verify", "source not evaluable: {}", msg);
            return Err(VerifyError::SlowVcgen);
        }
    };
    let tgt_out = match eval_function(t.tgt_module, t.tgt, input) {
        Ok(v) => v,
        Err(EvalError::Ub) => return Err(VerifyError::CounterExample),
        Err(EvalError::Unsupported(msg)) => {
            return Err(VerifyError::TypeError(format!("target not evaluable: {}", msg)))
        }
    };
    for (s, c) in src_out.lanes.iter().zip(&tgt_out.lanes) {
        match (s, c) {
            (None, _) => {}
            (Some(sv), Some(cv)) if sv == cv => {}
            _ => return Err(VerifyError::CounterExample),
        }
    }
    Ok(())
}

/// Deterministic input corpus over all parameters.
fn input_corpus(func: &Function, samples: usize) -> Vec<Vec<Val>> {
    let all: Vec<usize> = (0..func.params.len()).collect();
    live_in_corpus(func, &all, samples)
}

/// Corpus over the given parameter positions only.
fn live_in_corpus(func: &Function, params: &[usize], samples: usize) -> Vec<Vec<Val>> {
    let tys: Vec<Type> = params.iter().map(|i| func.params[*i].ty).collect();
    let total_bits: u32 = tys.iter().map(|t| t.width()).sum();

    if total_bits <= EXHAUSTIVE_BITS && !tys.iter().any(|t| t.is_fp()) {
        return exhaustive_corpus(&tys, total_bits);
    }

    let mut out: Vec<Vec<Val>> = Vec::new();
    let specials: Vec<Vec<Val>> = tys.iter().map(|t| special_values(*t)).collect();
    // Cross product of special values, capped.
    let mut idx = vec![0usize; tys.len()];
    loop {
        out.push(idx.iter().zip(&specials).map(|(i, s)| s[*i].clone()).collect());
        if out.len() >= 1024 {
            break;
        }
        let mut done = true;
        for (i, s) in idx.iter_mut().zip(&specials) {
            *i += 1;
            if *i < s.len() {
                done = false;
                break;
            }
            *i = 0;
        }
        if done {
            break;
        }
    }
    // Seeded random tail.
    let mut rng = StdRng::seed_from_u64(RNG_SEED);
    for _ in 0..samples {
        out.push(tys.iter().map(|t| random_value(&mut rng, *t)).collect());
    }
    out
}

fn exhaustive_corpus(tys: &[Type], total_bits: u32) -> Vec<Vec<Val>> {
    let count: u64 = 1u64 << total_bits;
    let mut out = Vec::with_capacity(count as usize);
    for pattern in 0..count {
        let mut rest = pattern;
        let mut input = Vec::with_capacity(tys.len());
        for t in tys {
            let mut lanes = Vec::with_capacity(t.lane() as usize);
            for _ in 0..t.lane() {
                let v = rest & ((1u64 << t.bits()) - 1).max(1);
                lanes.push(Some(crate::ir::mask_to(v, t.bits())));
                rest >>= t.bits();
            }
            input.push(Val { ty: *t, lanes });
        }
        out.push(input);
    }
    out
}

fn special_bit_patterns(bits: u32) -> Vec<u64> {
    let mask = crate::ir::mask_to(u64::MAX, bits);
    let mut v = vec![
        0,
        1,
        2,
        mask,
        mask - 1,
        1u64 << (bits - 1),
        (1u64 << (bits - 1)).wrapping_sub(1),
        0xaaaa_aaaa_aaaa_aaaa & mask,
        0x5555_5555_5555_5555 & mask,
    ];
    v.dedup();
    v
}

fn special_fp_patterns(bits: u32) -> Vec<u64> {
    match bits {
        16 => vec![0x0000, 0x8000, 0x3c00, 0xbc00, 0x7c00, 0xfc00, 0x7e00, 0x0001, 0x4000],
        32 => vec![
            0x0000_0000,
            0x8000_0000,
            0x3f80_0000,          // 1.0
            0xbf80_0000,          // -1.0
            0x7f80_0000,          // inf
            0xff80_0000,          // -inf
            0x7fc0_0000,          // NaN
            0x0000_0001,          // min denormal
            0x4000_0000,          // 2.0
            0x3f00_0000,          // 0.5
        ],
        64 => vec![
            0x0000_0000_0000_0000,
            0x8000_0000_0000_0000,
            0x3ff0_0000_0000_0000, // 1.0
            0xbff0_0000_0000_0000, // -1.0
            0x7ff0_0000_0000_0000, // inf
            0xfff0_0000_0000_0000, // -inf
            0x7ff8_0000_0000_0000, // NaN
            0x0000_0000_0000_0001, // min denormal
            0x4000_0000_0000_0000, // 2.0
        ],
        _ => vec![0],
    }
}

fn special_values(ty: Type) -> Vec<Val> {
    let patterns = if ty.is_fp() {
        special_fp_patterns(ty.bits())
    } else {
        special_bit_patterns(ty.bits())
    };
    let mut out: Vec<Val> = patterns.iter().map(|p| Val::splat(ty, *p)).collect();
    if ty.lane() > 1 && patterns.len() >= 2 {
        // One non-uniform vector keeps lane mixups visible.
        let lanes = (0..ty.lane() as usize)
            .map(|i| Some(crate::ir::mask_to(patterns[i % patterns.len()], ty.bits())))
            .collect();
        out.push(Val { ty, lanes });
    }
    out
}

fn random_value(rng: &mut StdRng, ty: Type) -> Val {
    let lanes = (0..ty.lane())
        .map(|_| Some(crate::ir::mask_to(rng.gen::<u64>(), ty.bits())))
        .collect();
    Val { ty, lanes }
}

/// Typed constant pool for one hole.
fn constant_pool(src: &Function, ty: Type) -> Vec<Constant> {
    if !ty.is_valid() {
        return Vec::new();
    }
    let mut out: Vec<Constant> = Vec::new();
    let mut push = |c: Constant| {
        if !out.contains(&c) {
            out.push(c);
        }
    };
    if ty.is_fp() {
        for p in special_fp_patterns(ty.bits()) {
            push(Constant::splat(ty, p));
        }
        return out;
    }
    // Index holes (i16 scalars) enumerate small lane numbers first.
    if ty == Type::integer(16) {
        for i in 0..16u64 {
            push(Constant::scalar(ty, i));
        }
    }
    // Shuffle-mask holes get broadcast, identity, reverse and rotation
    // patterns over the source-lane range.
    if ty.is_vector() && ty.bits() == 32 {
        let n = ty.lane() as u64;
        for b in 0..(2 * n).min(16) {
            push(Constant::splat(ty, b));
        }
        push(Constant::vector(ty, (0..n).collect()));
        push(Constant::vector(ty, (0..n).rev().collect()));
        push(Constant::vector(ty, (0..n).map(|i| (i + 1) % n).collect()));
        push(Constant::vector(ty, (0..n).map(|i| i + n).collect()));
    }
    for p in special_bit_patterns(ty.bits()) {
        push(Constant::splat(ty, p));
    }
    // Small integers cover shift amounts and lane counts.
    for k in 0..ty.bits().min(64) as u64 {
        push(Constant::splat(ty, k));
    }
    // Low bit-masks and powers of two.
    let step = if ty.bits() > 16 { 4 } else { 1 };
    let mut k = 1u32;
    while k < ty.bits() {
        push(Constant::splat(ty, crate::ir::mask_to(u64::MAX, k)));
        push(Constant::splat(ty, 1u64 << k));
        k += step;
    }
    // Constants already present in the source, reinterpreted per lane.
    for c in &src.consts {
        if c.is_poison() {
            continue;
        }
        if c.ty.bits() == ty.bits() {
            for &l in c.lanes() {
                push(Constant::splat(ty, l));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;
    use crate::ir::Module;
    use crate::verify::HoleParam;

    fn transform<'t>(
        src: &'t Module,
        tgt: &'t Module,
        holes: Vec<HoleParam>,
    ) -> Transform<'t> {
        Transform::new(src, tgt, holes).unwrap()
    }

    #[test]
    fn and_x_x_is_x() {
        let src = parse_module(
            "define i32 @s(i32 %x) {\nentry:\n  %a = and i32 %x, %x\n  ret i32 %a\n}",
        )
        .unwrap();
        let tgt =
            parse_module("define i32 @t(i32 %x) {\nentry:\n  %c = or i32 %x, 0\n  ret i32 %c\n}")
                .unwrap();
        let t = transform(&src, &tgt, vec![]);
        ExecBackend::new().equivalent(&t).unwrap();
    }

    #[test]
    fn add_is_not_sub() {
        let src = parse_module(
            "define i32 @s(i32 %x, i32 %y) {\nentry:\n  %a = add i32 %x, %y\n  ret i32 %a\n}",
        )
        .unwrap();
        let tgt = parse_module(
            "define i32 @t(i32 %x, i32 %y) {\nentry:\n  %a = sub i32 %x, %y\n  ret i32 %a\n}",
        )
        .unwrap();
        let t = transform(&src, &tgt, vec![]);
        assert_eq!(
            ExecBackend::new().equivalent(&t),
            Err(VerifyError::CounterExample)
        );
    }

    #[test]
    fn synthesizes_zero_for_or_identity() {
        // src: x | 0 == x ; tgt: x | C with hole C.
        let src = parse_module(
            "define i32 @s(i32 %x, i32 %c) {\nentry:\n  ret i32 %x\n}",
        )
        .unwrap();
        let tgt = parse_module(
            "define i32 @t(i32 %x, i32 %c) {\nentry:\n  %r = or i32 %x, %c\n  ret i32 %r\n}",
        )
        .unwrap();
        let holes = vec![HoleParam { hole: 0, param: 1, ty: Type::integer(32) }];
        let t = transform(&src, &tgt, holes);
        let map = ExecBackend::new().synthesize_constants(&t).unwrap();
        assert_eq!(map[&0], Constant::scalar(Type::integer(32), 0));
    }

    #[test]
    fn synthesizes_shift_for_mul_by_four() {
        // src: x * 4 ; tgt: x << C.
        let src = parse_module(
            "define i32 @s(i32 %x, i32 %c) {\nentry:\n  %m = mul i32 %x, 4\n  ret i32 %m\n}",
        )
        .unwrap();
        let tgt = parse_module(
            "define i32 @t(i32 %x, i32 %c) {\nentry:\n  %r = shl i32 %x, %c\n  ret i32 %r\n}",
        )
        .unwrap();
        let holes = vec![HoleParam { hole: 0, param: 1, ty: Type::integer(32) }];
        let t = transform(&src, &tgt, holes);
        let map = ExecBackend::new().synthesize_constants(&t).unwrap();
        assert_eq!(map[&0], Constant::scalar(Type::integer(32), 2));
    }

    #[test]
    fn fp_nan_refutes_mul_zero_identity() {
        // src: fadd x (fmul y 0.0) ; tgt: x. NaN in y refutes it.
        let src = parse_module(
            "define float @s(float %x, float %y) {\nentry:\n  %m = fmul float %y, 0x0\n  %a = fadd float %x, %m\n  ret float %a\n}",
        )
        .unwrap();
        let tgt = parse_module(
            "define float @t(float %x, float %y) {\nentry:\n  %z = fadd float %x, 0x0\n  ret float %z\n}",
        )
        .unwrap();
        let t = transform(&src, &tgt, vec![]);
        assert_eq!(
            ExecBackend::new().equivalent(&t),
            Err(VerifyError::CounterExample)
        );
    }

    #[test]
    fn exhaustive_small_widths() {
        // i8 identity through double negation, checked exhaustively.
        let src = parse_module(
            "define i8 @s(i8 %x) {\nentry:\n  %a = sub i8 0, %x\n  %b = sub i8 0, %a\n  ret i8 %b\n}",
        )
        .unwrap();
        let tgt = parse_module("define i8 @t(i8 %x) {\nentry:\n  ret i8 %x\n}").unwrap();
        let t = transform(&src, &tgt, vec![]);
        ExecBackend::new().equivalent(&t).unwrap();
    }
}

// Concrete evaluator for slice functions. Values are per-lane bit patterns with
// poison tracked as None; undefined behavior (division traps, reaching
// unreachable) aborts the run. The verifier's testing backend drives this over
// seeded inputs, so evaluation is split into small per-family helpers.
//
// FP evaluation uses native f32/f64 arithmetic; half goes through f32 with a
// final rounding step. fp128 is representable but not evaluable and reports
// Unsupported, which makes the caller decline the slice.

use super::{CastOp, ConstKind, Constant, Function, Module, Opcode, ValueRef};
use crate::intrinsics::{self, SimdBinKind, SimdTernKind};
use crate::ops::{BinOp, FCmpCond, ICmpCond, UnOp};
use crate::types::Type;
use std::collections::HashMap;

/// A runtime value: one bit pattern per lane, `None` for poison lanes.
#[derive(Debug, Clone, PartialEq)]
pub struct Val {
    pub ty: Type,
    pub lanes: Vec<Option<u64>>,
}

impl Val {
    pub fn from_const(c: &Constant) -> Val {
        match &c.kind {
            ConstKind::Poison => Val { ty: c.ty, lanes: vec![None; c.ty.lane() as usize] },
            ConstKind::Int(lanes) => {
                Val { ty: c.ty, lanes: lanes.iter().map(|&v| Some(v)).collect() }
            }
        }
    }

    pub fn scalar(ty: Type, v: u64) -> Val {
        Val { ty, lanes: vec![Some(super::mask_to(v, ty.bits()))] }
    }

    pub fn splat(ty: Type, v: u64) -> Val {
        Val { ty, lanes: vec![Some(super::mask_to(v, ty.bits())); ty.lane() as usize] }
    }

    pub fn poison(ty: Type) -> Val {
        Val { ty, lanes: vec![None; ty.lane() as usize] }
    }

    pub fn fully_defined(&self) -> bool {
        self.lanes.iter().all(|l| l.is_some())
    }

    /// Flatten to raw bits, lane 0 lowest. Poison lanes read as zero.
    pub fn to_bits(&self) -> Vec<u64> {
        let bits = self.ty.bits();
        let mut out = Vec::new();
        let mut acc = 0u64;
        let mut filled = 0u32;
        for l in &self.lanes {
            let v = l.unwrap_or(0);
            if bits >= 64 {
                out.push(v);
                continue;
            }
            acc |= v << filled;
            filled += bits;
            if filled >= 64 {
                out.push(acc);
                acc = 0;
                filled = 0;
            }
        }
        if filled > 0 || out.is_empty() {
            out.push(acc);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The construct has no evaluation (fp128 arithmetic, unknown callee).
    Unsupported(String),
    /// The execution hit immediate undefined behavior on this input.
    Ub,
}

const STEP_LIMIT: usize = 1 << 16;

/// Evaluate `func` on `args`; `args[i]` binds parameter `i`.
pub fn eval_function(module: &Module, func: &Function, args: &[Val]) -> Result<Val, EvalError> {
    if args.len() != func.params.len() {
        return Err(EvalError::Unsupported("argument count mismatch".into()));
    }
    let mut vals: HashMap<u32, Val> = HashMap::new();
    let mut cur = func.entry();
    let mut prev: Option<super::BlockId> = None;
    let mut steps = 0usize;

    loop {
        let block = &func.blocks[cur.0 as usize];
        // Parallel phi evaluation.
        let mut phi_updates: Vec<(u32, Val)> = Vec::new();
        for &id in &block.insts {
            let inst = func.inst(id);
            if !inst.is_phi() {
                break;
            }
            let Some(pb) = prev else {
                return Err(EvalError::Unsupported("phi in entry block".into()));
            };
            let Some(pos) = inst.blocks.iter().position(|b| *b == pb) else {
                return Err(EvalError::Ub);
            };
            let v = read(func, &vals, args, inst.args[pos])?;
            phi_updates.push((id.0, v));
        }
        for (id, v) in phi_updates {
            vals.insert(id, v);
        }

        for &id in &block.insts {
            steps += 1;
            if steps > STEP_LIMIT {
                return Err(EvalError::Unsupported("step limit exceeded".into()));
            }
            let inst = func.inst(id);
            if inst.is_phi() {
                continue;
            }
            if inst.is_terminator() {
                match inst.op {
                    Opcode::Ret => return read(func, &vals, args, inst.args[0]),
                    Opcode::Br => {
                        prev = Some(cur);
                        cur = inst.blocks[0];
                    }
                    Opcode::CondBr => {
                        let c = read(func, &vals, args, inst.args[0])?;
                        let Some(bit) = c.lanes[0] else { return Err(EvalError::Ub) };
                        prev = Some(cur);
                        cur = if bit & 1 == 1 { inst.blocks[0] } else { inst.blocks[1] };
                    }
                    Opcode::Switch => {
                        let s = read(func, &vals, args, inst.args[0])?;
                        let Some(v) = s.lanes[0] else { return Err(EvalError::Ub) };
                        let mut dest = inst.blocks[0];
                        for (i, &imm) in inst.imms.iter().enumerate() {
                            if imm == v {
                                dest = inst.blocks[i + 1];
                                break;
                            }
                        }
                        prev = Some(cur);
                        cur = dest;
                    }
                    Opcode::Unreachable => return Err(EvalError::Ub),
                    _ => unreachable!(),
                }
                break;
            }
            let v = eval_inst(module, func, &vals, args, id.0 as usize)?;
            vals.insert(id.0, v);
        }
    }
}

fn read(
    func: &Function,
    vals: &HashMap<u32, Val>,
    args: &[Val],
    v: ValueRef,
) -> Result<Val, EvalError> {
    match v {
        ValueRef::Param(i) => Ok(args[i as usize].clone()),
        ValueRef::Const(c) => Ok(Val::from_const(func.constant(c))),
        ValueRef::Inst(i) => vals
            .get(&i.0)
            .cloned()
            .ok_or_else(|| EvalError::Unsupported("use of unevaluated instruction".into())),
    }
}

fn eval_inst(
    module: &Module,
    func: &Function,
    vals: &HashMap<u32, Val>,
    args: &[Val],
    idx: usize,
) -> Result<Val, EvalError> {
    let inst = &func.insts[idx];
    let ty = inst.ty;
    if ty.is_valid() && ty.bits() > 64 {
        return Err(EvalError::Unsupported(format!("{}-bit elements", ty.bits())));
    }
    let get = |i: usize| read(func, vals, args, inst.args[i]);
    match &inst.op {
        Opcode::Bin(op) => {
            let a = get(0)?;
            let b = get(1)?;
            if ty.is_fp() {
                eval_fp_bin(*op, &a, &b, ty)
            } else {
                eval_int_bin(*op, &a, &b, ty)
            }
        }
        Opcode::Un(op) => {
            let a = get(0)?;
            if ty.is_fp() {
                eval_fp_un(*op, &a, ty)
            } else {
                eval_int_un(*op, &a, ty)
            }
        }
        Opcode::ICmp(cond) => {
            let a = get(0)?;
            let b = get(1)?;
            let bits = a.ty.bits();
            let lanes = a
                .lanes
                .iter()
                .zip(&b.lanes)
                .map(|(x, y)| match (x, y) {
                    (Some(x), Some(y)) => Some(icmp(*cond, *x, *y, bits) as u64),
                    _ => None,
                })
                .collect();
            Ok(Val { ty, lanes })
        }
        Opcode::FCmp(cond) => {
            let a = get(0)?;
            let b = get(1)?;
            let bits = a.ty.bits();
            let mut lanes = Vec::new();
            for (x, y) in a.lanes.iter().zip(&b.lanes) {
                match (x, y) {
                    (Some(x), Some(y)) => {
                        let fx = bits_to_f64(*x, bits)?;
                        let fy = bits_to_f64(*y, bits)?;
                        lanes.push(Some(fcmp(*cond, fx, fy) as u64));
                    }
                    _ => lanes.push(None),
                }
            }
            Ok(Val { ty, lanes })
        }
        Opcode::Cast(op) => eval_cast(*op, &get(0)?, ty),
        Opcode::Select => {
            let c = get(0)?;
            let a = get(1)?;
            let b = get(2)?;
            if c.ty.lane() == 1 {
                match c.lanes[0] {
                    None => Ok(Val::poison(ty)),
                    Some(v) if v & 1 == 1 => Ok(a),
                    Some(_) => Ok(b),
                }
            } else {
                let lanes = c
                    .lanes
                    .iter()
                    .enumerate()
                    .map(|(i, cv)| match cv {
                        None => None,
                        Some(v) if v & 1 == 1 => a.lanes[i],
                        Some(_) => b.lanes[i],
                    })
                    .collect();
                Ok(Val { ty, lanes })
            }
        }
        Opcode::ExtractElement => {
            let v = get(0)?;
            let idxv = get(1)?;
            match idxv.lanes[0] {
                Some(i) if (i as usize) < v.lanes.len() => {
                    Ok(Val { ty, lanes: vec![v.lanes[i as usize]] })
                }
                _ => Ok(Val::poison(ty)),
            }
        }
        Opcode::InsertElement => {
            let v = get(0)?;
            let e = get(1)?;
            let idxv = get(2)?;
            let mut lanes = v.lanes.clone();
            match idxv.lanes[0] {
                Some(i) if (i as usize) < lanes.len() => {
                    lanes[i as usize] = e.lanes[0];
                    Ok(Val { ty, lanes })
                }
                _ => Ok(Val::poison(ty)),
            }
        }
        Opcode::ShuffleVector => {
            let a = get(0)?;
            let b = get(1)?;
            let mask = get(2)?;
            Ok(shuffle_lanes(&a, &b, &mask, ty))
        }
        Opcode::Call => {
            let name = inst.callee.as_deref().unwrap_or("");
            let mut cargs = Vec::new();
            for i in 0..inst.args.len() {
                cargs.push(get(i)?);
            }
            eval_call(module, name, &cargs, ty)
        }
        Opcode::Phi => unreachable!("phis handled by the block loop"),
        _ => unreachable!("terminator in eval_inst"),
    }
}

fn shuffle_lanes(a: &Val, b: &Val, mask: &Val, ty: Type) -> Val {
    let n = a.lanes.len() as u64;
    let lanes = mask
        .lanes
        .iter()
        .map(|m| match m {
            None => None,
            Some(i) if *i < n => a.lanes[*i as usize],
            Some(i) if *i < 2 * n => b.lanes[(*i - n) as usize],
            Some(_) => None,
        })
        .collect();
    Val { ty, lanes }
}

// ---- integer scalar helpers ----

fn sext64(v: u64, bits: u32) -> i64 {
    if bits >= 64 {
        v as i64
    } else {
        let shift = 64 - bits;
        ((v << shift) as i64) >> shift
    }
}

fn icmp(cond: ICmpCond, a: u64, b: u64, bits: u32) -> bool {
    let (sa, sb) = (sext64(a, bits), sext64(b, bits));
    match cond {
        ICmpCond::Eq => a == b,
        ICmpCond::Ne => a != b,
        ICmpCond::Ult => a < b,
        ICmpCond::Ule => a <= b,
        ICmpCond::Ugt => a > b,
        ICmpCond::Uge => a >= b,
        ICmpCond::Slt => sa < sb,
        ICmpCond::Sle => sa <= sb,
        ICmpCond::Sgt => sa > sb,
        ICmpCond::Sge => sa >= sb,
    }
}

fn eval_int_bin(op: BinOp, a: &Val, b: &Val, ty: Type) -> Result<Val, EvalError> {
    let bits = ty.bits();
    let mut lanes = Vec::with_capacity(a.lanes.len());
    for (x, y) in a.lanes.iter().zip(&b.lanes) {
        let (Some(x), Some(y)) = (x, y) else {
            lanes.push(None);
            continue;
        };
        let (x, y) = (*x, *y);
        let r = match op {
            BinOp::And => Some(x & y),
            BinOp::Or => Some(x | y),
            BinOp::Xor => Some(x ^ y),
            BinOp::Add => Some(x.wrapping_add(y)),
            BinOp::Sub => Some(x.wrapping_sub(y)),
            BinOp::Mul => Some(x.wrapping_mul(y)),
            BinOp::Shl => {
                if y >= bits as u64 {
                    None
                } else {
                    Some(x << y)
                }
            }
            BinOp::LShr => {
                if y >= bits as u64 {
                    None
                } else {
                    Some(x >> y)
                }
            }
            BinOp::AShr => {
                if y >= bits as u64 {
                    None
                } else {
                    Some((sext64(x, bits) >> y) as u64)
                }
            }
            BinOp::UDiv => {
                if y == 0 {
                    return Err(EvalError::Ub);
                }
                Some(x / y)
            }
            BinOp::SDiv => {
                let (sx, sy) = (sext64(x, bits), sext64(y, bits));
                if sy == 0 {
                    return Err(EvalError::Ub);
                }
                let min = -(1i64 << (bits.min(63) - 1));
                if sx == min && sy == -1 {
                    return Err(EvalError::Ub);
                }
                Some((sx / sy) as u64)
            }
            BinOp::UMax => Some(x.max(y)),
            BinOp::UMin => Some(x.min(y)),
            BinOp::SMax => Some(sext64(x, bits).max(sext64(y, bits)) as u64),
            BinOp::SMin => Some(sext64(x, bits).min(sext64(y, bits)) as u64),
            _ => return Err(EvalError::Unsupported(format!("int eval of {}", op.name()))),
        };
        lanes.push(r.map(|v| super::mask_to(v, bits)));
    }
    Ok(Val { ty, lanes })
}

fn eval_int_un(op: UnOp, a: &Val, ty: Type) -> Result<Val, EvalError> {
    let bits = ty.bits();
    let mut lanes = Vec::with_capacity(a.lanes.len());
    for x in &a.lanes {
        let Some(x) = x else {
            lanes.push(None);
            continue;
        };
        let x = *x;
        let r = match op {
            UnOp::BitReverse => x.reverse_bits() >> (64 - bits),
            UnOp::Bswap => x.swap_bytes() >> (64 - bits),
            UnOp::Ctpop => x.count_ones() as u64,
            UnOp::Ctlz => x.leading_zeros() as u64 - (64 - bits) as u64,
            UnOp::Cttz => {
                if x == 0 {
                    bits as u64
                } else {
                    x.trailing_zeros() as u64
                }
            }
            _ => return Err(EvalError::Unsupported(format!("int eval of {}", op.name()))),
        };
        lanes.push(Some(super::mask_to(r, bits)));
    }
    Ok(Val { ty, lanes })
}

fn eval_cast(op: CastOp, a: &Val, ty: Type) -> Result<Val, EvalError> {
    let from_bits = a.ty.bits();
    let to_bits = ty.bits();
    match op {
        CastOp::Bitcast => {
            // Reinterpret the raw bits in the new shape; any poison lane makes
            // the whole result poison.
            if !a.fully_defined() {
                return Ok(Val::poison(ty));
            }
            let raw = a.to_bits();
            let mut lanes = Vec::new();
            for i in 0..ty.lane() {
                let bit_off = (i * to_bits) as usize;
                lanes.push(Some(extract_bits(&raw, bit_off, to_bits)));
            }
            Ok(Val { ty, lanes })
        }
        CastOp::Zext => Ok(map_lanes(a, ty, |x| Some(x))),
        CastOp::Sext => Ok(map_lanes(a, ty, |x| {
            Some(super::mask_to(sext64(x, from_bits) as u64, to_bits))
        })),
        CastOp::Trunc => Ok(map_lanes(a, ty, |x| Some(super::mask_to(x, to_bits)))),
        CastOp::FpExt | CastOp::FpTrunc => {
            let mut lanes = Vec::new();
            for x in &a.lanes {
                match x {
                    None => lanes.push(None),
                    Some(x) => {
                        let f = bits_to_f64(*x, from_bits)?;
                        lanes.push(Some(f64_to_bits(f, to_bits)?));
                    }
                }
            }
            Ok(Val { ty, lanes })
        }
        CastOp::FpToUi | CastOp::FpToSi => {
            let mut lanes = Vec::new();
            for x in &a.lanes {
                match x {
                    None => lanes.push(None),
                    Some(x) => {
                        let f = bits_to_f64(*x, from_bits)?.trunc();
                        let signed = matches!(op, CastOp::FpToSi);
                        lanes.push(fp_to_int(f, to_bits, signed));
                    }
                }
            }
            Ok(Val { ty, lanes })
        }
        CastOp::UiToFp | CastOp::SiToFp => {
            let mut lanes = Vec::new();
            for x in &a.lanes {
                match x {
                    None => lanes.push(None),
                    Some(x) => {
                        let f = if matches!(op, CastOp::SiToFp) {
                            sext64(*x, from_bits) as f64
                        } else {
                            *x as f64
                        };
                        lanes.push(Some(f64_to_bits(f, to_bits)?));
                    }
                }
            }
            Ok(Val { ty, lanes })
        }
    }
}

fn map_lanes(a: &Val, ty: Type, f: impl Fn(u64) -> Option<u64>) -> Val {
    let lanes = a.lanes.iter().map(|x| x.and_then(&f)).collect();
    Val { ty, lanes }
}

fn extract_bits(raw: &[u64], bit_off: usize, bits: u32) -> u64 {
    let mut v = 0u64;
    for b in 0..bits as usize {
        let pos = bit_off + b;
        let word = pos / 64;
        let off = pos % 64;
        if word < raw.len() && (raw[word] >> off) & 1 == 1 {
            v |= 1 << b;
        }
    }
    v
}

fn fp_to_int(f: f64, bits: u32, signed: bool) -> Option<u64> {
    if f.is_nan() {
        return None;
    }
    if signed {
        let min = -(2f64.powi(bits as i32 - 1));
        let max = 2f64.powi(bits as i32 - 1) - 1.0;
        if f < min || f > max {
            return None;
        }
        Some(super::mask_to(f as i64 as u64, bits))
    } else {
        let max = 2f64.powi(bits as i32) - 1.0;
        if f < 0.0 || f > max {
            return None;
        }
        Some(super::mask_to(f as u64, bits))
    }
}

// ---- floating point ----

pub fn f16_to_f32(h: u16) -> f32 {
    let sign = ((h >> 15) & 1) as u32;
    let exp = ((h >> 10) & 0x1f) as u32;
    let frac = (h & 0x3ff) as u32;
    let f = if exp == 0 {
        if frac == 0 {
            sign << 31
        } else {
            // Subnormal: normalize.
            let mut e = 127 - 15 + 1;
            let mut m = frac;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            (sign << 31) | ((e as u32) << 23) | ((m & 0x3ff) << 13)
        }
    } else if exp == 0x1f {
        (sign << 31) | 0x7f80_0000 | (frac << 13)
    } else {
        (sign << 31) | ((exp + 127 - 15) << 23) | (frac << 13)
    };
    f32::from_bits(f)
}

pub fn f32_to_f16(x: f32) -> u16 {
    let b = x.to_bits();
    let sign = ((b >> 31) & 1) as u16;
    let exp = ((b >> 23) & 0xff) as i32;
    let frac = b & 0x7f_ffff;
    if exp == 0xff {
        // Inf/NaN.
        let f = if frac != 0 { 0x200 | ((frac >> 13) as u16 & 0x3ff) } else { 0 };
        return (sign << 15) | 0x7c00 | f;
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return (sign << 15) | 0x7c00; // overflow to inf
    }
    if e <= 0 {
        if e < -10 {
            return sign << 15;
        }
        // Subnormal with round-to-nearest-even.
        let m = frac | 0x80_0000;
        let shift = (14 - e) as u32;
        let half = 1u32 << (shift - 1);
        let mut r = m >> shift;
        if (m & (half.wrapping_mul(2) - 1)) > half || ((m >> shift) & 1 == 1 && (m & (half - 1)) == 0 && (m & half) != 0)
        {
            r += 1;
        }
        return (sign << 15) | r as u16;
    }
    // Normal with round-to-nearest-even on the dropped 13 bits.
    let mut mant = frac >> 13;
    let rem = frac & 0x1fff;
    if rem > 0x1000 || (rem == 0x1000 && mant & 1 == 1) {
        mant += 1;
    }
    let mut ee = e as u32;
    if mant == 0x400 {
        mant = 0;
        ee += 1;
        if ee >= 0x1f {
            return (sign << 15) | 0x7c00;
        }
    }
    (sign << 15) | ((ee as u16) << 10) | (mant as u16 & 0x3ff)
}

fn bits_to_f64(v: u64, bits: u32) -> Result<f64, EvalError> {
    match bits {
        16 => Ok(f16_to_f32(v as u16) as f64),
        32 => Ok(f32::from_bits(v as u32) as f64),
        64 => Ok(f64::from_bits(v)),
        _ => Err(EvalError::Unsupported(format!("{}-bit float evaluation", bits))),
    }
}

fn f64_to_bits(f: f64, bits: u32) -> Result<u64, EvalError> {
    match bits {
        16 => Ok(f32_to_f16(f as f32) as u64),
        32 => Ok((f as f32).to_bits() as u64),
        64 => Ok(f.to_bits()),
        _ => Err(EvalError::Unsupported(format!("{}-bit float evaluation", bits))),
    }
}

fn fp_round_trip(f: f64, bits: u32) -> Result<u64, EvalError> {
    // Compute in f64 then round to the element width once; exact for f64 and
    // f32 single operations, an accepted approximation for half.
    f64_to_bits(f, bits)
}

fn eval_fp_bin(op: BinOp, a: &Val, b: &Val, ty: Type) -> Result<Val, EvalError> {
    let bits = ty.bits();
    let mut lanes = Vec::with_capacity(a.lanes.len());
    for (x, y) in a.lanes.iter().zip(&b.lanes) {
        let (Some(x), Some(y)) = (x, y) else {
            lanes.push(None);
            continue;
        };
        // Compute single-precision ops in f32 to keep rounding exact.
        let r = if bits == 32 {
            let fx = f32::from_bits(*x as u32);
            let fy = f32::from_bits(*y as u32);
            fp_bin_scalar(op, fx as f64, fy as f64, |v| (v as f32) as f64)?
        } else {
            let fx = bits_to_f64(*x, bits)?;
            let fy = bits_to_f64(*y, bits)?;
            fp_bin_scalar(op, fx, fy, |v| v)?
        };
        lanes.push(Some(fp_round_trip(r, bits)?));
    }
    Ok(Val { ty, lanes })
}

fn fp_bin_scalar(op: BinOp, x: f64, y: f64, norm: impl Fn(f64) -> f64) -> Result<f64, EvalError> {
    let r = match op {
        BinOp::FAdd => norm(x + y),
        BinOp::FSub => norm(x - y),
        BinOp::FMul => norm(x * y),
        BinOp::FDiv => norm(x / y),
        BinOp::FMaxNum => {
            if x.is_nan() {
                y
            } else if y.is_nan() {
                x
            } else {
                x.max(y)
            }
        }
        BinOp::FMinNum => {
            if x.is_nan() {
                y
            } else if y.is_nan() {
                x
            } else {
                x.min(y)
            }
        }
        BinOp::FMaximum => {
            if x.is_nan() || y.is_nan() {
                f64::NAN
            } else if x == 0.0 && y == 0.0 {
                if x.is_sign_positive() || y.is_sign_positive() {
                    0.0
                } else {
                    -0.0
                }
            } else {
                x.max(y)
            }
        }
        BinOp::FMinimum => {
            if x.is_nan() || y.is_nan() {
                f64::NAN
            } else if x == 0.0 && y == 0.0 {
                if x.is_sign_negative() || y.is_sign_negative() {
                    -0.0
                } else {
                    0.0
                }
            } else {
                x.min(y)
            }
        }
        BinOp::CopySign => x.copysign(y),
        _ => return Err(EvalError::Unsupported(format!("fp eval of {}", op.name()))),
    };
    Ok(r)
}

fn eval_fp_un(op: UnOp, a: &Val, ty: Type) -> Result<Val, EvalError> {
    let bits = ty.bits();
    let mut lanes = Vec::with_capacity(a.lanes.len());
    for x in &a.lanes {
        let Some(x) = x else {
            lanes.push(None);
            continue;
        };
        let f = bits_to_f64(*x, bits)?;
        let r = match op {
            UnOp::FNeg => -f,
            UnOp::FAbs => f.abs(),
            UnOp::FCeil => f.ceil(),
            UnOp::FFloor => f.floor(),
            UnOp::FTrunc => f.trunc(),
            UnOp::FRound => {
                // Round half away from zero.
                if f.fract().abs() == 0.5 {
                    f.trunc() + f.signum()
                } else {
                    f.round()
                }
            }
            UnOp::FRoundEven | UnOp::FRint | UnOp::FNearbyInt => round_ties_even(f),
            _ => return Err(EvalError::Unsupported(format!("fp eval of {}", op.name()))),
        };
        lanes.push(Some(fp_round_trip(r, bits)?));
    }
    Ok(Val { ty, lanes })
}

fn round_ties_even(f: f64) -> f64 {
    let r = f.round();
    if (f - f.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - f.signum()
    } else {
        r
    }
}

fn fcmp(cond: FCmpCond, x: f64, y: f64) -> bool {
    let uno = x.is_nan() || y.is_nan();
    match cond {
        FCmpCond::False => false,
        FCmpCond::True => true,
        FCmpCond::Ord => !uno,
        FCmpCond::Uno => uno,
        FCmpCond::Oeq => !uno && x == y,
        FCmpCond::Ogt => !uno && x > y,
        FCmpCond::Oge => !uno && x >= y,
        FCmpCond::Olt => !uno && x < y,
        FCmpCond::Ole => !uno && x <= y,
        FCmpCond::One => !uno && x != y,
        FCmpCond::Ueq => uno || x == y,
        FCmpCond::Ugt => uno || x > y,
        FCmpCond::Uge => uno || x >= y,
        FCmpCond::Ult => uno || x < y,
        FCmpCond::Ule => uno || x <= y,
        FCmpCond::Une => uno || x != y,
    }
}

// ---- intrinsic calls ----

fn eval_call(module: &Module, name: &str, args: &[Val], ty: Type) -> Result<Val, EvalError> {
    if name.starts_with("__fksv") {
        // Opaque two-source shuffle: semantics of shufflevector once the mask
        // is concrete.
        return Ok(shuffle_lanes(&args[0], &args[1], &args[2], ty));
    }
    if let Some(id) = intrinsics::find_binop(name) {
        return eval_simd_bin(intrinsics::binop(id).kind, &args[0], &args[1], ty);
    }
    if let Some(id) = intrinsics::find_ternop(name) {
        return eval_simd_tern(intrinsics::ternop(id).kind, &args[0], &args[1], &args[2], ty);
    }
    if let Some(op) = UnOp::from_name(name) {
        return if ty.is_fp() {
            eval_fp_un(op, &args[0], ty)
        } else {
            eval_int_un(op, &args[0], ty)
        };
    }
    if let Some(op) = BinOp::from_name(name) {
        return if ty.is_fp() {
            eval_fp_bin(op, &args[0], &args[1], ty)
        } else {
            eval_int_bin(op, &args[0], &args[1], ty)
        };
    }
    let _ = module;
    Err(EvalError::Unsupported(format!("call to '{}'", name)))
}

fn defined_lanes(v: &Val) -> Result<Vec<u64>, ()> {
    v.lanes.iter().map(|l| l.ok_or(())).collect()
}

fn eval_simd_bin(kind: SimdBinKind, a: &Val, b: &Val, ty: Type) -> Result<Val, EvalError> {
    // Horizontal ops mix lanes, so any poison input lane poisons the result.
    let (Ok(av), Ok(bv)) = (defined_lanes(a), defined_lanes(b)) else {
        return Ok(Val::poison(ty));
    };
    let ebits = a.ty.bits();
    let rbits = ty.bits();
    let out: Vec<u64> = match kind {
        SimdBinKind::Avg => av
            .iter()
            .zip(&bv)
            .map(|(x, y)| super::mask_to((x + y + 1) >> 1, ebits))
            .collect(),
        SimdBinKind::Shufb => {
            // Per 16-byte chunk.
            let n = av.len();
            (0..n)
                .map(|i| {
                    let sel = bv[i];
                    if sel & 0x80 != 0 {
                        0
                    } else {
                        let base = i / 16 * 16;
                        av[base + (sel & 0x0f) as usize]
                    }
                })
                .collect()
        }
        SimdBinKind::ShlWide | SimdBinKind::SrlWide | SimdBinKind::SraWide => {
            let count = low64(&bv, b.ty.bits());
            shift_all(&av, ebits, count, kind)
        }
        SimdBinKind::ShlImm | SimdBinKind::SrlImm | SimdBinKind::SraImm => {
            let count = bv[0];
            let k = match kind {
                SimdBinKind::ShlImm => SimdBinKind::ShlWide,
                SimdBinKind::SrlImm => SimdBinKind::SrlWide,
                _ => SimdBinKind::SraWide,
            };
            shift_all(&av, ebits, count, k)
        }
        SimdBinKind::ShlVar | SimdBinKind::SrlVar | SimdBinKind::SraVar => av
            .iter()
            .zip(&bv)
            .map(|(x, c)| shift_one(*x, ebits, *c, kind))
            .collect(),
        SimdBinKind::MulHiS => av
            .iter()
            .zip(&bv)
            .map(|(x, y)| {
                let p = sext64(*x, ebits) as i128 * sext64(*y, ebits) as i128;
                super::mask_to((p >> ebits) as u64, ebits)
            })
            .collect(),
        SimdBinKind::MulHiU => av
            .iter()
            .zip(&bv)
            .map(|(x, y)| {
                let p = *x as u128 * *y as u128;
                super::mask_to((p >> ebits) as u64, ebits)
            })
            .collect(),
        SimdBinKind::MaddWd => (0..ty.lane() as usize)
            .map(|i| {
                let p0 = sext64(av[2 * i], 16) * sext64(bv[2 * i], 16);
                let p1 = sext64(av[2 * i + 1], 16) * sext64(bv[2 * i + 1], 16);
                super::mask_to(p0.wrapping_add(p1) as u64, 32)
            })
            .collect(),
        SimdBinKind::MaddUbsW => (0..ty.lane() as usize)
            .map(|i| {
                let p0 = av[2 * i] as i64 * sext64(bv[2 * i], 8);
                let p1 = av[2 * i + 1] as i64 * sext64(bv[2 * i + 1], 8);
                super::mask_to(sat_s(p0 + p1, 16) as u64, 16)
            })
            .collect(),
        SimdBinKind::PackSs | SimdBinKind::PackUs => {
            let signed = matches!(kind, SimdBinKind::PackSs);
            pack_chunked(&av, &bv, ebits, rbits, signed)
        }
        SimdBinKind::Sad => {
            let groups = ty.lane() as usize;
            (0..groups)
                .map(|g| {
                    (0..8)
                        .map(|j| {
                            let x = av[g * 8 + j] as i64;
                            let y = bv[g * 8 + j] as i64;
                            (x - y).unsigned_abs()
                        })
                        .sum::<u64>()
                })
                .collect()
        }
    };
    Ok(Val { ty, lanes: out.into_iter().map(Some).collect() })
}

fn low64(lanes: &[u64], bits: u32) -> u64 {
    let mut acc = 0u64;
    let mut filled = 0u32;
    for &l in lanes {
        if filled >= 64 {
            break;
        }
        acc |= super::mask_to(l, bits) << filled;
        filled += bits;
    }
    acc
}

fn shift_one(x: u64, bits: u32, count: u64, kind: SimdBinKind) -> u64 {
    let oob = count >= bits as u64;
    match kind {
        SimdBinKind::ShlVar | SimdBinKind::ShlWide => {
            if oob {
                0
            } else {
                super::mask_to(x << count, bits)
            }
        }
        SimdBinKind::SrlVar | SimdBinKind::SrlWide => {
            if oob {
                0
            } else {
                x >> count
            }
        }
        _ => {
            let c = count.min(bits as u64 - 1);
            super::mask_to((sext64(x, bits) >> c) as u64, bits)
        }
    }
}

fn shift_all(lanes: &[u64], bits: u32, count: u64, kind: SimdBinKind) -> Vec<u64> {
    lanes.iter().map(|&x| shift_one(x, bits, count, kind)).collect()
}

fn sat_s(v: i64, bits: u32) -> i64 {
    let max = (1i64 << (bits - 1)) - 1;
    let min = -(1i64 << (bits - 1));
    v.clamp(min, max)
}

fn sat_u(v: i64, bits: u32) -> u64 {
    let max = (1i64 << bits) - 1;
    v.clamp(0, max) as u64
}

fn pack_chunked(a: &[u64], b: &[u64], ebits: u32, rbits: u32, signed: bool) -> Vec<u64> {
    // x86 packs operate per 128-bit chunk: each result chunk is the saturated
    // a-chunk followed by the saturated b-chunk.
    let src_per_chunk = (128 / ebits) as usize;
    let chunks = a.len() / src_per_chunk;
    let mut out = Vec::new();
    for c in 0..chunks {
        for &src in [a, b].iter() {
            for i in 0..src_per_chunk {
                let v = sext64(src[c * src_per_chunk + i], ebits);
                let packed = if signed { sat_s(v, rbits) as u64 } else { sat_u(v, rbits) };
                out.push(super::mask_to(packed, rbits));
            }
        }
    }
    out
}

fn eval_simd_tern(
    kind: SimdTernKind,
    a: &Val,
    b: &Val,
    c: &Val,
    ty: Type,
) -> Result<Val, EvalError> {
    match kind {
        SimdTernKind::BlendVb => {
            let lanes = a
                .lanes
                .iter()
                .zip(&b.lanes)
                .zip(&c.lanes)
                .map(|((x, y), m)| match m {
                    None => None,
                    Some(m) if m & 0x80 != 0 => *y,
                    Some(_) => *x,
                })
                .collect();
            Ok(Val { ty, lanes })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    fn eval1(text: &str, args: &[Val]) -> Result<Val, EvalError> {
        let m = parse_module(text).unwrap();
        eval_function(&m, &m.functions[0], args)
    }

    #[test]
    fn evaluates_arithmetic() {
        let r = eval1(
            "define i32 @f(i32 %x, i32 %y) {\nentry:\n  %s = add i32 %x, %y\n  ret i32 %s\n}",
            &[Val::scalar(Type::integer(32), 7), Val::scalar(Type::integer(32), 8)],
        )
        .unwrap();
        assert_eq!(r.lanes, vec![Some(15)]);
    }

    #[test]
    fn division_by_zero_is_ub() {
        let r = eval1(
            "define i32 @f(i32 %x) {\nentry:\n  %d = udiv i32 %x, 0\n  ret i32 %d\n}",
            &[Val::scalar(Type::integer(32), 7)],
        );
        assert_eq!(r, Err(EvalError::Ub));
    }

    #[test]
    fn oversized_shift_is_poison() {
        let r = eval1(
            "define i32 @f(i32 %x) {\nentry:\n  %d = shl i32 %x, 40\n  ret i32 %d\n}",
            &[Val::scalar(Type::integer(32), 7)],
        )
        .unwrap();
        assert_eq!(r.lanes, vec![None]);
    }

    #[test]
    fn ctlz_of_zero_is_width() {
        let r = eval1(
            "define i8 @f(i8 %x) {\nentry:\n  %d = ctlz i8 %x\n  ret i8 %d\n}",
            &[Val::scalar(Type::integer(8), 0)],
        )
        .unwrap();
        assert_eq!(r.lanes, vec![Some(8)]);
        let r = eval1(
            "define i8 @f(i8 %x) {\nentry:\n  %d = ctlz i8 %x\n  ret i8 %d\n}",
            &[Val::scalar(Type::integer(8), 1)],
        )
        .unwrap();
        assert_eq!(r.lanes, vec![Some(7)]);
    }

    #[test]
    fn branches_and_phis() {
        let text = r#"
        define i32 @g(i1 %c, i32 %a, i32 %b) {
        entry:
          br i1 %c, label %l, label %r
        l:
          br label %j
        r:
          br label %j
        j:
          %p = phi i32 [ %a, %l ], [ %b, %r ]
          ret i32 %p
        }
        "#;
        let t = Val::scalar(Type::bool(), 1);
        let f = Val::scalar(Type::bool(), 0);
        let a = Val::scalar(Type::integer(32), 10);
        let b = Val::scalar(Type::integer(32), 20);
        assert_eq!(
            eval1(text, &[t, a.clone(), b.clone()]).unwrap().lanes,
            vec![Some(10)]
        );
        assert_eq!(eval1(text, &[f, a, b]).unwrap().lanes, vec![Some(20)]);
    }

    #[test]
    fn shuffle_broadcast() {
        let text = r#"
        define <4 x i32> @h(<4 x i32> %v) {
        entry:
          %s = shufflevector <4 x i32> %v, <4 x i32> poison, <4 x i32> <0, 0, 0, 0>
          ret <4 x i32> %s
        }
        "#;
        let v = Val {
            ty: Type::integer_vectorizable(4, 32),
            lanes: vec![Some(9), Some(1), Some(2), Some(3)],
        };
        let r = eval1(text, &[v]).unwrap();
        assert_eq!(r.lanes, vec![Some(9); 4]);
    }

    #[test]
    fn fp_nan_blocks_identity() {
        // fadd x, (fmul y, 0.0) is not x when y is NaN.
        let text = r#"
        define float @f(float %x, float %y) {
        entry:
          %m = fmul float %y, 0x0
          %s = fadd float %x, %m
          ret float %s
        }
        "#;
        let x = Val::scalar(Type::scalar(32, true), 1.5f32.to_bits() as u64);
        let y = Val::scalar(Type::scalar(32, true), f32::NAN.to_bits() as u64);
        let r = eval1(text, &[x, y]).unwrap();
        let out = f32::from_bits(r.lanes[0].unwrap() as u32);
        assert!(out.is_nan());
    }

    #[test]
    fn half_round_trips_through_f32() {
        for h in [0u16, 0x3c00, 0xbc00, 0x7bff, 0x0001, 0x03ff, 0x7c00, 0xfc00] {
            let f = f16_to_f32(h);
            assert_eq!(f32_to_f16(f), h, "bits 0x{:04x}", h);
        }
    }

    #[test]
    fn pavg_rounds_up() {
        let m = parse_module(
            r#"
            define <16 x i8> @f(<16 x i8> %a, <16 x i8> %b) {
            entry:
              %r = call <16 x i8> @sse2.pavg.b(<16 x i8> %a, <16 x i8> %b)
              ret <16 x i8> %r
            }
            "#,
        )
        .unwrap();
        let ty = Type::integer_vectorizable(16, 8);
        let a = Val::splat(ty, 1);
        let b = Val::splat(ty, 2);
        let r = eval_function(&m, &m.functions[0], &[a, b]).unwrap();
        assert_eq!(r.lanes[0], Some(2));
    }
}

// Known-bits dataflow over the integer subset of the IR. Tracks (zeros, ones)
// masks per element width; vector values intersect knowledge across lanes so a
// single mask pair describes every lane. Used by the candidate pruner: if the
// candidate's return has a bit known-one where the source's is known-zero (or
// vice versa) the two can never agree.

use super::{CastOp, Function, Opcode, ValueRef};
use crate::ops::BinOp;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KnownBits {
    pub zeros: u64,
    pub ones: u64,
}

impl KnownBits {
    pub fn unknown() -> KnownBits {
        KnownBits::default()
    }

    pub fn constant(v: u64, bits: u32) -> KnownBits {
        let m = width_mask(bits);
        KnownBits { zeros: !v & m, ones: v & m }
    }

    /// Intersection of knowledge (join of the lattice).
    pub fn meet(self, rhs: KnownBits) -> KnownBits {
        KnownBits { zeros: self.zeros & rhs.zeros, ones: self.ones & rhs.ones }
    }

    /// There is a bit position where the two disagree with certainty.
    pub fn conflicts(self, rhs: KnownBits) -> bool {
        (self.zeros & rhs.ones) != 0 || (self.ones & rhs.zeros) != 0
    }
}

fn width_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Known bits of the unique return value; `None` when the function does not
/// return an integer shape (the pruner skips FP roots).
pub fn known_bits_of_return(func: &Function) -> Option<KnownBits> {
    if func.ret_ty.is_fp() || func.ret_ty.bits() > 64 {
        return None;
    }
    let ret = func.unique_return()?;
    let mut known: HashMap<ValueRef, KnownBits> = HashMap::new();
    for id in func.inst_ids_in_layout() {
        let inst = func.inst(id);
        if !inst.op.has_result() || inst.ty.is_fp() || inst.ty.bits() > 64 {
            continue;
        }
        let kb = transfer(func, &known, id.0 as usize);
        known.insert(ValueRef::Inst(id), kb);
    }
    let v = func.inst(ret).args[0];
    Some(lookup(func, &known, v))
}

fn lookup(func: &Function, known: &HashMap<ValueRef, KnownBits>, v: ValueRef) -> KnownBits {
    match v {
        ValueRef::Const(c) => {
            let cst = func.constant(c);
            if cst.ty.is_fp() || cst.ty.bits() > 64 {
                return KnownBits::unknown();
            }
            let bits = cst.ty.bits();
            let lanes = cst.lanes();
            if lanes.is_empty() {
                return KnownBits::unknown();
            }
            let mut kb = KnownBits::constant(lanes[0], bits);
            for &l in &lanes[1..] {
                kb = kb.meet(KnownBits::constant(l, bits));
            }
            kb
        }
        _ => known.get(&v).copied().unwrap_or_default(),
    }
}

fn const_splat(func: &Function, v: ValueRef) -> Option<u64> {
    if let ValueRef::Const(c) = v {
        let cst = func.constant(c);
        let lanes = cst.lanes();
        if !lanes.is_empty() && lanes.iter().all(|l| *l == lanes[0]) {
            return Some(lanes[0]);
        }
    }
    None
}

fn transfer(func: &Function, known: &HashMap<ValueRef, KnownBits>, idx: usize) -> KnownBits {
    let inst = &func.insts[idx];
    let bits = inst.ty.bits();
    let m = width_mask(bits);
    let get = |i: usize| lookup(func, known, inst.args[i]);
    match &inst.op {
        Opcode::Bin(op) => {
            let a = get(0);
            let b = get(1);
            match op {
                BinOp::And => KnownBits { ones: a.ones & b.ones, zeros: (a.zeros | b.zeros) & m },
                BinOp::Or => KnownBits { ones: (a.ones | b.ones) & m, zeros: a.zeros & b.zeros },
                BinOp::Xor => KnownBits {
                    ones: (a.ones & b.zeros | a.zeros & b.ones) & m,
                    zeros: (a.zeros & b.zeros | a.ones & b.ones) & m,
                },
                BinOp::Shl => match shift_amount(func, inst.args[1], bits) {
                    Some(s) => KnownBits {
                        zeros: ((a.zeros << s) | width_mask(s)) & m,
                        ones: (a.ones << s) & m,
                    },
                    None => KnownBits::unknown(),
                },
                BinOp::LShr => match shift_amount(func, inst.args[1], bits) {
                    Some(s) => KnownBits {
                        zeros: ((a.zeros & m) >> s) | (!(m >> s) & m),
                        ones: (a.ones & m) >> s,
                    },
                    None => KnownBits::unknown(),
                },
                BinOp::Add | BinOp::Sub => {
                    // Knowledge survives in the low bits up to the first
                    // unknown position.
                    let kn = (a.zeros | a.ones) & (b.zeros | b.ones);
                    let run = (!kn).trailing_zeros().min(bits);
                    if run == 0 {
                        return KnownBits::unknown();
                    }
                    let av = a.ones & width_mask(run);
                    let bv = b.ones & width_mask(run);
                    let sum = if matches!(op, BinOp::Add) {
                        av.wrapping_add(bv)
                    } else {
                        av.wrapping_sub(bv)
                    };
                    // The top bit of the run may carry; keep run-1 bits.
                    let keep = run.saturating_sub(1);
                    if keep == 0 {
                        return KnownBits::unknown();
                    }
                    let km = width_mask(keep);
                    KnownBits { ones: sum & km, zeros: !sum & km }
                }
                BinOp::Mul => {
                    if let Some(c) = const_splat(func, inst.args[1]) {
                        if c.is_power_of_two() {
                            let s = c.trailing_zeros().min(bits);
                            return KnownBits {
                                zeros: ((a.zeros << s) | width_mask(s)) & m,
                                ones: (a.ones << s) & m,
                            };
                        }
                    }
                    KnownBits::unknown()
                }
                _ => KnownBits::unknown(),
            }
        }
        Opcode::Un(op) => {
            use crate::ops::UnOp;
            match op {
                UnOp::Ctpop | UnOp::Ctlz | UnOp::Cttz => {
                    // Result is at most `bits`, so high bits are zero.
                    let top = 64 - (bits as u64).leading_zeros();
                    KnownBits { zeros: !width_mask(top + 1) & m, ones: 0 }
                }
                _ => KnownBits::unknown(),
            }
        }
        Opcode::Cast(op) => {
            let a = lookup(func, known, inst.args[0]);
            let from_bits = func.value_type(inst.args[0]).bits();
            match op {
                CastOp::Zext => KnownBits { zeros: a.zeros | (m & !width_mask(from_bits)), ones: a.ones },
                CastOp::Trunc => KnownBits { zeros: a.zeros & m, ones: a.ones & m },
                CastOp::Sext => {
                    let sign = 1u64 << (from_bits - 1);
                    let high = m & !width_mask(from_bits);
                    if a.zeros & sign != 0 {
                        KnownBits { zeros: a.zeros | high, ones: a.ones }
                    } else if a.ones & sign != 0 {
                        KnownBits { zeros: a.zeros, ones: a.ones | high }
                    } else {
                        KnownBits { zeros: a.zeros & width_mask(from_bits - 1), ones: a.ones & width_mask(from_bits - 1) }
                    }
                }
                CastOp::Bitcast => {
                    if func.value_type(inst.args[0]).bits() == bits {
                        a
                    } else {
                        KnownBits::unknown()
                    }
                }
                _ => KnownBits::unknown(),
            }
        }
        Opcode::Select => get(1).meet(get(2)),
        Opcode::Phi => {
            let mut kb: Option<KnownBits> = None;
            for (i, _) in inst.args.iter().enumerate() {
                let k = get(i);
                kb = Some(match kb {
                    None => k,
                    Some(acc) => acc.meet(k),
                });
            }
            kb.unwrap_or_default()
        }
        Opcode::ICmp(_) | Opcode::FCmp(_) => KnownBits::unknown(),
        _ => KnownBits::unknown(),
    }
}

fn shift_amount(func: &Function, amount: ValueRef, bits: u32) -> Option<u32> {
    let c = const_splat(func, amount)?;
    if c >= bits as u64 {
        return None;
    }
    Some(c as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    fn kb(text: &str) -> KnownBits {
        let m = parse_module(text).unwrap();
        known_bits_of_return(&m.functions[0]).unwrap()
    }

    #[test]
    fn and_with_mask_clears_high_bits() {
        let k = kb("define i32 @f(i32 %x) {\nentry:\n  %a = and i32 %x, 255\n  ret i32 %a\n}");
        assert_eq!(k.zeros, 0xffff_ff00);
        assert_eq!(k.ones, 0);
    }

    #[test]
    fn or_sets_bits() {
        let k = kb("define i32 @f(i32 %x) {\nentry:\n  %a = or i32 %x, 1\n  ret i32 %a\n}");
        assert_eq!(k.ones, 1);
    }

    #[test]
    fn shl_introduces_low_zeros() {
        let k = kb("define i32 @f(i32 %x) {\nentry:\n  %a = shl i32 %x, 4\n  ret i32 %a\n}");
        assert_eq!(k.zeros & 0xf, 0xf);
    }

    #[test]
    fn zext_knows_high_bits() {
        let k = kb(
            "define i32 @f(i8 %x) {\nentry:\n  %a = zext i8 %x to i32\n  ret i32 %a\n}",
        );
        assert_eq!(k.zeros, 0xffff_ff00);
    }

    #[test]
    fn conflict_detection() {
        let a = KnownBits { zeros: 1, ones: 0 };
        let b = KnownBits { zeros: 0, ones: 1 };
        assert!(a.conflicts(b));
        assert!(!a.conflicts(a));
    }
}

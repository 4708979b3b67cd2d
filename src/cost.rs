// Candidate cost estimation. Two tiers:
//
// - `approx_cost`: a target-independent weighted node count used to order and
//   prune candidates cheaply.
// - `machine_cost`: assembles a representative x86-64 lowering of the function
//   with iced-x86 for every registered (triple, cpu) target and sums the
//   emitted text bytes. Constructs without a representative lowering yield
//   `None`, which disables the machine-cost gate for that candidate.
//
// The target registry is process-wide and lazily initialized; `init_targets`
// may install a different set before first use.

use crate::ir::{CastOp, Function, Module, Opcode};
use crate::ops::{BinOp, UnOp};
use iced_x86::code_asm::{registers::cl, *};
use iced_x86::IcedError;
use std::sync::OnceLock;

/// One lowering target. The cpu name is carried for reporting; sizing is
/// done at the ISA level.
#[derive(Debug, Clone)]
pub struct Target {
    pub triple: String,
    pub cpu: String,
}

static TARGETS: OnceLock<Vec<Target>> = OnceLock::new();

/// Install the target list; only effective before the first cost query.
pub fn init_targets(targets: Vec<Target>) {
    let _ = TARGETS.set(targets);
}

fn targets() -> &'static [Target] {
    TARGETS.get_or_init(|| {
        vec![Target { triple: "x86_64-unknown-linux-gnu".into(), cpu: "skylake".into() }]
    })
}

/// Weighted node count over the function's reachable instructions.
pub fn approx_cost(func: &Function) -> u64 {
    let mut cost = 0u64;
    for id in func.inst_ids_in_layout() {
        let inst = func.inst(id);
        cost += match &inst.op {
            Opcode::Bin(op) => match op {
                BinOp::SDiv | BinOp::UDiv | BinOp::FDiv => 4,
                BinOp::Mul | BinOp::FMul => 2,
                _ => 1,
            },
            Opcode::Un(op) => match op {
                UnOp::BitReverse => 3,
                UnOp::Ctpop | UnOp::Ctlz | UnOp::Cttz => 2,
                _ => 1,
            },
            Opcode::ICmp(_) | Opcode::FCmp(_) => 1,
            // Integer width moves are subregister operations.
            Opcode::Cast(CastOp::Bitcast | CastOp::Zext | CastOp::Sext | CastOp::Trunc) => 0,
            Opcode::Cast(_) => 1,
            Opcode::Select => 1,
            Opcode::ExtractElement | Opcode::InsertElement => 1,
            Opcode::ShuffleVector => 2,
            Opcode::Call => 3,
            Opcode::Phi | Opcode::Ret | Opcode::Br | Opcode::CondBr | Opcode::Switch
            | Opcode::Unreachable => 0,
        };
    }
    cost
}

/// Assembled text size of `func` summed over the registered targets, or
/// `None` when some construct has no representative lowering.
pub fn machine_cost(module: &Module, func: &Function) -> Option<u64> {
    let mut total = 0u64;
    for t in targets() {
        if !t.triple.starts_with("x86_64") {
            log::debug!(target: "peepopt::cost", "no encoder for target {}", t.triple);
            continue;
        }
        total += encode_for_x64(module, func).ok()?;
    }
    if total == 0 {
        None
    } else {
        Some(total)
    }
}

enum LowerError {
    Unsupported,
    Asm(IcedError),
}

impl From<IcedError> for LowerError {
    fn from(e: IcedError) -> LowerError {
        LowerError::Asm(e)
    }
}

fn encode_for_x64(module: &Module, func: &Function) -> Result<u64, LowerError> {
    let mut a = CodeAssembler::new(64)?;
    for id in func.inst_ids_in_layout() {
        lower_inst(&mut a, module, func, id.0 as usize)?;
    }
    let bytes = a.assemble(0x1000)?;
    Ok(bytes.len() as u64)
}

/// Width class of an instruction: the widest value it touches.
fn width_of(func: &Function, idx: usize) -> u32 {
    let inst = &func.insts[idx];
    let mut w = if inst.ty.is_valid() { inst.ty.width() } else { 0 };
    for arg in &inst.args {
        w = w.max(func.value_type(*arg).width());
    }
    w
}

fn lower_inst(
    a: &mut CodeAssembler,
    _module: &Module,
    func: &Function,
    idx: usize,
) -> Result<(), LowerError> {
    let inst = &func.insts[idx];
    let ty = inst.ty;
    let w = width_of(func, idx);
    if ty.is_valid() && ty.is_fp() && ty.bits() == 128 {
        return Err(LowerError::Unsupported);
    }
    let wide = w > 32 && w <= 64;
    match &inst.op {
        Opcode::Bin(op) => {
            if ty.is_fp() {
                lower_fp_bin(a, *op, ty.lane() > 1, ty.bits())?;
            } else if ty.lane() > 1 || w > 64 {
                lower_vec_bin(a, *op, w)?;
            } else {
                lower_scalar_bin(a, *op, wide)?;
            }
        }
        Opcode::Un(op) => {
            if ty.is_fp() {
                match op {
                    UnOp::FNeg | UnOp::FAbs => a.xorps(xmm0, xmm1)?,
                    _ => a.roundss(xmm0, xmm1, 0)?,
                }
            } else if w > 64 {
                // One logic op per 128 bits as a stand-in.
                a.pshufb(xmm0, xmm1)?;
            } else {
                match op {
                    UnOp::Ctpop => {
                        if wide {
                            a.popcnt(rax, rcx)?
                        } else {
                            a.popcnt(eax, ecx)?
                        }
                    }
                    UnOp::Ctlz => {
                        if wide {
                            a.lzcnt(rax, rcx)?
                        } else {
                            a.lzcnt(eax, ecx)?
                        }
                    }
                    UnOp::Cttz => {
                        if wide {
                            a.tzcnt(rax, rcx)?
                        } else {
                            a.tzcnt(eax, ecx)?
                        }
                    }
                    UnOp::Bswap => {
                        if wide {
                            a.bswap(rax)?
                        } else {
                            a.bswap(eax)?
                        }
                    }
                    UnOp::BitReverse => {
                        // No single instruction; a short shift/mask cascade.
                        for _ in 0..3 {
                            a.shr(eax, 1u32)?;
                            a.and(eax, 0x5555_5555)?;
                        }
                    }
                    _ => return Err(LowerError::Unsupported),
                }
            }
        }
        Opcode::ICmp(_) => {
            if func.value_type(inst.args[0]).lane() > 1 {
                a.pcmpeqd(xmm0, xmm1)?;
            } else if func.value_type(inst.args[0]).width() > 32 {
                a.cmp(rax, rcx)?;
                a.sete(al)?;
            } else {
                a.cmp(eax, ecx)?;
                a.sete(al)?;
            }
        }
        Opcode::FCmp(_) => {
            if func.value_type(inst.args[0]).bits() == 64 {
                a.ucomisd(xmm0, xmm1)?;
            } else {
                a.ucomiss(xmm0, xmm1)?;
            }
            a.sete(al)?;
        }
        Opcode::Cast(op) => lower_cast(a, func, idx, *op)?,
        Opcode::Select => {
            if ty.lane() > 1 {
                a.pblendvb(xmm0, xmm1)?;
            } else if ty.is_fp() {
                a.test(al, al)?;
                a.movaps(xmm0, xmm1)?;
            } else {
                a.test(al, al)?;
                if wide {
                    a.cmovne(rax, rcx)?;
                } else {
                    a.cmovne(eax, ecx)?;
                }
            }
        }
        Opcode::ExtractElement => {
            if ty.width() > 32 {
                a.pextrq(rax, xmm0, 0)?;
            } else {
                a.pextrd(eax, xmm0, 0)?;
            }
        }
        Opcode::InsertElement => {
            if func.value_type(inst.args[1]).width() > 32 {
                a.pinsrq(xmm0, rax, 0)?;
            } else {
                a.pinsrd(xmm0, eax, 0)?;
            }
        }
        Opcode::ShuffleVector => match w {
            0..=128 => a.pshufb(xmm0, xmm1)?,
            129..=256 => a.vpshufb(ymm0, ymm1, ymm2)?,
            _ => a.vpshufb(zmm0, zmm1, zmm2)?,
        },
        Opcode::Call => match w {
            0..=128 => a.paddb(xmm0, xmm1)?,
            129..=256 => a.vpaddb(ymm0, ymm1, ymm2)?,
            _ => a.vpaddb(zmm0, zmm1, zmm2)?,
        },
        Opcode::Ret => a.ret()?,
        Opcode::Phi | Opcode::Br | Opcode::CondBr | Opcode::Switch | Opcode::Unreachable => {}
    }
    Ok(())
}

fn lower_scalar_bin(a: &mut CodeAssembler, op: BinOp, wide: bool) -> Result<(), LowerError> {
    match op {
        BinOp::And => {
            if wide {
                a.and(rax, rcx)?
            } else {
                a.and(eax, ecx)?
            }
        }
        BinOp::Or => {
            if wide {
                a.or(rax, rcx)?
            } else {
                a.or(eax, ecx)?
            }
        }
        BinOp::Xor => {
            if wide {
                a.xor(rax, rcx)?
            } else {
                a.xor(eax, ecx)?
            }
        }
        BinOp::Add => {
            if wide {
                a.add(rax, rcx)?
            } else {
                a.add(eax, ecx)?
            }
        }
        BinOp::Sub => {
            if wide {
                a.sub(rax, rcx)?
            } else {
                a.sub(eax, ecx)?
            }
        }
        BinOp::Mul => {
            if wide {
                a.mul(rcx)?
            } else {
                a.mul(ecx)?
            }
        }
        BinOp::Shl => {
            if wide {
                a.shl(rax, cl)?
            } else {
                a.shl(eax, cl)?
            }
        }
        BinOp::LShr => {
            if wide {
                a.shr(rax, cl)?
            } else {
                a.shr(eax, cl)?
            }
        }
        BinOp::AShr => {
            if wide {
                a.sar(rax, cl)?
            } else {
                a.sar(eax, cl)?
            }
        }
        BinOp::UDiv => {
            a.xor(edx, edx)?;
            if wide {
                a.div(rcx)?
            } else {
                a.div(ecx)?
            }
        }
        BinOp::SDiv => {
            if wide {
                a.cqo()?;
                a.idiv(rcx)?
            } else {
                a.cdq()?;
                a.idiv(ecx)?
            }
        }
        BinOp::UMax | BinOp::UMin | BinOp::SMax | BinOp::SMin => {
            if wide {
                a.cmp(rax, rcx)?;
                a.cmovb(rax, rcx)?;
            } else {
                a.cmp(eax, ecx)?;
                a.cmovb(eax, ecx)?;
            }
        }
        _ => return Err(LowerError::Unsupported),
    }
    Ok(())
}

fn lower_vec_bin(a: &mut CodeAssembler, op: BinOp, w: u32) -> Result<(), LowerError> {
    // One representative SIMD instruction per width class; divisions have no
    // vector lowering.
    if matches!(op, BinOp::SDiv | BinOp::UDiv) {
        return Err(LowerError::Unsupported);
    }
    match w {
        0..=128 => match op {
            BinOp::And => a.pand(xmm0, xmm1)?,
            BinOp::Or => a.por(xmm0, xmm1)?,
            BinOp::Xor => a.pxor(xmm0, xmm1)?,
            BinOp::Mul => a.pmulld(xmm0, xmm1)?,
            BinOp::Shl => a.pslld(xmm0, xmm1)?,
            BinOp::LShr => a.psrld(xmm0, xmm1)?,
            BinOp::AShr => a.psrad(xmm0, xmm1)?,
            BinOp::UMax | BinOp::SMax => a.pmaxsd(xmm0, xmm1)?,
            BinOp::UMin | BinOp::SMin => a.pminsd(xmm0, xmm1)?,
            _ => a.paddd(xmm0, xmm1)?,
        },
        129..=256 => match op {
            BinOp::And => a.vpand(ymm0, ymm1, ymm2)?,
            BinOp::Or => a.vpor(ymm0, ymm1, ymm2)?,
            BinOp::Xor => a.vpxor(ymm0, ymm1, ymm2)?,
            BinOp::Mul => a.vpmulld(ymm0, ymm1, ymm2)?,
            _ => a.vpaddd(ymm0, ymm1, ymm2)?,
        },
        _ => match op {
            BinOp::Mul => a.vpmulld(zmm0, zmm1, zmm2)?,
            _ => a.vpaddd(zmm0, zmm1, zmm2)?,
        },
    }
    Ok(())
}

fn lower_fp_bin(a: &mut CodeAssembler, op: BinOp, vector: bool, bits: u32) -> Result<(), LowerError> {
    if bits == 16 {
        // Via single precision: up-convert, operate, down-convert.
        a.vcvtph2ps(xmm0, xmm1)?;
        a.addss(xmm0, xmm1)?;
        a.vcvtps2ph(xmm1, xmm0, 0)?;
        return Ok(());
    }
    match (op, vector, bits) {
        (BinOp::FDiv, false, 32) => a.divss(xmm0, xmm1)?,
        (BinOp::FDiv, false, 64) => a.divsd(xmm0, xmm1)?,
        (BinOp::FDiv, true, 32) => a.divps(xmm0, xmm1)?,
        (BinOp::FDiv, true, 64) => a.divpd(xmm0, xmm1)?,
        (BinOp::FMul, false, 32) => a.mulss(xmm0, xmm1)?,
        (BinOp::FMul, false, 64) => a.mulsd(xmm0, xmm1)?,
        (BinOp::FMul, true, 32) => a.mulps(xmm0, xmm1)?,
        (BinOp::FMul, true, 64) => a.mulpd(xmm0, xmm1)?,
        (_, false, 32) => a.addss(xmm0, xmm1)?,
        (_, false, 64) => a.addsd(xmm0, xmm1)?,
        (_, true, 32) => a.addps(xmm0, xmm1)?,
        (_, true, 64) => a.addpd(xmm0, xmm1)?,
        _ => return Err(LowerError::Unsupported),
    }
    Ok(())
}

fn lower_cast(
    a: &mut CodeAssembler,
    func: &Function,
    idx: usize,
    op: CastOp,
) -> Result<(), LowerError> {
    let inst = &func.insts[idx];
    let from = func.value_type(inst.args[0]);
    let to = inst.ty;
    match op {
        CastOp::Bitcast => {}
        CastOp::Zext | CastOp::Sext => {
            if to.lane() > 1 {
                a.pmovzxbw(xmm0, xmm1)?;
            } else if from.bits() <= 8 {
                if matches!(op, CastOp::Zext) {
                    a.movzx(eax, cl)?;
                } else {
                    a.movsx(eax, cl)?;
                }
            } else if matches!(op, CastOp::Zext) {
                a.movzx(eax, cx)?;
            } else {
                a.movsx(eax, cx)?;
            }
        }
        CastOp::Trunc => {
            if to.lane() > 1 {
                a.pshufb(xmm0, xmm1)?;
            } else if to.width() > 32 {
                a.mov(rax, rcx)?;
            } else {
                a.mov(eax, ecx)?;
            }
        }
        CastOp::FpExt => a.cvtss2sd(xmm0, xmm1)?,
        CastOp::FpTrunc => a.cvtsd2ss(xmm0, xmm1)?,
        CastOp::FpToUi | CastOp::FpToSi => {
            if from.bits() == 64 {
                a.cvttsd2si(eax, xmm0)?;
            } else {
                a.cvttss2si(eax, xmm0)?;
            }
        }
        CastOp::UiToFp | CastOp::SiToFp => {
            if to.bits() == 64 {
                a.cvtsi2sd(xmm0, ecx)?;
            } else {
                a.cvtsi2ss(xmm0, ecx)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    fn parse(text: &str) -> Module {
        parse_module(text).unwrap()
    }

    #[test]
    fn fewer_nodes_cost_less() {
        let big = parse(
            "define i32 @f(i32 %x, i32 %y) {\nentry:\n  %t = add i32 %y, 0\n  %r = add i32 %x, %t\n  ret i32 %r\n}",
        );
        let small = parse(
            "define i32 @f(i32 %x, i32 %y) {\nentry:\n  %r = add i32 %x, %y\n  ret i32 %r\n}",
        );
        assert!(approx_cost(&small.functions[0]) < approx_cost(&big.functions[0]));
    }

    #[test]
    fn bitcasts_are_free() {
        let m = parse(
            "define i32 @f(<4 x i8> %v) {\nentry:\n  %b = bitcast <4 x i8> %v to i32\n  ret i32 %b\n}",
        );
        assert_eq!(approx_cost(&m.functions[0]), 0);
    }

    #[test]
    fn machine_cost_orders_candidates() {
        let big = parse(
            "define i32 @f(i32 %x, i32 %y) {\nentry:\n  %t = add i32 %y, 0\n  %u = mul i32 %t, %x\n  %r = add i32 %u, %t\n  ret i32 %r\n}",
        );
        let small = parse(
            "define i32 @f(i32 %x, i32 %y) {\nentry:\n  %r = add i32 %x, %y\n  ret i32 %r\n}",
        );
        let cb = machine_cost(&big, &big.functions[0]).unwrap();
        let c_small = machine_cost(&small, &small.functions[0]).unwrap();
        assert!(c_small < cb, "small {} vs big {}", c_small, cb);
    }

    #[test]
    fn fp128_has_no_machine_cost() {
        let m = parse(
            "define fp128 @f(fp128 %x, fp128 %y) {\nentry:\n  %r = fadd fp128 %x, %y\n  ret fp128 %r\n}",
        );
        assert_eq!(machine_cost(&m, &m.functions[0]), None);
    }
}

// Structural well-formedness checks for functions: block/terminator shape, phi
// placement and incoming-edge agreement, per-opcode operand typing, and SSA
// dominance of operands. The slicer treats a failure here as fatal; the
// enumerator treats it as a discarded candidate.

use super::analysis::{predecessors, Analysis};
use super::{CastOp, Function, Module, Opcode, ValueRef};
use crate::ops::BinOp;
use crate::types::FP_BITS;
use std::collections::HashSet;

pub fn verify_function(module: &Module, func: &Function) -> Result<(), String> {
    if func.blocks.is_empty() {
        return Err(format!("@{}: function has no blocks", func.name));
    }
    if !func.ret_ty.is_valid() {
        return Err(format!("@{}: invalid return type", func.name));
    }
    for c in &func.consts {
        if !c.ty.is_valid() {
            return Err(format!("@{}: invalid constant type", func.name));
        }
        if c.ty.is_fp() && !FP_BITS.contains(&c.ty.bits()) {
            return Err(format!("@{}: bad fp width {}", func.name, c.ty.bits()));
        }
    }

    let preds = predecessors(func);

    for (bi, block) in func.blocks.iter().enumerate() {
        let Some(&last) = block.insts.last() else {
            return Err(format!("@{}: empty block '{}'", func.name, block.name));
        };
        if !func.inst(last).is_terminator() {
            return Err(format!("@{}: block '{}' lacks a terminator", func.name, block.name));
        }
        let mut seen_non_phi = false;
        for (pos, &id) in block.insts.iter().enumerate() {
            let inst = func.inst(id);
            if inst.is_terminator() && pos + 1 != block.insts.len() {
                return Err(format!(
                    "@{}: terminator in the middle of block '{}'",
                    func.name, block.name
                ));
            }
            if inst.is_phi() {
                if seen_non_phi {
                    return Err(format!(
                        "@{}: phi after non-phi in block '{}'",
                        func.name, block.name
                    ));
                }
                let incoming: HashSet<_> = inst.blocks.iter().copied().collect();
                let expect: HashSet<_> = preds
                    .get(&super::BlockId(bi as u32))
                    .map(|v| v.iter().copied().collect())
                    .unwrap_or_default();
                if incoming != expect {
                    return Err(format!(
                        "@{}: phi incoming blocks disagree with predecessors of '{}'",
                        func.name, block.name
                    ));
                }
            } else {
                seen_non_phi = true;
            }
            check_inst_types(module, func, id.0 as usize)?;
        }
    }

    check_dominance(func)?;
    Ok(())
}

fn check_inst_types(module: &Module, func: &Function, idx: usize) -> Result<(), String> {
    let inst = &func.insts[idx];
    let ty = inst.ty;
    let vt = |v: ValueRef| func.value_type(v);
    let err = |msg: &str| Err(format!("@{}: %t{}: {}", func.name, idx, msg));

    match &inst.op {
        Opcode::Bin(op) => {
            if inst.args.len() != 2 {
                return err("binary op needs two operands");
            }
            if vt(inst.args[0]) != ty || vt(inst.args[1]) != ty {
                return err("operand type mismatch");
            }
            if op.is_fp() != ty.is_fp() {
                return err("fp-ness of operator and type disagree");
            }
            if matches!(op, BinOp::SDiv | BinOp::UDiv) && ty.is_fp() {
                return err("integer division on fp type");
            }
        }
        Opcode::Un(op) => {
            if inst.args.len() != 1 {
                return err("unary op needs one operand");
            }
            if vt(inst.args[0]) != ty {
                return err("operand type mismatch");
            }
            if op.is_fp() != ty.is_fp() {
                return err("fp-ness of operator and type disagree");
            }
        }
        Opcode::ICmp(_) => {
            let (a, b) = (vt(inst.args[0]), vt(inst.args[1]));
            if a != b || a.is_fp() {
                return err("icmp needs matching integer operands");
            }
            if ty != crate::types::Type::integer_vectorizable(a.lane(), 1) {
                return err("icmp result must be i1 per lane");
            }
        }
        Opcode::FCmp(_) => {
            let (a, b) = (vt(inst.args[0]), vt(inst.args[1]));
            if a != b || !a.is_fp() {
                return err("fcmp needs matching fp operands");
            }
            if ty != crate::types::Type::integer_vectorizable(a.lane(), 1) {
                return err("fcmp result must be i1 per lane");
            }
        }
        Opcode::Cast(op) => {
            let from = vt(inst.args[0]);
            let ok = match op {
                CastOp::Sext | CastOp::Zext => {
                    !from.is_fp() && !ty.is_fp() && from.lane() == ty.lane() && from.bits() < ty.bits()
                }
                CastOp::Trunc => {
                    !from.is_fp() && !ty.is_fp() && from.lane() == ty.lane() && from.bits() > ty.bits()
                }
                CastOp::FpExt => from.is_fp() && ty.is_fp() && from.lane() == ty.lane() && from.bits() < ty.bits(),
                CastOp::FpTrunc => from.is_fp() && ty.is_fp() && from.lane() == ty.lane() && from.bits() > ty.bits(),
                CastOp::FpToUi | CastOp::FpToSi => from.is_fp() && !ty.is_fp() && from.lane() == ty.lane(),
                CastOp::UiToFp | CastOp::SiToFp => !from.is_fp() && ty.is_fp() && from.lane() == ty.lane(),
                CastOp::Bitcast => from.same_width(&ty),
            };
            if !ok {
                return err("illegal cast");
            }
        }
        Opcode::Select => {
            let c = vt(inst.args[0]);
            if !(c.is_bool() || (!c.is_fp() && c.bits() == 1 && c.lane() == ty.lane())) {
                return err("select condition must be boolean");
            }
            if vt(inst.args[1]) != ty || vt(inst.args[2]) != ty {
                return err("select arm type mismatch");
            }
        }
        Opcode::ExtractElement => {
            let v = vt(inst.args[0]);
            if !v.is_vector() || v.as_scalar() != ty {
                return err("extractelement shape mismatch");
            }
            if vt(inst.args[1]).is_fp() || vt(inst.args[1]).lane() != 1 {
                return err("extractelement index must be a scalar integer");
            }
        }
        Opcode::InsertElement => {
            let v = vt(inst.args[0]);
            if v != ty || !v.is_vector() {
                return err("insertelement shape mismatch");
            }
            if vt(inst.args[1]) != ty.as_scalar() {
                return err("insertelement element type mismatch");
            }
            if vt(inst.args[2]).is_fp() || vt(inst.args[2]).lane() != 1 {
                return err("insertelement index must be a scalar integer");
            }
        }
        Opcode::ShuffleVector => {
            let a = vt(inst.args[0]);
            let b = vt(inst.args[1]);
            let m = vt(inst.args[2]);
            if a != b || !a.is_vector() {
                return err("shuffle sources must share a vector type");
            }
            if m.is_fp() {
                return err("shuffle mask must be integers");
            }
            if ty != a.as_scalar().as_vector(m.lane()) {
                return err("shuffle result shape mismatch");
            }
            match inst.args[2] {
                ValueRef::Const(c) => {
                    let mask = func.constant(c);
                    for &l in mask.lanes() {
                        if l >= 2 * a.lane() as u64 {
                            return err("shuffle mask lane out of range");
                        }
                    }
                }
                _ => return err("shuffle mask must be a constant"),
            }
        }
        Opcode::Call => {
            let name = inst.callee.as_deref().unwrap_or("");
            let Some(decl) = module.find_decl(name) else {
                return err(&format!("call to undeclared '@{}'", name));
            };
            if decl.params.len() != inst.args.len() {
                return err("call arity mismatch");
            }
            for (p, a) in decl.params.iter().zip(&inst.args) {
                if vt(*a) != *p {
                    return err("call argument type mismatch");
                }
            }
            if decl.ret_ty != ty {
                return err("call return type mismatch");
            }
        }
        Opcode::Phi => {
            for a in &inst.args {
                if vt(*a) != ty {
                    return err("phi incoming type mismatch");
                }
            }
        }
        Opcode::Ret => {
            if vt(inst.args[0]) != func.ret_ty {
                return err("return type mismatch");
            }
        }
        Opcode::Br | Opcode::Unreachable => {}
        Opcode::CondBr => {
            if !vt(inst.args[0]).is_bool() {
                return err("conditional branch needs an i1 condition");
            }
        }
        Opcode::Switch => {
            let s = vt(inst.args[0]);
            if s.is_fp() || s.lane() != 1 {
                return err("switch scrutinee must be a scalar integer");
            }
        }
    }
    Ok(())
}

fn check_dominance(func: &Function) -> Result<(), String> {
    let analysis = Analysis::new(func);
    for (bi, block) in func.blocks.iter().enumerate() {
        if !analysis.is_reachable(super::BlockId(bi as u32)) {
            continue;
        }
        for &id in &block.insts {
            let inst = func.inst(id);
            if inst.is_phi() {
                // Incoming values must dominate the edge, i.e. the incoming
                // block's terminator.
                for (v, b) in inst.args.iter().zip(&inst.blocks) {
                    if let ValueRef::Inst(_) = v {
                        let Some(term) = func.terminator(*b) else {
                            return Err(format!("@{}: phi from terminatorless block", func.name));
                        };
                        if !analysis.dominates(*v, term) && !matches!(v, ValueRef::Inst(i) if *i == term)
                        {
                            return Err(format!(
                                "@{}: phi incoming value does not dominate edge",
                                func.name
                            ));
                        }
                    }
                }
                continue;
            }
            for v in &inst.args {
                if let ValueRef::Inst(_) = v {
                    if !analysis.dominates(*v, id) {
                        return Err(format!(
                            "@{}: operand of %t{} does not dominate its use",
                            func.name, id.0
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    #[test]
    fn accepts_well_formed() {
        let m = parse_module(
            r#"
            define i32 @f(i32 %x, i32 %y) {
            entry:
              %c = icmp ult i32 %x, %y
              %s = select i1 %c, i32 %x, i32 %y
              ret i32 %s
            }
            "#,
        )
        .unwrap();
        verify_function(&m, &m.functions[0]).unwrap();
    }

    #[test]
    fn rejects_use_before_def() {
        use crate::ir::{Function, Inst, InstId, Module, ValueRef};
        use crate::ops::BinOp;
        use crate::types::Type;
        let mut f = Function::new("bad", Type::integer(32));
        let x = f.add_param("x", Type::integer(32));
        let bb = f.add_block("entry");
        // %t0 uses %t1 which is defined after it.
        let a = f.push_inst(bb, Inst::bin(BinOp::Add, Type::integer(32), x, ValueRef::Inst(InstId(1))));
        let b = f.push_inst(bb, Inst::bin(BinOp::Add, Type::integer(32), x, x));
        let _ = (a, b);
        f.push_inst(bb, Inst::ret(ValueRef::Inst(InstId(1))));
        let m = Module::new();
        assert!(verify_function(&m, &f).is_err());
    }

    #[test]
    fn rejects_type_mismatch() {
        let m = parse_module(
            r#"
            define i32 @f(i32 %x, i16 %y) {
            entry:
              %z = zext i16 %y to i32
              ret i32 %z
            }
            "#,
        )
        .unwrap();
        verify_function(&m, &m.functions[0]).unwrap();
        // Narrowing zext is illegal.
        let bad = parse_module(
            r#"
            define i8 @g(i32 %x) {
            entry:
              %z = zext i32 %x to i8
              ret i8 %z
            }
            "#,
        )
        .unwrap();
        assert!(verify_function(&bad, &bad.functions[0]).is_err());
    }
}
